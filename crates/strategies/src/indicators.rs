//! Technical indicators as pure functions over price slices.
//!
//! The f64 variants feed the ML feature vector and the LLM factor summary;
//! the Decimal SMA feeds the trend and mean-reversion kernels, which compare
//! prices exactly.

use rust_decimal::Decimal;

/// Simple moving average of the last `period` values.
pub fn sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }
    let window = &prices[prices.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Decimal SMA, exact arithmetic.
pub fn sma_decimal(prices: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || prices.len() < period {
        return None;
    }
    let window = &prices[prices.len() - period..];
    let sum: Decimal = window.iter().copied().sum();
    Some(sum / Decimal::from(period as u64))
}

/// Exponential moving average over the whole slice with span `period`.
pub fn ema(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.is_empty() {
        return None;
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut value = prices[0];
    for price in &prices[1..] {
        value = alpha * price + (1.0 - alpha) * value;
    }
    Some(value)
}

/// Relative strength index over the last `period` values, in [0, 100].
pub fn rsi(prices: &[f64], period: usize) -> Option<f64> {
    if prices.len() < period || period < 2 {
        return None;
    }
    let window = &prices[prices.len() - period..];
    let mut gains = 0.0;
    let mut losses = 0.0;
    for pair in window.windows(2) {
        let delta = pair[1] - pair[0];
        if delta > 0.0 {
            gains += delta;
        } else {
            losses -= delta;
        }
    }
    let count = (period - 1) as f64;
    let avg_gain = gains / count;
    let avg_loss = losses / count;
    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// MACD line: EMA(12) - EMA(26). Needs at least 26 values.
pub fn macd(prices: &[f64]) -> Option<f64> {
    if prices.len() < 26 {
        return None;
    }
    Some(ema(prices, 12)? - ema(prices, 26)?)
}

/// Position of the last price inside the Bollinger band of the last
/// `period` values: 0 at the lower band, 1 at the upper.
pub fn bollinger_position(prices: &[f64], period: usize) -> Option<f64> {
    if prices.len() < period || period < 2 {
        return None;
    }
    let window = &prices[prices.len() - period..];
    let mean = window.iter().sum::<f64>() / period as f64;
    let variance = window.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / period as f64;
    let std = variance.sqrt();
    let upper = mean + 2.0 * std;
    let lower = mean - 2.0 * std;
    if upper - lower <= f64::EPSILON {
        return Some(0.5);
    }
    let last = *window.last().unwrap();
    Some((last - lower) / (upper - lower))
}

/// Return of the last price versus `period` values ago, as a fraction.
pub fn trailing_return(prices: &[f64], period: usize) -> Option<f64> {
    if prices.len() <= period || period == 0 {
        return None;
    }
    let past = prices[prices.len() - 1 - period];
    if past == 0.0 {
        return None;
    }
    Some((prices[prices.len() - 1] - past) / past)
}

/// Coefficient of variation of the last `period` values.
pub fn volatility(prices: &[f64], period: usize) -> Option<f64> {
    if prices.len() < period || period < 2 {
        return None;
    }
    let window = &prices[prices.len() - period..];
    let mean = window.iter().sum::<f64>() / period as f64;
    if mean == 0.0 {
        return None;
    }
    let variance = window.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / period as f64;
    Some(variance.sqrt() / mean)
}
