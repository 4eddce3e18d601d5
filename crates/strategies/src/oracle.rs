//! The direction-oracle seam shared by the ML and LLM kernels.
//!
//! Both kernels reduce their decision to `predict(features) → direction +
//! confidence`, so the live loop and the backtest drive identical call
//! sites. The forest oracle answers locally; the LLM oracle calls an
//! external completion endpoint.

use async_trait::async_trait;

use strategy_core::KernelError;

use crate::indicators;

/// Predicted price direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Long,
    Short,
}

/// An oracle's answer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub direction: Direction,
    /// In [0, 1]; the kernel gates trades on this.
    pub confidence: f64,
}

/// Named factor values computed from the price history.
#[derive(Debug, Clone, Default)]
pub struct Features {
    pub named: Vec<(String, f64)>,
}

impl Features {
    /// Factor values in declaration order, for vector consumers.
    pub fn values(&self) -> Vec<f64> {
        self.named.iter().map(|(_, v)| *v).collect()
    }

    pub fn len(&self) -> usize {
        self.named.len()
    }

    pub fn is_empty(&self) -> bool {
        self.named.is_empty()
    }
}

/// A source of direction predictions.
#[async_trait]
pub trait DirectionOracle: Send + Sync {
    /// `Ok(None)` means "no opinion" (model not ready, or a hold signal).
    async fn predict(&self, features: &Features) -> Result<Option<Prediction>, KernelError>;
}

/// Factor periods used for the multi-period indicator block.
pub const FEATURE_PERIODS: [usize; 4] = [5, 10, 20, 50];

/// Minimum history needed before a full feature vector exists.
pub const MIN_FEATURE_HISTORY: usize = 51;

/// Build the factor vector: per period in `FEATURE_PERIODS` an SMA, EMA,
/// RSI, MACD, Bollinger position, trailing return, and volatility, plus
/// 5/10/20-bar returns. Returns `None` until enough history exists.
pub fn build_features(prices: &[f64]) -> Option<Features> {
    if prices.len() < MIN_FEATURE_HISTORY {
        return None;
    }

    let mut named = Vec::new();
    for period in FEATURE_PERIODS {
        named.push((format!("sma_{}", period), indicators::sma(prices, period)?));
        named.push((format!("ema_{}", period), indicators::ema(prices, period)?));
        named.push((format!("rsi_{}", period), indicators::rsi(prices, period).unwrap_or(50.0)));
        named.push((format!("macd_{}", period), indicators::macd(prices).unwrap_or(0.0)));
        named.push((
            format!("bb_position_{}", period),
            indicators::bollinger_position(prices, period).unwrap_or(0.5),
        ));
        named.push((
            format!("return_{}", period),
            indicators::trailing_return(prices, period).unwrap_or(0.0),
        ));
        named.push((
            format!("volatility_{}", period),
            indicators::volatility(prices, period).unwrap_or(0.0),
        ));
    }
    for period in [5usize, 10, 20] {
        named.push((
            format!("momentum_{}", period),
            indicators::trailing_return(prices, period).unwrap_or(0.0),
        ));
    }

    Some(Features { named })
}
