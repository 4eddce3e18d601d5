//! Backtest statistics — pure functions over the equity curve and trade
//! tape.

use rust_decimal::prelude::ToPrimitive;

use model::{BacktestStats, EquityPoint, Timeframe, TradeRecord};

/// Compute the full statistics block.
pub fn compute(
    equity_curve: &[EquityPoint],
    trades: &[TradeRecord],
    timeframe: Timeframe,
) -> BacktestStats {
    let equity: Vec<f64> = equity_curve
        .iter()
        .map(|p| p.equity.to_f64().unwrap_or(0.0))
        .collect();
    let closed_pnls: Vec<f64> = trades
        .iter()
        .filter_map(|t| t.pnl)
        .map(|p| p.to_f64().unwrap_or(0.0))
        .collect();

    let wins: Vec<f64> = closed_pnls.iter().copied().filter(|p| *p > 0.0).collect();
    let losses: Vec<f64> = closed_pnls.iter().copied().filter(|p| *p < 0.0).collect();

    BacktestStats {
        total_return: total_return(&equity),
        win_rate: if closed_pnls.is_empty() {
            0.0
        } else {
            wins.len() as f64 / closed_pnls.len() as f64
        },
        max_drawdown: max_drawdown(&equity),
        sharpe_ratio: sharpe_ratio(&equity, timeframe),
        profit_factor: profit_factor(&wins, &losses),
        mean_win: mean(&wins),
        mean_loss: mean(&losses).abs(),
    }
}

/// Total return as a fraction of initial equity.
pub fn total_return(equity: &[f64]) -> f64 {
    match (equity.first(), equity.last()) {
        (Some(&first), Some(&last)) if first > 0.0 => (last - first) / first,
        _ => 0.0,
    }
}

/// Maximum peak-to-trough fraction of the equity curve, as a positive
/// number (0.15 = 15% drawdown).
pub fn max_drawdown(equity: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0_f64;
    for &value in equity {
        if value > peak {
            peak = value;
        }
        if peak > 0.0 {
            let dd = (peak - value) / peak;
            if dd > worst {
                worst = dd;
            }
        }
    }
    worst
}

/// Mean over standard deviation of per-bar returns, annualized by the
/// timeframe's bar count. Zero when variance vanishes.
pub fn sharpe_ratio(equity: &[f64], timeframe: Timeframe) -> f64 {
    let returns = per_bar_returns(equity);
    if returns.len() < 2 {
        return 0.0;
    }
    let mean_r = mean(&returns);
    let variance = returns.iter().map(|r| (r - mean_r).powi(2)).sum::<f64>()
        / (returns.len() - 1) as f64;
    let std = variance.sqrt();
    if std < 1e-15 {
        return 0.0;
    }
    (mean_r / std) * timeframe.bars_per_year().sqrt()
}

/// Sum of gains over absolute sum of losses, capped at 100 when there are
/// no losses.
pub fn profit_factor(wins: &[f64], losses: &[f64]) -> f64 {
    let gains: f64 = wins.iter().sum();
    let pain: f64 = losses.iter().map(|l| l.abs()).sum();
    if pain < 1e-12 {
        return if gains > 0.0 { 100.0 } else { 0.0 };
    }
    (gains / pain).min(100.0)
}

fn per_bar_returns(equity: &[f64]) -> Vec<f64> {
    equity
        .windows(2)
        .map(|w| if w[0] > 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use model::{TradeKind, TradeSide};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn curve(values: &[i64]) -> Vec<EquityPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| EquityPoint {
                timestamp_ms: i as i64 * 60_000,
                equity: Decimal::from(*v),
            })
            .collect()
    }

    fn close_trade(pnl: Decimal) -> TradeRecord {
        TradeRecord {
            id: 0,
            strategy_id: 1,
            run_id: 0,
            kind: TradeKind::Close,
            side: TradeSide::Long,
            symbol: "BTCUSDT".into(),
            price: dec!(50000),
            quantity: dec!(0.01),
            notional: dec!(500),
            pnl: Some(pnl),
            executed_at: Utc::now(),
        }
    }

    #[test]
    fn total_return_fraction() {
        assert_eq!(total_return(&[10_000.0, 11_000.0]), 0.1);
        assert_eq!(total_return(&[10_000.0]), 0.0);
        assert_eq!(total_return(&[]), 0.0);
    }

    #[test]
    fn max_drawdown_peak_to_trough() {
        // Peak 110k, trough 90k → 18.18...%
        let dd = max_drawdown(&[100_000.0, 110_000.0, 90_000.0, 95_000.0]);
        assert!((dd - 20_000.0 / 110_000.0).abs() < 1e-12);

        assert_eq!(max_drawdown(&[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn sharpe_zero_for_constant_returns() {
        let equity: Vec<f64> = (0..100).map(|i| 1000.0 * 1.001f64.powi(i)).collect();
        assert_eq!(sharpe_ratio(&equity, Timeframe::D1), 0.0);
    }

    #[test]
    fn sharpe_positive_for_upward_noise() {
        let mut equity = vec![1000.0];
        for i in 1..200 {
            let r = if i % 2 == 0 { 1.002 } else { 1.0005 };
            equity.push(equity[i - 1] * r);
        }
        assert!(sharpe_ratio(&equity, Timeframe::D1) > 1.0);
    }

    #[test]
    fn profit_factor_cases() {
        assert_eq!(profit_factor(&[300.0, 500.0], &[-200.0]), 4.0);
        assert_eq!(profit_factor(&[100.0], &[]), 100.0);
        assert_eq!(profit_factor(&[], &[-50.0]), 0.0);
    }

    #[test]
    fn full_stats_block() {
        let equity = curve(&[10_000, 10_200, 9_900, 10_500]);
        let trades = vec![
            close_trade(dec!(200)),
            close_trade(dec!(-300)),
            close_trade(dec!(600)),
        ];
        let stats = compute(&equity, &trades, Timeframe::H1);

        assert!((stats.total_return - 0.05).abs() < 1e-12);
        assert!((stats.win_rate - 2.0 / 3.0).abs() < 1e-12);
        assert!((stats.mean_win - 400.0).abs() < 1e-12);
        assert!((stats.mean_loss - 300.0).abs() < 1e-12);
        assert!(stats.max_drawdown > 0.0);
        assert!(stats.profit_factor > 1.0);
    }

    #[test]
    fn open_trades_do_not_count_toward_win_rate() {
        let mut open = close_trade(dec!(0));
        open.kind = TradeKind::Open;
        open.pnl = None;
        let stats = compute(&curve(&[10_000, 10_000]), &[open], Timeframe::H1);
        assert_eq!(stats.win_rate, 0.0);
    }
}
