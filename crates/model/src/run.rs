//! Strategy run records: one per start→stop episode.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::strategy::StrategyStatus;

/// Aggregate trade counters of a run, maintained atomically by the ledger
/// on every trade append.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunCounters {
    pub total_trades: u32,
    pub win_trades: u32,
    pub loss_trades: u32,
    pub realized_pnl: Decimal,
}

impl RunCounters {
    /// Fold one trade's pnl into the counters. `None` pnl (open/add trades)
    /// only bumps the total.
    pub fn apply(&mut self, pnl: Option<Decimal>) {
        self.total_trades += 1;
        if let Some(pnl) = pnl {
            if pnl > Decimal::ZERO {
                self.win_trades += 1;
            } else if pnl < Decimal::ZERO {
                self.loss_trades += 1;
            }
            self.realized_pnl += pnl;
        }
    }
}

/// One start→stop episode of a strategy.
///
/// Invariant: at most one run per strategy has `stopped_at == None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyRun {
    pub id: i64,
    pub strategy_id: i64,
    pub status: StrategyStatus,
    /// Account balance snapshot at start.
    pub start_balance: Decimal,
    /// Account balance snapshot at stop; `None` while the run is open.
    pub end_balance: Option<Decimal>,
    pub counters: RunCounters,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl StrategyRun {
    pub fn is_open(&self) -> bool {
        self.stopped_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn counters_classify_pnl() {
        let mut c = RunCounters::default();
        c.apply(None);
        c.apply(Some(dec!(10)));
        c.apply(Some(dec!(-4)));
        c.apply(Some(dec!(0)));

        assert_eq!(c.total_trades, 4);
        assert_eq!(c.win_trades, 1);
        assert_eq!(c.loss_trades, 1);
        assert_eq!(c.realized_pnl, dec!(6));
    }
}
