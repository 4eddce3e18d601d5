//! Periodic account balance snapshots.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A point-in-time capture of the futures account, taken on a fixed cadence
/// and retained inside a time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub id: i64,
    pub total_balance: Decimal,
    pub free_balance: Decimal,
    pub used_balance: Decimal,
    /// Aggregate unrealized pnl across all open positions at capture time.
    pub unrealized_pnl: Decimal,
    pub snapshot_at: DateTime<Utc>,
}
