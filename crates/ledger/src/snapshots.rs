//! Account snapshots with time-based retention.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use model::AccountSnapshot;

use crate::codec;
use crate::error::LedgerError;
use crate::Ledger;

fn map_snapshot(row: &SqliteRow) -> Result<AccountSnapshot, LedgerError> {
    Ok(AccountSnapshot {
        id: row.try_get("id")?,
        total_balance: codec::dec(&row.try_get::<String, _>("total_balance")?)?,
        free_balance: codec::dec(&row.try_get::<String, _>("free_balance")?)?,
        used_balance: codec::dec(&row.try_get::<String, _>("used_balance")?)?,
        unrealized_pnl: codec::dec(&row.try_get::<String, _>("unrealized_pnl")?)?,
        snapshot_at: row.try_get::<DateTime<Utc>, _>("snapshot_at")?,
    })
}

impl Ledger {
    pub async fn record_snapshot(
        &self,
        total: Decimal,
        free: Decimal,
        used: Decimal,
        unrealized_pnl: Decimal,
        at: DateTime<Utc>,
    ) -> Result<AccountSnapshot, LedgerError> {
        let result = sqlx::query(
            "INSERT INTO account_snapshots (total_balance, free_balance, used_balance, unrealized_pnl, snapshot_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(total.to_string())
        .bind(free.to_string())
        .bind(used.to_string())
        .bind(unrealized_pnl.to_string())
        .bind(at)
        .execute(self.pool())
        .await?;

        Ok(AccountSnapshot {
            id: result.last_insert_rowid(),
            total_balance: total,
            free_balance: free,
            used_balance: used,
            unrealized_pnl,
            snapshot_at: at,
        })
    }

    pub async fn snapshots_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<AccountSnapshot>, LedgerError> {
        let rows = sqlx::query(
            "SELECT * FROM account_snapshots WHERE snapshot_at >= ? ORDER BY snapshot_at",
        )
        .bind(since)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(map_snapshot).collect()
    }

    /// Drop snapshots older than the retention boundary. Returns the number
    /// removed.
    pub async fn prune_snapshots(&self, older_than: DateTime<Utc>) -> Result<u64, LedgerError> {
        let result = sqlx::query("DELETE FROM account_snapshots WHERE snapshot_at < ?")
            .bind(older_than)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn retention_window() {
        let ledger = Ledger::in_memory().await.unwrap();
        let now = Utc::now();

        ledger
            .record_snapshot(dec!(10000), dec!(9000), dec!(1000), dec!(0), now - Duration::days(10))
            .await
            .unwrap();
        ledger
            .record_snapshot(dec!(10100), dec!(9100), dec!(1000), dec!(50), now)
            .await
            .unwrap();

        let removed = ledger
            .prune_snapshots(now - Duration::days(7))
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let kept = ledger
            .snapshots_since(now - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].total_balance, dec!(10100));
    }
}
