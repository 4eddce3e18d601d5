//! Strategy run bookkeeping.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use model::{RunCounters, StrategyRun, StrategyStatus};

use crate::codec;
use crate::error::LedgerError;
use crate::Ledger;

pub(crate) fn map_run(row: &SqliteRow) -> Result<StrategyRun, LedgerError> {
    Ok(StrategyRun {
        id: row.try_get("id")?,
        strategy_id: row.try_get("strategy_id")?,
        status: codec::parse::<StrategyStatus>(&row.try_get::<String, _>("status")?)?,
        start_balance: codec::dec(&row.try_get::<String, _>("start_balance")?)?,
        end_balance: codec::dec_opt(row.try_get::<Option<String>, _>("end_balance")?.as_deref())?,
        counters: RunCounters {
            total_trades: row.try_get::<i64, _>("total_trades")? as u32,
            win_trades: row.try_get::<i64, _>("win_trades")? as u32,
            loss_trades: row.try_get::<i64, _>("loss_trades")? as u32,
            realized_pnl: codec::dec(&row.try_get::<String, _>("realized_pnl")?)?,
        },
        error_message: row.try_get("error_message")?,
        started_at: row.try_get::<DateTime<Utc>, _>("started_at")?,
        stopped_at: row.try_get::<Option<DateTime<Utc>>, _>("stopped_at")?,
    })
}

impl Ledger {
    /// Open a run for a strategy. Fails if the strategy already has a run
    /// with no stop timestamp (the single-open-run invariant).
    pub async fn open_run(
        &self,
        strategy_id: i64,
        start_balance: Decimal,
    ) -> Result<i64, LedgerError> {
        let mut tx = self.pool().begin().await?;

        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM strategy_runs WHERE strategy_id = ? AND stopped_at IS NULL",
        )
        .bind(strategy_id)
        .fetch_optional(&mut *tx)
        .await?;
        if existing.is_some() {
            return Err(LedgerError::OpenRunExists { strategy_id });
        }

        let result = sqlx::query(
            "INSERT INTO strategy_runs (strategy_id, status, start_balance, started_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(strategy_id)
        .bind(StrategyStatus::Running.as_str())
        .bind(start_balance.to_string())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.last_insert_rowid())
    }

    /// Close a run: stamp stop time, ending balance, terminal status, and an
    /// optional error note. Idempotent on already-closed runs only in that
    /// it errors rather than overwriting.
    pub async fn close_run(
        &self,
        run_id: i64,
        end_balance: Decimal,
        status: StrategyStatus,
        error_message: Option<&str>,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query(
            "UPDATE strategy_runs
             SET stopped_at = ?, end_balance = ?, status = ?, error_message = ?
             WHERE id = ? AND stopped_at IS NULL",
        )
        .bind(Utc::now())
        .bind(end_balance.to_string())
        .bind(status.as_str())
        .bind(error_message)
        .bind(run_id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::RunClosed { run_id });
        }
        Ok(())
    }

    pub async fn get_run(&self, run_id: i64) -> Result<StrategyRun, LedgerError> {
        let row = sqlx::query("SELECT * FROM strategy_runs WHERE id = ?")
            .bind(run_id)
            .fetch_optional(self.pool())
            .await?
            .ok_or(LedgerError::NotFound {
                entity: "run",
                id: run_id,
            })?;
        map_run(&row)
    }

    /// The strategy's open run, if one exists.
    pub async fn open_run_for(&self, strategy_id: i64) -> Result<Option<StrategyRun>, LedgerError> {
        let row = sqlx::query(
            "SELECT * FROM strategy_runs WHERE strategy_id = ? AND stopped_at IS NULL",
        )
        .bind(strategy_id)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(map_run).transpose()
    }

    pub async fn list_runs(&self, strategy_id: i64) -> Result<Vec<StrategyRun>, LedgerError> {
        let rows = sqlx::query(
            "SELECT * FROM strategy_runs WHERE strategy_id = ? ORDER BY started_at DESC",
        )
        .bind(strategy_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(map_run).collect()
    }

    /// Startup recovery: strategies left `running`/`paused` by a crash are
    /// reset to `stopped` and their dangling open runs closed with an error
    /// note. Returns how many strategies were reset.
    pub async fn recover_interrupted(&self, note: &str) -> Result<u32, LedgerError> {
        let mut tx = self.pool().begin().await?;

        let reset = sqlx::query(
            "UPDATE strategies SET status = 'stopped', updated_at = ?
             WHERE status IN ('running', 'paused')",
        )
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query(
            "UPDATE strategy_runs
             SET stopped_at = ?, status = 'error', error_message = ?,
                 end_balance = COALESCE(end_balance, start_balance)
             WHERE stopped_at IS NULL",
        )
        .bind(Utc::now())
        .bind(note)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "DELETE FROM positions WHERE run_id NOT IN
             (SELECT id FROM strategy_runs WHERE stopped_at IS NULL)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(reset as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::StrategyKind;
    use rust_decimal_macros::dec;

    async fn ledger_with_strategy() -> (Ledger, i64) {
        let ledger = Ledger::in_memory().await.unwrap();
        let s = ledger
            .create_strategy("s", None, StrategyKind::Config, "{}")
            .await
            .unwrap();
        (ledger, s.id)
    }

    #[tokio::test]
    async fn single_open_run_invariant() {
        let (ledger, sid) = ledger_with_strategy().await;

        let run_id = ledger.open_run(sid, dec!(10000)).await.unwrap();
        let err = ledger.open_run(sid, dec!(10000)).await.unwrap_err();
        assert!(matches!(err, LedgerError::OpenRunExists { .. }));

        ledger
            .close_run(run_id, dec!(10100), StrategyStatus::Stopped, None)
            .await
            .unwrap();
        // A new run may open once the previous one closed.
        ledger.open_run(sid, dec!(10100)).await.unwrap();
    }

    #[tokio::test]
    async fn close_run_is_single_shot() {
        let (ledger, sid) = ledger_with_strategy().await;
        let run_id = ledger.open_run(sid, dec!(10000)).await.unwrap();

        ledger
            .close_run(run_id, dec!(9000), StrategyStatus::Stopped, None)
            .await
            .unwrap();
        let err = ledger
            .close_run(run_id, dec!(8000), StrategyStatus::Stopped, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::RunClosed { .. }));

        let run = ledger.get_run(run_id).await.unwrap();
        assert_eq!(run.end_balance, Some(dec!(9000)));
        assert!(!run.is_open());
    }

    #[tokio::test]
    async fn recovery_resets_running_strategies() {
        let (ledger, sid) = ledger_with_strategy().await;
        ledger
            .set_strategy_status(sid, StrategyStatus::Running)
            .await
            .unwrap();
        ledger.open_run(sid, dec!(10000)).await.unwrap();

        let reset = ledger.recover_interrupted("restart").await.unwrap();
        assert_eq!(reset, 1);

        let s = ledger.get_strategy(sid).await.unwrap();
        assert_eq!(s.status, StrategyStatus::Stopped);
        assert!(ledger.open_run_for(sid).await.unwrap().is_none());
    }
}
