//! Backtest result records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use model::{
    BacktestParams, BacktestRecord, BacktestStats, BacktestStatus, EquityPoint, Timeframe,
    TradeRecord,
};

use crate::codec;
use crate::error::LedgerError;
use crate::Ledger;

fn map_backtest(row: &SqliteRow) -> Result<BacktestRecord, LedgerError> {
    let stats_json: Option<String> = row.try_get("stats_json")?;
    let stats = stats_json
        .map(|s| serde_json::from_str::<BacktestStats>(&s))
        .transpose()
        .map_err(|e| LedgerError::Decode(format!("stats: {}", e)))?;

    let equity_json: String = row.try_get("equity_json")?;
    let equity_curve: Vec<EquityPoint> = serde_json::from_str(&equity_json)
        .map_err(|e| LedgerError::Decode(format!("equity curve: {}", e)))?;

    let trades_json: String = row.try_get("trades_json")?;
    let trades: Vec<TradeRecord> = serde_json::from_str(&trades_json)
        .map_err(|e| LedgerError::Decode(format!("trades: {}", e)))?;

    Ok(BacktestRecord {
        id: row.try_get("id")?,
        params: BacktestParams {
            strategy_id: row.try_get("strategy_id")?,
            symbol: row.try_get("symbol")?,
            timeframe: codec::parse::<Timeframe>(&row.try_get::<String, _>("timeframe")?)?,
            start_ms: row.try_get("start_ms")?,
            end_ms: row.try_get("end_ms")?,
            initial_balance: codec::dec(&row.try_get::<String, _>("initial_balance")?)?,
            fee_rate: codec::dec(&row.try_get::<String, _>("fee_rate")?)?,
        },
        status: codec::parse::<BacktestStatus>(&row.try_get::<String, _>("status")?)?,
        stats,
        final_balance: codec::dec_opt(row.try_get::<Option<String>, _>("final_balance")?.as_deref())?,
        equity_curve,
        trades,
        error: row.try_get("error")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        completed_at: row.try_get::<Option<DateTime<Utc>>, _>("completed_at")?,
    })
}

impl Ledger {
    pub async fn create_backtest(&self, params: &BacktestParams) -> Result<i64, LedgerError> {
        let result = sqlx::query(
            "INSERT INTO backtests (strategy_id, symbol, timeframe, start_ms, end_ms,
                                    initial_balance, fee_rate, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(params.strategy_id)
        .bind(&params.symbol)
        .bind(params.timeframe.as_str())
        .bind(params.start_ms)
        .bind(params.end_ms)
        .bind(params.initial_balance.to_string())
        .bind(params.fee_rate.to_string())
        .bind(BacktestStatus::Pending.as_str())
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn mark_backtest_running(&self, id: i64) -> Result<(), LedgerError> {
        let result = sqlx::query("UPDATE backtests SET status = 'running' WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound {
                entity: "backtest",
                id,
            });
        }
        Ok(())
    }

    pub async fn complete_backtest(
        &self,
        id: i64,
        stats: &BacktestStats,
        final_balance: Decimal,
        equity_curve: &[EquityPoint],
        trades: &[TradeRecord],
    ) -> Result<(), LedgerError> {
        let stats_json = serde_json::to_string(stats)
            .map_err(|e| LedgerError::Decode(format!("stats: {}", e)))?;
        let equity_json = serde_json::to_string(equity_curve)
            .map_err(|e| LedgerError::Decode(format!("equity curve: {}", e)))?;
        let trades_json = serde_json::to_string(trades)
            .map_err(|e| LedgerError::Decode(format!("trades: {}", e)))?;

        sqlx::query(
            "UPDATE backtests
             SET status = 'completed', stats_json = ?, final_balance = ?, equity_json = ?,
                 trades_json = ?, completed_at = ?
             WHERE id = ?",
        )
        .bind(stats_json)
        .bind(final_balance.to_string())
        .bind(equity_json)
        .bind(trades_json)
        .bind(Utc::now())
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn fail_backtest(&self, id: i64, error: &str) -> Result<(), LedgerError> {
        sqlx::query(
            "UPDATE backtests SET status = 'failed', error = ?, completed_at = ? WHERE id = ?",
        )
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_backtest(&self, id: i64) -> Result<BacktestRecord, LedgerError> {
        let row = sqlx::query("SELECT * FROM backtests WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or(LedgerError::NotFound {
                entity: "backtest",
                id,
            })?;
        map_backtest(&row)
    }

    pub async fn list_backtests(
        &self,
        strategy_id: Option<i64>,
    ) -> Result<Vec<BacktestRecord>, LedgerError> {
        let rows = match strategy_id {
            Some(sid) => {
                sqlx::query("SELECT * FROM backtests WHERE strategy_id = ? ORDER BY id DESC")
                    .bind(sid)
                    .fetch_all(self.pool())
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM backtests ORDER BY id DESC")
                    .fetch_all(self.pool())
                    .await?
            }
        };
        rows.iter().map(map_backtest).collect()
    }

    pub async fn delete_backtest(&self, id: i64) -> Result<(), LedgerError> {
        let result = sqlx::query("DELETE FROM backtests WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound {
                entity: "backtest",
                id,
            });
        }
        Ok(())
    }
}
