//! Persisted position snapshots, one per open run.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use model::{Position, TradeSide};

use crate::codec;
use crate::error::LedgerError;
use crate::Ledger;

fn map_position(row: &SqliteRow) -> Result<Position, LedgerError> {
    Ok(Position {
        symbol: row.try_get("symbol")?,
        side: codec::parse::<TradeSide>(&row.try_get::<String, _>("side")?)?,
        entry_price: codec::dec(&row.try_get::<String, _>("entry_price")?)?,
        quantity: codec::dec(&row.try_get::<String, _>("quantity")?)?,
        notional: codec::dec(&row.try_get::<String, _>("notional")?)?,
        leverage: row.try_get::<i64, _>("leverage")? as u32,
        opened_at_ms: row.try_get("opened_at_ms")?,
        mark_price: codec::dec(&row.try_get::<String, _>("mark_price")?)?,
    })
}

impl Ledger {
    /// Write the run's position snapshot, or clear it with `None`.
    pub async fn upsert_position(
        &self,
        run_id: i64,
        strategy_id: i64,
        position: Option<&Position>,
    ) -> Result<(), LedgerError> {
        match position {
            Some(pos) => {
                sqlx::query(
                    "INSERT OR REPLACE INTO positions
                     (run_id, strategy_id, symbol, side, entry_price, quantity, notional,
                      leverage, mark_price, opened_at_ms, updated_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(run_id)
                .bind(strategy_id)
                .bind(&pos.symbol)
                .bind(pos.side.as_str())
                .bind(pos.entry_price.to_string())
                .bind(pos.quantity.to_string())
                .bind(pos.notional.to_string())
                .bind(pos.leverage as i64)
                .bind(pos.mark_price.to_string())
                .bind(pos.opened_at_ms)
                .bind(Utc::now())
                .execute(self.pool())
                .await?;
            }
            None => {
                sqlx::query("DELETE FROM positions WHERE run_id = ?")
                    .bind(run_id)
                    .execute(self.pool())
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn get_position(&self, run_id: i64) -> Result<Option<Position>, LedgerError> {
        let row = sqlx::query("SELECT * FROM positions WHERE run_id = ?")
            .bind(run_id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(map_position).transpose()
    }

    /// Every persisted position with its run id, for account aggregation.
    pub async fn open_positions(&self) -> Result<Vec<(i64, Position)>, LedgerError> {
        let rows = sqlx::query("SELECT * FROM positions")
            .fetch_all(self.pool())
            .await?;
        rows.iter()
            .map(|row| Ok((row.try_get::<i64, _>("run_id")?, map_position(row)?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{Fill, StrategyKind};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn upsert_and_clear_roundtrip() {
        let ledger = Ledger::in_memory().await.unwrap();
        let s = ledger
            .create_strategy("s", None, StrategyKind::Config, "{}")
            .await
            .unwrap();
        let run_id = ledger.open_run(s.id, dec!(10000)).await.unwrap();

        let mut pos = Position::open(
            "BTCUSDT",
            TradeSide::Long,
            &Fill {
                price: dec!(50000),
                qty: dec!(0.004),
                timestamp_ms: 1_000,
            },
            dec!(200),
            10,
        );
        ledger
            .upsert_position(run_id, s.id, Some(&pos))
            .await
            .unwrap();
        assert_eq!(ledger.get_position(run_id).await.unwrap(), Some(pos.clone()));

        // Mutate and re-upsert.
        pos.set_mark(dec!(51000));
        ledger
            .upsert_position(run_id, s.id, Some(&pos))
            .await
            .unwrap();
        let stored = ledger.get_position(run_id).await.unwrap().unwrap();
        assert_eq!(stored.mark_price, dec!(51000));

        ledger.upsert_position(run_id, s.id, None).await.unwrap();
        assert!(ledger.get_position(run_id).await.unwrap().is_none());
    }
}
