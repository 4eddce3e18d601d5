//! Trade records: append-only, atomically updating run counters.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use model::{RunCounters, TradeKind, TradeRecord, TradeSide};

use crate::codec;
use crate::error::LedgerError;
use crate::Ledger;

/// A trade about to be appended.
#[derive(Debug, Clone)]
pub struct NewTrade {
    pub strategy_id: i64,
    pub run_id: i64,
    pub kind: TradeKind,
    pub side: TradeSide,
    pub symbol: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub notional: Decimal,
    pub pnl: Option<Decimal>,
    pub executed_at: DateTime<Utc>,
}

pub(crate) fn map_trade(row: &SqliteRow) -> Result<TradeRecord, LedgerError> {
    Ok(TradeRecord {
        id: row.try_get("id")?,
        strategy_id: row.try_get("strategy_id")?,
        run_id: row.try_get("run_id")?,
        kind: codec::parse::<TradeKind>(&row.try_get::<String, _>("kind")?)?,
        side: codec::parse::<TradeSide>(&row.try_get::<String, _>("side")?)?,
        symbol: row.try_get("symbol")?,
        price: codec::dec(&row.try_get::<String, _>("price")?)?,
        quantity: codec::dec(&row.try_get::<String, _>("quantity")?)?,
        notional: codec::dec(&row.try_get::<String, _>("notional")?)?,
        pnl: codec::dec_opt(row.try_get::<Option<String>, _>("pnl")?.as_deref())?,
        executed_at: row.try_get::<DateTime<Utc>, _>("executed_at")?,
    })
}

impl Ledger {
    /// Append one trade. In the same transaction: verify the run is still
    /// open, insert the record, and update the run's counters. An append
    /// against a closed run fails with [`LedgerError::RunClosed`] — the
    /// caller treats that as a reconciliation anomaly, not a retry.
    pub async fn append_trade(
        &self,
        trade: &NewTrade,
    ) -> Result<(TradeRecord, RunCounters), LedgerError> {
        let mut tx = self.pool().begin().await?;

        let run_row = sqlx::query(
            "SELECT total_trades, win_trades, loss_trades, realized_pnl
             FROM strategy_runs WHERE id = ? AND stopped_at IS NULL",
        )
        .bind(trade.run_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(LedgerError::RunClosed {
            run_id: trade.run_id,
        })?;

        let mut counters = RunCounters {
            total_trades: run_row.try_get::<i64, _>("total_trades")? as u32,
            win_trades: run_row.try_get::<i64, _>("win_trades")? as u32,
            loss_trades: run_row.try_get::<i64, _>("loss_trades")? as u32,
            realized_pnl: codec::dec(&run_row.try_get::<String, _>("realized_pnl")?)?,
        };
        counters.apply(trade.pnl);

        let result = sqlx::query(
            "INSERT INTO trades (strategy_id, run_id, kind, side, symbol, price, quantity, notional, pnl, executed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(trade.strategy_id)
        .bind(trade.run_id)
        .bind(trade.kind.as_str())
        .bind(trade.side.as_str())
        .bind(&trade.symbol)
        .bind(trade.price.to_string())
        .bind(trade.quantity.to_string())
        .bind(trade.notional.to_string())
        .bind(trade.pnl.map(|p| p.to_string()))
        .bind(trade.executed_at)
        .execute(&mut *tx)
        .await?;
        let trade_id = result.last_insert_rowid();

        sqlx::query(
            "UPDATE strategy_runs
             SET total_trades = ?, win_trades = ?, loss_trades = ?, realized_pnl = ?
             WHERE id = ?",
        )
        .bind(counters.total_trades as i64)
        .bind(counters.win_trades as i64)
        .bind(counters.loss_trades as i64)
        .bind(counters.realized_pnl.to_string())
        .bind(trade.run_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let record = TradeRecord {
            id: trade_id,
            strategy_id: trade.strategy_id,
            run_id: trade.run_id,
            kind: trade.kind,
            side: trade.side,
            symbol: trade.symbol.clone(),
            price: trade.price,
            quantity: trade.quantity,
            notional: trade.notional,
            pnl: trade.pnl,
            executed_at: trade.executed_at,
        };
        Ok((record, counters))
    }

    /// Page through trades, optionally filtered by strategy and/or run.
    /// Returns the page plus the total matching count.
    pub async fn list_trades(
        &self,
        strategy_id: Option<i64>,
        run_id: Option<i64>,
        offset: u32,
        limit: u32,
    ) -> Result<(Vec<TradeRecord>, u64), LedgerError> {
        let mut filter = String::from("WHERE 1=1");
        if strategy_id.is_some() {
            filter.push_str(" AND strategy_id = ?");
        }
        if run_id.is_some() {
            filter.push_str(" AND run_id = ?");
        }

        let count_sql = format!("SELECT COUNT(*) FROM trades {}", filter);
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        if let Some(sid) = strategy_id {
            count_query = count_query.bind(sid);
        }
        if let Some(rid) = run_id {
            count_query = count_query.bind(rid);
        }
        let total = count_query.fetch_one(self.pool()).await? as u64;

        let page_sql = format!(
            "SELECT * FROM trades {} ORDER BY id DESC LIMIT ? OFFSET ?",
            filter
        );
        let mut page_query = sqlx::query(&page_sql);
        if let Some(sid) = strategy_id {
            page_query = page_query.bind(sid);
        }
        if let Some(rid) = run_id {
            page_query = page_query.bind(rid);
        }
        let rows = page_query
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(self.pool())
            .await?;

        let items = rows.iter().map(map_trade).collect::<Result<Vec<_>, _>>()?;
        Ok((items, total))
    }

    /// All trades of one run in execution order, for replay checks.
    pub async fn run_trades(&self, run_id: i64) -> Result<Vec<TradeRecord>, LedgerError> {
        let rows = sqlx::query("SELECT * FROM trades WHERE run_id = ? ORDER BY id")
            .bind(run_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(map_trade).collect()
    }
}
