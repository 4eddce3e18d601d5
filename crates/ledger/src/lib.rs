//! Persistent audit store for strategies, runs, trades, positions, account
//! snapshots, and backtest results.
//!
//! Backed by SQLite through sqlx. The pool is capped at a single connection,
//! which both shares an in-memory database across handles in tests and gives
//! the serializable single-writer discipline the data model assumes.
//! Decimal values are stored as TEXT and re-parsed on read.

mod backtests;
mod error;
mod positions;
mod runs;
mod snapshots;
mod strategies;
mod trades;

pub use error::LedgerError;
pub use trades::NewTrade;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

/// Handle to the persistent store. Cheap to clone.
#[derive(Clone)]
pub struct Ledger {
    pool: SqlitePool,
}

impl Ledger {
    /// Open (and create if needed) the database at `url`, e.g.
    /// `sqlite://trader.db` or `sqlite::memory:`.
    pub async fn connect(url: &str) -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(LedgerError::Db)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let ledger = Self { pool };
        ledger.init_schema().await?;
        Ok(ledger)
    }

    /// In-memory store for tests.
    pub async fn in_memory() -> Result<Self, LedgerError> {
        Self::connect("sqlite::memory:").await
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<(), LedgerError> {
        // SQLite prepares one statement at a time.
        for statement in SCHEMA.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS strategies (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL,
    description TEXT,
    kind        TEXT NOT NULL,
    config_yaml TEXT NOT NULL,
    status      TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS strategy_runs (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    strategy_id   INTEGER NOT NULL REFERENCES strategies(id),
    status        TEXT NOT NULL,
    start_balance TEXT NOT NULL,
    end_balance   TEXT,
    total_trades  INTEGER NOT NULL DEFAULT 0,
    win_trades    INTEGER NOT NULL DEFAULT 0,
    loss_trades   INTEGER NOT NULL DEFAULT 0,
    realized_pnl  TEXT NOT NULL DEFAULT '0',
    error_message TEXT,
    started_at    TEXT NOT NULL,
    stopped_at    TEXT
);
CREATE INDEX IF NOT EXISTS idx_runs_strategy ON strategy_runs(strategy_id);

CREATE TABLE IF NOT EXISTS trades (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    strategy_id INTEGER NOT NULL,
    run_id      INTEGER NOT NULL REFERENCES strategy_runs(id),
    kind        TEXT NOT NULL,
    side        TEXT NOT NULL,
    symbol      TEXT NOT NULL,
    price       TEXT NOT NULL,
    quantity    TEXT NOT NULL,
    notional    TEXT NOT NULL,
    pnl         TEXT,
    executed_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_trades_strategy ON trades(strategy_id);
CREATE INDEX IF NOT EXISTS idx_trades_run ON trades(run_id);

CREATE TABLE IF NOT EXISTS positions (
    run_id      INTEGER PRIMARY KEY REFERENCES strategy_runs(id),
    strategy_id INTEGER NOT NULL,
    symbol      TEXT NOT NULL,
    side        TEXT NOT NULL,
    entry_price TEXT NOT NULL,
    quantity    TEXT NOT NULL,
    notional    TEXT NOT NULL,
    leverage    INTEGER NOT NULL,
    mark_price  TEXT NOT NULL,
    opened_at_ms INTEGER NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS account_snapshots (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    total_balance  TEXT NOT NULL,
    free_balance   TEXT NOT NULL,
    used_balance   TEXT NOT NULL,
    unrealized_pnl TEXT NOT NULL,
    snapshot_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_snapshots_at ON account_snapshots(snapshot_at);

CREATE TABLE IF NOT EXISTS backtests (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    strategy_id     INTEGER NOT NULL,
    symbol          TEXT NOT NULL,
    timeframe       TEXT NOT NULL,
    start_ms        INTEGER NOT NULL,
    end_ms          INTEGER NOT NULL,
    initial_balance TEXT NOT NULL,
    fee_rate        TEXT NOT NULL,
    status          TEXT NOT NULL,
    stats_json      TEXT,
    final_balance   TEXT,
    equity_json     TEXT NOT NULL DEFAULT '[]',
    trades_json     TEXT NOT NULL DEFAULT '[]',
    error           TEXT,
    created_at      TEXT NOT NULL,
    completed_at    TEXT
);
"#;

pub(crate) mod codec {
    //! Shared column conversions.

    use rust_decimal::Decimal;

    use crate::error::LedgerError;

    pub fn dec(s: &str) -> Result<Decimal, LedgerError> {
        s.parse::<Decimal>()
            .map_err(|e| LedgerError::Decode(format!("bad decimal '{}': {}", s, e)))
    }

    pub fn dec_opt(s: Option<&str>) -> Result<Option<Decimal>, LedgerError> {
        s.map(dec).transpose()
    }

    pub fn parse<T>(s: &str) -> Result<T, LedgerError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        s.parse::<T>()
            .map_err(|e| LedgerError::Decode(format!("bad value '{}': {}", s, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_initializes_idempotently() {
        let ledger = Ledger::in_memory().await.unwrap();
        ledger.init_schema().await.unwrap();
        assert!(ledger.list_strategies().await.unwrap().is_empty());
    }
}
