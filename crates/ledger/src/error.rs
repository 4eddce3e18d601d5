//! Ledger error types.

use thiserror::Error;

/// Errors surfaced by the persistent store.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// Open-run invariant would be violated.
    #[error("strategy {strategy_id} already has an open run")]
    OpenRunExists { strategy_id: i64 },

    /// A trade was appended after its run closed; the supervisor treats this
    /// as a reconciliation anomaly.
    #[error("run {run_id} is closed")]
    RunClosed { run_id: i64 },

    #[error("strategy {strategy_id} is not stopped")]
    StrategyActive { strategy_id: i64 },

    #[error("corrupt stored value: {0}")]
    Decode(String),
}
