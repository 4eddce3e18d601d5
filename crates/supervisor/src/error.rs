//! Supervisor error types.

use std::time::Duration;

use thiserror::Error;

use backtest::BacktestError;
use exchange::VenueError;
use ledger::LedgerError;
use strategy_core::KernelError;

/// Errors returned from supervisor commands. No stack traces cross this
/// boundary; callers get the kind plus a human message.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Venue(#[from] VenueError),

    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error(transparent)]
    Backtest(#[from] BacktestError),

    #[error("strategy {0} is already running")]
    AlreadyRunning(i64),

    #[error("strategy {0} is not running")]
    NotRunning(i64),

    #[error("stop did not complete within {0:?}; run marked errored")]
    StopTimeout(Duration),

    #[error("unknown template '{0}'")]
    UnknownTemplate(String),
}
