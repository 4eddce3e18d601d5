//! Backtest engine: replays a strategy kernel against historical bars with
//! a simulated exchange adapter.
//!
//! The engine drives the kernel's lifecycle exactly like the live
//! supervisor's tick loop — risk gate first, then `run_once`, then request
//! execution — with one difference: a kernel error is fatal to the backtest
//! rather than counted.

mod engine;
mod sim;
pub mod stats;

pub use engine::{BacktestEngine, BacktestOutcome};
pub use sim::SimAdapter;

use thiserror::Error;

use strategy_core::KernelError;

/// Backtest failure; the result record is marked `failed` with the message.
#[derive(Debug, Error)]
pub enum BacktestError {
    #[error("kernel failed: {0}")]
    Kernel(#[from] KernelError),

    #[error("bar range is empty or too short")]
    NoBars,
}
