//! Strategy supervisor: one control loop per running strategy.
//!
//! The [`Supervisor`] is an explicit value constructed at process start and
//! handed to the command layer — there are no globals. It owns the table of
//! live strategy loops, serializes commands per strategy id, drives each
//! strategy's tick cycle, and is the only writer of run/trade/position state
//! in the ledger.

mod error;
mod runloop;
mod supervisor;
mod templates;

pub use error::SupervisorError;
pub use runloop::StopRequest;
pub use supervisor::{
    BacktestRequest, StrategyStatusView, Supervisor, SupervisorSettings,
};
pub use templates::{builtin_templates, StrategyTemplate};
