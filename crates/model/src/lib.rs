//! Domain records shared across the trading supervisor.
//!
//! This crate sits at the bottom of the workspace dependency graph and holds
//! plain data types only: market data, trades, positions, strategy and run
//! records, account snapshots, and backtest results. Strategy, run, and trade
//! relate to each other by integer id; lookups go through the ledger rather
//! than in-memory references.

mod account;
mod backtest;
mod market;
mod position;
mod run;
mod strategy;
mod trade;

pub use account::AccountSnapshot;
pub use backtest::{BacktestParams, BacktestRecord, BacktestStats, BacktestStatus, EquityPoint};
pub use market::{Balance, Bar, Fill, Ticker, Timeframe, VenuePosition};
pub use position::Position;
pub use run::{RunCounters, StrategyRun};
pub use strategy::{StrategyDefinition, StrategyKind, StrategyStatus};
pub use trade::{TradeKind, TradeRecord, TradeSide};
