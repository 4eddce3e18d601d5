//! Typed facade over the perpetual-futures venue.
//!
//! The [`ExchangeAdapter`] trait is the only market surface the rest of the
//! system sees: market data, leverage configuration, market orders, position
//! and balance queries. [`BinanceFuturesAdapter`] implements it against the
//! USDT-margined futures REST API; the backtest crate provides a simulated
//! implementation over historical bars.

mod adapter;
mod binance;
mod credentials;
mod error;
mod precision;
mod rest;
mod signer;

pub use adapter::{entry_order_side, exit_order_side, ExchangeAdapter, OrderSide};
pub use binance::BinanceFuturesAdapter;
pub use credentials::ApiCredentials;
pub use error::VenueError;
pub use precision::{normalize_symbol, SymbolRules};
