//! The adapter contract every venue implementation satisfies.

use async_trait::async_trait;
use rust_decimal::Decimal;

use model::{Balance, Bar, Fill, Ticker, Timeframe, TradeSide, VenuePosition};

use crate::error::VenueError;

/// Order direction at the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_venue_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

/// Order side that opens or grows a position of the given direction.
pub fn entry_order_side(side: TradeSide) -> OrderSide {
    match side {
        TradeSide::Long => OrderSide::Buy,
        TradeSide::Short => OrderSide::Sell,
    }
}

/// Order side that reduces or closes a position of the given direction.
pub fn exit_order_side(side: TradeSide) -> OrderSide {
    match side {
        TradeSide::Long => OrderSide::Sell,
        TradeSide::Short => OrderSide::Buy,
    }
}

/// Typed facade over the perpetual-futures venue.
///
/// Implementations normalize symbols, enforce venue precision, and retry
/// transient failures internally; every error that escapes is final for that
/// call. Shared between all strategy loops, so implementations must be
/// thread-safe and serialize order placement per symbol.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Set leverage for a symbol. Idempotent: succeeds if already set.
    async fn configure_leverage(&self, symbol: &str, leverage: u32) -> Result<(), VenueError>;

    /// Current market snapshot.
    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, VenueError>;

    /// Most recent `limit` OHLCV bars, oldest first.
    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
    ) -> Result<Vec<Bar>, VenueError>;

    /// Place a market order sized in quote currency. The notional is
    /// converted to contract quantity at the current mark price.
    async fn open_market(
        &self,
        symbol: &str,
        side: TradeSide,
        notional: Decimal,
    ) -> Result<Fill, VenueError>;

    /// Close the full position for `symbol` in direction `side`.
    async fn close_market(&self, symbol: &str, side: TradeSide) -> Result<Fill, VenueError>;

    /// Reduce the position by a contract quantity (reduce-only market
    /// order). Used for partial exits; `close_market` flattens entirely.
    async fn reduce_market(
        &self,
        symbol: &str,
        side: TradeSide,
        quantity: Decimal,
    ) -> Result<Fill, VenueError>;

    /// The venue's view of the position, if any.
    async fn fetch_position(&self, symbol: &str) -> Result<Option<VenuePosition>, VenueError>;

    /// Futures account balance.
    async fn fetch_balance(&self) -> Result<Balance, VenueError>;
}
