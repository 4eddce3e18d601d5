//! The context handed to every kernel call.

use std::sync::Arc;

use parking_lot::Mutex;
use rust_decimal::Decimal;

use exchange::ExchangeAdapter;
use model::{Position, Ticker, TradeKind, TradeSide};

use crate::config::ConfigDoc;

/// A trade the kernel asks the supervisor to execute.
///
/// `Close` with `quantity: None` flattens the position; with a quantity it
/// reduces by that many contracts (grid kernels exit one unit at a time).
#[derive(Debug, Clone, PartialEq)]
pub enum TradeRequest {
    Open { side: TradeSide, notional: Decimal },
    Add { side: TradeSide, notional: Decimal },
    Close { quantity: Option<Decimal> },
}

impl TradeRequest {
    pub fn kind(&self) -> TradeKind {
        match self {
            Self::Open { .. } => TradeKind::Open,
            Self::Add { .. } => TradeKind::Add,
            Self::Close { .. } => TradeKind::Close,
        }
    }
}

/// Per-call view of the world for a kernel: the parsed configuration, the
/// tick's market snapshot, a snapshot of the current position, the shared
/// exchange adapter, and a sink for trade requests. The supervisor drains
/// the sink after `run_once` returns and executes each request through the
/// risk gate, in order.
///
/// The ticker is sampled once per tick by the loop, so the risk gate and
/// the kernel always decide on the same price.
pub struct StrategyContext {
    pub strategy_id: i64,
    pub run_id: i64,
    /// Wall-clock of this tick in milliseconds. In backtests this is
    /// simulated time.
    pub now_ms: i64,
    config: Arc<ConfigDoc>,
    ticker: Ticker,
    position: Option<Position>,
    adapter: Arc<dyn ExchangeAdapter>,
    requests: Mutex<Vec<TradeRequest>>,
}

impl StrategyContext {
    pub fn new(
        strategy_id: i64,
        run_id: i64,
        now_ms: i64,
        config: Arc<ConfigDoc>,
        ticker: Ticker,
        position: Option<Position>,
        adapter: Arc<dyn ExchangeAdapter>,
    ) -> Self {
        Self {
            strategy_id,
            run_id,
            now_ms,
            config,
            ticker,
            position,
            adapter,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ConfigDoc {
        &self.config
    }

    /// The market snapshot this tick decides on.
    pub fn ticker(&self) -> &Ticker {
        &self.ticker
    }

    /// Read-only snapshot of the position as of this tick.
    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn adapter(&self) -> &Arc<dyn ExchangeAdapter> {
        &self.adapter
    }

    /// Queue a trade for the supervisor to execute after `run_once`.
    pub fn request_trade(&self, kind: TradeKind, side: TradeSide, notional: Decimal) {
        let request = match kind {
            TradeKind::Open => TradeRequest::Open { side, notional },
            TradeKind::Add => TradeRequest::Add { side, notional },
            TradeKind::Close => TradeRequest::Close { quantity: None },
        };
        self.requests.lock().push(request);
    }

    /// Queue a partial close of `quantity` contracts.
    pub fn request_reduce(&self, quantity: Decimal) {
        self.requests.lock().push(TradeRequest::Close {
            quantity: Some(quantity),
        });
    }

    /// Drain queued requests in the order they were made.
    pub fn take_requests(&self) -> Vec<TradeRequest> {
        std::mem::take(&mut *self.requests.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use exchange::VenueError;
    use model::{Balance, Bar, Fill, Ticker, Timeframe, VenuePosition};
    use rust_decimal_macros::dec;

    struct NullAdapter;

    #[async_trait]
    impl ExchangeAdapter for NullAdapter {
        async fn configure_leverage(&self, _: &str, _: u32) -> Result<(), VenueError> {
            Ok(())
        }
        async fn fetch_ticker(&self, _: &str) -> Result<Ticker, VenueError> {
            unimplemented!()
        }
        async fn fetch_bars(
            &self,
            _: &str,
            _: Timeframe,
            _: u32,
        ) -> Result<Vec<Bar>, VenueError> {
            unimplemented!()
        }
        async fn open_market(
            &self,
            _: &str,
            _: TradeSide,
            _: Decimal,
        ) -> Result<Fill, VenueError> {
            unimplemented!()
        }
        async fn close_market(&self, _: &str, _: TradeSide) -> Result<Fill, VenueError> {
            unimplemented!()
        }
        async fn reduce_market(
            &self,
            _: &str,
            _: TradeSide,
            _: Decimal,
        ) -> Result<Fill, VenueError> {
            unimplemented!()
        }
        async fn fetch_position(&self, _: &str) -> Result<Option<VenuePosition>, VenueError> {
            Ok(None)
        }
        async fn fetch_balance(&self) -> Result<Balance, VenueError> {
            unimplemented!()
        }
    }

    fn test_ticker() -> Ticker {
        Ticker {
            bid: dec!(49999),
            ask: dec!(50001),
            last: dec!(50000),
            mark: dec!(50000),
            timestamp_ms: 0,
        }
    }

    #[test]
    fn requests_drain_in_order() {
        let ctx = StrategyContext::new(
            1,
            1,
            0,
            Arc::new(ConfigDoc::default()),
            test_ticker(),
            None,
            Arc::new(NullAdapter),
        );

        ctx.request_trade(TradeKind::Open, TradeSide::Long, dec!(200));
        ctx.request_trade(TradeKind::Close, TradeSide::Long, dec!(0));
        ctx.request_reduce(dec!(0.5));

        let requests = ctx.take_requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].kind(), TradeKind::Open);
        assert_eq!(requests[1], TradeRequest::Close { quantity: None });
        assert_eq!(
            requests[2],
            TradeRequest::Close {
                quantity: Some(dec!(0.5))
            }
        );
        assert!(ctx.take_requests().is_empty());
    }
}
