//! The ML kernel's confidence gate, driven with a scripted oracle.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use exchange::{ExchangeAdapter, VenueError};
use model::{
    Balance, Bar, Fill, Position, Ticker, Timeframe, TradeSide, VenuePosition,
};
use strategies::{Direction, DirectionOracle, Features, ForestKernel, Kernel, Prediction};
use strategy_core::{ConfigDoc, KernelError, StrategyContext, TradeRequest};

/// Fixed-price adapter; the kernel only needs tickers and (empty) history.
struct FlatAdapter {
    price: Decimal,
}

#[async_trait]
impl ExchangeAdapter for FlatAdapter {
    async fn configure_leverage(&self, _: &str, _: u32) -> Result<(), VenueError> {
        Ok(())
    }

    async fn fetch_ticker(&self, _: &str) -> Result<Ticker, VenueError> {
        Ok(Ticker {
            bid: self.price,
            ask: self.price,
            last: self.price,
            mark: self.price,
            timestamp_ms: 0,
        })
    }

    async fn fetch_bars(&self, _: &str, _: Timeframe, _: u32) -> Result<Vec<Bar>, VenueError> {
        Ok(Vec::new())
    }

    async fn open_market(&self, _: &str, _: TradeSide, _: Decimal) -> Result<Fill, VenueError> {
        unreachable!("kernel never places orders directly")
    }

    async fn close_market(&self, _: &str, _: TradeSide) -> Result<Fill, VenueError> {
        unreachable!()
    }

    async fn reduce_market(&self, _: &str, _: TradeSide, _: Decimal) -> Result<Fill, VenueError> {
        unreachable!()
    }

    async fn fetch_position(&self, _: &str) -> Result<Option<VenuePosition>, VenueError> {
        Ok(None)
    }

    async fn fetch_balance(&self) -> Result<Balance, VenueError> {
        Ok(Balance {
            total: dec!(10000),
            free: dec!(10000),
            used: Decimal::ZERO,
        })
    }
}

/// Emits one scripted confidence per call, always long.
struct ScriptedOracle {
    confidences: Mutex<Vec<f64>>,
}

#[async_trait]
impl DirectionOracle for ScriptedOracle {
    async fn predict(&self, _: &Features) -> Result<Option<Prediction>, KernelError> {
        let mut remaining = self.confidences.lock();
        if remaining.is_empty() {
            return Ok(None);
        }
        let confidence = remaining.remove(0);
        Ok(Some(Prediction {
            direction: Direction::Long,
            confidence,
        }))
    }
}

fn ml_doc() -> ConfigDoc {
    ConfigDoc::parse(
        r#"
trading: { symbol: BTCUSDT, side: long, leverage: 10 }
ml: { confidence_threshold: 0.65, position_size: 200, min_samples_to_train: 100000 }
risk: { stop_loss_percent: 10, take_profit_percent: 15, max_loss_percent: 20 }
"#,
    )
    .unwrap()
}

fn ctx(
    doc: &Arc<ConfigDoc>,
    adapter: &Arc<dyn ExchangeAdapter>,
    position: Option<Position>,
    now_ms: i64,
) -> StrategyContext {
    let ticker = Ticker {
        bid: dec!(50000),
        ask: dec!(50000),
        last: dec!(50000),
        mark: dec!(50000),
        timestamp_ms: now_ms,
    };
    StrategyContext::new(
        1,
        1,
        now_ms,
        Arc::clone(doc),
        ticker,
        position,
        Arc::clone(adapter),
    )
}

#[tokio::test]
async fn trade_fires_only_when_confidence_clears_threshold() {
    let doc = Arc::new(ml_doc());
    let adapter: Arc<dyn ExchangeAdapter> = Arc::new(FlatAdapter {
        price: dec!(50000),
    });

    let oracle = ScriptedOracle {
        confidences: Mutex::new(vec![0.55, 0.72, 0.61]),
    };
    let forest = ForestKernel::from_config(&doc).unwrap().with_oracle(Box::new(oracle));
    let mut kernel = Kernel::Forest(forest);

    let init_ctx = ctx(&doc, &adapter, None, 0);
    kernel.initialize(&init_ctx).await.unwrap();

    // Tick 1: 0.55 < 0.65, no trade.
    let tick1 = ctx(&doc, &adapter, None, 1_000);
    kernel.run_once(&tick1).await.unwrap();
    assert!(tick1.take_requests().is_empty());

    // Tick 2: 0.72 clears the gate, exactly one open.
    let tick2 = ctx(&doc, &adapter, None, 2_000);
    kernel.run_once(&tick2).await.unwrap();
    let requests = tick2.take_requests();
    assert_eq!(
        requests,
        vec![TradeRequest::Open {
            side: TradeSide::Long,
            notional: dec!(200)
        }]
    );

    // Tick 3: 0.61 below the gate; holding the position, nothing happens.
    let position = Position::open(
        "BTCUSDT",
        TradeSide::Long,
        &Fill {
            price: dec!(50000),
            qty: dec!(0.004),
            timestamp_ms: 2_000,
        },
        dec!(200),
        10,
    );
    let tick3 = ctx(&doc, &adapter, Some(position), 3_000);
    kernel.run_once(&tick3).await.unwrap();
    assert!(tick3.take_requests().is_empty());
}

#[tokio::test]
async fn exhausted_oracle_means_no_opinion() {
    let doc = Arc::new(ml_doc());
    let adapter: Arc<dyn ExchangeAdapter> = Arc::new(FlatAdapter {
        price: dec!(50000),
    });

    let oracle = ScriptedOracle {
        confidences: Mutex::new(vec![]),
    };
    let forest = ForestKernel::from_config(&doc).unwrap().with_oracle(Box::new(oracle));
    let mut kernel = Kernel::Forest(forest);

    let tick = ctx(&doc, &adapter, None, 1_000);
    kernel.run_once(&tick).await.unwrap();
    assert!(tick.take_requests().is_empty());
}
