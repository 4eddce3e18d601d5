//! Live supervisor scenarios against a scripted venue adapter.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use event_bus::{Event, EventBus, Topic};
use exchange::{ExchangeAdapter, VenueError};
use ledger::Ledger;
use model::{
    Balance, Bar, Fill, Position, StrategyStatus, Ticker, Timeframe, TradeKind, TradeSide,
    VenuePosition,
};
use supervisor::{Supervisor, SupervisorSettings};

/// A scripted venue: tickers step through a price tape (holding the last
/// price when it runs out) and market orders fill at the current price.
struct ScriptedVenue {
    tape: Mutex<VecDeque<Decimal>>,
    current: Mutex<Decimal>,
    held_qty: Mutex<Decimal>,
}

impl ScriptedVenue {
    fn new(prices: &[Decimal]) -> Self {
        // The start path samples one ticker for the initialize context, so
        // the tape leads with a duplicate of the first price.
        let mut tape: VecDeque<Decimal> = prices.iter().copied().collect();
        tape.push_front(prices[0]);
        Self {
            tape: Mutex::new(tape),
            current: Mutex::new(prices[0]),
            held_qty: Mutex::new(Decimal::ZERO),
        }
    }

    fn price(&self) -> Decimal {
        *self.current.lock()
    }
}

#[async_trait]
impl ExchangeAdapter for ScriptedVenue {
    async fn configure_leverage(&self, _: &str, _: u32) -> Result<(), VenueError> {
        Ok(())
    }

    async fn fetch_ticker(&self, _: &str) -> Result<Ticker, VenueError> {
        let mut current = self.current.lock();
        if let Some(next) = self.tape.lock().pop_front() {
            *current = next;
        }
        let price = *current;
        Ok(Ticker {
            bid: price,
            ask: price,
            last: price,
            mark: price,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        })
    }

    async fn fetch_bars(&self, _: &str, _: Timeframe, _: u32) -> Result<Vec<Bar>, VenueError> {
        Ok(Vec::new())
    }

    async fn open_market(
        &self,
        _: &str,
        _: TradeSide,
        notional: Decimal,
    ) -> Result<Fill, VenueError> {
        let price = self.price();
        let qty = notional / price;
        *self.held_qty.lock() += qty;
        Ok(Fill {
            price,
            qty,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        })
    }

    async fn close_market(&self, _: &str, _: TradeSide) -> Result<Fill, VenueError> {
        let price = self.price();
        let qty = std::mem::replace(&mut *self.held_qty.lock(), Decimal::ZERO);
        if qty <= Decimal::ZERO {
            return Err(VenueError::OrderRejected("no open position".into()));
        }
        Ok(Fill {
            price,
            qty,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        })
    }

    async fn reduce_market(
        &self,
        _: &str,
        _: TradeSide,
        quantity: Decimal,
    ) -> Result<Fill, VenueError> {
        let price = self.price();
        let mut held = self.held_qty.lock();
        let qty = quantity.min(*held);
        *held -= qty;
        Ok(Fill {
            price,
            qty,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        })
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

const MARTINGALE_YAML: &str = r#"
trading: { symbol: BTCUSDT, side: long, leverage: 10 }
martingale: { initial_position: 200, multiplier: 2.0, max_additions: 5 }
trigger: { price_drop_percent: 5.0, start_immediately: true, addition_cooldown: 0 }
risk: { stop_loss_percent: 10.0, take_profit_percent: 500.0, max_loss_percent: 90.0 }
monitoring: { check_interval: 0 }
"#;

fn fast_settings() -> SupervisorSettings {
    SupervisorSettings {
        stop_timeout: Duration::from_secs(5),
        ..SupervisorSettings::default()
    }
}

async fn setup(prices: &[Decimal], config_yaml: &str) -> (Arc<Supervisor>, Ledger, i64) {
    let ledger = Ledger::in_memory().await.unwrap();
    let adapter = Arc::new(ScriptedVenue::new(prices));
    let bus = Arc::new(EventBus::new(1024));
    let supervisor = Arc::new(Supervisor::new(
        ledger.clone(),
        adapter,
        bus,
        fast_settings(),
    ));

    let strategy = supervisor
        .create_strategy("scenario", None, config_yaml)
        .await
        .unwrap();
    (supervisor, ledger, strategy.id)
}

/// Poll until the strategy has at least `count` trades or time out.
async fn wait_for_trades(ledger: &Ledger, strategy_id: i64, count: u64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let (_, total) = ledger
                .list_trades(Some(strategy_id), None, 0, 1)
                .await
                .unwrap();
            if total >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for trades");
}

/// S3: a 10% stop against an 11% adverse move closes within a tick.
#[tokio::test]
async fn stop_loss_force_closes_within_one_tick() {
    let prices = [dec!(50000), dec!(44500)];
    let (supervisor, ledger, id) = setup(&prices, MARTINGALE_YAML).await;

    supervisor.start(id).await.unwrap();
    wait_for_trades(&ledger, id, 2).await;
    supervisor.stop(id, false).await.unwrap();

    let (trades, _) = ledger.list_trades(Some(id), None, 0, 10).await.unwrap();
    let close = trades
        .iter()
        .find(|t| t.kind == TradeKind::Close)
        .expect("close trade");
    assert_eq!(close.price, dec!(44500));
    let pnl = close.pnl.expect("pnl on close");
    assert!(pnl < Decimal::ZERO);

    let run = ledger.list_runs(id).await.unwrap().remove(0);
    assert_eq!(run.counters.total_trades, 2);
    assert_eq!(run.counters.loss_trades, 1);
    assert!(ledger.get_position(run.id).await.unwrap().is_none());
}

/// S4 + invariant 6: stop with close_positions=true appends a close trade,
/// stamps the run, and leaves no position.
#[tokio::test]
async fn stop_with_open_position_flattens_and_records() {
    let prices = [dec!(50000)];
    let (supervisor, ledger, id) = setup(&prices, MARTINGALE_YAML).await;

    supervisor.start(id).await.unwrap();
    wait_for_trades(&ledger, id, 1).await;
    supervisor.stop(id, true).await.unwrap();

    let run = ledger.list_runs(id).await.unwrap().remove(0);
    assert!(run.stopped_at.is_some());
    assert!(run.end_balance.is_some());
    assert_eq!(run.status, StrategyStatus::Stopped);

    let trades = ledger.run_trades(run.id).await.unwrap();
    assert_eq!(trades.first().unwrap().kind, TradeKind::Open);
    assert_eq!(trades.last().unwrap().kind, TradeKind::Close);
    assert_eq!(trades.last().unwrap().price, dec!(50000));
    assert!(ledger.get_position(run.id).await.unwrap().is_none());

    let strategy = ledger.get_strategy(id).await.unwrap();
    assert_eq!(strategy.status, StrategyStatus::Stopped);
}

/// Invariant 4 + S2's deny event: a denied add is published and never
/// appended.
#[tokio::test]
async fn denied_addition_emits_event_and_no_trade() {
    let config = r#"
trading: { symbol: BTCUSDT, side: long, leverage: 10 }
martingale: { initial_position: 200, multiplier: 2.0, max_additions: 0 }
trigger: { price_drop_percent: 5.0, start_immediately: true, addition_cooldown: 0 }
risk: { stop_loss_percent: 50.0, take_profit_percent: 500.0, max_loss_percent: 90.0 }
monitoring: { check_interval: 0 }
"#;
    let prices = [dec!(50000), dec!(47500)];
    let (supervisor, ledger, id) = setup(&prices, config).await;

    let mut errors = supervisor.event_bus().subscribe(Topic::Error);

    supervisor.start(id).await.unwrap();
    wait_for_trades(&ledger, id, 1).await;

    // The 5% drop triggers an add that max_additions = 0 denies.
    let denied = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(Event::Error { kind, .. }) = errors.recv().await {
                if kind == "risk_denied" {
                    return true;
                }
            } else {
                return false;
            }
        }
    })
    .await
    .expect("timed out waiting for deny event");
    assert!(denied);

    supervisor.stop(id, true).await.unwrap();

    let run = ledger.list_runs(id).await.unwrap().remove(0);
    let trades = ledger.run_trades(run.id).await.unwrap();
    // Open plus the stop's close; never an add.
    assert!(trades.iter().all(|t| t.kind != TradeKind::Add));
}

/// Invariant 3: replaying the run's trades reproduces the persisted
/// position.
#[tokio::test]
async fn position_replay_matches_persisted_state() {
    let prices = [dec!(50000), dec!(49000), dec!(47500)];
    let (supervisor, ledger, id) = setup(&prices, MARTINGALE_YAML).await;

    supervisor.start(id).await.unwrap();
    // Open at 50000, add at 47500 (5% drop).
    wait_for_trades(&ledger, id, 2).await;

    let run = ledger.open_run_for(id).await.unwrap().unwrap();
    let persisted = ledger
        .get_position(run.id)
        .await
        .unwrap()
        .expect("open position");
    let trades = ledger.run_trades(run.id).await.unwrap();

    let mut replayed: Option<Position> = None;
    for trade in &trades {
        let fill = Fill {
            price: trade.price,
            qty: trade.quantity,
            timestamp_ms: trade.executed_at.timestamp_millis(),
        };
        match trade.kind {
            TradeKind::Open => {
                replayed = Some(Position::open(
                    trade.symbol.clone(),
                    trade.side,
                    &fill,
                    trade.notional,
                    10,
                ));
            }
            TradeKind::Add => {
                replayed.as_mut().unwrap().add(&fill, trade.notional);
            }
            TradeKind::Close => {
                let pos = replayed.as_mut().unwrap();
                pos.reduce(fill.price, fill.qty);
                if pos.is_flat() {
                    replayed = None;
                }
            }
        }
    }

    let replayed = replayed.expect("replay yields an open position");
    assert_eq!(replayed.side, persisted.side);
    assert_eq!(replayed.quantity, persisted.quantity);
    assert_eq!(replayed.entry_price, persisted.entry_price);

    supervisor.stop(id, true).await.unwrap();
    assert!(ledger.get_position(run.id).await.unwrap().is_none());
}

/// Invariant 1 at the command level: starting twice fails, and stop is
/// idempotent.
#[tokio::test]
async fn start_is_exclusive_and_stop_idempotent() {
    let prices = [dec!(50000)];
    let (supervisor, ledger, id) = setup(&prices, MARTINGALE_YAML).await;

    supervisor.start(id).await.unwrap();
    assert!(supervisor.start(id).await.is_err());

    supervisor.stop(id, false).await.unwrap();
    supervisor.stop(id, false).await.unwrap();

    assert!(ledger.open_run_for(id).await.unwrap().is_none());
}
