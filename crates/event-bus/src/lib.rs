//! In-process publish/subscribe fan-out.
//!
//! Each topic is backed by its own tokio broadcast channel. Publishing never
//! blocks: a subscriber that falls behind its buffer loses the oldest events
//! and the loss is counted on its [`Subscription`]. Subscription lifetime is
//! explicit — dropping the handle unsubscribes.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;

use model::{AccountSnapshot, Position, RunCounters, StrategyStatus, TradeRecord};

/// Event topics. Subscribers receive events of one topic in publication
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    StrategyStatus,
    Trade,
    Position,
    Account,
    BacktestProgress,
    Error,
}

impl Topic {
    pub const ALL: [Topic; 6] = [
        Topic::StrategyStatus,
        Topic::Trade,
        Topic::Position,
        Topic::Account,
        Topic::BacktestProgress,
        Topic::Error,
    ];
}

/// A published event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    StrategyStatus {
        strategy_id: i64,
        status: StrategyStatus,
        counters: RunCounters,
    },
    Trade {
        trade: TradeRecord,
    },
    Position {
        strategy_id: i64,
        position: Option<Position>,
    },
    Account {
        snapshot: AccountSnapshot,
    },
    BacktestProgress {
        backtest_id: i64,
        current: u64,
        total: u64,
        percentage: f64,
        current_balance: Decimal,
    },
    Error {
        strategy_id: Option<i64>,
        kind: String,
        message: String,
    },
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Event::StrategyStatus { .. } => Topic::StrategyStatus,
            Event::Trade { .. } => Topic::Trade,
            Event::Position { .. } => Topic::Position,
            Event::Account { .. } => Topic::Account,
            Event::BacktestProgress { .. } => Topic::BacktestProgress,
            Event::Error { .. } => Topic::Error,
        }
    }
}

/// Multi-subscriber event fan-out, one broadcast channel per topic.
pub struct EventBus {
    channels: HashMap<Topic, broadcast::Sender<Event>>,
}

impl EventBus {
    /// `capacity` is the per-subscriber buffer; a subscriber lagging past it
    /// starts dropping its oldest events.
    pub fn new(capacity: usize) -> Self {
        let mut channels = HashMap::new();
        for topic in Topic::ALL {
            let (tx, _) = broadcast::channel(capacity);
            channels.insert(topic, tx);
        }
        Self { channels }
    }

    /// Publish to the event's topic. Never blocks; a topic without
    /// subscribers discards the event.
    pub fn publish(&self, event: Event) {
        let sender = &self.channels[&event.topic()];
        let _ = sender.send(event);
    }

    /// Subscribe to one topic.
    pub fn subscribe(&self, topic: Topic) -> Subscription {
        Subscription {
            rx: self.channels[&topic].subscribe(),
            dropped: 0,
        }
    }

    /// Current number of subscribers on a topic.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.channels[&topic].receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// A live subscription to one topic. Dropping it unsubscribes.
pub struct Subscription {
    rx: broadcast::Receiver<Event>,
    dropped: u64,
}

impl Subscription {
    /// Next event in publication order. Returns `None` when the bus has been
    /// dropped. Events lost to buffer overrun are counted, not returned.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.dropped += n;
                    tracing::warn!(missed = n, "slow subscriber dropped events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant; `None` when no event is ready.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    self.dropped += n;
                }
                Err(_) => return None,
            }
        }
    }

    /// Total events this subscriber lost to buffer overrun.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error_event(n: i64) -> Event {
        Event::Error {
            strategy_id: Some(n),
            kind: "test".into(),
            message: format!("event {}", n),
        }
    }

    #[tokio::test]
    async fn events_arrive_in_publication_order() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe(Topic::Error);

        for n in 0..5 {
            bus.publish(error_event(n));
        }
        for n in 0..5 {
            let event = sub.recv().await.unwrap();
            let Event::Error { strategy_id, .. } = event else {
                panic!("wrong topic");
            };
            assert_eq!(strategy_id, Some(n));
        }
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = EventBus::new(16);
        let mut trade_sub = bus.subscribe(Topic::Trade);

        bus.publish(error_event(1));
        assert!(trade_sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn slow_subscriber_drops_are_counted() {
        let bus = EventBus::new(4);
        let mut sub = bus.subscribe(Topic::Error);

        // Overrun the 4-slot buffer by a wide margin.
        for n in 0..20 {
            bus.publish(error_event(n));
        }
        // Drain what's left; the subscription records the loss.
        while sub.try_recv().is_some() {}
        assert!(sub.dropped() > 0);
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_block() {
        let bus = EventBus::new(4);
        for n in 0..100 {
            bus.publish(error_event(n));
        }
        assert_eq!(bus.subscriber_count(Topic::Error), 0);
    }
}
