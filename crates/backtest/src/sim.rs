//! The simulated exchange adapter.
//!
//! Backed by a bar sequence: `fetch_ticker` returns the current bar's close
//! and orders fill at the next bar's open, which removes look-ahead from the
//! kernel's decisions. A flat fee fraction is charged on every fill's
//! notional.

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use exchange::{ExchangeAdapter, VenueError};
use model::{Balance, Bar, Fill, Position, Ticker, Timeframe, TradeSide, VenuePosition};

struct SimState {
    index: usize,
    /// Realized cash: initial balance plus realized pnl minus fees.
    cash: Decimal,
    position: Option<Position>,
}

pub struct SimAdapter {
    bars: Vec<Bar>,
    timeframe: Timeframe,
    fee_rate: Decimal,
    leverage: Mutex<u32>,
    state: Mutex<SimState>,
}

impl SimAdapter {
    pub fn new(
        bars: Vec<Bar>,
        timeframe: Timeframe,
        initial_balance: Decimal,
        fee_rate: Decimal,
    ) -> Self {
        Self {
            bars,
            timeframe,
            fee_rate,
            leverage: Mutex::new(1),
            state: Mutex::new(SimState {
                index: 0,
                cash: initial_balance,
                position: None,
            }),
        }
    }

    /// Advance the simulated clock to bar `index`.
    pub fn set_index(&self, index: usize) {
        self.state.lock().index = index;
    }

    /// Close time of the current bar in milliseconds.
    pub fn now_ms(&self) -> i64 {
        let index = self.state.lock().index;
        self.bars[index].open_time_ms + self.timeframe.duration().as_millis() as i64
    }

    /// The engine's view of the simulated position.
    pub fn position(&self) -> Option<Position> {
        self.state.lock().position.clone()
    }

    /// Equity right now: cash plus unrealized pnl at the current close.
    pub fn equity(&self) -> Decimal {
        let state = self.state.lock();
        let mark = self.bars[state.index].close;
        let upnl = state
            .position
            .as_ref()
            .map(|p| p.unrealized_pnl(mark))
            .unwrap_or(Decimal::ZERO);
        state.cash + upnl
    }

    /// Fill price for an order placed during the current bar: the next
    /// bar's open, or the current close on the final bar.
    fn fill_price(&self, index: usize) -> Decimal {
        self.bars
            .get(index + 1)
            .map(|b| b.open)
            .unwrap_or(self.bars[index].close)
    }

    fn fill_time_ms(&self, index: usize) -> i64 {
        self.bars
            .get(index + 1)
            .map(|b| b.open_time_ms)
            .unwrap_or_else(|| {
                self.bars[index].open_time_ms + self.timeframe.duration().as_millis() as i64
            })
    }
}

#[async_trait]
impl ExchangeAdapter for SimAdapter {
    async fn configure_leverage(&self, _symbol: &str, leverage: u32) -> Result<(), VenueError> {
        *self.leverage.lock() = leverage.max(1);
        Ok(())
    }

    async fn fetch_ticker(&self, _symbol: &str) -> Result<Ticker, VenueError> {
        let state = self.state.lock();
        let bar = &self.bars[state.index];
        let close_time = bar.open_time_ms + self.timeframe.duration().as_millis() as i64;
        Ok(Ticker {
            bid: bar.close,
            ask: bar.close,
            last: bar.close,
            mark: bar.close,
            timestamp_ms: close_time,
        })
    }

    async fn fetch_bars(
        &self,
        _symbol: &str,
        _timeframe: Timeframe,
        limit: u32,
    ) -> Result<Vec<Bar>, VenueError> {
        // Only history up to the simulated clock; never the future.
        let state = self.state.lock();
        let end = state.index + 1;
        let start = end.saturating_sub(limit as usize);
        Ok(self.bars[start..end].to_vec())
    }

    async fn open_market(
        &self,
        symbol: &str,
        side: TradeSide,
        notional: Decimal,
    ) -> Result<Fill, VenueError> {
        let leverage = *self.leverage.lock();
        let mut state = self.state.lock();
        let index = state.index;
        let price = self.fill_price(index);
        if price <= Decimal::ZERO {
            return Err(VenueError::Parse("non-positive simulated price".into()));
        }

        let qty = notional / price;
        let fill = Fill {
            price,
            qty,
            timestamp_ms: self.fill_time_ms(index),
        };

        state.cash -= notional * self.fee_rate;
        match &mut state.position {
            Some(pos) => {
                if pos.side != side {
                    return Err(VenueError::OrderRejected(
                        "opposite-side entry against an open position".into(),
                    ));
                }
                pos.add(&fill, notional);
            }
            None => {
                state.position = Some(Position::open(symbol, side, &fill, notional, leverage));
            }
        }
        Ok(fill)
    }

    async fn close_market(&self, _symbol: &str, side: TradeSide) -> Result<Fill, VenueError> {
        let mut state = self.state.lock();
        let index = state.index;
        let price = self.fill_price(index);
        let timestamp_ms = self.fill_time_ms(index);

        let Some(pos) = &mut state.position else {
            return Err(VenueError::OrderRejected("no open position".into()));
        };
        if pos.side != side {
            return Err(VenueError::OrderRejected("position side mismatch".into()));
        }

        let qty = pos.quantity;
        let pnl = pos.reduce(price, qty);
        state.cash += pnl - price * qty * self.fee_rate;
        state.position = None;

        Ok(Fill {
            price,
            qty,
            timestamp_ms,
        })
    }

    async fn reduce_market(
        &self,
        _symbol: &str,
        side: TradeSide,
        quantity: Decimal,
    ) -> Result<Fill, VenueError> {
        let mut state = self.state.lock();
        let index = state.index;
        let price = self.fill_price(index);
        let timestamp_ms = self.fill_time_ms(index);

        let (qty, pnl, flat) = {
            let Some(pos) = &mut state.position else {
                return Err(VenueError::OrderRejected("no open position".into()));
            };
            if pos.side != side {
                return Err(VenueError::OrderRejected("position side mismatch".into()));
            }

            let qty = quantity.min(pos.quantity);
            let pnl = pos.reduce(price, qty);
            (qty, pnl, pos.is_flat())
        };
        state.cash += pnl - price * qty * self.fee_rate;
        if flat {
            state.position = None;
        }

        Ok(Fill {
            price,
            qty,
            timestamp_ms,
        })
    }

    async fn fetch_position(&self, _symbol: &str) -> Result<Option<VenuePosition>, VenueError> {
        let state = self.state.lock();
        let mark = self.bars[state.index].close;
        Ok(state.position.as_ref().map(|p| VenuePosition {
            symbol: p.symbol.clone(),
            side: p.side,
            entry_price: p.entry_price,
            quantity: p.quantity,
            leverage: p.leverage,
            mark_price: mark,
            unrealized_pnl: p.unrealized_pnl(mark),
        }))
    }

    async fn fetch_balance(&self) -> Result<Balance, VenueError> {
        let state = self.state.lock();
        let mark = self.bars[state.index].close;
        let upnl = state
            .position
            .as_ref()
            .map(|p| p.unrealized_pnl(mark))
            .unwrap_or(Decimal::ZERO);
        let total = state.cash + upnl;
        let used = state
            .position
            .as_ref()
            .map(|p| p.notional / Decimal::from(p.leverage.max(1)))
            .unwrap_or(Decimal::ZERO);
        Ok(Balance {
            total,
            free: total - used,
            used,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bars() -> Vec<Bar> {
        [50_000, 49_500, 48_500, 47_500]
            .iter()
            .enumerate()
            .map(|(i, close)| Bar {
                open_time_ms: i as i64 * 60_000,
                open: Decimal::from(*close + 100),
                high: Decimal::from(*close + 200),
                low: Decimal::from(*close - 200),
                close: Decimal::from(*close),
                volume: dec!(10),
            })
            .collect()
    }

    #[tokio::test]
    async fn ticker_returns_current_close() {
        let sim = SimAdapter::new(bars(), Timeframe::M1, dec!(10000), Decimal::ZERO);
        let t = sim.fetch_ticker("BTCUSDT").await.unwrap();
        assert_eq!(t.last, dec!(50000));

        sim.set_index(2);
        let t = sim.fetch_ticker("BTCUSDT").await.unwrap();
        assert_eq!(t.last, dec!(48500));
    }

    #[tokio::test]
    async fn orders_fill_at_next_bar_open() {
        let sim = SimAdapter::new(bars(), Timeframe::M1, dec!(10000), Decimal::ZERO);
        let fill = sim
            .open_market("BTCUSDT", TradeSide::Long, dec!(200))
            .await
            .unwrap();
        // Next bar's open is 49_600.
        assert_eq!(fill.price, dec!(49600));
        assert_eq!(fill.qty, dec!(200) / dec!(49600));
    }

    #[tokio::test]
    async fn bars_never_leak_the_future() {
        let sim = SimAdapter::new(bars(), Timeframe::M1, dec!(10000), Decimal::ZERO);
        sim.set_index(1);
        let history = sim.fetch_bars("BTCUSDT", Timeframe::M1, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.last().unwrap().close, dec!(49500));
    }

    #[tokio::test]
    async fn close_realizes_pnl_and_fees() {
        let sim = SimAdapter::new(bars(), Timeframe::M1, dec!(10000), dec!(0.001));
        sim.open_market("BTCUSDT", TradeSide::Long, dec!(1000))
            .await
            .unwrap();
        sim.set_index(2);
        sim.close_market("BTCUSDT", TradeSide::Long).await.unwrap();

        // Entry 49600, exit 47600 (open of bar 3), qty = 1000/49600.
        let qty = dec!(1000) / dec!(49600);
        let pnl = (dec!(47600) - dec!(49600)) * qty;
        let fees = dec!(1000) * dec!(0.001) + dec!(47600) * qty * dec!(0.001);
        let balance = sim.fetch_balance().await.unwrap();
        assert_eq!(balance.total, dec!(10000) + pnl - fees);
        assert!(sim.position().is_none());
    }

    #[tokio::test]
    async fn equity_tracks_unrealized() {
        let sim = SimAdapter::new(bars(), Timeframe::M1, dec!(10000), Decimal::ZERO);
        sim.open_market("BTCUSDT", TradeSide::Long, dec!(992))
            .await
            .unwrap();
        sim.set_index(3);
        let qty = dec!(992) / dec!(49600); // 0.02
        let expected = dec!(10000) + (dec!(47500) - dec!(49600)) * qty;
        assert_eq!(sim.equity(), expected);
    }
}
