//! Grid kernel: stateful levels inside a price band.
//!
//! The band `[price_low, price_high]` is split into evenly spaced levels.
//! Crossing a level downward opens one long unit there; crossing a level
//! upward exits the nearest open unit below it for profit. Units are exits
//! by partial close, so the position shrinks one unit at a time.

use rust_decimal::Decimal;
use tracing::{debug, info};

use model::{TradeKind, TradeRecord, TradeSide};
use strategy_core::{ConfigDoc, GridSection, KernelError, StrategyContext};

#[derive(Debug, Clone)]
struct GridUnit {
    level: Decimal,
    /// Contracts held by this unit; `None` while the unit is closed.
    qty: Option<Decimal>,
}

#[derive(Debug)]
pub struct GridKernel {
    symbol: String,
    params: GridSection,
    units: Vec<GridUnit>,
    last_price: Option<Decimal>,
    /// Unit index a pending open/close fill should be booked against.
    pending_open: Option<usize>,
    pending_close: Option<usize>,
}

impl GridKernel {
    pub fn from_config(doc: &ConfigDoc) -> Result<Self, KernelError> {
        let trading = doc.trading()?;
        let params = doc
            .grid
            .clone()
            .ok_or_else(|| KernelError::Config("missing 'grid' section".into()))?;

        if params.price_low >= params.price_high {
            return Err(KernelError::Config(
                "grid.price_low must be below grid.price_high".into(),
            ));
        }
        if params.levels < 2 {
            return Err(KernelError::Config("grid.levels must be at least 2".into()));
        }
        if params.order_amount <= Decimal::ZERO {
            return Err(KernelError::Config(
                "grid.order_amount must be positive".into(),
            ));
        }

        let step =
            (params.price_high - params.price_low) / Decimal::from(params.levels as u64 - 1);
        let units = (0..params.levels)
            .map(|i| GridUnit {
                level: params.price_low + step * Decimal::from(i as u64),
                qty: None,
            })
            .collect();

        Ok(Self {
            symbol: trading.symbol.clone(),
            params,
            units,
            last_price: None,
            pending_open: None,
            pending_close: None,
        })
    }

    pub async fn initialize(&mut self, _ctx: &StrategyContext) -> Result<(), KernelError> {
        for unit in &mut self.units {
            unit.qty = None;
        }
        self.last_price = None;
        self.pending_open = None;
        self.pending_close = None;
        info!(
            symbol = %self.symbol,
            low = %self.params.price_low,
            high = %self.params.price_high,
            levels = self.params.levels,
            unit_notional = %self.params.order_amount,
            "grid kernel ready"
        );
        Ok(())
    }

    pub async fn run_once(&mut self, ctx: &StrategyContext) -> Result<(), KernelError> {
        let price = ctx.ticker().last;

        let Some(last) = self.last_price else {
            self.last_price = Some(price);
            return Ok(());
        };
        if price == last {
            return Ok(());
        }

        if price < last {
            // Highest closed level crossed on the way down opens a unit.
            if let Some(idx) = self
                .units
                .iter()
                .enumerate()
                .rev()
                .find(|(_, u)| u.qty.is_none() && last > u.level && price <= u.level)
                .map(|(i, _)| i)
            {
                debug!(level = %self.units[idx].level, price = %price, "buy level crossed");
                let kind = if ctx.position().is_some() {
                    TradeKind::Add
                } else {
                    TradeKind::Open
                };
                self.pending_open = Some(idx);
                ctx.request_trade(kind, TradeSide::Long, self.params.order_amount);
            }
        } else {
            // A level crossed on the way up exits the nearest open unit at
            // or below it.
            let crossed = self
                .units
                .iter()
                .position(|u| last < u.level && price >= u.level);
            if crossed.is_some() {
                if let Some((idx, qty)) = self
                    .units
                    .iter()
                    .enumerate()
                    .rev()
                    .filter(|(_, u)| u.level <= price)
                    .find_map(|(i, u)| u.qty.map(|q| (i, q)))
                {
                    debug!(level = %self.units[idx].level, price = %price, "sell level crossed");
                    self.pending_close = Some(idx);
                    ctx.request_reduce(qty);
                }
            }
        }

        self.last_price = Some(price);
        Ok(())
    }

    pub async fn shutdown(&mut self, _ctx: &StrategyContext, reason: &str) {
        let open_units = self.units.iter().filter(|u| u.qty.is_some()).count();
        info!(symbol = %self.symbol, open_units, reason, "grid kernel shut down");
    }

    pub fn on_trade(&mut self, trade: &TradeRecord) {
        match trade.kind {
            TradeKind::Open | TradeKind::Add => {
                if let Some(idx) = self.pending_open.take() {
                    self.units[idx].qty = Some(trade.quantity);
                }
            }
            TradeKind::Close => {
                if let Some(idx) = self.pending_close.take() {
                    self.units[idx].qty = None;
                } else {
                    // A force-close flattened everything.
                    for unit in &mut self.units {
                        unit.qty = None;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn kernel() -> GridKernel {
        let doc = ConfigDoc::parse(
            r#"
trading: { symbol: BTCUSDT, side: long, leverage: 3 }
grid: { price_low: 40000, price_high: 44000, levels: 5, order_amount: 50 }
risk: { stop_loss_percent: 15, take_profit_percent: 20, max_loss_percent: 20 }
"#,
        )
        .unwrap();
        GridKernel::from_config(&doc).unwrap()
    }

    #[test]
    fn levels_span_the_band_evenly() {
        let k = kernel();
        let levels: Vec<Decimal> = k.units.iter().map(|u| u.level).collect();
        assert_eq!(
            levels,
            vec![dec!(40000), dec!(41000), dec!(42000), dec!(43000), dec!(44000)]
        );
    }

    #[test]
    fn fills_book_against_pending_units() {
        let mut k = kernel();
        k.pending_open = Some(2);
        k.on_trade(&TradeRecord {
            id: 1,
            strategy_id: 1,
            run_id: 1,
            kind: TradeKind::Open,
            side: TradeSide::Long,
            symbol: "BTCUSDT".into(),
            price: dec!(41900),
            quantity: dec!(0.0012),
            notional: dec!(50),
            pnl: None,
            executed_at: chrono::Utc::now(),
        });
        assert_eq!(k.units[2].qty, Some(dec!(0.0012)));

        k.pending_close = Some(2);
        k.on_trade(&TradeRecord {
            id: 2,
            strategy_id: 1,
            run_id: 1,
            kind: TradeKind::Close,
            side: TradeSide::Long,
            symbol: "BTCUSDT".into(),
            price: dec!(43100),
            quantity: dec!(0.0012),
            notional: dec!(51),
            pnl: Some(dec!(1.4)),
            executed_at: chrono::Utc::now(),
        });
        assert!(k.units[2].qty.is_none());
    }

    #[test]
    fn force_close_clears_all_units() {
        let mut k = kernel();
        k.units[1].qty = Some(dec!(0.001));
        k.units[3].qty = Some(dec!(0.001));

        k.on_trade(&TradeRecord {
            id: 3,
            strategy_id: 1,
            run_id: 1,
            kind: TradeKind::Close,
            side: TradeSide::Long,
            symbol: "BTCUSDT".into(),
            price: dec!(39000),
            quantity: dec!(0.002),
            notional: dec!(78),
            pnl: Some(dec!(-6)),
            executed_at: chrono::Utc::now(),
        });
        assert!(k.units.iter().all(|u| u.qty.is_none()));
    }

    #[test]
    fn invalid_band_is_config_error() {
        let doc = ConfigDoc::parse(
            r#"
trading: { symbol: BTCUSDT, side: long, leverage: 3 }
grid: { price_low: 44000, price_high: 40000, levels: 5, order_amount: 50 }
risk: { stop_loss_percent: 15, take_profit_percent: 20, max_loss_percent: 20 }
"#,
        )
        .unwrap();
        assert!(matches!(
            GridKernel::from_config(&doc),
            Err(KernelError::Config(_))
        ));
    }
}
