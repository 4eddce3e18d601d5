//! Position state and the fill arithmetic that mutates it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::market::Fill;
use crate::trade::TradeSide;

/// An open position. At most one exists per active strategy run.
///
/// Created by the first `open` trade of a run, grown by `add` trades
/// (quantity-weighted entry price), shrunk or terminated by `close` trades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: TradeSide,
    /// Quantity-weighted average entry price.
    pub entry_price: Decimal,
    /// Aggregate contract quantity. Always positive; direction lives in
    /// `side`.
    pub quantity: Decimal,
    /// Aggregate size in quote currency at entry.
    pub notional: Decimal,
    pub leverage: u32,
    pub opened_at_ms: i64,
    /// Last observed mark price.
    pub mark_price: Decimal,
}

impl Position {
    /// Create a position from the opening fill.
    pub fn open(
        symbol: impl Into<String>,
        side: TradeSide,
        fill: &Fill,
        notional: Decimal,
        leverage: u32,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            entry_price: fill.price,
            quantity: fill.qty,
            notional,
            leverage,
            opened_at_ms: fill.timestamp_ms,
            mark_price: fill.price,
        }
    }

    /// Fold an `add` fill into the position. Entry price becomes the
    /// quantity-weighted mean of the old entry and the fill.
    pub fn add(&mut self, fill: &Fill, notional: Decimal) {
        let total_qty = self.quantity + fill.qty;
        if total_qty > Decimal::ZERO {
            self.entry_price =
                (self.entry_price * self.quantity + fill.price * fill.qty) / total_qty;
        }
        self.quantity = total_qty;
        self.notional += notional;
        self.mark_price = fill.price;
    }

    /// Reduce the position by `qty` contracts at `price`, returning the
    /// realized pnl of the closed portion. The caller removes the position
    /// when the remaining quantity reaches zero.
    pub fn reduce(&mut self, price: Decimal, qty: Decimal) -> Decimal {
        let closed = qty.min(self.quantity);
        let pnl = match self.side {
            TradeSide::Long => (price - self.entry_price) * closed,
            TradeSide::Short => (self.entry_price - price) * closed,
        };
        if self.quantity > Decimal::ZERO {
            let fraction = closed / self.quantity;
            self.notional -= self.notional * fraction;
        }
        self.quantity -= closed;
        self.mark_price = price;
        pnl
    }

    /// True once the quantity has been reduced to zero.
    pub fn is_flat(&self) -> bool {
        self.quantity <= Decimal::ZERO
    }

    /// Unrealized pnl at the given mark price.
    pub fn unrealized_pnl(&self, mark: Decimal) -> Decimal {
        match self.side {
            TradeSide::Long => (mark - self.entry_price) * self.quantity,
            TradeSide::Short => (self.entry_price - mark) * self.quantity,
        }
    }

    /// Signed price move in percent relative to entry. Positive is in the
    /// position's favor: for a long that is price up, for a short price down.
    pub fn price_move_pct(&self, mark: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        let hundred = Decimal::ONE_HUNDRED;
        match self.side {
            TradeSide::Long => (mark - self.entry_price) / self.entry_price * hundred,
            TradeSide::Short => (self.entry_price - mark) / self.entry_price * hundred,
        }
    }

    /// Record the latest observed mark price.
    pub fn set_mark(&mut self, mark: Decimal) {
        self.mark_price = mark;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn fill(price: Decimal, qty: Decimal) -> Fill {
        Fill {
            price,
            qty,
            timestamp_ms: 1_000,
        }
    }

    #[test]
    fn open_then_add_weights_entry_by_quantity() {
        let mut pos = Position::open(
            "BTCUSDT",
            TradeSide::Long,
            &fill(dec!(50000), dec!(1)),
            dec!(50000),
            10,
        );
        pos.add(&fill(dec!(52000), dec!(1)), dec!(52000));

        assert_eq!(pos.quantity, dec!(2));
        assert_eq!(pos.entry_price, dec!(51000));
        assert_eq!(pos.notional, dec!(102000));
    }

    #[test]
    fn unbalanced_add_weights_correctly() {
        let mut pos = Position::open(
            "BTCUSDT",
            TradeSide::Long,
            &fill(dec!(50000), dec!(3)),
            dec!(150000),
            10,
        );
        pos.add(&fill(dec!(48000), dec!(1)), dec!(48000));

        // (50000*3 + 48000*1) / 4 = 49500
        assert_eq!(pos.entry_price, dec!(49500));
    }

    #[test]
    fn reduce_realizes_pnl_and_shrinks() {
        let mut pos = Position::open(
            "BTCUSDT",
            TradeSide::Long,
            &fill(dec!(50000), dec!(2)),
            dec!(100000),
            10,
        );
        let pnl = pos.reduce(dec!(52000), dec!(1));
        assert_eq!(pnl, dec!(2000));
        assert_eq!(pos.quantity, dec!(1));
        assert_eq!(pos.notional, dec!(50000));
        assert!(!pos.is_flat());

        let pnl = pos.reduce(dec!(49000), dec!(1));
        assert_eq!(pnl, dec!(-1000));
        assert!(pos.is_flat());
    }

    #[test]
    fn short_pnl_is_inverted() {
        let pos = Position::open(
            "BTCUSDT",
            TradeSide::Short,
            &fill(dec!(50000), dec!(1)),
            dec!(50000),
            5,
        );
        assert_eq!(pos.unrealized_pnl(dec!(49000)), dec!(1000));
        assert_eq!(pos.unrealized_pnl(dec!(51000)), dec!(-1000));
        assert_eq!(pos.price_move_pct(dec!(45000)), dec!(10));
    }

    #[test]
    fn adverse_move_is_negative_pct() {
        let pos = Position::open(
            "BTCUSDT",
            TradeSide::Long,
            &fill(dec!(50000), dec!(1)),
            dec!(50000),
            10,
        );
        // 11% drop against a long.
        assert_eq!(pos.price_move_pct(dec!(44500)), dec!(-11));
    }
}
