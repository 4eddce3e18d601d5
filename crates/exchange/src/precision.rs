//! Symbol normalization and venue precision rules.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::adapter::OrderSide;

/// Normalize a user-supplied symbol to the venue's form.
///
/// Accepts `BTC/USDT:USDT` (unified format), `btcusdt`, or `BTCUSDT`; always
/// returns the venue form `BTCUSDT`.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol
        .split(':')
        .next()
        .unwrap_or(symbol)
        .replace('/', "")
        .to_ascii_uppercase()
}

/// Venue-declared precision and size limits for one symbol.
#[derive(Debug, Clone)]
pub struct SymbolRules {
    /// Decimal places allowed on prices.
    pub price_decimals: u32,
    /// Decimal places allowed on contract quantities.
    pub amount_decimals: u32,
    /// Minimum order notional in quote currency.
    pub min_notional: Decimal,
}

impl SymbolRules {
    /// Round a contract quantity to the venue's amount precision,
    /// half-to-even.
    pub fn round_amount(&self, amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(self.amount_decimals, RoundingStrategy::MidpointNearestEven)
    }

    /// Round a price to the venue's price precision: floor for buys, ceil
    /// for sells, so the rounded price never crosses the intended level.
    pub fn round_price(&self, price: Decimal, side: OrderSide) -> Decimal {
        let strategy = match side {
            OrderSide::Buy => RoundingStrategy::ToNegativeInfinity,
            OrderSide::Sell => RoundingStrategy::ToPositiveInfinity,
        };
        price.round_dp_with_strategy(self.price_decimals, strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn rules() -> SymbolRules {
        SymbolRules {
            price_decimals: 2,
            amount_decimals: 3,
            min_notional: dec!(100),
        }
    }

    #[test]
    fn symbol_forms_normalize() {
        assert_eq!(normalize_symbol("BTC/USDT:USDT"), "BTCUSDT");
        assert_eq!(normalize_symbol("btcusdt"), "BTCUSDT");
        assert_eq!(normalize_symbol("ETHUSDT"), "ETHUSDT");
    }

    #[test]
    fn amount_rounds_half_to_even() {
        let r = rules();
        assert_eq!(r.round_amount(dec!(0.0045)), dec!(0.004));
        assert_eq!(r.round_amount(dec!(0.0055)), dec!(0.006));
        assert_eq!(r.round_amount(dec!(0.0041)), dec!(0.004));
    }

    #[test]
    fn price_rounds_away_from_crossing() {
        let r = rules();
        assert_eq!(r.round_price(dec!(50000.129), OrderSide::Buy), dec!(50000.12));
        assert_eq!(
            r.round_price(dec!(50000.121), OrderSide::Sell),
            dec!(50000.13)
        );
    }
}
