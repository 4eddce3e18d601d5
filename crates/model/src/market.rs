//! Market data types: timeframes, bars, tickers, fills, balances.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::trade::TradeSide;

/// Candle timeframe supported by the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    /// Venue string for this timeframe (also the serialized form).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
        }
    }

    /// Duration of one bar.
    pub fn duration(&self) -> Duration {
        match self {
            Self::M1 => Duration::from_secs(60),
            Self::M5 => Duration::from_secs(5 * 60),
            Self::M15 => Duration::from_secs(15 * 60),
            Self::M30 => Duration::from_secs(30 * 60),
            Self::H1 => Duration::from_secs(60 * 60),
            Self::H4 => Duration::from_secs(4 * 60 * 60),
            Self::D1 => Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Number of bars in a year, used to annualize per-bar return statistics.
    pub fn bars_per_year(&self) -> f64 {
        let bar_secs = self.duration().as_secs() as f64;
        365.0 * 24.0 * 3600.0 / bar_secs
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = ParseTimeframeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Self::M1),
            "5m" => Ok(Self::M5),
            "15m" => Ok(Self::M15),
            "30m" => Ok(Self::M30),
            "1h" => Ok(Self::H1),
            "4h" => Ok(Self::H4),
            "1d" => Ok(Self::D1),
            _ => Err(ParseTimeframeError(s.to_string())),
        }
    }
}

/// Error parsing a timeframe string.
#[derive(Debug, Clone)]
pub struct ParseTimeframeError(String);

impl fmt::Display for ParseTimeframeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown timeframe '{}'", self.0)
    }
}

impl std::error::Error for ParseTimeframeError {}

/// A single OHLCV candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Open time in milliseconds since epoch.
    pub open_time_ms: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Current market snapshot for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub bid: Decimal,
    pub ask: Decimal,
    pub last: Decimal,
    /// Venue mark price, used for notional-to-contract conversion.
    pub mark: Decimal,
    pub timestamp_ms: i64,
}

/// A venue-reported order fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub price: Decimal,
    /// Contract quantity filled.
    pub qty: Decimal,
    pub timestamp_ms: i64,
}

/// Futures account balance in quote currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub total: Decimal,
    pub free: Decimal,
    pub used: Decimal,
}

/// A position as reported by the venue, before it is adopted into a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenuePosition {
    pub symbol: String,
    pub side: TradeSide,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub leverage: u32,
    pub mark_price: Decimal,
    pub unrealized_pnl: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeframe_roundtrip() {
        for tf in [
            Timeframe::M1,
            Timeframe::M5,
            Timeframe::M15,
            Timeframe::M30,
            Timeframe::H1,
            Timeframe::H4,
            Timeframe::D1,
        ] {
            assert_eq!(tf.as_str().parse::<Timeframe>().unwrap(), tf);
        }
        assert!("2h".parse::<Timeframe>().is_err());
    }

    #[test]
    fn timeframe_bars_per_year() {
        assert_eq!(Timeframe::D1.bars_per_year(), 365.0);
        assert_eq!(Timeframe::H1.bars_per_year(), 365.0 * 24.0);
    }

    #[test]
    fn timeframe_serde_uses_venue_string() {
        let s = serde_json::to_string(&Timeframe::M15).unwrap();
        assert_eq!(s, "\"15m\"");
        let tf: Timeframe = serde_json::from_str("\"4h\"").unwrap();
        assert_eq!(tf, Timeframe::H4);
    }
}
