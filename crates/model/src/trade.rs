//! Trade records and their enums.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What a trade did to the position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeKind {
    /// First fill of a run; creates the position.
    Open,
    /// Increases an existing position; entry price becomes quantity-weighted.
    Add,
    /// Reduces or terminates the position; carries realized pnl.
    Close,
}

impl TradeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Add => "add",
            Self::Close => "close",
        }
    }
}

impl fmt::Display for TradeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "add" => Ok(Self::Add),
            "close" => Ok(Self::Close),
            _ => Err(ParseEnumError("trade kind", s.to_string())),
        }
    }
}

/// Direction of the position a trade belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Long,
    Short,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Short => "short",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeSide {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "long" => Ok(Self::Long),
            "short" => Ok(Self::Short),
            _ => Err(ParseEnumError("trade side", s.to_string())),
        }
    }
}

/// Error parsing a persisted enum string.
#[derive(Debug, Clone)]
pub struct ParseEnumError(pub &'static str, pub String);

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {} '{}'", self.0, self.1)
    }
}

impl std::error::Error for ParseEnumError {}

/// An executed trade. Append-only: once written to the ledger it never
/// changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: i64,
    pub strategy_id: i64,
    /// The run that was open when the trade was appended.
    pub run_id: i64,
    pub kind: TradeKind,
    pub side: TradeSide,
    pub symbol: String,
    /// Venue fill price.
    pub price: Decimal,
    /// Contract quantity.
    pub quantity: Decimal,
    /// Size in quote currency at fill time.
    pub notional: Decimal,
    /// Realized pnl; set only on `Close` trades.
    pub pnl: Option<Decimal>,
    pub executed_at: DateTime<Utc>,
}
