//! Backtest parameters, results, and derived statistics.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::market::Timeframe;
use crate::trade::{ParseEnumError, TradeRecord};

/// Lifecycle of a backtest request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BacktestStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl BacktestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for BacktestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BacktestStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(ParseEnumError("backtest status", s.to_string())),
        }
    }
}

/// Inputs of a backtest. The strategy's configuration document is cloned at
/// submission time; symbol and timeframe may override the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestParams {
    pub strategy_id: i64,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start_ms: i64,
    pub end_ms: i64,
    pub initial_balance: Decimal,
    /// Flat taker fee as a fraction of notional (e.g. 0.0004).
    pub fee_rate: Decimal,
}

/// One sample of the equity curve: balance plus unrealized pnl at a bar
/// close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp_ms: i64,
    pub equity: Decimal,
}

/// Statistics derived from the equity curve and simulated trade tape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestStats {
    /// Total return as a fraction of the initial balance.
    pub total_return: f64,
    /// Fraction of closing trades with positive pnl.
    pub win_rate: f64,
    /// Maximum peak-to-trough fraction of the equity curve.
    pub max_drawdown: f64,
    /// Mean over std of per-bar returns, annualized by timeframe.
    pub sharpe_ratio: f64,
    /// Sum of gains over absolute sum of losses.
    pub profit_factor: f64,
    pub mean_win: f64,
    pub mean_loss: f64,
}

/// A persisted backtest with its equity curve and simulated trades.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestRecord {
    pub id: i64,
    pub params: BacktestParams,
    pub status: BacktestStatus,
    pub stats: Option<BacktestStats>,
    pub final_balance: Option<Decimal>,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<TradeRecord>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
