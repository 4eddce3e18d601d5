//! The strategy configuration document.
//!
//! Stored as YAML on the strategy definition and parsed once, at start,
//! into typed sections. The first missing or malformed field surfaces as
//! [`KernelError::Config`]; nothing downstream ever touches the raw map.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use model::TradeSide;
use risk::RiskPolicy;

use crate::error::KernelError;

/// What to do with a pre-existing venue position when a run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileMode {
    /// Adopt the venue position into the new run.
    Adopt,
    /// Flatten it before the first tick.
    #[default]
    Close,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TradingSection {
    pub symbol: String,
    pub side: TradeSide,
    pub leverage: u32,
    #[serde(default)]
    pub reconcile_on_start: ReconcileMode,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RiskSection {
    pub stop_loss_percent: Decimal,
    pub take_profit_percent: Decimal,
    pub max_loss_percent: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitoringSection {
    /// Seconds between ticks.
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
    #[serde(default = "default_price_precision")]
    pub price_precision: u32,
}

fn default_check_interval() -> u64 {
    5
}

fn default_price_precision() -> u32 {
    2
}

impl Default for MonitoringSection {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            price_precision: default_price_precision(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerSection {
    #[serde(default)]
    pub price_drop_percent: Decimal,
    #[serde(default)]
    pub start_immediately: bool,
    /// Seconds between consecutive adds; feeds the risk gate cooldown.
    #[serde(default)]
    pub addition_cooldown: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MartingaleSection {
    /// First position size in quote currency.
    pub initial_position: Decimal,
    /// Each addition is the previous size times this.
    pub multiplier: Decimal,
    pub max_additions: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DcaSection {
    pub investment_amount: Decimal,
    pub interval_minutes: u64,
    /// Only buy when price is at or below this; absent means unconditional.
    #[serde(default)]
    pub price_ceiling: Option<Decimal>,
    /// Total notional budget across the run.
    pub max_investment: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GridSection {
    pub price_low: Decimal,
    pub price_high: Decimal,
    pub levels: u32,
    /// Notional per grid unit.
    pub order_amount: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrendSection {
    pub position_size: Decimal,
    pub fast_period: usize,
    pub slow_period: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MeanReversionSection {
    pub position_size: Decimal,
    pub ma_period: usize,
    pub deviation_percent: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MlSection {
    #[serde(default = "default_lookback")]
    pub lookback_periods: usize,
    #[serde(default = "default_horizon")]
    pub prediction_horizon: usize,
    #[serde(default = "default_min_samples")]
    pub min_samples_to_train: usize,
    /// Seconds between retrains.
    #[serde(default = "default_retrain_interval")]
    pub retrain_interval: u64,
    pub confidence_threshold: f64,
    pub position_size: Decimal,
    #[serde(default = "default_n_trees")]
    pub n_trees: usize,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_lookback() -> usize {
    100
}
fn default_horizon() -> usize {
    5
}
fn default_min_samples() -> usize {
    200
}
fn default_retrain_interval() -> u64 {
    24 * 60 * 60
}
fn default_n_trees() -> usize {
    50
}
fn default_max_depth() -> usize {
    8
}
fn default_seed() -> u64 {
    42
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmSection {
    /// Chat-completions endpoint; absent means the provider default.
    #[serde(default)]
    pub api_base: Option<String>,
    /// Key override; absent means the `LLM_API_KEY` environment variable.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Minimum seconds between endpoint calls.
    #[serde(default = "default_call_interval")]
    pub call_interval: u64,
    pub confidence_threshold: f64,
    pub position_size: Decimal,
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f64 {
    0.3
}
fn default_max_tokens() -> u32 {
    500
}
fn default_call_interval() -> u64 {
    300
}

/// The parsed configuration document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigDoc {
    pub trading: Option<TradingSection>,
    pub risk: Option<RiskSection>,
    pub monitoring: Option<MonitoringSection>,
    pub trigger: Option<TriggerSection>,
    pub martingale: Option<MartingaleSection>,
    pub dca: Option<DcaSection>,
    pub grid: Option<GridSection>,
    pub trend: Option<TrendSection>,
    pub mean_reversion: Option<MeanReversionSection>,
    pub ml: Option<MlSection>,
    pub llm: Option<LlmSection>,
}

impl ConfigDoc {
    pub fn parse(yaml: &str) -> Result<Self, KernelError> {
        serde_yaml::from_str(yaml).map_err(|e| KernelError::Config(e.to_string()))
    }

    pub fn trading(&self) -> Result<&TradingSection, KernelError> {
        self.trading
            .as_ref()
            .ok_or_else(|| KernelError::Config("missing 'trading' section".into()))
    }

    pub fn risk(&self) -> Result<&RiskSection, KernelError> {
        self.risk
            .as_ref()
            .ok_or_else(|| KernelError::Config("missing 'risk' section".into()))
    }

    pub fn monitoring(&self) -> MonitoringSection {
        self.monitoring.clone().unwrap_or_default()
    }

    /// Names of the kernel sections present in this document. Exactly one
    /// must be present for the document to drive a strategy.
    pub fn kernel_sections(&self) -> Vec<&'static str> {
        let mut present = Vec::new();
        if self.martingale.is_some() {
            present.push("martingale");
        }
        if self.dca.is_some() {
            present.push("dca");
        }
        if self.grid.is_some() {
            present.push("grid");
        }
        if self.trend.is_some() {
            present.push("trend");
        }
        if self.mean_reversion.is_some() {
            present.push("mean_reversion");
        }
        if self.ml.is_some() {
            present.push("ml");
        }
        if self.llm.is_some() {
            present.push("llm");
        }
        present
    }

    /// Assemble the run's risk policy: thresholds from the `risk` section,
    /// addition limit from the martingale section when present, cooldown
    /// from the trigger section.
    pub fn risk_policy(&self) -> Result<RiskPolicy, KernelError> {
        let risk = self.risk()?;
        let max_additions = self
            .martingale
            .as_ref()
            .map(|m| m.max_additions)
            .unwrap_or(u32::MAX);
        let cooldown = self
            .trigger
            .as_ref()
            .map(|t| Duration::from_secs(t.addition_cooldown))
            .unwrap_or(Duration::ZERO);

        Ok(RiskPolicy {
            stop_loss_pct: risk.stop_loss_percent,
            take_profit_pct: risk.take_profit_percent,
            max_loss_pct: risk.max_loss_percent,
            max_additions,
            cooldown,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const MARTINGALE_YAML: &str = r#"
trading:
  symbol: "BTC/USDT:USDT"
  side: long
  leverage: 10
martingale:
  initial_position: 200
  multiplier: 2.0
  max_additions: 5
trigger:
  price_drop_percent: 5.0
  start_immediately: true
  addition_cooldown: 60
risk:
  stop_loss_percent: 10.0
  take_profit_percent: 15.0
  max_loss_percent: 20.0
monitoring:
  check_interval: 5
  price_precision: 2
"#;

    #[test]
    fn full_document_parses() {
        let doc = ConfigDoc::parse(MARTINGALE_YAML).unwrap();
        let trading = doc.trading().unwrap();
        assert_eq!(trading.symbol, "BTC/USDT:USDT");
        assert_eq!(trading.side, TradeSide::Long);
        assert_eq!(trading.reconcile_on_start, ReconcileMode::Close);

        let m = doc.martingale.as_ref().unwrap();
        assert_eq!(m.initial_position, dec!(200));
        assert_eq!(m.multiplier, dec!(2.0));
        assert_eq!(doc.kernel_sections(), vec!["martingale"]);
    }

    #[test]
    fn risk_policy_combines_sections() {
        let doc = ConfigDoc::parse(MARTINGALE_YAML).unwrap();
        let policy = doc.risk_policy().unwrap();
        assert_eq!(policy.stop_loss_pct, dec!(10));
        assert_eq!(policy.max_additions, 5);
        assert_eq!(policy.cooldown, Duration::from_secs(60));
    }

    #[test]
    fn missing_required_field_is_config_error() {
        let err = ConfigDoc::parse(
            "trading:\n  symbol: BTCUSDT\n  side: long\n",
        )
        .unwrap_err();
        let KernelError::Config(msg) = err else {
            panic!("expected config error");
        };
        assert!(msg.contains("leverage"), "got: {}", msg);
    }

    #[test]
    fn missing_sections_error_on_access() {
        let doc = ConfigDoc::parse("{}").unwrap();
        assert!(doc.trading().is_err());
        assert!(doc.risk().is_err());
        assert!(doc.kernel_sections().is_empty());
        // Monitoring has usable defaults.
        assert_eq!(doc.monitoring().check_interval, 5);
    }

    #[test]
    fn unknown_field_in_section_is_rejected() {
        let err = ConfigDoc::parse(
            "risk:\n  stop_loss_percent: 1\n  take_profit_percent: 2\n  max_loss_percent: 3\n  typo_field: 4\n",
        )
        .unwrap_err();
        assert!(matches!(err, KernelError::Config(_)));
    }
}
