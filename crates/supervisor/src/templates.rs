//! Immutable catalog of configuration templates.
//!
//! Templates only seed new strategy definitions; they play no role at run
//! time.

/// A parameterized configuration document with display metadata.
#[derive(Debug, Clone)]
pub struct StrategyTemplate {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub category: &'static str,
    pub config_yaml: &'static str,
}

/// The built-in template catalog, one per kernel.
pub fn builtin_templates() -> &'static [StrategyTemplate] {
    &TEMPLATES
}

static TEMPLATES: [StrategyTemplate; 7] = [
    StrategyTemplate {
        id: "martingale",
        name: "Martingale",
        description: "Scale into dips: each trigger adds a multiplied position",
        category: "position-scaling",
        config_yaml: r#"trading:
  symbol: "BTC/USDT:USDT"
  side: long
  leverage: 10

martingale:
  initial_position: 200      # quote currency
  multiplier: 2.0
  max_additions: 5

trigger:
  price_drop_percent: 5.0
  start_immediately: true
  addition_cooldown: 60      # seconds

risk:
  stop_loss_percent: 10.0
  take_profit_percent: 15.0
  max_loss_percent: 20.0

monitoring:
  check_interval: 5
  price_precision: 2
"#,
    },
    StrategyTemplate {
        id: "dca",
        name: "DCA",
        description: "Fixed notional on a fixed cadence, bounded by a budget",
        category: "scheduled",
        config_yaml: r#"trading:
  symbol: "BTC/USDT:USDT"
  side: long
  leverage: 1

dca:
  investment_amount: 100
  interval_minutes: 60
  max_investment: 1000

risk:
  stop_loss_percent: 20.0
  take_profit_percent: 30.0
  max_loss_percent: 25.0

monitoring:
  check_interval: 60
  price_precision: 2
"#,
    },
    StrategyTemplate {
        id: "grid",
        name: "Grid",
        description: "Buy level crossings down, sell them back on the way up",
        category: "grid",
        config_yaml: r#"trading:
  symbol: "BTC/USDT:USDT"
  side: long
  leverage: 3

grid:
  price_low: 50000
  price_high: 70000
  levels: 10
  order_amount: 50

risk:
  stop_loss_percent: 15.0
  take_profit_percent: 20.0
  max_loss_percent: 20.0

monitoring:
  check_interval: 10
  price_precision: 2
"#,
    },
    StrategyTemplate {
        id: "trend_following",
        name: "Trend Following",
        description: "Ride fast/slow moving-average crossovers",
        category: "trend",
        config_yaml: r#"trading:
  symbol: "BTC/USDT:USDT"
  side: long
  leverage: 5

trend:
  position_size: 200
  fast_period: 10
  slow_period: 30

risk:
  stop_loss_percent: 8.0
  take_profit_percent: 12.0
  max_loss_percent: 15.0

monitoring:
  check_interval: 30
  price_precision: 2
"#,
    },
    StrategyTemplate {
        id: "mean_reversion",
        name: "Mean Reversion",
        description: "Fade deviations from a moving-average baseline",
        category: "mean-reversion",
        config_yaml: r#"trading:
  symbol: "BTC/USDT:USDT"
  side: long
  leverage: 3

mean_reversion:
  position_size: 150
  ma_period: 20
  deviation_percent: 2.0

risk:
  stop_loss_percent: 8.0
  take_profit_percent: 12.0
  max_loss_percent: 15.0

monitoring:
  check_interval: 30
  price_precision: 2
"#,
    },
    StrategyTemplate {
        id: "random_forest",
        name: "Random Forest",
        description: "Direction classifier over technical factors",
        category: "machine-learning",
        config_yaml: r#"trading:
  symbol: "BTC/USDT:USDT"
  side: long
  leverage: 10

ml:
  lookback_periods: 100
  prediction_horizon: 5
  min_samples_to_train: 200
  retrain_interval: 86400
  confidence_threshold: 0.6
  position_size: 200

risk:
  stop_loss_percent: 10.0
  take_profit_percent: 15.0
  max_loss_percent: 20.0

monitoring:
  check_interval: 60
  price_precision: 2
"#,
    },
    StrategyTemplate {
        id: "llm",
        name: "LLM Signal",
        description: "Prompted multi-factor analyst behind a confidence gate",
        category: "llm",
        config_yaml: r#"trading:
  symbol: "BTC/USDT:USDT"
  side: long
  leverage: 5

llm:
  model: "gpt-4o-mini"
  temperature: 0.3
  max_tokens: 500
  call_interval: 300
  confidence_threshold: 0.7
  position_size: 200

risk:
  stop_loss_percent: 10.0
  take_profit_percent: 15.0
  max_loss_percent: 20.0

monitoring:
  check_interval: 60
  price_precision: 2
"#,
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use strategies::Kernel;
    use strategy_core::ConfigDoc;

    #[test]
    fn every_template_parses_and_builds_its_kernel() {
        for template in builtin_templates() {
            let doc = ConfigDoc::parse(template.config_yaml)
                .unwrap_or_else(|e| panic!("template '{}' failed to parse: {}", template.id, e));
            let kernel = Kernel::from_config(&doc)
                .unwrap_or_else(|e| panic!("template '{}' kernel rejected: {}", template.id, e));
            doc.risk_policy()
                .unwrap_or_else(|e| panic!("template '{}' risk policy: {}", template.id, e));
            assert!(!kernel.name().is_empty());
        }
    }

    #[test]
    fn template_ids_are_unique() {
        let mut ids: Vec<&str> = builtin_templates().iter().map(|t| t.id).collect();
        let before = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), before);
    }
}
