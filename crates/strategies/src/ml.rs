//! Random-forest classifier kernel.
//!
//! Keeps a bounded close-price buffer, computes the shared factor vector,
//! and asks the forest for a direction probability each tick. Trades fire
//! when the probability clears the configured confidence threshold.
//! Retraining happens inline on a cadence (or on demand via the supervisor's
//! retrain command) and is guarded: the previous model keeps serving until a
//! replacement trains successfully.

use std::collections::VecDeque;

use rust_decimal::prelude::ToPrimitive;
use tracing::{debug, info, warn};

use model::{Timeframe, TradeKind, TradeRecord, TradeSide};
use strategy_core::{ConfigDoc, KernelError, MlSection, StrategyContext};

use crate::forest::{Forest, ForestConfig};
use crate::oracle::{
    build_features, Direction, DirectionOracle, Features, Prediction, MIN_FEATURE_HISTORY,
};

pub struct ForestKernel {
    symbol: String,
    params: MlSection,
    prices: VecDeque<f64>,
    model: Option<Forest>,
    last_retrain_ms: Option<i64>,
    retrain_requested: bool,
    /// Injected prediction source; replaces the trained forest when set.
    external_oracle: Option<Box<dyn DirectionOracle>>,
}

impl std::fmt::Debug for ForestKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForestKernel")
            .field("symbol", &self.symbol)
            .field("params", &self.params)
            .field("prices", &self.prices)
            .field("model", &self.model)
            .field("last_retrain_ms", &self.last_retrain_ms)
            .field("retrain_requested", &self.retrain_requested)
            .field("external_oracle", &self.external_oracle.is_some())
            .finish()
    }
}

impl ForestKernel {
    pub fn from_config(doc: &ConfigDoc) -> Result<Self, KernelError> {
        let trading = doc.trading()?;
        let params = doc
            .ml
            .clone()
            .ok_or_else(|| KernelError::Config("missing 'ml' section".into()))?;

        if !(0.0..=1.0).contains(&params.confidence_threshold) {
            return Err(KernelError::Config(
                "ml.confidence_threshold must be in [0, 1]".into(),
            ));
        }
        if params.position_size <= rust_decimal::Decimal::ZERO {
            return Err(KernelError::Config(
                "ml.position_size must be positive".into(),
            ));
        }
        if params.prediction_horizon == 0 {
            return Err(KernelError::Config(
                "ml.prediction_horizon must be positive".into(),
            ));
        }

        Ok(Self {
            symbol: trading.symbol.clone(),
            params,
            prices: VecDeque::new(),
            model: None,
            last_retrain_ms: None,
            retrain_requested: false,
            external_oracle: None,
        })
    }

    /// Replace the trained forest with an external prediction source.
    pub fn with_oracle(mut self, oracle: Box<dyn DirectionOracle>) -> Self {
        self.external_oracle = Some(oracle);
        self
    }

    /// Ask for a retrain on the next tick (supervisor command; idempotent).
    pub fn force_retrain(&mut self) {
        self.retrain_requested = true;
    }

    pub async fn initialize(&mut self, ctx: &StrategyContext) -> Result<(), KernelError> {
        self.prices.clear();
        self.model = None;
        self.retrain_requested = false;

        let wanted = (self.params.min_samples_to_train
            + self.params.lookback_periods
            + self.params.prediction_horizon) as u32;
        let bars = ctx
            .adapter()
            .fetch_bars(&self.symbol, Timeframe::M1, wanted.min(1500))
            .await?;
        for bar in bars {
            self.push_price(bar.close.to_f64().unwrap_or_default());
        }

        if self.external_oracle.is_none() && self.prices.len() >= self.params.min_samples_to_train {
            self.train(ctx.now_ms);
        }

        info!(
            symbol = %self.symbol,
            primed = self.prices.len(),
            model_ready = self.model.is_some(),
            confidence_threshold = self.params.confidence_threshold,
            "forest kernel ready"
        );
        Ok(())
    }

    pub async fn run_once(&mut self, ctx: &StrategyContext) -> Result<(), KernelError> {
        self.push_price(ctx.ticker().last.to_f64().unwrap_or_default());

        if self.external_oracle.is_none() {
            let retrain_due = match self.last_retrain_ms {
                Some(last) => ctx.now_ms - last >= self.params.retrain_interval as i64 * 1000,
                None => true,
            };
            if (retrain_due || self.retrain_requested)
                && self.prices.len() >= self.params.min_samples_to_train
            {
                self.train(ctx.now_ms);
            }
        }

        let Some(prediction) = self.predict().await? else {
            return Ok(());
        };
        if prediction.confidence < self.params.confidence_threshold {
            debug!(
                confidence = prediction.confidence,
                threshold = self.params.confidence_threshold,
                "prediction below confidence gate"
            );
            return Ok(());
        }

        let target = match prediction.direction {
            Direction::Long => TradeSide::Long,
            Direction::Short => TradeSide::Short,
        };
        match ctx.position() {
            None => {
                debug!(direction = ?prediction.direction, confidence = prediction.confidence, "opening on prediction");
                ctx.request_trade(TradeKind::Open, target, self.params.position_size);
            }
            Some(pos) if pos.side != target => {
                debug!(direction = ?prediction.direction, confidence = prediction.confidence, "closing against prediction");
                ctx.request_trade(TradeKind::Close, pos.side, rust_decimal::Decimal::ZERO);
            }
            Some(_) => {}
        }
        Ok(())
    }

    pub async fn shutdown(&mut self, _ctx: &StrategyContext, reason: &str) {
        info!(symbol = %self.symbol, reason, "forest kernel shut down");
    }

    pub fn on_trade(&mut self, _trade: &TradeRecord) {}

    async fn predict(&self) -> Result<Option<Prediction>, KernelError> {
        let prices: Vec<f64> = self.prices.iter().copied().collect();
        let features = build_features(&prices);

        if let Some(oracle) = &self.external_oracle {
            return oracle.predict(&features.unwrap_or_else(Features::default)).await;
        }

        let (Some(model), Some(features)) = (&self.model, features) else {
            return Ok(None);
        };
        let prob_up = model.prob_up(&features.values());
        let prediction = if prob_up >= 0.5 {
            Prediction {
                direction: Direction::Long,
                confidence: prob_up,
            }
        } else {
            Prediction {
                direction: Direction::Short,
                confidence: 1.0 - prob_up,
            }
        };
        Ok(Some(prediction))
    }

    /// Train a replacement forest; on failure the current model stays.
    fn train(&mut self, now_ms: i64) {
        self.retrain_requested = false;
        self.last_retrain_ms = Some(now_ms);

        let prices: Vec<f64> = self.prices.iter().copied().collect();
        let horizon = self.params.prediction_horizon;
        if prices.len() <= MIN_FEATURE_HISTORY + horizon {
            return;
        }

        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in MIN_FEATURE_HISTORY..(prices.len() - horizon) {
            if let Some(features) = build_features(&prices[..=i]) {
                x.push(features.values());
                y.push(prices[i + horizon] > prices[i]);
            }
        }
        if x.len() < 20 {
            debug!(samples = x.len(), "not enough samples to train yet");
            return;
        }

        let config = ForestConfig {
            n_trees: self.params.n_trees,
            max_depth: self.params.max_depth,
            min_samples_split: 5,
            seed: self.params.seed,
        };
        match Forest::train(&x, &y, &config) {
            Ok(model) => {
                info!(samples = x.len(), trees = config.n_trees, "forest trained");
                self.model = Some(model);
            }
            Err(e) => {
                warn!(error = %e, "forest training failed, keeping previous model");
            }
        }
    }

    fn push_price(&mut self, price: f64) {
        self.prices.push_back(price);
        let cap = self.params.min_samples_to_train
            + self.params.lookback_periods
            + self.params.prediction_horizon
            + MIN_FEATURE_HISTORY;
        while self.prices.len() > cap {
            self.prices.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> ConfigDoc {
        ConfigDoc::parse(
            r#"
trading: { symbol: BTCUSDT, side: long, leverage: 10 }
ml: { confidence_threshold: 0.65, position_size: 200, min_samples_to_train: 100, seed: 9 }
risk: { stop_loss_percent: 10, take_profit_percent: 15, max_loss_percent: 20 }
"#,
        )
        .unwrap()
    }

    #[test]
    fn buffer_is_bounded() {
        let mut k = ForestKernel::from_config(&doc()).unwrap();
        for i in 0..10_000 {
            k.push_price(100.0 + (i % 13) as f64);
        }
        let cap = 100 + 100 + 5 + MIN_FEATURE_HISTORY;
        assert_eq!(k.prices.len(), cap);
    }

    #[test]
    fn training_installs_a_model() {
        let mut k = ForestKernel::from_config(&doc()).unwrap();
        // A noisy but learnable zig-zag series.
        for i in 0..300 {
            let base = 100.0 + (i as f64 / 10.0).sin() * 5.0;
            k.push_price(base + (i % 3) as f64 * 0.1);
        }
        k.train(0);
        assert!(k.model.is_some());
        assert_eq!(k.last_retrain_ms, Some(0));
    }

    #[test]
    fn confidence_threshold_validated() {
        let bad = ConfigDoc::parse(
            r#"
trading: { symbol: BTCUSDT, side: long, leverage: 10 }
ml: { confidence_threshold: 1.5, position_size: 200 }
risk: { stop_loss_percent: 10, take_profit_percent: 15, max_loss_percent: 20 }
"#,
        )
        .unwrap();
        assert!(matches!(
            ForestKernel::from_config(&bad),
            Err(KernelError::Config(_))
        ));
    }

    #[test]
    fn force_retrain_is_sticky_until_trained() {
        let mut k = ForestKernel::from_config(&doc()).unwrap();
        k.force_retrain();
        assert!(k.retrain_requested);
        for i in 0..300 {
            k.push_price(100.0 + (i % 7) as f64);
        }
        k.train(1_000);
        assert!(!k.retrain_requested);
    }
}
