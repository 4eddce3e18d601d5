//! LLM-signal kernel: a prompted multi-factor analyst.
//!
//! Formats the factor summary into a prompt, calls a chat-completions
//! endpoint no more often than `call_interval`, and parses a strict-JSON
//! response `{signal, confidence, reasoning, risk_level}`. Malformed
//! responses are recoverable errors and never produce a trade.

use std::collections::VecDeque;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use tracing::{debug, info};

use model::{Timeframe, TradeKind, TradeRecord, TradeSide};
use strategy_core::{ConfigDoc, KernelError, LlmSection, StrategyContext};

use crate::oracle::{build_features, Direction, DirectionOracle, Features, Prediction};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

const SYSTEM_PROMPT: &str = "You are a cryptocurrency trading analyst. \
Given market factors, respond with a single JSON object and nothing else:\n\
{\"signal\": \"buy\"|\"sell\"|\"hold\", \"confidence\": 0.0-1.0, \
\"reasoning\": \"one sentence\", \"risk_level\": \"low\"|\"medium\"|\"high\"}\n\
Use \"hold\" when confidence is below 0.6.";

/// The external completion endpoint behind the oracle seam.
pub struct LlmOracle {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
}

impl LlmOracle {
    pub fn from_section(section: &LlmSection) -> Result<Self, KernelError> {
        let api_key = section
            .api_key
            .clone()
            .or_else(|| std::env::var("LLM_API_KEY").ok())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| {
                KernelError::Config("llm.api_key not set and no LLM_API_KEY in environment".into())
            })?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_base: section
                .api_base
                .clone()
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            api_key,
            model: section.model.clone(),
            temperature: section.temperature,
            max_tokens: section.max_tokens,
        })
    }

    fn user_prompt(features: &Features) -> String {
        let mut lines = vec!["Current market factors:".to_string()];
        for (name, value) in &features.named {
            lines.push(format!("  {}: {:.6}", name, value));
        }
        lines.push("Respond with the JSON object only.".to_string());
        lines.join("\n")
    }
}

#[async_trait]
impl DirectionOracle for LlmOracle {
    async fn predict(&self, features: &Features) -> Result<Option<Prediction>, KernelError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": Self::user_prompt(features)},
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let url = format!("{}/chat/completions", self.api_base.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| KernelError::Recoverable(format!("llm endpoint: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(KernelError::Recoverable(format!(
                "llm endpoint returned {}",
                status
            )));
        }

        let completion: ChatResponse = response
            .json()
            .await
            .map_err(|e| KernelError::Recoverable(format!("llm response body: {}", e)))?;
        let content = completion
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| KernelError::Recoverable("llm response had no choices".into()))?;

        parse_signal(content)
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct LlmSignal {
    signal: String,
    confidence: f64,
    #[serde(default)]
    #[allow(dead_code)]
    reasoning: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    risk_level: Option<String>,
}

/// Parse the model's JSON (tolerating markdown code fences) into a
/// prediction. `hold` maps to no opinion.
fn parse_signal(content: &str) -> Result<Option<Prediction>, KernelError> {
    let trimmed = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let signal: LlmSignal = serde_json::from_str(trimmed)
        .map_err(|e| KernelError::Recoverable(format!("malformed llm signal: {}", e)))?;

    if !(0.0..=1.0).contains(&signal.confidence) {
        return Err(KernelError::Recoverable(format!(
            "llm confidence {} out of range",
            signal.confidence
        )));
    }

    let direction = match signal.signal.as_str() {
        "buy" => Direction::Long,
        "sell" => Direction::Short,
        "hold" => return Ok(None),
        other => {
            return Err(KernelError::Recoverable(format!(
                "unrecognized llm signal '{}'",
                other
            )))
        }
    };

    Ok(Some(Prediction {
        direction,
        confidence: signal.confidence,
    }))
}

pub struct LlmKernel {
    symbol: String,
    params: LlmSection,
    prices: VecDeque<f64>,
    last_call_ms: Option<i64>,
    oracle: Option<Box<dyn DirectionOracle>>,
}

impl std::fmt::Debug for LlmKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmKernel")
            .field("symbol", &self.symbol)
            .field("params", &self.params)
            .field("prices", &self.prices)
            .field("last_call_ms", &self.last_call_ms)
            .field("oracle", &self.oracle.is_some())
            .finish()
    }
}

impl LlmKernel {
    pub fn from_config(doc: &ConfigDoc) -> Result<Self, KernelError> {
        let trading = doc.trading()?;
        let params = doc
            .llm
            .clone()
            .ok_or_else(|| KernelError::Config("missing 'llm' section".into()))?;

        if !(0.0..=1.0).contains(&params.confidence_threshold) {
            return Err(KernelError::Config(
                "llm.confidence_threshold must be in [0, 1]".into(),
            ));
        }
        if params.position_size <= rust_decimal::Decimal::ZERO {
            return Err(KernelError::Config(
                "llm.position_size must be positive".into(),
            ));
        }

        Ok(Self {
            symbol: trading.symbol.clone(),
            params,
            prices: VecDeque::new(),
            last_call_ms: None,
            oracle: None,
        })
    }

    /// Replace the endpoint-backed oracle (tests, alternative providers).
    pub fn with_oracle(mut self, oracle: Box<dyn DirectionOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub async fn initialize(&mut self, ctx: &StrategyContext) -> Result<(), KernelError> {
        if self.oracle.is_none() {
            self.oracle = Some(Box::new(LlmOracle::from_section(&self.params)?));
        }
        self.prices.clear();
        self.last_call_ms = None;

        let bars = ctx
            .adapter()
            .fetch_bars(&self.symbol, Timeframe::M1, 120)
            .await?;
        for bar in bars {
            self.push_price(bar.close.to_f64().unwrap_or_default());
        }
        info!(
            symbol = %self.symbol,
            model = %self.params.model,
            call_interval = self.params.call_interval,
            "llm kernel ready"
        );
        Ok(())
    }

    pub async fn run_once(&mut self, ctx: &StrategyContext) -> Result<(), KernelError> {
        let last = ctx.ticker().last.to_f64().unwrap_or_default();
        self.push_price(last);

        let interval_ms = self.params.call_interval as i64 * 1000;
        if let Some(last_call) = self.last_call_ms {
            if ctx.now_ms - last_call < interval_ms {
                return Ok(());
            }
        }

        let prices: Vec<f64> = self.prices.iter().copied().collect();
        let Some(mut features) = build_features(&prices) else {
            return Ok(());
        };
        features.named.push(("last_price".to_string(), last));

        // The throttle covers failed calls too; a flapping endpoint must not
        // be hammered every tick.
        self.last_call_ms = Some(ctx.now_ms);

        let oracle = self
            .oracle
            .as_ref()
            .ok_or_else(|| KernelError::Config("llm oracle not initialized".into()))?;
        let Some(prediction) = oracle.predict(&features).await? else {
            debug!("llm signalled hold");
            return Ok(());
        };

        if prediction.confidence < self.params.confidence_threshold {
            debug!(
                confidence = prediction.confidence,
                threshold = self.params.confidence_threshold,
                "llm signal below confidence gate"
            );
            return Ok(());
        }

        let target = match prediction.direction {
            Direction::Long => TradeSide::Long,
            Direction::Short => TradeSide::Short,
        };
        match ctx.position() {
            None => {
                ctx.request_trade(TradeKind::Open, target, self.params.position_size);
            }
            Some(pos) if pos.side != target => {
                ctx.request_trade(TradeKind::Close, pos.side, rust_decimal::Decimal::ZERO);
            }
            Some(_) => {}
        }
        Ok(())
    }

    pub async fn shutdown(&mut self, _ctx: &StrategyContext, reason: &str) {
        info!(symbol = %self.symbol, reason, "llm kernel shut down");
    }

    pub fn on_trade(&mut self, _trade: &TradeRecord) {}

    fn push_price(&mut self, price: f64) {
        self.prices.push_back(price);
        while self.prices.len() > 200 {
            self.prices.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json() {
        let pred = parse_signal(
            r#"{"signal": "buy", "confidence": 0.8, "reasoning": "momentum", "risk_level": "low"}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(pred.direction, Direction::Long);
        assert_eq!(pred.confidence, 0.8);
    }

    #[test]
    fn parses_fenced_json() {
        let content = "```json\n{\"signal\": \"sell\", \"confidence\": 0.7}\n```";
        let pred = parse_signal(content).unwrap().unwrap();
        assert_eq!(pred.direction, Direction::Short);
    }

    #[test]
    fn hold_is_no_opinion() {
        assert!(parse_signal(r#"{"signal": "hold", "confidence": 0.9}"#)
            .unwrap()
            .is_none());
    }

    #[test]
    fn malformed_content_is_recoverable() {
        let err = parse_signal("I think the market will go up!").unwrap_err();
        assert!(matches!(err, KernelError::Recoverable(_)));

        let err = parse_signal(r#"{"signal": "moon", "confidence": 0.9}"#).unwrap_err();
        assert!(matches!(err, KernelError::Recoverable(_)));

        let err = parse_signal(r#"{"signal": "buy", "confidence": 1.7}"#).unwrap_err();
        assert!(matches!(err, KernelError::Recoverable(_)));
    }
}
