//! Trend-following kernel: fast/slow moving-average crossover.

use std::collections::VecDeque;

use rust_decimal::Decimal;
use tracing::{debug, info};

use model::{Timeframe, TradeKind, TradeRecord, TradeSide};
use strategy_core::{ConfigDoc, KernelError, StrategyContext, TrendSection};

use crate::indicators::sma_decimal;

#[derive(Debug)]
pub struct TrendKernel {
    symbol: String,
    params: TrendSection,
    prices: VecDeque<Decimal>,
}

impl TrendKernel {
    pub fn from_config(doc: &ConfigDoc) -> Result<Self, KernelError> {
        let trading = doc.trading()?;
        let params = doc
            .trend
            .clone()
            .ok_or_else(|| KernelError::Config("missing 'trend' section".into()))?;

        if params.fast_period == 0 || params.slow_period == 0 {
            return Err(KernelError::Config("trend periods must be positive".into()));
        }
        if params.fast_period >= params.slow_period {
            return Err(KernelError::Config(
                "trend.fast_period must be below trend.slow_period".into(),
            ));
        }
        if params.position_size <= Decimal::ZERO {
            return Err(KernelError::Config(
                "trend.position_size must be positive".into(),
            ));
        }

        Ok(Self {
            symbol: trading.symbol.clone(),
            params,
            prices: VecDeque::new(),
        })
    }

    pub async fn initialize(&mut self, ctx: &StrategyContext) -> Result<(), KernelError> {
        self.prices.clear();
        // Prime the history so crossovers can fire from the first ticks.
        let bars = ctx
            .adapter()
            .fetch_bars(
                &self.symbol,
                Timeframe::M1,
                (self.params.slow_period + 1) as u32,
            )
            .await?;
        for bar in bars {
            self.push_price(bar.close);
        }
        info!(
            symbol = %self.symbol,
            fast = self.params.fast_period,
            slow = self.params.slow_period,
            primed = self.prices.len(),
            "trend kernel ready"
        );
        Ok(())
    }

    pub async fn run_once(&mut self, ctx: &StrategyContext) -> Result<(), KernelError> {
        self.push_price(ctx.ticker().last);

        let Some((fast_prev, slow_prev, fast_now, slow_now)) = self.averages() else {
            return Ok(());
        };

        let crossed_up = fast_prev <= slow_prev && fast_now > slow_now;
        let crossed_down = fast_prev >= slow_prev && fast_now < slow_now;
        if !crossed_up && !crossed_down {
            return Ok(());
        }

        let target = if crossed_up {
            TradeSide::Long
        } else {
            TradeSide::Short
        };
        debug!(
            symbol = %self.symbol,
            fast = %fast_now,
            slow = %slow_now,
            target = %target,
            "moving averages crossed"
        );

        match ctx.position() {
            Some(pos) if pos.side == target => {}
            Some(_) => {
                // Opposite cross: exit, then enter the new direction.
                ctx.request_trade(TradeKind::Close, target, Decimal::ZERO);
                ctx.request_trade(TradeKind::Open, target, self.params.position_size);
            }
            None => {
                ctx.request_trade(TradeKind::Open, target, self.params.position_size);
            }
        }
        Ok(())
    }

    pub async fn shutdown(&mut self, _ctx: &StrategyContext, reason: &str) {
        info!(symbol = %self.symbol, reason, "trend kernel shut down");
    }

    pub fn on_trade(&mut self, _trade: &TradeRecord) {}

    fn push_price(&mut self, price: Decimal) {
        self.prices.push_back(price);
        let cap = self.params.slow_period + 1;
        while self.prices.len() > cap {
            self.prices.pop_front();
        }
    }

    /// Fast and slow SMAs for the previous tick and the current one.
    fn averages(&self) -> Option<(Decimal, Decimal, Decimal, Decimal)> {
        if self.prices.len() < self.params.slow_period + 1 {
            return None;
        }
        let all: Vec<Decimal> = self.prices.iter().copied().collect();
        let previous = &all[..all.len() - 1];

        Some((
            sma_decimal(previous, self.params.fast_period)?,
            sma_decimal(previous, self.params.slow_period)?,
            sma_decimal(&all, self.params.fast_period)?,
            sma_decimal(&all, self.params.slow_period)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn kernel() -> TrendKernel {
        let doc = ConfigDoc::parse(
            r#"
trading: { symbol: BTCUSDT, side: long, leverage: 5 }
trend: { position_size: 200, fast_period: 3, slow_period: 5 }
risk: { stop_loss_percent: 8, take_profit_percent: 12, max_loss_percent: 15 }
"#,
        )
        .unwrap();
        TrendKernel::from_config(&doc).unwrap()
    }

    #[test]
    fn detects_upward_cross() {
        let mut k = kernel();
        // Downtrend keeps fast below slow, then a sharp rally crosses it.
        for p in [100, 99, 98, 97, 96, 95] {
            k.push_price(Decimal::from(p));
        }
        let (fp, sp, _, _) = k.averages().unwrap();
        assert!(fp < sp);

        k.push_price(dec!(105));
        let (fp, sp, fnow, snow) = k.averages().unwrap();
        assert!(fp <= sp);
        assert!(fnow > snow);
    }

    #[test]
    fn history_is_bounded() {
        let mut k = kernel();
        for p in 0..100 {
            k.push_price(Decimal::from(100 + p));
        }
        assert_eq!(k.prices.len(), 6);
    }

    #[test]
    fn fast_must_be_shorter_than_slow() {
        let doc = ConfigDoc::parse(
            r#"
trading: { symbol: BTCUSDT, side: long, leverage: 5 }
trend: { position_size: 200, fast_period: 10, slow_period: 5 }
risk: { stop_loss_percent: 8, take_profit_percent: 12, max_loss_percent: 15 }
"#,
        )
        .unwrap();
        assert!(matches!(
            TrendKernel::from_config(&doc),
            Err(KernelError::Config(_))
        ));
    }
}
