//! Mean-reversion kernel: fade deviations from a moving-average baseline.

use std::collections::VecDeque;

use rust_decimal::Decimal;
use tracing::{debug, info};

use model::{Timeframe, TradeKind, TradeRecord, TradeSide};
use strategy_core::{ConfigDoc, KernelError, MeanReversionSection, StrategyContext};

use crate::indicators::sma_decimal;

#[derive(Debug)]
pub struct MeanReversionKernel {
    symbol: String,
    params: MeanReversionSection,
    prices: VecDeque<Decimal>,
}

impl MeanReversionKernel {
    pub fn from_config(doc: &ConfigDoc) -> Result<Self, KernelError> {
        let trading = doc.trading()?;
        let params = doc
            .mean_reversion
            .clone()
            .ok_or_else(|| KernelError::Config("missing 'mean_reversion' section".into()))?;

        if params.ma_period < 2 {
            return Err(KernelError::Config(
                "mean_reversion.ma_period must be at least 2".into(),
            ));
        }
        if params.deviation_percent <= Decimal::ZERO {
            return Err(KernelError::Config(
                "mean_reversion.deviation_percent must be positive".into(),
            ));
        }
        if params.position_size <= Decimal::ZERO {
            return Err(KernelError::Config(
                "mean_reversion.position_size must be positive".into(),
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
        let bars = ctx
            .adapter()
            .fetch_bars(&self.symbol, Timeframe::M1, self.params.ma_period as u32)
            .await?;
        for bar in bars {
            self.push_price(bar.close);
        }
        info!(
            symbol = %self.symbol,
            ma_period = self.params.ma_period,
            deviation_pct = %self.params.deviation_percent,
            "mean-reversion kernel ready"
        );
        Ok(())
    }

    pub async fn run_once(&mut self, ctx: &StrategyContext) -> Result<(), KernelError> {
        let price = ctx.ticker().last;
        self.push_price(price);

        let all: Vec<Decimal> = self.prices.iter().copied().collect();
        let Some(baseline) = sma_decimal(&all, self.params.ma_period) else {
            return Ok(());
        };
        if baseline.is_zero() {
            return Ok(());
        }
        let deviation_pct = (price - baseline) / baseline * Decimal::ONE_HUNDRED;

        match ctx.position() {
            None => {
                if deviation_pct >= self.params.deviation_percent {
                    debug!(price = %price, baseline = %baseline, "stretched above baseline, fading short");
                    ctx.request_trade(TradeKind::Open, TradeSide::Short, self.params.position_size);
                } else if deviation_pct <= -self.params.deviation_percent {
                    debug!(price = %price, baseline = %baseline, "stretched below baseline, fading long");
                    ctx.request_trade(TradeKind::Open, TradeSide::Long, self.params.position_size);
                }
            }
            Some(pos) => {
                let returned = match pos.side {
                    TradeSide::Long => price >= baseline,
                    TradeSide::Short => price <= baseline,
                };
                if returned {
                    debug!(price = %price, baseline = %baseline, "price back at baseline, exiting");
                    ctx.request_trade(TradeKind::Close, pos.side, Decimal::ZERO);
                }
            }
        }
        Ok(())
    }

    pub async fn shutdown(&mut self, _ctx: &StrategyContext, reason: &str) {
        info!(symbol = %self.symbol, reason, "mean-reversion kernel shut down");
    }

    pub fn on_trade(&mut self, _trade: &TradeRecord) {}

    fn push_price(&mut self, price: Decimal) {
        self.prices.push_back(price);
        while self.prices.len() > self.params.ma_period + 1 {
            self.prices.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn kernel() -> MeanReversionKernel {
        let doc = ConfigDoc::parse(
            r#"
trading: { symbol: BTCUSDT, side: long, leverage: 3 }
mean_reversion: { position_size: 150, ma_period: 4, deviation_percent: 2.0 }
risk: { stop_loss_percent: 8, take_profit_percent: 12, max_loss_percent: 15 }
"#,
        )
        .unwrap();
        MeanReversionKernel::from_config(&doc).unwrap()
    }

    #[test]
    fn deviation_math() {
        let mut k = kernel();
        for p in [100, 100, 100, 100] {
            k.push_price(Decimal::from(p));
        }
        // Baseline of the last 4 after pushing 104: (100+100+100+104)/4 = 101.
        k.push_price(dec!(104));
        let all: Vec<Decimal> = k.prices.iter().copied().collect();
        let baseline = sma_decimal(&all, 4).unwrap();
        assert_eq!(baseline, dec!(101));
        let dev = (dec!(104) - baseline) / baseline * Decimal::ONE_HUNDRED;
        assert!(dev > dec!(2.0));
    }

    #[test]
    fn validates_parameters() {
        let doc = ConfigDoc::parse(
            r#"
trading: { symbol: BTCUSDT, side: long, leverage: 3 }
mean_reversion: { position_size: 150, ma_period: 1, deviation_percent: 2.0 }
risk: { stop_loss_percent: 8, take_profit_percent: 12, max_loss_percent: 15 }
"#,
        )
        .unwrap();
        assert!(matches!(
            MeanReversionKernel::from_config(&doc),
            Err(KernelError::Config(_))
        ));
    }
}
