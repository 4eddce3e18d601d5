//! Dollar-cost-averaging kernel: fixed notional on a fixed cadence.

use rust_decimal::Decimal;
use tracing::{debug, info};

use model::{TradeKind, TradeRecord, TradeSide};
use strategy_core::{ConfigDoc, DcaSection, KernelError, StrategyContext};

#[derive(Debug)]
pub struct DcaKernel {
    symbol: String,
    side: TradeSide,
    params: DcaSection,
    /// Notional committed so far this run.
    invested: Decimal,
    last_buy_ms: Option<i64>,
}

impl DcaKernel {
    pub fn from_config(doc: &ConfigDoc) -> Result<Self, KernelError> {
        let trading = doc.trading()?;
        let params = doc
            .dca
            .clone()
            .ok_or_else(|| KernelError::Config("missing 'dca' section".into()))?;

        if params.investment_amount <= Decimal::ZERO {
            return Err(KernelError::Config(
                "dca.investment_amount must be positive".into(),
            ));
        }
        if params.max_investment < params.investment_amount {
            return Err(KernelError::Config(
                "dca.max_investment below one investment_amount".into(),
            ));
        }
        if params.interval_minutes == 0 {
            return Err(KernelError::Config(
                "dca.interval_minutes must be positive".into(),
            ));
        }

        Ok(Self {
            symbol: trading.symbol.clone(),
            side: trading.side,
            params,
            invested: Decimal::ZERO,
            last_buy_ms: None,
        })
    }

    pub async fn initialize(&mut self, _ctx: &StrategyContext) -> Result<(), KernelError> {
        self.invested = Decimal::ZERO;
        self.last_buy_ms = None;
        info!(
            symbol = %self.symbol,
            amount = %self.params.investment_amount,
            interval_minutes = self.params.interval_minutes,
            budget = %self.params.max_investment,
            "dca kernel ready"
        );
        Ok(())
    }

    pub async fn run_once(&mut self, ctx: &StrategyContext) -> Result<(), KernelError> {
        if self.invested + self.params.investment_amount > self.params.max_investment {
            return Ok(());
        }

        if let Some(ceiling) = self.params.price_ceiling {
            let price = ctx.ticker().last;
            if price > ceiling {
                debug!(price = %price, ceiling = %ceiling, "price above ceiling, skipping");
                return Ok(());
            }
        }

        let interval_ms = self.params.interval_minutes as i64 * 60_000;
        if let Some(last) = self.last_buy_ms {
            if ctx.now_ms - last < interval_ms {
                return Ok(());
            }
        }

        let kind = if ctx.position().is_some() {
            TradeKind::Add
        } else {
            TradeKind::Open
        };
        ctx.request_trade(kind, self.side, self.params.investment_amount);
        Ok(())
    }

    pub async fn shutdown(&mut self, _ctx: &StrategyContext, reason: &str) {
        info!(symbol = %self.symbol, invested = %self.invested, reason, "dca kernel shut down");
    }

    pub fn on_trade(&mut self, trade: &TradeRecord) {
        match trade.kind {
            TradeKind::Open | TradeKind::Add => {
                self.invested += trade.notional;
                self.last_buy_ms = Some(trade.executed_at.timestamp_millis());
            }
            TradeKind::Close => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn kernel(max_investment: &str) -> DcaKernel {
        let yaml = format!(
            r#"
trading: {{ symbol: BTCUSDT, side: long, leverage: 1 }}
dca: {{ investment_amount: 100, interval_minutes: 60, max_investment: {} }}
risk: {{ stop_loss_percent: 20, take_profit_percent: 30, max_loss_percent: 25 }}
"#,
            max_investment
        );
        DcaKernel::from_config(&ConfigDoc::parse(&yaml).unwrap()).unwrap()
    }

    fn buy(notional: Decimal, at_ms: i64) -> TradeRecord {
        TradeRecord {
            id: 1,
            strategy_id: 1,
            run_id: 1,
            kind: TradeKind::Add,
            side: TradeSide::Long,
            symbol: "BTCUSDT".into(),
            price: dec!(50000),
            quantity: dec!(0.002),
            notional,
            pnl: None,
            executed_at: chrono::DateTime::from_timestamp_millis(at_ms).unwrap(),
        }
    }

    #[test]
    fn budget_tracks_fills() {
        let mut k = kernel("300");
        k.on_trade(&buy(dec!(100), 0));
        k.on_trade(&buy(dec!(100), 3_600_000));
        assert_eq!(k.invested, dec!(200));
        assert_eq!(k.last_buy_ms, Some(3_600_000));
    }

    #[test]
    fn rejects_budget_below_single_buy() {
        let yaml = r#"
trading: { symbol: BTCUSDT, side: long, leverage: 1 }
dca: { investment_amount: 100, interval_minutes: 60, max_investment: 50 }
risk: { stop_loss_percent: 20, take_profit_percent: 30, max_loss_percent: 25 }
"#;
        let err = DcaKernel::from_config(&ConfigDoc::parse(yaml).unwrap()).unwrap_err();
        assert!(matches!(err, KernelError::Config(_)));
    }
}
