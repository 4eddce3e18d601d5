//! Martingale kernel: scale into a falling market.
//!
//! Tracks the extreme price since the last fill (highest for a long,
//! lowest for a short). When the move from the extreme to the current price
//! crosses the trigger percentage, it requests an `add` sized
//! `initial_position * multiplier^n` for the n-th addition. The risk gate —
//! not the kernel — enforces the addition limit, so an over-limit trigger
//! surfaces as a deny event rather than silence.

use rust_decimal::Decimal;
use tracing::{debug, info};

use model::{TradeKind, TradeRecord, TradeSide};
use strategy_core::{
    ConfigDoc, KernelError, MartingaleSection, StrategyContext, TriggerSection,
};

#[derive(Debug)]
pub struct MartingaleKernel {
    symbol: String,
    side: TradeSide,
    params: MartingaleSection,
    trigger: TriggerSection,
    /// Extreme price since the last fill; the trigger reference.
    extreme: Option<Decimal>,
    /// Additions executed for the current position.
    addition_count: u32,
    /// Whether this run has opened at least once (start_immediately fires
    /// only on the first entry).
    has_opened: bool,
}

impl MartingaleKernel {
    pub fn from_config(doc: &ConfigDoc) -> Result<Self, KernelError> {
        let trading = doc.trading()?;
        let params = doc
            .martingale
            .clone()
            .ok_or_else(|| KernelError::Config("missing 'martingale' section".into()))?;
        let trigger = doc
            .trigger
            .clone()
            .ok_or_else(|| KernelError::Config("missing 'trigger' section".into()))?;

        if params.initial_position <= Decimal::ZERO {
            return Err(KernelError::Config(
                "martingale.initial_position must be positive".into(),
            ));
        }
        if params.multiplier <= Decimal::ZERO {
            return Err(KernelError::Config(
                "martingale.multiplier must be positive".into(),
            ));
        }
        if trigger.price_drop_percent <= Decimal::ZERO {
            return Err(KernelError::Config(
                "trigger.price_drop_percent must be positive".into(),
            ));
        }

        Ok(Self {
            symbol: trading.symbol.clone(),
            side: trading.side,
            params,
            trigger,
            extreme: None,
            addition_count: 0,
            has_opened: false,
        })
    }

    pub async fn initialize(&mut self, _ctx: &StrategyContext) -> Result<(), KernelError> {
        self.extreme = None;
        self.addition_count = 0;
        self.has_opened = false;
        info!(
            symbol = %self.symbol,
            side = %self.side,
            initial_position = %self.params.initial_position,
            multiplier = %self.params.multiplier,
            max_additions = self.params.max_additions,
            drop_percent = %self.trigger.price_drop_percent,
            "martingale kernel ready"
        );
        Ok(())
    }

    pub async fn run_once(&mut self, ctx: &StrategyContext) -> Result<(), KernelError> {
        let price = ctx.ticker().last;

        self.track_extreme(price);

        if ctx.position().is_none() {
            if !self.has_opened && self.trigger.start_immediately {
                debug!(price = %price, "opening initial position immediately");
                ctx.request_trade(TradeKind::Open, self.side, self.params.initial_position);
            } else if self.trigger_crossed(price) {
                debug!(price = %price, extreme = ?self.extreme, "entry trigger crossed");
                ctx.request_trade(TradeKind::Open, self.side, self.params.initial_position);
            }
            return Ok(());
        }

        if self.trigger_crossed(price) {
            let size = self.next_addition_size();
            debug!(
                price = %price,
                extreme = ?self.extreme,
                addition = self.addition_count + 1,
                size = %size,
                "addition trigger crossed"
            );
            ctx.request_trade(TradeKind::Add, self.side, size);
        }
        Ok(())
    }

    pub async fn shutdown(&mut self, _ctx: &StrategyContext, reason: &str) {
        info!(symbol = %self.symbol, reason, "martingale kernel shut down");
    }

    pub fn on_trade(&mut self, trade: &TradeRecord) {
        match trade.kind {
            TradeKind::Open => {
                self.has_opened = true;
                self.addition_count = 0;
                self.extreme = Some(trade.price);
            }
            TradeKind::Add => {
                self.addition_count += 1;
                // The drift must re-cross from a fresh reference.
                self.extreme = Some(trade.price);
            }
            TradeKind::Close => {
                self.addition_count = 0;
                self.extreme = None;
            }
        }
    }

    /// Keep the extreme at the most adverse reference: the highest price
    /// seen for a long, the lowest for a short.
    fn track_extreme(&mut self, price: Decimal) {
        self.extreme = Some(match (self.extreme, self.side) {
            (None, _) => price,
            (Some(e), TradeSide::Long) => e.max(price),
            (Some(e), TradeSide::Short) => e.min(price),
        });
    }

    fn trigger_crossed(&self, price: Decimal) -> bool {
        let Some(extreme) = self.extreme else {
            return false;
        };
        if extreme.is_zero() {
            return false;
        }
        let move_pct = match self.side {
            TradeSide::Long => (extreme - price) / extreme * Decimal::ONE_HUNDRED,
            TradeSide::Short => (price - extreme) / extreme * Decimal::ONE_HUNDRED,
        };
        move_pct >= self.trigger.price_drop_percent
    }

    /// Size of the next addition: `initial * multiplier^(n)` where n is the
    /// 1-based index of the addition.
    fn next_addition_size(&self) -> Decimal {
        let mut size = self.params.initial_position;
        for _ in 0..=self.addition_count {
            size *= self.params.multiplier;
        }
        size
    }
}
