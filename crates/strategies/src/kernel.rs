//! The kernel dispatch enum.
//!
//! Kernels are tagged variants rather than trait objects: per-kernel state
//! lives in the variant's payload and everything shared flows through the
//! [`StrategyContext`] argument. The variant is chosen by which kernel
//! section the configuration document contains.

use model::TradeRecord;
use strategy_core::{ConfigDoc, KernelError, StrategyContext};

use crate::dca::DcaKernel;
use crate::grid::GridKernel;
use crate::llm::LlmKernel;
use crate::martingale::MartingaleKernel;
use crate::mean_reversion::MeanReversionKernel;
use crate::ml::ForestKernel;
use crate::trend::TrendKernel;

/// One strategy decision unit.
#[derive(Debug)]
pub enum Kernel {
    Martingale(MartingaleKernel),
    Dca(DcaKernel),
    Grid(GridKernel),
    Trend(TrendKernel),
    MeanReversion(MeanReversionKernel),
    Forest(ForestKernel),
    Llm(LlmKernel),
}

impl Kernel {
    /// Select and build the kernel named by the configuration document.
    /// Exactly one kernel section must be present.
    pub fn from_config(doc: &ConfigDoc) -> Result<Self, KernelError> {
        let sections = doc.kernel_sections();
        match sections.as_slice() {
            ["martingale"] => Ok(Self::Martingale(MartingaleKernel::from_config(doc)?)),
            ["dca"] => Ok(Self::Dca(DcaKernel::from_config(doc)?)),
            ["grid"] => Ok(Self::Grid(GridKernel::from_config(doc)?)),
            ["trend"] => Ok(Self::Trend(TrendKernel::from_config(doc)?)),
            ["mean_reversion"] => Ok(Self::MeanReversion(MeanReversionKernel::from_config(doc)?)),
            ["ml"] => Ok(Self::Forest(ForestKernel::from_config(doc)?)),
            ["llm"] => Ok(Self::Llm(LlmKernel::from_config(doc)?)),
            [] => Err(KernelError::Config(
                "configuration names no kernel section".into(),
            )),
            many => Err(KernelError::Config(format!(
                "configuration names multiple kernel sections: {}",
                many.join(", ")
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Martingale(_) => "martingale",
            Self::Dca(_) => "dca",
            Self::Grid(_) => "grid",
            Self::Trend(_) => "trend",
            Self::MeanReversion(_) => "mean_reversion",
            Self::Forest(_) => "ml",
            Self::Llm(_) => "llm",
        }
    }

    /// One-time setup before the first tick: configure leverage, validate
    /// parameters, prime history buffers and models.
    pub async fn initialize(&mut self, ctx: &StrategyContext) -> Result<(), KernelError> {
        let trading = ctx.config().trading()?;
        ctx.adapter()
            .configure_leverage(&trading.symbol, trading.leverage)
            .await?;

        match self {
            Self::Martingale(k) => k.initialize(ctx).await,
            Self::Dca(k) => k.initialize(ctx).await,
            Self::Grid(k) => k.initialize(ctx).await,
            Self::Trend(k) => k.initialize(ctx).await,
            Self::MeanReversion(k) => k.initialize(ctx).await,
            Self::Forest(k) => k.initialize(ctx).await,
            Self::Llm(k) => k.initialize(ctx).await,
        }
    }

    /// Exactly one decision step. Idempotent with respect to exchange
    /// state: without a price change, a second call must not double-trade.
    pub async fn run_once(&mut self, ctx: &StrategyContext) -> Result<(), KernelError> {
        match self {
            Self::Martingale(k) => k.run_once(ctx).await,
            Self::Dca(k) => k.run_once(ctx).await,
            Self::Grid(k) => k.run_once(ctx).await,
            Self::Trend(k) => k.run_once(ctx).await,
            Self::MeanReversion(k) => k.run_once(ctx).await,
            Self::Forest(k) => k.run_once(ctx).await,
            Self::Llm(k) => k.run_once(ctx).await,
        }
    }

    /// Release kernel resources. Position liquidation is the supervisor's
    /// job, not the kernel's.
    pub async fn shutdown(&mut self, ctx: &StrategyContext, reason: &str) {
        match self {
            Self::Martingale(k) => k.shutdown(ctx, reason).await,
            Self::Dca(k) => k.shutdown(ctx, reason).await,
            Self::Grid(k) => k.shutdown(ctx, reason).await,
            Self::Trend(k) => k.shutdown(ctx, reason).await,
            Self::MeanReversion(k) => k.shutdown(ctx, reason).await,
            Self::Forest(k) => k.shutdown(ctx, reason).await,
            Self::Llm(k) => k.shutdown(ctx, reason).await,
        }
    }

    /// Executed-trade callback, fired after the ledger append.
    pub fn on_trade(&mut self, trade: &TradeRecord) {
        match self {
            Self::Martingale(k) => k.on_trade(trade),
            Self::Dca(k) => k.on_trade(trade),
            Self::Grid(k) => k.on_trade(trade),
            Self::Trend(k) => k.on_trade(trade),
            Self::MeanReversion(k) => k.on_trade(trade),
            Self::Forest(k) => k.on_trade(trade),
            Self::Llm(k) => k.on_trade(trade),
        }
    }

    /// Retrain command; meaningful only for the ML kernel. Returns whether
    /// the kernel accepted it.
    pub fn force_retrain(&mut self) -> bool {
        if let Self::Forest(k) = self {
            k.force_retrain();
            true
        } else {
            false
        }
    }
}
