//! Kernel scaffolding: the context handed to every kernel call, the trade
//! requests kernels emit, kernel errors, and the typed configuration
//! document.

mod config;
mod context;
mod error;

pub use config::{
    ConfigDoc, DcaSection, GridSection, LlmSection, MartingaleSection, MeanReversionSection,
    MlSection, MonitoringSection, ReconcileMode, RiskSection, TradingSection, TrendSection,
    TriggerSection,
};
pub use context::{StrategyContext, TradeRequest};
pub use error::KernelError;
