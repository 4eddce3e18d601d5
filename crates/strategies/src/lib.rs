//! Strategy kernels.
//!
//! Every kernel is a tagged variant of [`Kernel`] with its own state payload
//! and the same capability set: `initialize`, `run_once`, `shutdown`,
//! `on_trade`. The supervisor (or the backtest engine) owns the loop; a
//! kernel only reads market data through the context's adapter and queues
//! trade requests.

mod dca;
mod forest;
mod grid;
mod indicators;
mod kernel;
mod llm;
mod martingale;
mod mean_reversion;
mod ml;
mod oracle;
mod trend;

pub use dca::DcaKernel;
pub use forest::{Forest, ForestConfig};
pub use grid::GridKernel;
pub use kernel::Kernel;
pub use llm::{LlmKernel, LlmOracle};
pub use martingale::MartingaleKernel;
pub use mean_reversion::MeanReversionKernel;
pub use ml::ForestKernel;
pub use oracle::{build_features, Direction, DirectionOracle, Features, Prediction};
pub use trend::TrendKernel;
