//! Kernel error types.

use thiserror::Error;

use exchange::VenueError;

/// Errors a kernel can raise.
///
/// `Config` is fatal at initialize time and leaves the strategy stopped.
/// `Venue` carries the adapter's classification: transient failures were
/// already retried inside the adapter, permanent ones stop the run.
/// `Recoverable` is counted by the supervisor; the run continues until the
/// consecutive-error threshold trips.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Venue(#[from] VenueError),

    #[error("{0}")]
    Recoverable(String),
}

impl KernelError {
    /// Whether the supervisor should keep the run alive after this error.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::Venue(e) => e.is_transient(),
            Self::Recoverable(_) => true,
        }
    }
}
