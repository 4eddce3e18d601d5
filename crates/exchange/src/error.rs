//! Venue error taxonomy.

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors surfaced by the exchange adapter.
///
/// Transient variants (network, rate-limit, 5xx) are retried inside the
/// adapter before they ever reach a caller; everything else is permanent and
/// stops the run that triggered it.
#[derive(Debug, Error)]
pub enum VenueError {
    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited, retry after {retry_after_ms} ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("venue returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("unknown symbol '{0}'")]
    UnknownSymbol(String),

    #[error("order rejected: {0}")]
    OrderRejected(String),

    #[error("insufficient margin: required {required}, free {free}")]
    InsufficientMargin { required: Decimal, free: Decimal },

    #[error("notional {notional} below venue minimum {min}")]
    BelowMinNotional { notional: Decimal, min: Decimal },

    #[error("malformed venue response: {0}")]
    Parse(String),
}

impl VenueError {
    /// Whether the adapter may retry the failed request.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::RateLimited { .. } => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
