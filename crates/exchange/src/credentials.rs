//! API credential handling.
//!
//! The secret key is wrapped in [`SecretString`] so it cannot leak through
//! Debug output and is zeroed on drop.

use secrecy::{ExposeSecret, SecretString};

use crate::error::VenueError;

/// Venue API credentials, supplied at adapter construction.
#[derive(Clone)]
pub struct ApiCredentials {
    api_key: String,
    secret_key: SecretString,
}

impl ApiCredentials {
    pub fn new(api_key: String, secret_key: String) -> Self {
        Self {
            api_key,
            secret_key: SecretString::new(secret_key),
        }
    }

    /// Load from `BINANCE_API_KEY` / `BINANCE_SECRET_KEY`.
    pub fn from_env() -> Result<Self, VenueError> {
        let api_key = std::env::var("BINANCE_API_KEY")
            .map_err(|_| VenueError::Auth("BINANCE_API_KEY not set".into()))?;
        let secret_key = std::env::var("BINANCE_SECRET_KEY")
            .map_err(|_| VenueError::Auth("BINANCE_SECRET_KEY not set".into()))?;
        Ok(Self::new(api_key, secret_key))
    }

    /// The API key; public, safe to log.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// The secret, for signing only. Never log the return value.
    pub(crate) fn secret(&self) -> &str {
        self.secret_key.expose_secret()
    }
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &self.api_key)
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}
