//! Venue environment selection.
//!
//! The supervisor talks to the USDT-margined futures venue either on the
//! production endpoints (real money) or the testnet.

use std::fmt;
use std::str::FromStr;

/// Which venue deployment to target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VenueEnvironment {
    /// Production futures endpoints (real money).
    #[default]
    Production,
    /// Futures testnet (paper funds).
    Testnet,
}

impl VenueEnvironment {
    /// REST base URL for the futures API.
    pub fn rest_base_url(&self) -> &'static str {
        match self {
            Self::Production => "https://fapi.binance.com",
            Self::Testnet => "https://testnet.binancefuture.com",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    /// Read `BINANCE_ENVIRONMENT`; defaults to production when unset or
    /// unparseable.
    pub fn from_env() -> Self {
        std::env::var("BINANCE_ENVIRONMENT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }
}

impl fmt::Display for VenueEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Testnet => write!(f, "testnet"),
        }
    }
}

impl FromStr for VenueEnvironment {
    type Err = ParseEnvironmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "production" | "prod" | "live" | "mainnet" => Ok(Self::Production),
            "testnet" | "test" | "paper" => Ok(Self::Testnet),
            _ => Err(ParseEnvironmentError(s.to_string())),
        }
    }
}

/// Error parsing an environment string.
#[derive(Debug, Clone)]
pub struct ParseEnvironmentError(String);

impl fmt::Display for ParseEnvironmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid environment '{}', expected 'production' or 'testnet'",
            self.0
        )
    }
}

impl std::error::Error for ParseEnvironmentError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_per_environment() {
        assert_eq!(
            VenueEnvironment::Production.rest_base_url(),
            "https://fapi.binance.com"
        );
        assert_eq!(
            VenueEnvironment::Testnet.rest_base_url(),
            "https://testnet.binancefuture.com"
        );
    }

    #[test]
    fn parse_aliases() {
        assert_eq!(
            "live".parse::<VenueEnvironment>().unwrap(),
            VenueEnvironment::Production
        );
        assert_eq!(
            "PAPER".parse::<VenueEnvironment>().unwrap(),
            VenueEnvironment::Testnet
        );
        assert!("staging".parse::<VenueEnvironment>().is_err());
    }

    #[test]
    fn default_is_production() {
        assert_eq!(VenueEnvironment::default(), VenueEnvironment::Production);
    }
}
