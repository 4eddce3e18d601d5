//! Strategy definition records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::trade::ParseEnumError;

/// How the strategy's behavior is supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Parameter-driven kernel selected by the configuration document.
    Config,
    /// User-supplied kernel code (reserved; not executable here).
    Code,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Code => "code",
        }
    }
}

impl FromStr for StrategyKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "config" => Ok(Self::Config),
            "code" => Ok(Self::Code),
            _ => Err(ParseEnumError("strategy kind", s.to_string())),
        }
    }
}

/// Lifecycle status of a strategy (and of a run while it is open).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyStatus {
    Stopped,
    Running,
    Paused,
    Error,
}

impl StrategyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for StrategyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stopped" => Ok(Self::Stopped),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "error" => Ok(Self::Error),
            _ => Err(ParseEnumError("strategy status", s.to_string())),
        }
    }
}

/// A persisted strategy definition.
///
/// Created once, edited only while stopped, deleted only while stopped with
/// no open run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyDefinition {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub kind: StrategyKind,
    /// Hierarchical configuration document, stored verbatim.
    pub config_yaml: String,
    pub status: StrategyStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
