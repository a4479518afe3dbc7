//! Plan tiers
//!
//! A closed set of tiers. Every account sits on exactly one; new accounts
//! start on [`Plan::Free`] and a purchase moves the account to the plan of
//! the purchased package.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Plan tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Free,
    Starter,
    Basic,
    Professional,
    Enterprise,
}

impl Plan {
    /// Every tier, lowest first
    pub const ALL: [Plan; 5] = [
        Plan::Free,
        Plan::Starter,
        Plan::Basic,
        Plan::Professional,
        Plan::Enterprise,
    ];

    /// Stable identifier used in storage and payment metadata
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Starter => "starter",
            Plan::Basic => "basic",
            Plan::Professional => "professional",
            Plan::Enterprise => "enterprise",
        }
    }
}

impl Default for Plan {
    fn default() -> Self {
        Plan::Free
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a plan identifier is not one of the known tiers
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown plan: {0}")]
pub struct UnknownPlan(pub String);

impl FromStr for Plan {
    type Err = UnknownPlan;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Plan::Free),
            "starter" => Ok(Plan::Starter),
            "basic" => Ok(Plan::Basic),
            "professional" => Ok(Plan::Professional),
            "enterprise" => Ok(Plan::Enterprise),
            _ => Err(UnknownPlan(s.to_string())),
        }
    }
}
