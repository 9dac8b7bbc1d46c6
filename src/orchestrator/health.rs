//! Tier Health
//!
//! Health of each cache tier and the overall verdict. A degraded tier only
//! costs hit rate; fetches keep working.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tier verdict, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Tier is skipped or lagging; fetches still succeed
    Degraded,
    /// Tier is configured but cannot serve at all
    Unhealthy,
}

impl HealthStatus {
    pub fn is_operational(&self) -> bool {
        *self != HealthStatus::Unhealthy
    }

    pub fn is_healthy(&self) -> bool {
        *self == HealthStatus::Healthy
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        })
    }
}

/// Verdict for one tier, with how long checking it took
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierCheck {
    pub tier: String,
    pub status: HealthStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub duration_ms: u64,
}

impl TierCheck {
    fn new(tier: impl Into<String>, status: HealthStatus, message: Option<String>) -> Self {
        Self {
            tier: tier.into(),
            status,
            message,
            duration_ms: 0,
        }
    }

    pub fn healthy(tier: impl Into<String>) -> Self {
        Self::new(tier, HealthStatus::Healthy, None)
    }

    pub fn degraded(tier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(tier, HealthStatus::Degraded, Some(reason.into()))
    }

    pub fn unhealthy(tier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(tier, HealthStatus::Unhealthy, Some(reason.into()))
    }

    /// Attach a note without changing the status
    pub fn with_message(self, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..self
        }
    }

    pub fn with_duration(self, elapsed: Duration) -> Self {
        Self {
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            ..self
        }
    }
}

/// Health of the whole cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Worst tier status
    pub status: HealthStatus,
    pub tiers: Vec<TierCheck>,
    pub version: String,
    pub uptime_seconds: u64,
}

impl HealthReport {
    pub fn new(tiers: Vec<TierCheck>, uptime: Duration) -> Self {
        Self {
            status: tiers.iter().map(|c| c.status).max().unwrap_or(HealthStatus::Healthy),
            tiers,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime.as_secs(),
        }
    }

    pub fn tier(&self, name: &str) -> Option<&TierCheck> {
        self.tiers.iter().find(|c| c.tier == name)
    }
}
