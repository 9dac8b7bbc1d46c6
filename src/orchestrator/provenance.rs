//! Fetch Provenance
//!
//! Per-call trace of the decisions made to produce a result: the effective
//! request, which tier answered, what was pushed down or filtered locally.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::cache::Params;

/// Where a result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    /// In-process volatile cache
    L1,
    /// Shared remote cache
    L2,
    /// Durable columnar cache
    L3,
    /// The origin fetch callback
    Origin,
}

impl CacheTier {
    pub fn is_cache(&self) -> bool {
        !matches!(self, CacheTier::Origin)
    }
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheTier::L1 => write!(f, "L1 (memory)"),
            CacheTier::L2 => write!(f, "L2 (remote)"),
            CacheTier::L3 => write!(f, "L3 (disk)"),
            CacheTier::Origin => write!(f, "origin"),
        }
    }
}

/// States a fetch passes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FetchState {
    Bypass,
    Lookup,
    Tier1Hit,
    Tier2Hit,
    Tier3Hit,
    Miss,
    Populate,
}

impl fmt::Display for FetchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FetchState::Bypass => "BYPASS",
            FetchState::Lookup => "LOOKUP",
            FetchState::Tier1Hit => "TIER1_HIT",
            FetchState::Tier2Hit => "TIER2_HIT",
            FetchState::Tier3Hit => "TIER3_HIT",
            FetchState::Miss => "MISS",
            FetchState::Populate => "POPULATE",
        };
        f.write_str(name)
    }
}

/// Immutable trace returned with every fetch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvenanceRecord {
    pub namespace: String,
    /// Caller params merged with pushed-down filters
    pub effective_params: Params,
    /// Ordered decision log
    pub operations_log: Vec<String>,
    pub elapsed_ms: u64,
    pub warnings: Vec<String>,
    pub served_from: CacheTier,
    pub states: Vec<FetchState>,
    /// Filters translated into origin parameters
    pub pushed_filters: Vec<String>,
    /// Filters evaluated on the fetched table
    pub local_filters: Vec<String>,
    /// TTL used for volatile tiers, if the result was cached
    pub ttl_secs: Option<u64>,
}

impl ProvenanceRecord {
    pub fn from_cache(&self) -> bool {
        self.served_from.is_cache()
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    /// Whether the fetch passed through `state`
    pub fn visited(&self, state: FetchState) -> bool {
        self.states.contains(&state)
    }
}

/// Accumulates a [`ProvenanceRecord`] while a fetch runs
#[derive(Debug)]
pub struct ProvenanceBuilder {
    namespace: String,
    effective_params: Params,
    operations_log: Vec<String>,
    warnings: Vec<String>,
    states: Vec<FetchState>,
    pushed_filters: Vec<String>,
    local_filters: Vec<String>,
    ttl_secs: Option<u64>,
    started: Instant,
}

impl ProvenanceBuilder {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            effective_params: Params::new(),
            operations_log: Vec::new(),
            warnings: Vec::new(),
            states: Vec::new(),
            pushed_filters: Vec::new(),
            local_filters: Vec::new(),
            ttl_secs: None,
            started: Instant::now(),
        }
    }

    pub fn params(&mut self, params: Params) -> &mut Self {
        self.effective_params = params;
        self
    }

    /// Append a log line
    pub fn log(&mut self, message: impl Into<String>) -> &mut Self {
        let message = message.into();
        debug!(namespace = %self.namespace, "{message}");
        self.operations_log.push(message);
        self
    }

    /// Enter a state; the transition is logged too
    pub fn state(&mut self, state: FetchState) -> &mut Self {
        self.states.push(state);
        self.log(format!("state: {state}"))
    }

    pub fn warn(&mut self, warning: impl Into<String>) -> &mut Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn warnings(&mut self, warnings: impl IntoIterator<Item = String>) -> &mut Self {
        self.warnings.extend(warnings);
        self
    }

    pub fn pushed(&mut self, pushed: impl IntoIterator<Item = String>) -> &mut Self {
        self.pushed_filters.extend(pushed);
        self
    }

    pub fn local(&mut self, local: impl IntoIterator<Item = String>) -> &mut Self {
        self.local_filters.extend(local);
        self
    }

    pub fn ttl(&mut self, ttl: Duration) -> &mut Self {
        self.ttl_secs = Some(ttl.as_secs());
        self
    }

    pub fn finish(self, served_from: CacheTier) -> ProvenanceRecord {
        ProvenanceRecord {
            namespace: self.namespace,
            effective_params: self.effective_params,
            operations_log: self.operations_log,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            warnings: self.warnings,
            served_from,
            states: self.states,
            pushed_filters: self.pushed_filters,
            local_filters: self.local_filters,
            ttl_secs: self.ttl_secs,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
