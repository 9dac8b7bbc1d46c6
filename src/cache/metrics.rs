//! Cache Metrics Collection
//!
//! Call-level and per-tier counters behind `get_stats()`. Counters live in a
//! flat atomic array indexed by [`Counter`], so recording is one relaxed add.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Everything the orchestrator and the background writer count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    /// Call served from any tier
    Hit,
    /// Call that went to the origin
    Miss,
    Error,
    /// Caching disabled or refresh forced
    Bypass,
    L1Hit,
    L1Miss,
    L2Hit,
    L2Miss,
    L2Error,
    L3Hit,
    L3Miss,
    L3Error,
    L3Write,
    /// Write queue full or closed
    L3WriteDropped,
    Promotion,
}

impl Counter {
    const COUNT: usize = Counter::Promotion as usize + 1;
}

/// Exponential moving average of a latency, stored as microseconds
#[derive(Debug, Default)]
pub struct LatencyEma {
    micros: AtomicU64,
}

impl LatencyEma {
    const ALPHA: f64 = 0.1;

    /// Fold in one sample; the first sample seeds the average
    pub fn observe(&self, sample: Duration) {
        let sample = u64::try_from(sample.as_micros()).unwrap_or(u64::MAX);
        let _ = self
            .micros
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(match current {
                    0 => sample,
                    _ => ((1.0 - Self::ALPHA) * current as f64 + Self::ALPHA * sample as f64) as u64,
                })
            });
    }

    pub fn get(&self) -> Duration {
        Duration::from_micros(self.micros.load(Ordering::Relaxed))
    }

    fn clear(&self) {
        self.micros.store(0, Ordering::Relaxed);
    }
}

/// Shared counters; cheap to clone behind an `Arc`
#[derive(Debug, Default)]
pub struct CacheMetrics {
    counters: [AtomicU64; Counter::COUNT],
    origin_latency: LatencyEma,
    l3_read_latency: LatencyEma,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self, counter: Counter) {
        self.counters[counter as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter as usize].load(Ordering::Relaxed)
    }

    pub fn observe_origin(&self, elapsed: Duration) {
        self.origin_latency.observe(elapsed);
    }

    pub fn observe_l3_read(&self, elapsed: Duration) {
        self.l3_read_latency.observe(elapsed);
    }

    /// Percentage of cacheable calls served from any tier; bypassed calls do not count
    pub fn hit_rate_percent(&self) -> f64 {
        let hits = self.get(Counter::Hit);
        match hits + self.get(Counter::Miss) {
            0 => 0.0,
            total => hits as f64 * 100.0 / total as f64,
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = |counter| self.get(counter);
        MetricsSnapshot {
            hits: c(Counter::Hit),
            misses: c(Counter::Miss),
            errors: c(Counter::Error),
            bypassed: c(Counter::Bypass),
            hit_rate_percent: self.hit_rate_percent(),
            l1_hits: c(Counter::L1Hit),
            l1_misses: c(Counter::L1Miss),
            l2_hits: c(Counter::L2Hit),
            l2_misses: c(Counter::L2Miss),
            l2_errors: c(Counter::L2Error),
            l3_hits: c(Counter::L3Hit),
            l3_misses: c(Counter::L3Miss),
            l3_errors: c(Counter::L3Error),
            l3_writes: c(Counter::L3Write),
            l3_writes_dropped: c(Counter::L3WriteDropped),
            promotions: c(Counter::Promotion),
            origin_latency: self.origin_latency.get(),
            l3_read_latency: self.l3_read_latency.get(),
        }
    }

    pub fn reset(&self) {
        self.counters
            .iter()
            .for_each(|counter| counter.store(0, Ordering::Relaxed));
        self.origin_latency.clear();
        self.l3_read_latency.clear();
    }
}

/// Point-in-time copy of [`CacheMetrics`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub bypassed: u64,
    pub hit_rate_percent: f64,
    pub l1_hits: u64,
    pub l1_misses: u64,
    pub l2_hits: u64,
    pub l2_misses: u64,
    pub l2_errors: u64,
    pub l3_hits: u64,
    pub l3_misses: u64,
    pub l3_errors: u64,
    pub l3_writes: u64,
    pub l3_writes_dropped: u64,
    pub promotions: u64,
    pub origin_latency: Duration,
    pub l3_read_latency: Duration,
}
