//! Three-Tiered Fetch Cache
//!
//! Volatile in-process (L1), shared remote (L2) and durable columnar (L3)
//! tiers for tabular fetch results.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         FetchOrchestrator                            │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  L1 (in-process)      │ L2 (remote)           │ L3 (disk)            │
//! │  ┌────────────────┐   │ ┌──────────────────┐  │ ┌────────────────┐   │
//! │  │ LRU + TTL      │   │ │ Redis / in-mem   │  │ │ Arrow IPC files│   │
//! │  │ entry-bounded  │   │ │ IPC stream + tag │  │ │ + manifest.json│   │
//! │  └────────────────┘   │ └──────────────────┘  │ └────────────────┘   │
//! │         ▲             │          ▲            │        │   ▲         │
//! │         └─────────────┴──── promotion ────────┴────────┘   │         │
//! │                                          BackgroundWriter ─┘         │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Design Principles
//!
//! - L1 and L2 are accelerators; the L3 manifest is the durable authority
//! - A failing tier degrades to a miss and is never surfaced to callers
//! - L3 writes go through a bounded queue and never block a fetch

mod entry;
mod key;
mod l1;
mod l2;
mod l3;
mod metrics;
mod writer;
pub mod codec;
pub mod compression;
pub mod manifest;

pub use compression::{CompressionAlgorithm, Envelope};
pub use entry::{CacheEntry, EntryMetadata};
pub use key::{canonical_params, content_hash, CacheKey, Params, CONTENT_HASH_LEN};
pub use l1::{L1Config, L1Stats, VolatileLocalCache};
pub use l2::{
    InMemoryRemoteStore, L2Stats, RedisStore, RemoteStore, SharedRemoteCache, StoreOutcome,
    DEFAULT_OP_TIMEOUT,
};
pub use l3::{DurableColumnarCache, EvictionReport, L3Stats, NamespaceUsage};
pub use manifest::{Manifest, ManifestEntry, RootConfig};
pub use metrics::{CacheMetrics, Counter, LatencyEma, MetricsSnapshot};
pub use writer::{BackgroundWriter, EnqueueError, ShutdownMode, WriteJob, WriterStats};

/// Default L1 capacity (entries)
pub const DEFAULT_L1_CAPACITY: usize = 1024;

/// Default TTL when neither the namespace nor the heuristic picks one
pub const DEFAULT_TTL_SECS: u64 = 3600;

/// Fraction of the L3 cap that eviction shrinks usage down to
pub const DEFAULT_EVICTION_TARGET_RATIO: f64 = 0.9;

/// Default depth of the L3 background write queue
pub const DEFAULT_WRITE_QUEUE_CAPACITY: usize = 256;

/// Minimum payload size before the L2 envelope compresses
pub const L2_MIN_COMPRESS_SIZE: usize = 1024;

/// Result of a single tier lookup
///
/// Tiers never raise on the read path; failures come back as
/// `Unavailable` or `Failed` and the caller treats them as a miss.
#[derive(Debug)]
pub enum Lookup<T> {
    /// Value found
    Hit(T),
    /// Tier reachable, key absent
    Miss,
    /// Tier skipped (disabled or cooling down after an outage)
    Unavailable,
    /// Tier call failed; carries the reason for logs and provenance
    Failed(String),
}

impl<T> Lookup<T> {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }

    /// Collapse into an option, dropping the miss reason
    pub fn hit(self) -> Option<T> {
        match self {
            Lookup::Hit(v) => Some(v),
            _ => None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert_eq!(DEFAULT_L1_CAPACITY, 1024);
        assert!(DEFAULT_EVICTION_TARGET_RATIO > 0.0 && DEFAULT_EVICTION_TARGET_RATIO < 1.0);
        assert_eq!(L2_MIN_COMPRESS_SIZE, 1024);
    }

    #[test]
    fn test_lookup_collapse() {
        assert_eq!(Lookup::Hit(3).hit(), Some(3));
        assert!(Lookup::<i32>::Miss.hit().is_none());
        assert!(Lookup::<i32>::Failed("io".into()).hit().is_none());
        assert!(!Lookup::<i32>::Unavailable.is_hit());
    }
}
