//! tiercache - Tiered Fetch Cache
//!
//! Fronts a slow, rate-limited tabular data source with three cache tiers
//! and a filter pushdown mapper, so repeated or overlapping requests for the
//! same dataset are served cheaply and consistently.
//!
//! # Architecture
//!
//! ```text
//! caller ─► FetchOrchestrator ─► PushdownMapper (params + local filters)
//!                │
//!                ├─► L1 VolatileLocalCache    (in-process LRU + TTL)
//!                ├─► L2 SharedRemoteCache     (Redis, degrades to miss)
//!                ├─► L3 DurableColumnarCache  (Arrow files + manifest)
//!                └─► origin fetch ─► populate L1/L2, queue L3 write
//! ```
//!
//! # Example
//!
//! ```no_run
//! use tiercache::{CacheSettings, FetchOrchestrator, Params, Table};
//!
//! # async fn run() -> tiercache::Result<()> {
//! let orchestrator = FetchOrchestrator::connect(CacheSettings::default()).await?;
//! let params = Params::from([("team".to_string(), serde_json::json!("Lakers"))]);
//!
//! let outcome = orchestrator
//!     .get_or_fetch("team_game_log", &params, |_effective| async {
//!         Ok(Table::empty())
//!     }, None, false)
//!     .await?;
//! println!("{} rows, cached: {}", outcome.table.num_rows(), outcome.from_cache);
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`cache`] - The three tiers, keys, codecs and the background writer
//! - [`config`] - Settings and the namespace registry
//! - [`error`] - Error types
//! - [`orchestrator`] - Fetch state machine, provenance, TTL policy, health
//! - [`pushdown`] - Filter parsing, pushdown mapping and local evaluation
//! - [`table`] - The tabular value type

pub mod cache;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod pushdown;
pub mod table;

// Re-export commonly used types
pub use cache::{CacheKey, DurableColumnarCache, InMemoryRemoteStore, Params, RemoteStore};
pub use config::{CacheSettings, FreshnessClass, NamespaceConfig, PersistentTierConfig, RemoteConfig};
pub use error::{Error, Result};
pub use orchestrator::{
    CacheTier, FetchOrchestrator, FetchOutcome, HealthStatus, ProvenanceRecord, StatsSnapshot,
};
pub use pushdown::{ColumnMapping, FilterOp, FilterPredicate, Filters, PushdownMapper};
pub use table::{Column, ColumnData, DataType, Table, Value};
