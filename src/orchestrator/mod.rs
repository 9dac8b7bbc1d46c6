//! Fetch Orchestrator
//!
//! Public entry point: sequences tier lookups, promotion, the origin call
//! and provenance recording for one fetch.
//!
//! # States
//!
//! ```text
//! BYPASS ─────────────────────────────────────────► origin ──► return
//! LOOKUP ─► TIER1_HIT | TIER2_HIT | TIER3_HIT ─► promote ───► return
//!        └► MISS ─► origin ─► POPULATE (L1, L2 inline; L3 queued) ─► return
//! ```
//!
//! # Design
//!
//! - Pushed-down filters become request params, so they are part of the key
//! - A failing tier is logged and treated as a miss; only origin errors and
//!   unknown local-filter columns reach the caller
//! - L3 writes never block the caller unless `background_writes` is off
//! - Concurrent misses on one key are not deduplicated

mod health;
mod provenance;
mod ttl;

pub use health::{HealthReport, HealthStatus, TierCheck};
pub use provenance::{CacheTier, FetchState, ProvenanceBuilder, ProvenanceRecord};
pub use ttl::{TtlPolicy, TtlSource};

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::{
    BackgroundWriter, CacheEntry, CacheKey, CacheMetrics, Counter, DurableColumnarCache, L1Stats,
    L2Stats, L3Stats, Lookup, Params, RemoteStore, SharedRemoteCache, ShutdownMode, StoreOutcome,
    VolatileLocalCache, WriteJob, WriterStats,
};
use crate::config::{CacheSettings, NamespaceRegistry, PersistentTierConfig};
use crate::error::{Error, Result};
use crate::pushdown::{filter_table, FilterPredicate, Filters, PushdownMapper, PushdownResult};
use crate::table::Table;

/// Result of [`FetchOrchestrator::get_or_fetch`]
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub table: Arc<Table>,
    pub from_cache: bool,
    pub provenance: ProvenanceRecord,
}

/// Entries removed per tier by an invalidation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InvalidationReport {
    pub l1: u64,
    pub l2: u64,
    pub l3: u64,
}

impl InvalidationReport {
    pub fn total(&self) -> u64 {
        self.l1 + self.l2 + self.l3
    }
}

/// Per-tier statistics
#[derive(Debug, Clone, Serialize)]
pub struct TierStats {
    pub l1: L1Stats,
    pub l2: L2Stats,
    /// `None` until the persistent tier is enabled
    pub l3: Option<L3Stats>,
}

/// Snapshot returned by [`FetchOrchestrator::get_stats`]
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub bypassed: u64,
    pub hit_rate_percent: f64,
    pub promotions: u64,
    pub l3_writes_dropped: u64,
    pub origin_latency: Duration,
    pub tiers: TierStats,
    pub writer: Option<WriterStats>,
}

struct PersistentTier {
    cache: Arc<DurableColumnarCache>,
    /// `None` when writes are awaited inline
    writer: Option<BackgroundWriter>,
}

/// Tiered cache in front of an origin fetch
pub struct FetchOrchestrator {
    settings: CacheSettings,
    registry: NamespaceRegistry,
    mapper: PushdownMapper,
    l1: Arc<VolatileLocalCache>,
    l2: Arc<SharedRemoteCache>,
    persistent: RwLock<Option<Arc<PersistentTier>>>,
    /// L2 copies of L3 hits still being written
    promotions: Mutex<Vec<JoinHandle<()>>>,
    metrics: Arc<CacheMetrics>,
    ttl_policy: TtlPolicy,
    started: Instant,
}

impl FetchOrchestrator {
    /// Build with L1 only; see [`FetchOrchestrator::connect`] for the other tiers
    pub fn new(settings: CacheSettings) -> Result<Self> {
        settings.validate()?;
        let registry = settings.registry()?;
        let mapper = PushdownMapper::new(registry.iter()).with_enabled(settings.pushdown_enabled);

        Ok(Self {
            l1: Arc::new(VolatileLocalCache::with_capacity(settings.l1_capacity)),
            l2: Arc::new(SharedRemoteCache::disabled()),
            persistent: RwLock::new(None),
            promotions: Mutex::new(Vec::new()),
            metrics: Arc::new(CacheMetrics::new()),
            ttl_policy: TtlPolicy::new(settings.default_ttl()),
            started: Instant::now(),
            registry,
            mapper,
            settings,
        })
    }

    /// Build and bring up the remote and persistent tiers named in `settings`
    ///
    /// An unreachable remote cache is not an error; the tier starts out
    /// unavailable and is pinged again after its cooldown.
    pub async fn connect(settings: CacheSettings) -> Result<Self> {
        let mut orchestrator = Self::new(settings)?;
        if let Some(remote) = orchestrator.settings.remote.clone() {
            orchestrator.l2 = Arc::new(SharedRemoteCache::connect(&remote).await);
        }
        if let Some(persistent) = orchestrator.settings.persistent.clone() {
            orchestrator.enable_persistent_tier(persistent).await?;
        }
        Ok(orchestrator)
    }

    /// Use `store` as the L2 backend
    pub fn with_remote_store(mut self, store: Arc<dyn RemoteStore>) -> Self {
        let remote = self.settings.remote.clone().unwrap_or_default();
        self.l2 = Arc::new(
            SharedRemoteCache::new(
                store,
                remote.key_prefix,
                Duration::from_secs(remote.retry_cooldown_secs),
            )
            .with_op_timeout(Duration::from_millis(remote.op_timeout_ms)),
        );
        self
    }

    /// Open a durable cache directory and route L3 traffic to it
    ///
    /// Replaces a previously enabled tier after draining its writer.
    #[instrument(skip_all, fields(cache_dir = %config.cache_dir.display()))]
    pub async fn enable_persistent_tier(&self, config: PersistentTierConfig) -> Result<()> {
        let cache = Arc::new(DurableColumnarCache::open(&config).await?);
        let writer = config.background_writes.then(|| {
            BackgroundWriter::spawn(
                Arc::clone(&cache),
                config.write_queue_capacity,
                Arc::clone(&self.metrics),
            )
        });

        let previous = self
            .persistent
            .write()
            .replace(Arc::new(PersistentTier { cache, writer }));
        if let Some(writer) = previous.as_ref().and_then(|p| p.writer.as_ref()) {
            writer.shutdown(ShutdownMode::Drain).await;
        }

        info!(
            compression = %config.compression,
            max_size_mb = config.max_size_mb,
            background_writes = config.background_writes,
            "Persistent tier enabled"
        );
        Ok(())
    }

    fn persistent(&self) -> Option<Arc<PersistentTier>> {
        self.persistent.read().clone()
    }

    // =========================================================================
    // Fetch Path
    // =========================================================================

    /// Serve a request from the fastest tier holding it, else from `fetch`
    ///
    /// `fetch` receives the effective params: the caller's params plus any
    /// filters pushed down to the origin. Filters that could not be pushed are
    /// applied to the returned table.
    ///
    /// # Errors
    ///
    /// - [`Error::Origin`] carrying the callback's error unchanged
    /// - [`Error::UnknownColumn`] when a local filter names a missing column
    #[instrument(skip_all, fields(namespace = %namespace))]
    pub async fn get_or_fetch<F, Fut>(
        &self,
        namespace: &str,
        params: &Params,
        fetch: F,
        filters: Option<&Filters>,
        force_refresh: bool,
    ) -> Result<FetchOutcome>
    where
        F: FnOnce(Params) -> Fut,
        Fut: Future<Output = anyhow::Result<Table>>,
    {
        let mut prov = ProvenanceBuilder::new(namespace);

        let split = match filters {
            Some(filters) if !filters.is_empty() => {
                self.mapper.split_filters(namespace, filters, params)
            }
            _ => PushdownResult::default(),
        };
        let effective = split.effective_params(params);
        prov.params(effective.clone())
            .pushed(split.pushed.iter().cloned())
            .local(split.local_predicates.iter().map(ToString::to_string))
            .warnings(split.warnings.iter().cloned());

        if !self.settings.enabled || force_refresh {
            self.metrics.incr(Counter::Bypass);
            prov.state(FetchState::Bypass).log(if force_refresh {
                "forced refresh"
            } else {
                "caching disabled"
            });
            let table = self.call_origin(fetch, &effective, &mut prov).await?;
            return self.finish(table, CacheTier::Origin, &split.local_predicates, prov);
        }

        let key = CacheKey::new(namespace, &effective);
        let (ttl, ttl_source) = self.ttl_policy.ttl_for(
            self.registry.get(namespace),
            &effective,
            Utc::now().date_naive(),
        );
        prov.state(FetchState::Lookup)
            .log(format!("key {key}, ttl {}s ({ttl_source})", ttl.as_secs()))
            .ttl(ttl);

        if let Some((table, tier)) = self.lookup(&key, &effective, ttl, &mut prov).await {
            self.metrics.incr(Counter::Hit);
            return self.finish(table, tier, &split.local_predicates, prov);
        }

        self.metrics.incr(Counter::Miss);
        prov.state(FetchState::Miss);
        let table = self.call_origin(fetch, &effective, &mut prov).await?;
        self.populate(&key, &effective, &table, ttl, &mut prov).await;
        self.finish(table, CacheTier::Origin, &split.local_predicates, prov)
    }

    async fn lookup(
        &self,
        key: &CacheKey,
        params: &Params,
        ttl: Duration,
        prov: &mut ProvenanceBuilder,
    ) -> Option<(Arc<Table>, CacheTier)> {
        if let Some(entry) = self.l1.get(key) {
            self.metrics.incr(Counter::L1Hit);
            prov.state(FetchState::Tier1Hit);
            return Some((Arc::clone(entry.payload()), CacheTier::L1));
        }
        self.metrics.incr(Counter::L1Miss);

        match self.l2.get(key).await {
            Lookup::Hit(table) => {
                self.metrics.incr(Counter::L2Hit);
                prov.state(FetchState::Tier2Hit);
                let table = Arc::new(table);
                self.l1.set(
                    key.clone(),
                    CacheEntry::new(Arc::clone(&table), params.clone(), Some(ttl)),
                );
                self.metrics.incr(Counter::Promotion);
                prov.log("promoted to L1");
                return Some((table, CacheTier::L2));
            }
            Lookup::Miss => self.metrics.incr(Counter::L2Miss),
            Lookup::Unavailable => {
                if self.l2.is_enabled() {
                    prov.log("L2 unavailable, skipped");
                }
            }
            Lookup::Failed(reason) => {
                self.metrics.incr(Counter::L2Error);
                self.metrics.incr(Counter::Error);
                prov.log(format!("L2 failed: {reason}"));
            }
        }

        let tier = self.persistent()?;
        let started = Instant::now();
        match tier.cache.get(key.namespace(), params).await {
            Lookup::Hit(table) => {
                self.metrics.incr(Counter::L3Hit);
                self.metrics.observe_l3_read(started.elapsed());
                prov.state(FetchState::Tier3Hit);
                let table = Arc::new(table);
                self.promote(key, params, &table, ttl);
                prov.log("promoting to L1/L2");
                Some((table, CacheTier::L3))
            }
            Lookup::Miss | Lookup::Unavailable => {
                self.metrics.incr(Counter::L3Miss);
                None
            }
            Lookup::Failed(reason) => {
                self.metrics.incr(Counter::L3Error);
                self.metrics.incr(Counter::Error);
                prov.log(format!("L3 failed: {reason}"));
                None
            }
        }
    }

    /// Copy an L3 hit into the volatile tiers; L2 is written in the background
    fn promote(&self, key: &CacheKey, params: &Params, table: &Arc<Table>, ttl: Duration) {
        self.l1.set(
            key.clone(),
            CacheEntry::new(Arc::clone(table), params.clone(), Some(ttl)),
        );
        self.metrics.incr(Counter::Promotion);

        if self.l2.is_enabled() {
            let l2 = Arc::clone(&self.l2);
            let metrics = Arc::clone(&self.metrics);
            let key = key.clone();
            let table = Arc::clone(table);
            let handle = tokio::spawn(async move {
                match l2.set(&key, &table, ttl).await {
                    StoreOutcome::Stored => debug!(key = %key, "Promoted L3 hit to L2"),
                    StoreOutcome::Skipped => {}
                    StoreOutcome::Failed(_) => metrics.incr(Counter::Error),
                }
            });
            let mut pending = self.promotions.lock();
            pending.retain(|h| !h.is_finished());
            pending.push(handle);
        }
    }

    /// Wait for L2 promotions spawned so far
    async fn settle_promotions(&self) {
        let pending = std::mem::take(&mut *self.promotions.lock());
        for handle in pending {
            if let Err(e) = handle.await {
                warn!(error = %e, "L2 promotion task failed");
            }
        }
    }

    async fn call_origin<F, Fut>(
        &self,
        fetch: F,
        params: &Params,
        prov: &mut ProvenanceBuilder,
    ) -> Result<Arc<Table>>
    where
        F: FnOnce(Params) -> Fut,
        Fut: Future<Output = anyhow::Result<Table>>,
    {
        let started = Instant::now();
        let result = fetch(params.clone()).await;
        self.metrics.observe_origin(started.elapsed());

        match result {
            Ok(table) => {
                prov.log(format!(
                    "origin returned {} rows in {}ms",
                    table.num_rows(),
                    started.elapsed().as_millis()
                ));
                Ok(Arc::new(table))
            }
            Err(e) => {
                warn!(error = %e, "Origin fetch failed");
                Err(Error::Origin(e))
            }
        }
    }

    async fn populate(
        &self,
        key: &CacheKey,
        params: &Params,
        table: &Arc<Table>,
        ttl: Duration,
        prov: &mut ProvenanceBuilder,
    ) {
        prov.state(FetchState::Populate);
        self.l1.set(
            key.clone(),
            CacheEntry::new(Arc::clone(table), params.clone(), Some(ttl)),
        );

        if self.l2.is_enabled() {
            match self.l2.set(key, table, ttl).await {
                StoreOutcome::Stored => {
                    prov.log("stored in L2");
                }
                StoreOutcome::Skipped => {
                    prov.log("L2 store skipped");
                }
                StoreOutcome::Failed(reason) => {
                    self.metrics.incr(Counter::Error);
                    prov.log(format!("L2 store failed: {reason}"));
                }
            }
        }

        let Some(tier) = self.persistent() else {
            return;
        };
        match &tier.writer {
            Some(writer) => {
                let job = WriteJob {
                    namespace: key.namespace().to_string(),
                    params: params.clone(),
                    table: Arc::clone(table),
                };
                match writer.enqueue(job) {
                    Ok(()) => {
                        prov.log("queued L3 write");
                    }
                    Err(e) => {
                        warn!(key = %key, error = %e, "Skipping L3 write");
                        prov.warn(format!("durable write skipped: {e}"));
                    }
                }
            }
            None => match tier.cache.set(key.namespace(), params, Arc::clone(table)).await {
                Ok(size) => {
                    self.metrics.incr(Counter::L3Write);
                    prov.log(format!("stored {size} bytes in L3"));
                }
                Err(e) => {
                    self.metrics.incr(Counter::L3Error);
                    self.metrics.incr(Counter::Error);
                    error!(key = %key, error = %e, "L3 write failed");
                    prov.warn(format!("durable write failed: {e}"));
                }
            },
        }
    }

    fn finish(
        &self,
        table: Arc<Table>,
        served_from: CacheTier,
        predicates: &[FilterPredicate],
        mut prov: ProvenanceBuilder,
    ) -> Result<FetchOutcome> {
        let filtered = filter_table(&table, predicates)?;
        if filtered.applied > 0 {
            prov.log(format!(
                "applied {} local filters: {} -> {} rows",
                filtered.applied, filtered.rows_before, filtered.rows_after
            ));
        }
        prov.warnings(filtered.warnings);

        let provenance = prov.finish(served_from);
        debug!(
            served_from = %served_from,
            rows = filtered.table.num_rows(),
            elapsed_ms = provenance.elapsed_ms,
            "Fetch complete"
        );
        Ok(FetchOutcome {
            table: filtered.table,
            from_cache: served_from.is_cache(),
            provenance,
        })
    }

    // =========================================================================
    // Administration
    // =========================================================================

    /// Remove one request (`params`) or a whole namespace from every tier
    ///
    /// Pending background writes and L2 promotions are finished first so
    /// they cannot resurrect an invalidated entry.
    #[instrument(skip_all, fields(namespace = %namespace))]
    pub async fn invalidate(&self, namespace: &str, params: Option<&Params>) -> Result<InvalidationReport> {
        let persistent = self.persistent();
        if let Some(writer) = persistent.as_ref().and_then(|p| p.writer.as_ref()) {
            writer.flush().await;
        }
        self.settle_promotions().await;

        let mut report = InvalidationReport::default();
        match params {
            Some(params) => {
                let key = CacheKey::new(namespace, params);
                report.l1 = self.l1.remove(&key).is_some() as u64;
                report.l2 = self.l2.delete(&key).await as u64;
            }
            None => {
                report.l1 = self.l1.remove_namespace(namespace) as u64;
                report.l2 = self.l2.delete_namespace(namespace).await;
            }
        }
        if let Some(tier) = persistent {
            report.l3 = tier.cache.invalidate(namespace, params).await?;
        }

        info!(
            scope = if params.is_some() { "entry" } else { "namespace" },
            l1 = report.l1,
            l2 = report.l2,
            l3 = report.l3,
            "Invalidated"
        );
        Ok(report)
    }

    /// Counters for the orchestrator and every tier
    pub async fn get_stats(&self) -> StatsSnapshot {
        let metrics = self.metrics.snapshot();
        let persistent = self.persistent();

        let l3 = match &persistent {
            Some(tier) => match tier.cache.stats().await {
                Ok(stats) => Some(stats),
                Err(e) => {
                    warn!(error = %e, "Could not read L3 stats");
                    None
                }
            },
            None => None,
        };

        StatsSnapshot {
            hits: metrics.hits,
            misses: metrics.misses,
            errors: metrics.errors,
            bypassed: metrics.bypassed,
            hit_rate_percent: metrics.hit_rate_percent,
            promotions: metrics.promotions,
            l3_writes_dropped: metrics.l3_writes_dropped,
            origin_latency: metrics.origin_latency,
            tiers: TierStats {
                l1: self.l1.stats(),
                l2: self.l2.stats(),
                l3,
            },
            writer: persistent
                .as_ref()
                .and_then(|p| p.writer.as_ref())
                .map(BackgroundWriter::stats),
        }
    }

    /// Per-tier health
    pub async fn health(&self) -> HealthReport {
        let mut checks = vec![TierCheck::healthy("l1").with_message(format!(
            "{}/{} entries",
            self.l1.size(),
            self.l1.capacity()
        ))];

        checks.push(if !self.l2.is_enabled() {
            TierCheck::healthy("l2").with_message("not configured")
        } else if self.l2.is_available() {
            TierCheck::healthy("l2")
        } else {
            TierCheck::degraded("l2", "remote cache unreachable")
        });

        checks.push(match self.persistent() {
            None => TierCheck::healthy("l3").with_message("not enabled"),
            Some(tier) => {
                let started = Instant::now();
                let check = match tokio::fs::metadata(tier.cache.root()).await {
                    Ok(meta) if meta.is_dir() => match &tier.writer {
                        Some(writer) if !writer.is_running() => {
                            TierCheck::degraded("l3", "background writer stopped")
                        }
                        _ => TierCheck::healthy("l3"),
                    },
                    Ok(_) => TierCheck::unhealthy("l3", "cache root is not a directory"),
                    Err(e) => TierCheck::unhealthy("l3", format!("cache root unreadable: {e}")),
                };
                check.with_duration(started.elapsed())
            }
        });

        HealthReport::new(checks, self.started.elapsed())
    }

    /// Wait for queued L3 writes and in-flight L2 promotions
    pub async fn flush(&self) {
        if let Some(writer) = self.persistent().as_ref().and_then(|p| p.writer.as_ref()) {
            writer.flush().await;
        }
        self.settle_promotions().await;
    }

    /// Stop background work, finishing queued L3 writes
    pub async fn shutdown(&self) {
        self.shutdown_with(ShutdownMode::Drain).await;
    }

    pub async fn shutdown_with(&self, mode: ShutdownMode) {
        if let Some(writer) = self.persistent().as_ref().and_then(|p| p.writer.as_ref()) {
            writer.shutdown(mode).await;
        }
        match mode {
            ShutdownMode::Drain => self.settle_promotions().await,
            ShutdownMode::Abandon => self.promotions.lock().drain(..).for_each(|h| h.abort()),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn registry(&self) -> &NamespaceRegistry {
        &self.registry
    }

    pub fn mapper(&self) -> &PushdownMapper {
        &self.mapper
    }

    pub fn l1(&self) -> &VolatileLocalCache {
        &self.l1
    }

    pub fn l2(&self) -> &SharedRemoteCache {
        &self.l2
    }

    /// The durable tier, if enabled
    pub fn persistent_cache(&self) -> Option<Arc<DurableColumnarCache>> {
        self.persistent().map(|p| Arc::clone(&p.cache))
    }

    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryRemoteStore;
    use crate::config::{FreshnessClass, NamespaceConfig, RemoteConfig};
    use crate::pushdown::ColumnMapping;
    use crate::table::{Column, ColumnData};
    use assert_matches::assert_matches;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const NS: &str = "team_game_log";

    fn make_table(rows: i64) -> Table {
        Table::from_columns(vec![
            Column::new("GAME_ID", ColumnData::Int64((0..rows).map(Some).collect())),
            Column::new(
                "WL",
                ColumnData::Utf8((0..rows).map(|i| Some(if i % 2 == 0 { "W" } else { "L" }.into())).collect()),
            ),
        ])
        .unwrap()
    }

    fn make_params() -> Params {
        Params::from([
            ("team".to_string(), json!("Lakers")),
            ("season".to_string(), json!("2023-24")),
        ])
    }

    fn counting_fetch(
        calls: &Arc<AtomicUsize>,
        rows: i64,
    ) -> impl FnOnce(Params) -> std::future::Ready<anyhow::Result<Table>> {
        let calls = Arc::clone(calls);
        move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(make_table(rows)))
        }
    }

    /// Remote backend that stalls, delays or rejects calls; `ping` always works
    #[derive(Default)]
    struct FaultyStore {
        inner: InMemoryRemoteStore,
        stalled: bool,
        set_delay: Duration,
        reject_sets: bool,
    }

    impl FaultyStore {
        async fn stall(&self) {
            if self.stalled {
                std::future::pending::<()>().await;
            }
        }
    }

    #[async_trait::async_trait]
    impl RemoteStore for FaultyStore {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.stall().await;
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
            self.stall().await;
            tokio::time::sleep(self.set_delay).await;
            if self.reject_sets {
                return Err(Error::unavailable("L2", "write rejected"));
            }
            self.inner.set(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> Result<bool> {
            self.stall().await;
            self.inner.delete(key).await
        }

        async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
            self.stall().await;
            self.inner.delete_prefix(prefix).await
        }

        async fn ping(&self) -> Result<()> {
            self.inner.ping().await
        }

        fn name(&self) -> &'static str {
            "faulty"
        }
    }

    fn settings() -> CacheSettings {
        CacheSettings::default().with_namespace(
            NamespaceConfig::new(NS)
                .with_freshness(FreshnessClass::Daily)
                .with_pushdown("WL", ColumnMapping::direct("outcome")),
        )
    }

    #[tokio::test]
    async fn test_miss_then_l1_hit() {
        let orchestrator = FetchOrchestrator::new(settings()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = orchestrator
            .get_or_fetch(NS, &make_params(), counting_fetch(&calls, 4), None, false)
            .await
            .unwrap();
        assert!(!first.from_cache);
        assert!(first.provenance.visited(FetchState::Miss));
        assert!(first.provenance.visited(FetchState::Populate));
        assert_eq!(first.provenance.ttl_secs, Some(3600));

        let second = orchestrator
            .get_or_fetch(NS, &make_params(), counting_fetch(&calls, 4), None, false)
            .await
            .unwrap();
        assert!(second.from_cache);
        assert_eq!(second.provenance.served_from, CacheTier::L1);
        assert_eq!(second.table, first.table);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_l2_hit_promotes_to_l1() {
        let store = Arc::new(InMemoryRemoteStore::new());
        let orchestrator = FetchOrchestrator::new(settings())
            .unwrap()
            .with_remote_store(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        orchestrator
            .get_or_fetch(NS, &make_params(), counting_fetch(&calls, 3), None, false)
            .await
            .unwrap();
        assert_eq!(store.len(), 1);

        orchestrator.l1().clear();
        let outcome = orchestrator
            .get_or_fetch(NS, &make_params(), counting_fetch(&calls, 3), None, false)
            .await
            .unwrap();
        assert_eq!(outcome.provenance.served_from, CacheTier::L2);
        assert_eq!(outcome.table.num_rows(), 3);

        let outcome = orchestrator
            .get_or_fetch(NS, &make_params(), counting_fetch(&calls, 3), None, false)
            .await
            .unwrap();
        assert_eq!(outcome.provenance.served_from, CacheTier::L1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.get_stats().await.promotions, 1);
    }

    #[tokio::test]
    async fn test_l3_hit_promotes_to_volatile_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = FetchOrchestrator::new(settings()).unwrap();
        let mut config = PersistentTierConfig::new(dir.path());
        config.background_writes = false;
        orchestrator.enable_persistent_tier(config).await.unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        orchestrator
            .get_or_fetch(NS, &make_params(), counting_fetch(&calls, 5), None, false)
            .await
            .unwrap();
        orchestrator.l1().clear();

        let outcome = orchestrator
            .get_or_fetch(NS, &make_params(), counting_fetch(&calls, 5), None, false)
            .await
            .unwrap();
        assert!(outcome.from_cache);
        assert!(outcome.provenance.visited(FetchState::Tier3Hit));
        assert_eq!(outcome.table.num_rows(), 5);
        assert!(orchestrator.l1().contains(&CacheKey::new(NS, &make_params())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = orchestrator.get_stats().await;
        let l3 = stats.tiers.l3.unwrap();
        assert_eq!((l3.total_files, l3.hits), (1, 1));
    }

    #[tokio::test]
    async fn test_bypass_skips_every_tier() {
        let mut settings = settings();
        settings.enabled = false;
        let orchestrator = FetchOrchestrator::new(settings).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let outcome = orchestrator
                .get_or_fetch(NS, &make_params(), counting_fetch(&calls, 2), None, false)
                .await
                .unwrap();
            assert!(!outcome.from_cache);
            assert_eq!(outcome.provenance.states, vec![FetchState::Bypass]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(orchestrator.l1().size(), 0);
        assert_eq!(orchestrator.get_stats().await.bypassed, 2);
    }

    #[tokio::test]
    async fn test_force_refresh_calls_origin() {
        let orchestrator = FetchOrchestrator::new(settings()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        orchestrator
            .get_or_fetch(NS, &make_params(), counting_fetch(&calls, 2), None, false)
            .await
            .unwrap();
        let outcome = orchestrator
            .get_or_fetch(NS, &make_params(), counting_fetch(&calls, 2), None, true)
            .await
            .unwrap();
        assert!(!outcome.from_cache);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[derive(Debug, thiserror::Error)]
    #[error("rate limited")]
    struct RateLimited;

    #[tokio::test]
    async fn test_origin_error_passes_through() {
        let orchestrator = FetchOrchestrator::new(settings()).unwrap();
        let err = orchestrator
            .get_or_fetch(
                NS,
                &make_params(),
                |_| async { Err::<Table, _>(anyhow::Error::new(RateLimited)) },
                None,
                false,
            )
            .await
            .unwrap_err();

        assert_matches!(&err, Error::Origin(inner) if inner.downcast_ref::<RateLimited>().is_some());
        assert_eq!(orchestrator.l1().size(), 0);
    }

    #[tokio::test]
    async fn test_pushed_filter_reaches_origin() {
        let orchestrator = FetchOrchestrator::new(settings()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let filters = Filters::from([("WL".to_string(), json!(["==", "W"]))]);

        let recorder = {
            let seen = Arc::clone(&seen);
            move |params: Params| {
                seen.lock().push(params);
                // Origin already honours outcome=W
                std::future::ready(Ok(Table::from_columns(vec![Column::new(
                    "WL",
                    ColumnData::Utf8(vec![Some("W".into()), Some("W".into())]),
                )])
                .unwrap()))
            }
        };
        let outcome = orchestrator
            .get_or_fetch(NS, &make_params(), recorder, Some(&filters), false)
            .await
            .unwrap();

        assert_eq!(seen.lock()[0]["outcome"], json!("W"));
        assert_eq!(outcome.provenance.effective_params["outcome"], json!("W"));
        assert_eq!(outcome.provenance.pushed_filters.len(), 1);
        assert!(outcome.provenance.local_filters.is_empty());
        assert_eq!(outcome.table.num_rows(), 2);
    }

    #[tokio::test]
    async fn test_local_filter_on_unknown_column() {
        let orchestrator = FetchOrchestrator::new(settings()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let filters = Filters::from([("PTS".to_string(), json!([">", 100]))]);

        let err = orchestrator
            .get_or_fetch(NS, &make_params(), counting_fetch(&calls, 3), Some(&filters), false)
            .await
            .unwrap_err();
        assert_matches!(err, Error::UnknownColumn { column, available }
            if column == "PTS" && available == vec!["GAME_ID".to_string(), "WL".to_string()]);
    }

    #[tokio::test]
    async fn test_local_filter_skipped_for_empty_table() {
        let orchestrator = FetchOrchestrator::new(settings()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let filters = Filters::from([("PTS".to_string(), json!([">", 100]))]);

        let outcome = orchestrator
            .get_or_fetch(NS, &make_params(), counting_fetch(&calls, 0), Some(&filters), false)
            .await
            .unwrap();
        assert_eq!(outcome.table.num_rows(), 0);
    }

    #[tokio::test]
    async fn test_invalidate_entry_and_namespace() {
        let orchestrator = FetchOrchestrator::new(settings()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let other = Params::from([("team".to_string(), json!("Celtics"))]);

        for params in [make_params(), other.clone()] {
            orchestrator
                .get_or_fetch(NS, &params, counting_fetch(&calls, 1), None, false)
                .await
                .unwrap();
        }

        let report = orchestrator.invalidate(NS, Some(&make_params())).await.unwrap();
        assert_eq!(report, InvalidationReport { l1: 1, l2: 0, l3: 0 });
        assert_eq!(orchestrator.l1().size(), 1);

        let report = orchestrator.invalidate(NS, None).await.unwrap();
        assert_eq!(report.total(), 1);
        assert_eq!(orchestrator.l1().size(), 0);
    }

    #[tokio::test]
    async fn test_health_reflects_remote_outage() {
        let store = Arc::new(InMemoryRemoteStore::new());
        let orchestrator = FetchOrchestrator::new(settings())
            .unwrap()
            .with_remote_store(store.clone());
        assert_eq!(orchestrator.health().await.status, HealthStatus::Healthy);

        store.set_offline(true);
        let calls = Arc::new(AtomicUsize::new(0));
        orchestrator
            .get_or_fetch(NS, &make_params(), counting_fetch(&calls, 1), None, false)
            .await
            .unwrap();

        let report = orchestrator.health().await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.tier("l2").unwrap().status, HealthStatus::Degraded);
        assert!(orchestrator.get_stats().await.tiers.l2.errors >= 1);
    }

    #[tokio::test]
    async fn test_stalled_remote_does_not_block_fetch() {
        let mut settings = settings();
        settings.remote = Some(RemoteConfig {
            op_timeout_ms: 50,
            ..RemoteConfig::default()
        });
        let store = Arc::new(FaultyStore {
            stalled: true,
            ..FaultyStore::default()
        });
        let orchestrator = FetchOrchestrator::new(settings)
            .unwrap()
            .with_remote_store(store);
        let calls = Arc::new(AtomicUsize::new(0));

        let outcome = tokio::time::timeout(
            Duration::from_secs(3),
            orchestrator.get_or_fetch(NS, &make_params(), counting_fetch(&calls, 2), None, false),
        )
        .await
        .expect("fetch waited on a stalled remote tier")
        .unwrap();
        assert!(!outcome.from_cache);
        assert_eq!(outcome.table.num_rows(), 2);
        assert!(!orchestrator.l2().is_available());

        tokio::time::timeout(Duration::from_secs(3), orchestrator.invalidate(NS, None))
            .await
            .expect("invalidate waited on a stalled remote tier")
            .unwrap();

        let stats = orchestrator.get_stats().await;
        assert_eq!(stats.tiers.l2.errors, 1);
        assert_eq!(stats.errors, 1);
    }

    #[tokio::test]
    async fn test_invalidate_waits_for_l2_promotion() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FaultyStore {
            set_delay: Duration::from_millis(200),
            ..FaultyStore::default()
        });
        let orchestrator = FetchOrchestrator::new(settings())
            .unwrap()
            .with_remote_store(store.clone());
        let mut config = PersistentTierConfig::new(dir.path());
        config.background_writes = false;
        orchestrator.enable_persistent_tier(config).await.unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::new(NS, &make_params());

        orchestrator
            .get_or_fetch(NS, &make_params(), counting_fetch(&calls, 3), None, false)
            .await
            .unwrap();
        orchestrator.l1().clear();
        assert!(orchestrator.l2().delete(&key).await);

        // Served from L3; the L2 copy is still being written
        let outcome = orchestrator
            .get_or_fetch(NS, &make_params(), counting_fetch(&calls, 3), None, false)
            .await
            .unwrap();
        assert_eq!(outcome.provenance.served_from, CacheTier::L3);

        let report = orchestrator.invalidate(NS, Some(&make_params())).await.unwrap();
        assert_eq!(report, InvalidationReport { l1: 1, l2: 1, l3: 1 });

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(store.inner.is_empty());
        let outcome = orchestrator
            .get_or_fetch(NS, &make_params(), counting_fetch(&calls, 3), None, false)
            .await
            .unwrap();
        assert!(!outcome.from_cache);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_remote_write_counts_as_error() {
        let store = Arc::new(FaultyStore {
            reject_sets: true,
            ..FaultyStore::default()
        });
        let orchestrator = FetchOrchestrator::new(settings())
            .unwrap()
            .with_remote_store(store);
        let calls = Arc::new(AtomicUsize::new(0));

        let outcome = orchestrator
            .get_or_fetch(NS, &make_params(), counting_fetch(&calls, 1), None, false)
            .await
            .unwrap();
        assert!(outcome
            .provenance
            .operations_log
            .iter()
            .any(|line| line.starts_with("L2 store failed")));

        let stats = orchestrator.get_stats().await;
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.tiers.l2.errors, 1);
    }

    #[tokio::test]
    async fn test_invalid_settings_rejected() {
        let mut settings = settings();
        settings.l1_capacity = 0;
        assert_matches!(FetchOrchestrator::new(settings).map(|_| ()), Err(Error::Config(_)));
    }
}
