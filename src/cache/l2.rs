//! L2 Cache - Shared Remote Cache
//!
//! Remote key-value tier shared between processes.
//!
//! # Design
//!
//! - Pluggable [`RemoteStore`] backend (Redis, or in-process for tests)
//! - Payloads are Arrow IPC stream bytes inside a compression-tagged envelope
//! - Any backend failure flips the tier to unavailable; calls become misses
//!   until a `PING` succeeds after the retry cooldown
//! - Every backend call runs under a deadline; a stalled backend counts as down

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::AsyncCommands;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::codec;
use super::compression::{CompressionAlgorithm, Envelope};
use super::key::CacheKey;
use super::Lookup;
use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use crate::table::Table;

/// Remote key-value backend
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch raw bytes for a key
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store raw bytes with a time to live
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    /// Delete a key, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete every key starting with `prefix`
    async fn delete_prefix(&self, prefix: &str) -> Result<u64>;

    /// Liveness check
    async fn ping(&self) -> Result<()>;

    /// Backend name for logs and stats
    fn name(&self) -> &'static str;
}

// =============================================================================
// Redis Backend
// =============================================================================

/// Deadline for one remote call when none is configured
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_millis(500);

/// Redis backend over a multiplexed, auto-reconnecting connection
pub struct RedisStore {
    client: redis::Client,
    conn: OnceCell<ConnectionManager>,
    connect_timeout: Duration,
    response_timeout: Duration,
}

impl RedisStore {
    /// Parse the URL; the connection itself is opened lazily
    pub fn new(url: &str, connect_timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: redis::Client::open(url)?,
            conn: OnceCell::new(),
            connect_timeout,
            response_timeout: DEFAULT_OP_TIMEOUT,
        })
    }

    /// Fail a command whose reply does not arrive within `timeout`
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                let config = ConnectionManagerConfig::new()
                    .set_connection_timeout(self.connect_timeout)
                    .set_response_timeout(self.response_timeout);
                match tokio::time::timeout(
                    self.connect_timeout,
                    ConnectionManager::new_with_config(self.client.clone(), config),
                )
                .await
                {
                    Ok(conn) => Ok(conn?),
                    Err(_) => Err(Error::unavailable(
                        "L2",
                        format!("connect timed out after {:?}", self.connect_timeout),
                    )),
                }
            })
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let mut conn = self.connection().await?;
        // Redis rejects a zero expiry
        let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let removed: u64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let mut conn = self.connection().await?;
        let pattern = format!("{prefix}*");
        let mut cursor = 0u64;
        let mut removed = 0u64;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                let n: u64 = conn.del(keys).await?;
                removed += n;
            }
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(removed)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

// =============================================================================
// In-Memory Backend
// =============================================================================

/// In-process backend with TTLs and a switch to simulate an outage
#[derive(Default)]
pub struct InMemoryRemoteStore {
    entries: DashMap<String, (Vec<u8>, Instant)>,
    offline: AtomicBool,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail until switched back
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.value().1 > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(Error::unavailable("L2", "in-memory store offline"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check()?;
        let expired = match self.entries.get(key) {
            Some(e) if e.value().1 > Instant::now() => return Ok(Some(e.value().0.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.check()?;
        self.entries
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check()?;
        Ok(self.entries.remove(key).is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        self.check()?;
        let before = self.entries.len();
        self.entries.retain(|k, _| !k.starts_with(prefix));
        Ok((before - self.entries.len()) as u64)
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// =============================================================================
// Shared Remote Cache
// =============================================================================

/// What became of an L2 write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored,
    /// Tier disabled or cooling down; nothing was attempted
    Skipped,
    /// Encoding or the backend call failed
    Failed(String),
}

impl StoreOutcome {
    pub fn is_stored(&self) -> bool {
        *self == StoreOutcome::Stored
    }
}

/// L2 Cache - shared remote tier with graceful degradation
pub struct SharedRemoteCache {
    store: Option<Arc<dyn RemoteStore>>,
    envelope: Envelope,
    key_prefix: String,
    cooldown: Duration,
    op_timeout: Duration,
    /// A ping may have to open the connection first
    ping_timeout: Duration,
    available: AtomicBool,
    down_since: Mutex<Option<Instant>>,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    writes: AtomicU64,
}

impl SharedRemoteCache {
    /// Wrap an existing backend
    pub fn new(store: Arc<dyn RemoteStore>, key_prefix: impl Into<String>, cooldown: Duration) -> Self {
        Self::build(Some(store), key_prefix.into(), cooldown)
    }

    /// A tier with no backend; every call is a no-op
    pub fn disabled() -> Self {
        Self::build(None, String::new(), Duration::ZERO)
    }

    fn build(store: Option<Arc<dyn RemoteStore>>, key_prefix: String, cooldown: Duration) -> Self {
        let envelope = Envelope::new(CompressionAlgorithm::Lz4);
        Self {
            available: AtomicBool::new(store.is_some()),
            store,
            envelope,
            key_prefix,
            cooldown,
            op_timeout: DEFAULT_OP_TIMEOUT,
            ping_timeout: DEFAULT_OP_TIMEOUT,
            down_since: Mutex::new(None),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Bound every backend call by `timeout`
    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self.ping_timeout = self.ping_timeout.max(timeout);
        self
    }

    /// Connect to Redis; an unreachable server yields an unavailable tier
    pub async fn connect(config: &RemoteConfig) -> Self {
        let cooldown = Duration::from_secs(config.retry_cooldown_secs);
        let op_timeout = Duration::from_millis(config.op_timeout_ms);
        let store = match RedisStore::new(
            &config.url,
            Duration::from_millis(config.connect_timeout_ms),
        ) {
            Ok(store) => store.with_response_timeout(op_timeout),
            Err(e) => {
                warn!(url = %config.url, error = %e, "Invalid remote cache URL, L2 disabled");
                return Self::disabled();
            }
        };

        let mut cache = Self::new(Arc::new(store), config.key_prefix.clone(), cooldown)
            .with_op_timeout(op_timeout);
        cache.ping_timeout = Duration::from_millis(config.connect_timeout_ms) + op_timeout;
        if let Some(store) = &cache.store {
            match cache.bounded("connect", cache.ping_timeout, store.ping()).await {
                Ok(()) => info!(url = %config.url, "Connected to remote cache"),
                Err(e) => cache.mark_unavailable("connect", &e),
            }
        }
        cache
    }

    /// Whether a backend is configured at all
    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Current availability flag (no ping)
    pub fn is_available(&self) -> bool {
        self.store.is_some() && self.available.load(Ordering::Acquire)
    }

    /// Backend key: `{prefix}{urlencoded namespace}:{hash}`
    pub fn remote_key(&self, key: &CacheKey) -> String {
        format!("{}{}", self.namespace_prefix(key.namespace()), key.hash())
    }

    fn namespace_prefix(&self, namespace: &str) -> String {
        format!("{}{}:", self.key_prefix, urlencoding::encode(namespace))
    }

    fn mark_unavailable(&self, op: &str, err: &Error) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        *self.down_since.lock() = Some(Instant::now());
        if self.available.swap(false, Ordering::AcqRel) {
            warn!(op, error = %err, cooldown = ?self.cooldown, "Remote cache unavailable");
        } else {
            debug!(op, error = %err, "Remote cache still unavailable");
        }
    }

    /// Run one backend call under `deadline`; elapsing is an outage
    async fn bounded<T>(
        &self,
        op: &'static str,
        deadline: Duration,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(deadline, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::unavailable(
                "L2",
                format!("{op} timed out after {deadline:?}"),
            )),
        }
    }

    /// Returns the backend if the tier may be used, pinging again after the cooldown
    async fn usable_store(&self) -> Option<&Arc<dyn RemoteStore>> {
        let store = self.store.as_ref()?;
        if self.available.load(Ordering::Acquire) {
            return Some(store);
        }

        {
            let mut down = self.down_since.lock();
            if matches!(*down, Some(since) if since.elapsed() < self.cooldown) {
                return None;
            }
            // One ping per window
            *down = Some(Instant::now());
        }

        match self.bounded("ping", self.ping_timeout, store.ping()).await {
            Ok(()) => {
                *self.down_since.lock() = None;
                self.available.store(true, Ordering::Release);
                info!(backend = store.name(), "Remote cache available again");
                Some(store)
            }
            Err(e) => {
                debug!(error = %e, "Remote cache ping failed");
                None
            }
        }
    }

    /// Look up a table
    pub async fn get(&self, key: &CacheKey) -> Lookup<Table> {
        let Some(store) = self.usable_store().await else {
            return Lookup::Unavailable;
        };

        let remote_key = self.remote_key(key);
        let raw = match self.bounded("get", self.op_timeout, store.get(&remote_key)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Lookup::Miss;
            }
            Err(e) => {
                self.mark_unavailable("get", &e);
                return Lookup::Failed(e.to_string());
            }
        };

        match self.decode(&raw) {
            Ok(table) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Lookup::Hit(table)
            }
            Err(e) => {
                // Corrupt payload: count it and treat as a miss
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "Discarding undecodable remote payload");
                Lookup::Failed(e.to_string())
            }
        }
    }

    /// Store a table; never raises
    pub async fn set(&self, key: &CacheKey, table: &Table, ttl: Duration) -> StoreOutcome {
        let Some(store) = self.usable_store().await else {
            return StoreOutcome::Skipped;
        };

        let payload = match self.encode(table) {
            Ok(p) => p,
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "Could not encode payload for remote cache");
                return StoreOutcome::Failed(e.to_string());
            }
        };

        let remote_key = self.remote_key(key);
        match self
            .bounded("set", self.op_timeout, store.set(&remote_key, payload, ttl))
            .await
        {
            Ok(()) => {
                self.writes.fetch_add(1, Ordering::Relaxed);
                StoreOutcome::Stored
            }
            Err(e) => {
                self.mark_unavailable("set", &e);
                StoreOutcome::Failed(e.to_string())
            }
        }
    }

    /// Delete one key
    pub async fn delete(&self, key: &CacheKey) -> bool {
        let Some(store) = self.usable_store().await else {
            return false;
        };
        let remote_key = self.remote_key(key);
        match self.bounded("delete", self.op_timeout, store.delete(&remote_key)).await {
            Ok(existed) => existed,
            Err(e) => {
                self.mark_unavailable("delete", &e);
                false
            }
        }
    }

    /// Delete every key of a namespace
    pub async fn delete_namespace(&self, namespace: &str) -> u64 {
        let Some(store) = self.usable_store().await else {
            return 0;
        };
        let prefix = self.namespace_prefix(namespace);
        match self
            .bounded("delete_namespace", self.op_timeout, store.delete_prefix(&prefix))
            .await
        {
            Ok(n) => n,
            Err(e) => {
                self.mark_unavailable("delete_namespace", &e);
                0
            }
        }
    }

    fn encode(&self, table: &Table) -> Result<Vec<u8>> {
        let stream = codec::encode_stream(table)?;
        Ok(self.envelope.seal(&stream).to_vec())
    }

    fn decode(&self, raw: &[u8]) -> Result<Table> {
        let stream = self.envelope.open(raw)?;
        codec::decode_stream(&stream)
    }

    pub fn stats(&self) -> L2Stats {
        L2Stats {
            enabled: self.is_enabled(),
            available: self.is_available(),
            backend: self.store.as_ref().map(|s| s.name()).unwrap_or("none"),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}

/// L2 cache statistics
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct L2Stats {
    pub enabled: bool,
    pub available: bool,
    pub backend: &'static str,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub writes: u64,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::Params;
    use crate::table::{Column, ColumnData};
    use assert_matches::assert_matches;
    use serde_json::json;

    fn make_key(ns: &str, team: &str) -> CacheKey {
        let mut params = Params::new();
        params.insert("team".into(), json!(team));
        CacheKey::new(ns, &params)
    }

    fn make_table(rows: usize) -> Table {
        Table::from_columns(vec![
            Column::new("GAME_ID", ColumnData::Int64((0..rows as i64).map(Some).collect())),
            Column::new(
                "WL",
                ColumnData::Utf8((0..rows).map(|i| Some(if i % 2 == 0 { "W" } else { "L" }.into())).collect()),
            ),
        ])
        .unwrap()
    }

    fn make_cache(cooldown: Duration) -> (Arc<InMemoryRemoteStore>, SharedRemoteCache) {
        let store = Arc::new(InMemoryRemoteStore::new());
        let cache = SharedRemoteCache::new(store.clone(), "test:", cooldown);
        (store, cache)
    }

    #[tokio::test]
    async fn test_in_memory_store_ttl() {
        let store = InMemoryRemoteStore::new();
        store.set("a", vec![1], Duration::from_secs(60)).await.unwrap();
        store.set("b", vec![2], Duration::ZERO).await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), Some(vec![1]));
        assert_eq!(store.get("b").await.unwrap(), None);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_in_memory_store_offline() {
        let store = InMemoryRemoteStore::new();
        store.set_offline(true);
        assert_matches!(store.ping().await, Err(Error::CacheUnavailable { .. }));
        assert!(store.get("a").await.is_err());
    }

    #[tokio::test]
    async fn test_remote_roundtrip_small_and_large() {
        let (_, cache) = make_cache(Duration::from_secs(30));
        for rows in [3, 5_000] {
            let key = make_key("team_game_log", &format!("t{rows}"));
            let table = make_table(rows);
            assert!(cache.set(&key, &table, Duration::from_secs(60)).await.is_stored());
            assert_matches!(cache.get(&key).await, Lookup::Hit(t) if t == table);
        }
        assert_eq!(cache.stats().hits, 2);
    }

    #[tokio::test]
    async fn test_remote_key_layout() {
        let (_, cache) = make_cache(Duration::from_secs(30));
        let key = make_key("team game", "Lakers");
        assert_eq!(cache.remote_key(&key), format!("test:team%20game:{}", key.hash()));
    }

    #[tokio::test]
    async fn test_remote_miss() {
        let (_, cache) = make_cache(Duration::from_secs(30));
        assert_matches!(cache.get(&make_key("ns", "x")).await, Lookup::Miss);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_outage_degrades_to_unavailable() {
        let (store, cache) = make_cache(Duration::from_secs(3600));
        let key = make_key("ns", "x");
        store.set_offline(true);

        assert_matches!(cache.get(&key).await, Lookup::Failed(_));
        assert!(!cache.is_available());
        // Within the cooldown the backend is not touched again
        store.set_offline(false);
        assert_matches!(cache.get(&key).await, Lookup::Unavailable);
        assert_eq!(
            cache.set(&key, &make_table(1), Duration::from_secs(1)).await,
            StoreOutcome::Skipped
        );

        let stats = cache.stats();
        assert_eq!(stats.errors, 1);
        assert!(!stats.available);
    }

    #[tokio::test]
    async fn test_recovers_after_cooldown() {
        let (store, cache) = make_cache(Duration::ZERO);
        let key = make_key("ns", "x");

        store.set_offline(true);
        assert_matches!(
            cache.set(&key, &make_table(1), Duration::from_secs(60)).await,
            StoreOutcome::Failed(_)
        );
        assert!(!cache.is_available());

        store.set_offline(false);
        assert!(cache.set(&key, &make_table(1), Duration::from_secs(60)).await.is_stored());
        assert!(cache.is_available());
        assert!(cache.get(&key).await.is_hit());
    }

    #[tokio::test]
    async fn test_delete_and_delete_namespace() {
        let (store, cache) = make_cache(Duration::from_secs(30));
        for team in ["a", "b", "c"] {
            cache.set(&make_key("drop", team), &make_table(1), Duration::from_secs(60)).await;
        }
        cache.set(&make_key("keep", "a"), &make_table(1), Duration::from_secs(60)).await;

        assert!(cache.delete(&make_key("drop", "a")).await);
        assert!(!cache.delete(&make_key("drop", "a")).await);
        assert_eq!(cache.delete_namespace("drop").await, 2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_a_miss() {
        let (store, cache) = make_cache(Duration::from_secs(30));
        let key = make_key("ns", "x");
        store
            .set(&cache.remote_key(&key), vec![9, 9, 9], Duration::from_secs(60))
            .await
            .unwrap();

        assert_matches!(cache.get(&key).await, Lookup::Failed(_));
        // Decode failures do not take the tier down
        assert!(cache.is_available());
    }

    #[tokio::test]
    async fn test_disabled_tier_is_noop() {
        let cache = SharedRemoteCache::disabled();
        let key = make_key("ns", "x");
        assert_eq!(
            cache.set(&key, &make_table(1), Duration::from_secs(1)).await,
            StoreOutcome::Skipped
        );
        assert_matches!(cache.get(&key).await, Lookup::Unavailable);
        assert_eq!(cache.stats().backend, "none");
    }

    /// Answers `ping` and nothing else
    struct StalledStore;

    #[async_trait]
    impl RemoteStore for StalledStore {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            std::future::pending().await
        }

        async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<()> {
            std::future::pending().await
        }

        async fn delete(&self, _key: &str) -> Result<bool> {
            std::future::pending().await
        }

        async fn delete_prefix(&self, _prefix: &str) -> Result<u64> {
            std::future::pending().await
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "stalled"
        }
    }

    #[tokio::test]
    async fn test_stalled_backend_times_out() {
        let cache = SharedRemoteCache::new(Arc::new(StalledStore), "test:", Duration::ZERO)
            .with_op_timeout(Duration::from_millis(20));
        let key = make_key("ns", "x");

        let bounded = Duration::from_secs(2);
        let lookup = tokio::time::timeout(bounded, cache.get(&key)).await.unwrap();
        assert_matches!(lookup, Lookup::Failed(reason) if reason.contains("timed out"));
        assert!(!cache.is_available());

        // Zero cooldown: each call pings again, succeeds, then times out again
        let table = make_table(1);
        let write = cache.set(&key, &table, Duration::from_secs(1));
        let outcome = tokio::time::timeout(bounded, write).await.unwrap();
        assert_matches!(outcome, StoreOutcome::Failed(_));
        assert!(!tokio::time::timeout(bounded, cache.delete(&key)).await.unwrap());
        assert_eq!(tokio::time::timeout(bounded, cache.delete_namespace("ns")).await.unwrap(), 0);
        assert_eq!(cache.stats().errors, 4);
    }

    #[test]
    fn test_redis_store_rejects_bad_url() {
        assert!(RedisStore::new("not a url", Duration::from_millis(10)).is_err());
    }

    #[tokio::test]
    async fn test_connect_unreachable_marks_unavailable() {
        let config = RemoteConfig {
            url: "redis://127.0.0.1:1/".into(),
            connect_timeout_ms: 200,
            ..RemoteConfig::default()
        };
        let cache = SharedRemoteCache::connect(&config).await;
        assert!(cache.is_enabled());
        assert!(!cache.is_available());
        assert_matches!(cache.get(&make_key("ns", "x")).await, Lookup::Unavailable);
    }
}
