//! L3 Cache - Durable Columnar Cache
//!
//! Persistent tier: one Arrow IPC file per cached query plus a JSON manifest
//! per namespace.
//!
//! # Design
//!
//! - Payloads are written to `<hash>.<uuid>.tmp` and renamed into place
//! - Manifest read-modify-write runs under a per-namespace async mutex;
//!   different namespaces never contend
//! - Size-capped: once total usage exceeds the cap, least recently accessed
//!   payloads are removed until usage drops to `target_ratio * cap`
//! - Reads never raise; failures come back as [`Lookup::Failed`]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::codec;
use super::compression::CompressionAlgorithm;
use super::key::{content_hash, Params};
use super::manifest::{
    Manifest, ManifestEntry, RootConfig, LAYOUT_VERSION, MANIFEST_FILE, PAYLOAD_EXT,
    ROOT_CONFIG_FILE,
};
use super::Lookup;
use crate::config::{validate_namespace_name, PersistentTierConfig};
use crate::error::{Error, Result};
use crate::table::Table;

/// L3 Cache - durable columnar tier
pub struct DurableColumnarCache {
    root: PathBuf,
    compression: CompressionAlgorithm,
    max_size_bytes: u64,
    target_ratio: f64,
    /// Per-namespace manifest locks
    locks: DashMap<String, Arc<Mutex<()>>>,
    /// Serialises eviction passes
    eviction_lock: Mutex<()>,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    writes: AtomicU64,
    evictions: AtomicU64,
}

impl DurableColumnarCache {
    /// Open (or create) a cache directory
    pub async fn open(config: &PersistentTierConfig) -> Result<Self> {
        config.validate()?;
        let compression = config.compression_algorithm()?;
        let root = config.cache_dir.clone();
        tokio::fs::create_dir_all(&root).await?;

        let root_path = root.join(ROOT_CONFIG_FILE);
        let root_config = match RootConfig::load(&root_path).await {
            Ok(Some(existing)) if existing.version > LAYOUT_VERSION => {
                return Err(Error::Config(format!(
                    "cache dir {} uses layout v{}, newer than supported v{}",
                    root.display(),
                    existing.version,
                    LAYOUT_VERSION
                )));
            }
            Ok(Some(existing)) => RootConfig {
                compression: compression.name().to_string(),
                max_size_mb: config.max_size_mb,
                ..existing
            },
            Ok(None) => RootConfig::new(compression.name(), config.max_size_mb),
            Err(e) => {
                warn!(path = %root_path.display(), error = %e, "Rewriting unreadable root config");
                RootConfig::new(compression.name(), config.max_size_mb)
            }
        };
        root_config.save(&root_path).await?;

        let cache = Self {
            root,
            compression,
            max_size_bytes: config.max_size_bytes(),
            target_ratio: config.eviction_target_ratio,
            locks: DashMap::new(),
            eviction_lock: Mutex::new(()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        };

        let swept = cache.sweep_temp_files().await?;
        info!(
            root = %cache.root.display(),
            compression = %compression,
            max_size_bytes = cache.max_size_bytes,
            swept,
            "Opened durable cache"
        );
        Ok(cache)
    }

    /// Override the cap with byte granularity
    pub fn with_max_size_bytes(mut self, max_size_bytes: u64) -> Self {
        self.max_size_bytes = max_size_bytes;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn compression(&self) -> CompressionAlgorithm {
        self.compression
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.root.join(namespace)
    }

    fn manifest_path(&self, namespace: &str) -> PathBuf {
        self.namespace_dir(namespace).join(MANIFEST_FILE)
    }

    /// Path of the payload file for a content hash
    pub fn payload_path(&self, namespace: &str, hash: &str) -> PathBuf {
        self.namespace_dir(namespace)
            .join(format!("{hash}.{PAYLOAD_EXT}"))
    }

    fn namespace_lock(&self, namespace: &str) -> Arc<Mutex<()>> {
        self.locks.entry(namespace.to_string()).or_default().clone()
    }

    // =========================================================================
    // Read Path
    // =========================================================================

    /// Look up a table; never raises
    #[instrument(skip_all, fields(namespace = %namespace))]
    pub async fn get(&self, namespace: &str, params: &Params) -> Lookup<Table> {
        if let Err(e) = validate_namespace_name(namespace) {
            self.errors.fetch_add(1, Ordering::Relaxed);
            return Lookup::Failed(e.to_string());
        }
        let hash = content_hash(namespace, params);

        match self.read(namespace, &hash).await {
            Ok(Some(table)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(hash = %hash, rows = table.num_rows(), "L3 hit");
                Lookup::Hit(table)
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Lookup::Miss
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!(hash = %hash, error = %e, "L3 read failed, treating as miss");
                Lookup::Failed(e.to_string())
            }
        }
    }

    async fn read(&self, namespace: &str, hash: &str) -> Result<Option<Table>> {
        // Manifests are replaced by rename, so an unlocked read is consistent
        let Some(manifest) = Manifest::load(&self.manifest_path(namespace)).await? else {
            return Ok(None);
        };
        if manifest.get(hash).is_none() {
            return Ok(None);
        }

        let path = self.payload_path(namespace, hash);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Payload missing, dropping manifest entry");
                self.remove_entry(namespace, hash).await?;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let table = match decode_blocking(bytes).await {
            Ok(table) => table,
            Err(e) => {
                if let Err(cleanup) = self.remove_entry(namespace, hash).await {
                    debug!(error = %cleanup, "Could not drop corrupt payload");
                }
                return Err(e);
            }
        };

        if let Err(e) = self.touch(namespace, hash).await {
            warn!(hash = %hash, error = %e, "Could not record L3 access");
        }
        Ok(Some(table))
    }

    async fn touch(&self, namespace: &str, hash: &str) -> Result<()> {
        let lock = self.namespace_lock(namespace);
        let _guard = lock.lock().await;
        let path = self.manifest_path(namespace);
        if let Some(mut manifest) = Manifest::load(&path).await? {
            if manifest.touch(hash, Utc::now()) {
                manifest.save(&path).await?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Persist a table, then evict if the cap is exceeded
    #[instrument(skip_all, fields(namespace = %namespace, rows = table.num_rows()))]
    pub async fn set(&self, namespace: &str, params: &Params, table: Arc<Table>) -> Result<u64> {
        let result = self.write(namespace, params, table).await;
        match &result {
            Ok(size) => {
                self.writes.fetch_add(1, Ordering::Relaxed);
                debug!(size, "L3 write committed");
            }
            Err(_) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
        let size = result?;

        if self.total_size().await? > self.max_size_bytes {
            self.evict().await?;
        }
        Ok(size)
    }

    async fn write(&self, namespace: &str, params: &Params, table: Arc<Table>) -> Result<u64> {
        validate_namespace_name(namespace)?;
        let hash = content_hash(namespace, params);
        let dir = self.namespace_dir(namespace);
        tokio::fs::create_dir_all(&dir).await?;

        let row_count = table.num_rows() as u64;
        let compression = self.compression;
        let bytes = tokio::task::spawn_blocking(move || codec::encode_file(&table, compression))
            .await
            .map_err(|e| Error::Internal(format!("encode task failed: {e}")))??;
        let size = bytes.len() as u64;

        let tmp = dir.join(format!("{hash}.{}.tmp", uuid::Uuid::new_v4().simple()));
        if let Err(e) = tokio::fs::write(&tmp, &bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        let lock = self.namespace_lock(namespace);
        let _guard = lock.lock().await;

        if let Err(e) = tokio::fs::rename(&tmp, self.payload_path(namespace, &hash)).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        let manifest_path = self.manifest_path(namespace);
        let mut manifest = match Manifest::load(&manifest_path).await {
            Ok(Some(m)) => m,
            Ok(None) => Manifest::new(namespace),
            Err(e) => {
                warn!(error = %e, "Rebuilding unreadable manifest");
                Manifest::new(namespace)
            }
        };
        let now = Utc::now();
        manifest.insert(
            hash,
            ManifestEntry {
                params: params.clone(),
                created_at: now,
                last_accessed: now,
                size_bytes: size,
                row_count,
                access_count: 0,
                compression: compression.name().to_string(),
            },
        );
        manifest.save(&manifest_path).await?;
        Ok(size)
    }

    // =========================================================================
    // Eviction
    // =========================================================================

    /// Evict down to the target ratio of the configured cap
    pub async fn evict(&self) -> Result<EvictionReport> {
        self.evict_with_cap(self.max_size_bytes).await
    }

    /// Evict down to `target_ratio * cap` if usage exceeds `cap`
    #[instrument(skip(self))]
    pub async fn evict_with_cap(&self, cap: u64) -> Result<EvictionReport> {
        let _guard = self.eviction_lock.lock().await;

        let mut candidates = Vec::new();
        let mut total = 0u64;
        for namespace in self.namespaces().await? {
            let Some(manifest) = Manifest::load(&self.manifest_path(&namespace)).await? else {
                continue;
            };
            for (hash, entry) in manifest.files {
                total += entry.size_bytes;
                candidates.push(Candidate {
                    namespace: namespace.clone(),
                    hash,
                    last_accessed: entry.last_accessed,
                    created_at: entry.created_at,
                    size_bytes: entry.size_bytes,
                });
            }
        }

        let target = (cap as f64 * self.target_ratio).floor() as u64;
        let mut report = EvictionReport {
            cap_bytes: cap,
            target_bytes: target,
            bytes_before: total,
            bytes_after: total,
            ..EvictionReport::default()
        };
        if total <= cap {
            return Ok(report);
        }

        candidates.sort_by(|a, b| {
            a.last_accessed
                .cmp(&b.last_accessed)
                .then(a.created_at.cmp(&b.created_at))
                .then_with(|| (&a.namespace, &a.hash).cmp(&(&b.namespace, &b.hash)))
        });

        let mut remaining = total;
        let mut doomed: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for candidate in candidates {
            if remaining <= target {
                break;
            }
            remaining = remaining.saturating_sub(candidate.size_bytes);
            doomed.entry(candidate.namespace).or_default().push(candidate.hash);
        }

        for (namespace, hashes) in doomed {
            let lock = self.namespace_lock(&namespace);
            let _ns_guard = lock.lock().await;
            let path = self.manifest_path(&namespace);
            let Some(mut manifest) = Manifest::load(&path).await? else {
                continue;
            };
            for hash in hashes {
                if let Some(entry) = manifest.remove(&hash) {
                    remove_if_exists(&self.payload_path(&namespace, &hash)).await?;
                    report.freed_bytes += entry.size_bytes;
                    report.removed.push(EvictedFile {
                        namespace: namespace.clone(),
                        hash,
                        size_bytes: entry.size_bytes,
                    });
                }
            }
            manifest.save(&path).await?;
        }

        report.bytes_after = total.saturating_sub(report.freed_bytes);
        self.evictions
            .fetch_add(report.removed.len() as u64, Ordering::Relaxed);
        info!(
            removed = report.removed.len(),
            freed_bytes = report.freed_bytes,
            bytes_after = report.bytes_after,
            target_bytes = target,
            "Evicted least recently accessed payloads"
        );
        Ok(report)
    }

    // =========================================================================
    // Invalidation & Admin
    // =========================================================================

    /// Remove one entry (`Some(params)`) or a whole namespace (`None`)
    #[instrument(skip_all, fields(namespace = %namespace))]
    pub async fn invalidate(&self, namespace: &str, params: Option<&Params>) -> Result<u64> {
        validate_namespace_name(namespace)?;
        match params {
            Some(params) => {
                let hash = content_hash(namespace, params);
                Ok(self.remove_entry(namespace, &hash).await? as u64)
            }
            None => {
                let lock = self.namespace_lock(namespace);
                let _guard = lock.lock().await;
                let files = Manifest::load(&self.manifest_path(namespace))
                    .await
                    .ok()
                    .flatten()
                    .map(|m| m.total_files)
                    .unwrap_or(0);
                match tokio::fs::remove_dir_all(self.namespace_dir(namespace)).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                Ok(files)
            }
        }
    }

    async fn remove_entry(&self, namespace: &str, hash: &str) -> Result<bool> {
        let lock = self.namespace_lock(namespace);
        let _guard = lock.lock().await;
        let path = self.manifest_path(namespace);
        let removed = match Manifest::load(&path).await? {
            Some(mut manifest) => {
                let removed = manifest.remove(hash).is_some();
                if removed {
                    manifest.save(&path).await?;
                }
                removed
            }
            None => false,
        };
        remove_if_exists(&self.payload_path(namespace, hash)).await?;
        Ok(removed)
    }

    /// Namespaces with a directory under the root
    pub async fn namespaces(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_namespace_name(name).is_ok() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Entries of one namespace, most recently accessed first
    pub async fn list(&self, namespace: &str) -> Result<Vec<(String, ManifestEntry)>> {
        validate_namespace_name(namespace)?;
        let mut entries: Vec<_> = Manifest::load(&self.manifest_path(namespace))
            .await?
            .map(|m| m.files.into_iter().collect())
            .unwrap_or_default();
        entries.sort_by(|a: &(String, ManifestEntry), b| b.1.last_accessed.cmp(&a.1.last_accessed));
        Ok(entries)
    }

    /// Total bytes across all manifests
    pub async fn total_size(&self) -> Result<u64> {
        let mut total = 0;
        for namespace in self.namespaces().await? {
            if let Some(m) = Manifest::load(&self.manifest_path(&namespace)).await? {
                total += m.total_size_bytes;
            }
        }
        Ok(total)
    }

    /// Remove every namespace; returns the number of files dropped
    pub async fn clear(&self) -> Result<u64> {
        let mut removed = 0;
        for namespace in self.namespaces().await? {
            removed += self.invalidate(&namespace, None).await?;
        }
        info!(removed, "Cleared durable cache");
        Ok(removed)
    }

    /// Remove temp files left by interrupted writes
    async fn sweep_temp_files(&self) -> Result<usize> {
        let mut swept = 0;
        let mut dirs = vec![self.root.clone()];
        for namespace in self.namespaces().await? {
            dirs.push(self.namespace_dir(&namespace));
        }
        for dir in dirs {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "tmp") {
                    remove_if_exists(&path).await?;
                    swept += 1;
                }
            }
        }
        Ok(swept)
    }

    pub async fn stats(&self) -> Result<L3Stats> {
        let mut namespaces = BTreeMap::new();
        for namespace in self.namespaces().await? {
            let usage = Manifest::load(&self.manifest_path(&namespace))
                .await?
                .map(|m| NamespaceUsage {
                    files: m.total_files,
                    bytes: m.total_size_bytes,
                })
                .unwrap_or_default();
            namespaces.insert(namespace, usage);
        }
        Ok(L3Stats {
            root: self.root.clone(),
            compression: self.compression.name(),
            max_size_bytes: self.max_size_bytes,
            total_files: namespaces.values().map(|u| u.files).sum(),
            total_bytes: namespaces.values().map(|u| u.bytes).sum(),
            namespaces,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        })
    }
}

async fn decode_blocking(bytes: Vec<u8>) -> Result<Table> {
    tokio::task::spawn_blocking(move || codec::decode_file(bytes))
        .await
        .map_err(|e| Error::Internal(format!("decode task failed: {e}")))?
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

struct Candidate {
    namespace: String,
    hash: String,
    last_accessed: DateTime<Utc>,
    created_at: DateTime<Utc>,
    size_bytes: u64,
}

/// One payload removed by eviction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvictedFile {
    pub namespace: String,
    pub hash: String,
    pub size_bytes: u64,
}

/// Outcome of an eviction pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvictionReport {
    pub cap_bytes: u64,
    pub target_bytes: u64,
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub freed_bytes: u64,
    /// Removal order, least recently accessed first
    pub removed: Vec<EvictedFile>,
}

/// Usage of one namespace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NamespaceUsage {
    pub files: u64,
    pub bytes: u64,
}

/// L3 cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct L3Stats {
    pub root: PathBuf,
    pub compression: &'static str,
    pub max_size_bytes: u64,
    pub total_files: u64,
    pub total_bytes: u64,
    pub namespaces: BTreeMap<String, NamespaceUsage>,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub writes: u64,
    pub evictions: u64,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Column, ColumnData};
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::time::Duration;

    fn make_params(id: i64) -> Params {
        Params::from([("id".to_string(), json!(id))])
    }

    /// Fixed-shape table so every uncompressed payload has the same size
    fn make_table(seed: i64) -> Arc<Table> {
        Arc::new(
            Table::from_columns(vec![
                Column::new("n", ColumnData::Int64((0..64).map(|i| Some(i + seed)).collect())),
                Column::new("w", ColumnData::Float64((0..64).map(|i| Some(i as f64)).collect())),
            ])
            .unwrap(),
        )
    }

    async fn open(dir: &Path, compression: &str) -> DurableColumnarCache {
        let mut config = PersistentTierConfig::new(dir);
        config.compression = compression.into();
        DurableColumnarCache::open(&config).await.unwrap()
    }

    async fn pause() {
        tokio::time::sleep(Duration::from_millis(3)).await;
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        for compression in ["none", "lz4", "zstd"] {
            let cache = open(&dir.path().join(compression), compression).await;
            cache.set("games", &make_params(1), make_table(1)).await.unwrap();
            assert_matches!(
                cache.get("games", &make_params(1)).await,
                Lookup::Hit(t) if t == *make_table(1)
            );
        }
    }

    #[tokio::test]
    async fn test_miss_and_counters() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), "lz4").await;
        assert_matches!(cache.get("games", &make_params(1)).await, Lookup::Miss);
        cache.set("games", &make_params(1), make_table(1)).await.unwrap();
        assert_matches!(cache.get("games", &make_params(2)).await, Lookup::Miss);
        assert!(cache.get("games", &make_params(1)).await.is_hit());

        let stats = cache.stats().await.unwrap();
        assert_eq!((stats.hits, stats.misses, stats.writes), (1, 2, 1));
    }

    #[tokio::test]
    async fn test_on_disk_layout() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), "zstd").await;
        let params = make_params(7);
        cache.set("games", &params, make_table(7)).await.unwrap();

        let hash = content_hash("games", &params);
        assert!(dir.path().join("config.json").is_file());
        assert!(dir.path().join("games/manifest.json").is_file());
        assert!(dir.path().join(format!("games/{hash}.arrow")).is_file());

        let root: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("config.json")).unwrap()).unwrap();
        assert_eq!(root["compression"], "zstd");
        assert_eq!(root["version"], 1);

        let listed = cache.list("games").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, hash);
        assert_eq!(listed[0].1.params, params);
        assert_eq!(listed[0].1.row_count, 64);
        assert_eq!(listed[0].1.compression, "zstd");
    }

    #[tokio::test]
    async fn test_read_updates_access_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), "lz4").await;
        cache.set("games", &make_params(1), make_table(1)).await.unwrap();
        let before = cache.list("games").await.unwrap()[0].1.clone();

        pause().await;
        cache.get("games", &make_params(1)).await;
        let after = cache.list("games").await.unwrap()[0].1.clone();
        assert_eq!(after.access_count, 1);
        assert!(after.last_accessed > before.last_accessed);
    }

    #[tokio::test]
    async fn test_missing_payload_self_heals() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), "lz4").await;
        let params = make_params(1);
        cache.set("games", &params, make_table(1)).await.unwrap();
        std::fs::remove_file(cache.payload_path("games", &content_hash("games", &params))).unwrap();

        assert_matches!(cache.get("games", &params).await, Lookup::Miss);
        assert!(cache.list("games").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_failed_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), "lz4").await;
        let params = make_params(1);
        cache.set("games", &params, make_table(1)).await.unwrap();
        std::fs::write(cache.payload_path("games", &content_hash("games", &params)), b"junk").unwrap();

        assert_matches!(cache.get("games", &params).await, Lookup::Failed(_));
        assert_eq!(cache.stats().await.unwrap().errors, 1);
        // Dropped, so the next read is a clean miss
        assert_matches!(cache.get("games", &params).await, Lookup::Miss);
    }

    #[tokio::test]
    async fn test_invalid_namespace_never_raises() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), "lz4").await;
        assert_matches!(cache.get("../escape", &make_params(1)).await, Lookup::Failed(_));
        assert!(cache.set("../escape", &make_params(1), make_table(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_invalidate_entry_and_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), "lz4").await;
        for id in 0..3 {
            cache.set("games", &make_params(id), make_table(id)).await.unwrap();
        }
        cache.set("teams", &make_params(0), make_table(0)).await.unwrap();

        assert_eq!(cache.invalidate("games", Some(&make_params(0))).await.unwrap(), 1);
        assert_eq!(cache.invalidate("games", Some(&make_params(0))).await.unwrap(), 0);
        assert_matches!(cache.get("games", &make_params(0)).await, Lookup::Miss);

        assert_eq!(cache.invalidate("games", None).await.unwrap(), 2);
        assert!(!dir.path().join("games").exists());
        assert_eq!(cache.namespaces().await.unwrap(), vec!["teams"]);
    }

    #[tokio::test]
    async fn test_concurrent_writes_keep_every_manifest_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(open(dir.path(), "lz4").await);

        let writes = (0..16).map(|id| {
            let cache = Arc::clone(&cache);
            async move { cache.set("games", &make_params(id), make_table(id)).await }
        });
        for result in futures::future::join_all(writes).await {
            result.unwrap();
        }

        assert_eq!(cache.list("games").await.unwrap().len(), 16);
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.namespaces["games"].files, 16);
    }

    #[tokio::test]
    async fn test_evicts_least_recently_accessed_first() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), "none").await.with_max_size_bytes(u64::MAX);
        for id in 0..4 {
            cache.set("games", &make_params(id), make_table(id)).await.unwrap();
            pause().await;
        }
        // Entry 0 becomes the most recently accessed
        assert!(cache.get("games", &make_params(0)).await.is_hit());

        let total = cache.total_size().await.unwrap();
        let report = cache.evict_with_cap(total - 1).await.unwrap();

        let expected = content_hash("games", &make_params(1));
        assert_eq!(report.removed.len(), 1);
        assert_eq!(report.removed[0].hash, expected);
        assert!(report.bytes_after <= report.target_bytes);
        assert_eq!(cache.total_size().await.unwrap(), report.bytes_after);
        assert!(cache.get("games", &make_params(0)).await.is_hit());
    }

    #[tokio::test]
    async fn test_set_triggers_eviction_to_target() {
        let dir = tempfile::tempdir().unwrap();
        let sizing = open(&dir.path().join("sizing"), "none").await;
        let size = sizing.set("games", &make_params(0), make_table(0)).await.unwrap();

        // Room for 2.5 payloads; target 90% of that holds two
        let cache = open(&dir.path().join("real"), "none")
            .await
            .with_max_size_bytes(size * 5 / 2);
        for id in 0..3 {
            cache.set("games", &make_params(id), make_table(id)).await.unwrap();
            pause().await;
        }

        let total = cache.total_size().await.unwrap();
        assert_eq!(total, size * 2);
        assert!(total <= cache.max_size_bytes());
        assert_matches!(cache.get("games", &make_params(0)).await, Lookup::Miss);
        assert!(cache.get("games", &make_params(2)).await.is_hit());
        assert_eq!(cache.stats().await.unwrap().evictions, 1);
    }

    #[tokio::test]
    async fn test_eviction_spans_namespaces() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), "none").await.with_max_size_bytes(u64::MAX);
        cache.set("a", &make_params(0), make_table(0)).await.unwrap();
        pause().await;
        cache.set("b", &make_params(0), make_table(0)).await.unwrap();

        let total = cache.total_size().await.unwrap();
        let report = cache.evict_with_cap(total - 1).await.unwrap();
        assert_eq!(report.removed[0].namespace, "a");
    }

    #[tokio::test]
    async fn test_no_eviction_under_cap() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), "lz4").await;
        cache.set("games", &make_params(0), make_table(0)).await.unwrap();
        let report = cache.evict().await.unwrap();
        assert!(report.removed.is_empty());
    }

    #[tokio::test]
    async fn test_reopen_sweeps_temp_files_and_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = open(dir.path(), "lz4").await;
            cache.set("games", &make_params(1), make_table(1)).await.unwrap();
        }
        std::fs::write(dir.path().join("games/deadbeef.1234.tmp"), b"partial").unwrap();

        let cache = open(dir.path(), "lz4").await;
        assert!(!dir.path().join("games/deadbeef.1234.tmp").exists());
        assert!(cache.get("games", &make_params(1)).await.is_hit());
    }

    #[tokio::test]
    async fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), "lz4").await;
        cache.set("a", &make_params(0), make_table(0)).await.unwrap();
        cache.set("b", &make_params(0), make_table(0)).await.unwrap();
        assert_eq!(cache.clear().await.unwrap(), 2);
        assert_eq!(cache.stats().await.unwrap().total_files, 0);
        assert!(dir.path().join("config.json").is_file());
    }
}
