//! Durable Tier Manifests
//!
//! On-disk index of the L3 tier. Layout:
//!
//! ```text
//! root/config.json
//! root/<namespace>/manifest.json
//! root/<namespace>/<hash>.arrow
//! ```
//!
//! Both JSON documents are written to a temporary sibling and renamed into
//! place, so readers never observe a partial file.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::key::Params;
use crate::error::Result;

/// Manifest file name inside a namespace directory
pub const MANIFEST_FILE: &str = "manifest.json";

/// Root config file name
pub const ROOT_CONFIG_FILE: &str = "config.json";

/// Payload file extension
pub const PAYLOAD_EXT: &str = "arrow";

/// Current on-disk layout version
pub const LAYOUT_VERSION: u32 = 1;

/// Metadata for one persisted payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub params: Params,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub size_bytes: u64,
    pub row_count: u64,
    #[serde(default)]
    pub access_count: u64,
    pub compression: String,
}

/// Per-namespace index: content hash -> entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub endpoint: String,
    #[serde(default)]
    pub files: BTreeMap<String, ManifestEntry>,
    #[serde(default)]
    pub total_files: u64,
    #[serde(default)]
    pub total_size_bytes: u64,
}

impl Manifest {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Insert or replace an entry
    pub fn insert(&mut self, hash: impl Into<String>, entry: ManifestEntry) -> Option<ManifestEntry> {
        let old = self.files.insert(hash.into(), entry);
        self.recompute_totals();
        old
    }

    pub fn remove(&mut self, hash: &str) -> Option<ManifestEntry> {
        let old = self.files.remove(hash);
        if old.is_some() {
            self.recompute_totals();
        }
        old
    }

    pub fn get(&self, hash: &str) -> Option<&ManifestEntry> {
        self.files.get(hash)
    }

    /// Record a read
    pub fn touch(&mut self, hash: &str, at: DateTime<Utc>) -> bool {
        match self.files.get_mut(hash) {
            Some(entry) => {
                entry.last_accessed = at;
                entry.access_count += 1;
                true
            }
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Totals are derived; never trust the stored values
    pub fn recompute_totals(&mut self) {
        self.total_files = self.files.len() as u64;
        self.total_size_bytes = self.files.values().map(|e| e.size_bytes).sum();
    }

    /// Read a manifest; `None` if the file does not exist
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        let Some(mut manifest) = read_json::<Self>(path).await? else {
            return Ok(None);
        };
        manifest.recompute_totals();
        Ok(Some(manifest))
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self).await
    }
}

/// Root `config.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootConfig {
    pub version: u32,
    pub compression: String,
    pub max_size_mb: u64,
    pub created_at: DateTime<Utc>,
}

impl RootConfig {
    pub fn new(compression: impl Into<String>, max_size_mb: u64) -> Self {
        Self {
            version: LAYOUT_VERSION,
            compression: compression.into(),
            max_size_mb,
            created_at: Utc::now(),
        }
    }

    pub async fn load(path: &Path) -> Result<Option<Self>> {
        read_json(path).await
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self).await
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write to `<path>.<uuid>.tmp` then rename over `path`
pub(crate) async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    let tmp = temp_sibling(path);
    tokio::fs::write(&tmp, &json).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Unique temporary path next to `path`
pub(crate) fn temp_sibling(path: &Path) -> std::path::PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{name}.{}.tmp", uuid::Uuid::new_v4().simple()))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_entry(size: u64) -> ManifestEntry {
        let now = Utc::now();
        ManifestEntry {
            params: Params::from([("team".to_string(), json!("Lakers"))]),
            created_at: now,
            last_accessed: now,
            size_bytes: size,
            row_count: 10,
            access_count: 0,
            compression: "lz4".into(),
        }
    }

    #[test]
    fn test_totals_follow_entries() {
        let mut manifest = Manifest::new("team_game_log");
        manifest.insert("a", make_entry(100));
        manifest.insert("b", make_entry(50));
        assert_eq!((manifest.total_files, manifest.total_size_bytes), (2, 150));

        manifest.insert("a", make_entry(10));
        assert_eq!(manifest.total_size_bytes, 60);

        assert!(manifest.remove("b").is_some());
        assert!(manifest.remove("b").is_none());
        assert_eq!((manifest.total_files, manifest.total_size_bytes), (1, 10));
    }

    #[test]
    fn test_touch() {
        let mut manifest = Manifest::new("ns");
        manifest.insert("a", make_entry(1));
        let later = Utc::now() + chrono::Duration::seconds(5);
        assert!(manifest.touch("a", later));
        assert!(!manifest.touch("missing", later));

        let entry = manifest.get("a").unwrap();
        assert_eq!(entry.last_accessed, later);
        assert_eq!(entry.access_count, 1);
    }

    #[test]
    fn test_wire_layout() {
        let mut manifest = Manifest::new("team_game_log");
        manifest.insert("0123456789abcdef", make_entry(42));
        let value = serde_json::to_value(&manifest).unwrap();

        assert_eq!(value["endpoint"], "team_game_log");
        assert_eq!(value["total_files"], 1);
        assert_eq!(value["total_size_bytes"], 42);
        let file = &value["files"]["0123456789abcdef"];
        for field in [
            "params",
            "created_at",
            "last_accessed",
            "size_bytes",
            "row_count",
            "access_count",
            "compression",
        ] {
            assert!(file.get(field).is_some(), "{field}");
        }
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        assert!(Manifest::load(&path).await.unwrap().is_none());

        let mut manifest = Manifest::new("ns");
        manifest.insert("a", make_entry(7));
        manifest.save(&path).await.unwrap();

        let loaded = Manifest::load(&path).await.unwrap().unwrap();
        assert_eq!(loaded, manifest);

        // No temp files left behind
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().extension().is_some_and(|x| x == "tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_load_recomputes_stale_totals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        let mut manifest = Manifest::new("ns");
        manifest.insert("a", make_entry(7));
        manifest.total_size_bytes = 999;
        manifest.save(&path).await.unwrap();

        assert_eq!(Manifest::load(&path).await.unwrap().unwrap().total_size_bytes, 7);
    }

    #[tokio::test]
    async fn test_root_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(ROOT_CONFIG_FILE);
        let config = RootConfig::new("zstd", 64);
        config.save(&path).await.unwrap();
        let loaded = RootConfig::load(&path).await.unwrap().unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.version, LAYOUT_VERSION);
    }
}
