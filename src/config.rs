//! Cache Configuration
//!
//! Typed settings for the orchestrator, the remote and durable tiers, and the
//! per-namespace freshness and pushdown tables. Loaded from YAML or JSON and
//! validated once; the resulting [`NamespaceRegistry`] is read-only.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{
    CompressionAlgorithm, DEFAULT_EVICTION_TARGET_RATIO, DEFAULT_L1_CAPACITY, DEFAULT_TTL_SECS,
    DEFAULT_WRITE_QUEUE_CAPACITY,
};
use crate::error::{Error, Result};
use crate::pushdown::ColumnMapping;

// =============================================================================
// Freshness
// =============================================================================

/// How quickly a namespace's data goes stale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FreshnessClass {
    /// Changes during the day (scoreboards, in-progress games)
    Live,
    /// Refreshed about once a day
    Daily,
    /// Finished periods that rarely change
    Historical,
    /// Reference data
    Static,
}

impl FreshnessClass {
    /// TTL for L1/L2 entries of this class
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(match self {
            FreshnessClass::Live => 60,
            FreshnessClass::Daily => 3_600,
            FreshnessClass::Historical => 86_400,
            FreshnessClass::Static => 604_800,
        })
    }
}

impl std::fmt::Display for FreshnessClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FreshnessClass::Live => "live",
            FreshnessClass::Daily => "daily",
            FreshnessClass::Historical => "historical",
            FreshnessClass::Static => "static",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Tier Settings
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_l1_capacity() -> usize {
    DEFAULT_L1_CAPACITY
}

fn default_ttl_secs() -> u64 {
    DEFAULT_TTL_SECS
}

fn default_key_prefix() -> String {
    "tiercache:".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    2_000
}

fn default_retry_cooldown_secs() -> u64 {
    30
}

fn default_op_timeout_ms() -> u64 {
    500
}

fn default_compression() -> String {
    CompressionAlgorithm::default().name().to_string()
}

fn default_max_size_mb() -> u64 {
    1_024
}

fn default_target_ratio() -> f64 {
    DEFAULT_EVICTION_TARGET_RATIO
}

fn default_queue_capacity() -> usize {
    DEFAULT_WRITE_QUEUE_CAPACITY
}

/// Remote (L2) tier connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Redis URL, e.g. `redis://127.0.0.1:6379/0`
    pub url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Deadline for each get, set or delete; an elapsed call counts as an outage
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,
    /// Seconds to wait after a failure before trying again
    #[serde(default = "default_retry_cooldown_secs")]
    pub retry_cooldown_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/".to_string(),
            key_prefix: default_key_prefix(),
            connect_timeout_ms: default_connect_timeout_ms(),
            op_timeout_ms: default_op_timeout_ms(),
            retry_cooldown_secs: default_retry_cooldown_secs(),
        }
    }
}

/// Durable (L3) tier settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentTierConfig {
    pub cache_dir: PathBuf,
    /// `none`, `lz4` or `zstd`
    #[serde(default = "default_compression")]
    pub compression: String,
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u64,
    #[serde(default = "default_true")]
    pub background_writes: bool,
    /// Eviction shrinks usage to this fraction of the cap
    #[serde(default = "default_target_ratio")]
    pub eviction_target_ratio: f64,
    #[serde(default = "default_queue_capacity")]
    pub write_queue_capacity: usize,
}

impl PersistentTierConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            compression: default_compression(),
            max_size_mb: default_max_size_mb(),
            background_writes: true,
            eviction_target_ratio: default_target_ratio(),
            write_queue_capacity: default_queue_capacity(),
        }
    }

    pub fn compression_algorithm(&self) -> Result<CompressionAlgorithm> {
        self.compression.parse()
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn validate(&self) -> Result<()> {
        self.compression_algorithm()?;
        if self.cache_dir.as_os_str().is_empty() {
            return Err(Error::Config("cache_dir must not be empty".into()));
        }
        if !(self.eviction_target_ratio > 0.0 && self.eviction_target_ratio <= 1.0) {
            return Err(Error::Config(format!(
                "eviction_target_ratio must be in (0, 1], got {}",
                self.eviction_target_ratio
            )));
        }
        if self.write_queue_capacity == 0 {
            return Err(Error::Config("write_queue_capacity must be positive".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Namespaces
// =============================================================================

/// One logical dataset family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceConfig {
    pub name: String,
    #[serde(default)]
    pub freshness: Option<FreshnessClass>,
    /// Explicit TTL; wins over the freshness class
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    /// Result column -> origin parameter mapping
    #[serde(default)]
    pub pushdown: BTreeMap<String, ColumnMapping>,
}

impl NamespaceConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            freshness: None,
            ttl_secs: None,
            pushdown: BTreeMap::new(),
        }
    }

    pub fn with_freshness(mut self, freshness: FreshnessClass) -> Self {
        self.freshness = Some(freshness);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_secs = Some(ttl.as_secs());
        self
    }

    pub fn with_pushdown(mut self, column: impl Into<String>, mapping: ColumnMapping) -> Self {
        self.pushdown.insert(column.into(), mapping);
        self
    }

    /// TTL fixed by configuration, if any
    pub fn configured_ttl(&self) -> Option<Duration> {
        self.ttl_secs
            .map(Duration::from_secs)
            .or_else(|| self.freshness.map(|f| f.ttl()))
    }

    pub fn validate(&self) -> Result<()> {
        validate_namespace_name(&self.name)?;

        let mut owners: HashMap<&str, &str> = HashMap::new();
        for (column, mapping) in &self.pushdown {
            mapping.validate(column)?;
            for param in mapping.params() {
                if let Some(other) = owners.insert(param, column) {
                    return Err(Error::Config(format!(
                        "namespace '{}': columns '{other}' and '{column}' both push to '{param}'",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Namespaces double as directory names in the durable tier
pub fn validate_namespace_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if ok {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "invalid namespace '{name}': use [A-Za-z0-9_.-] and do not start with '.'"
        )))
    }
}

/// Validated, read-only namespace table
#[derive(Debug, Clone, Default)]
pub struct NamespaceRegistry {
    namespaces: HashMap<String, NamespaceConfig>,
}

impl NamespaceRegistry {
    pub fn new(namespaces: Vec<NamespaceConfig>) -> Result<Self> {
        let mut map = HashMap::with_capacity(namespaces.len());
        for ns in namespaces {
            ns.validate()?;
            if map.contains_key(&ns.name) {
                return Err(Error::Config(format!("duplicate namespace '{}'", ns.name)));
            }
            map.insert(ns.name.clone(), ns);
        }
        Ok(Self { namespaces: map })
    }

    pub fn get(&self, name: &str) -> Option<&NamespaceConfig> {
        self.namespaces.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NamespaceConfig> {
        self.namespaces.values()
    }

    pub fn len(&self) -> usize {
        self.namespaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }
}

// =============================================================================
// Top-Level Settings
// =============================================================================

/// Orchestrator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Master switch; when off every call goes straight to the origin
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Forward mapped filters to the origin
    #[serde(default = "default_true")]
    pub pushdown_enabled: bool,
    #[serde(default = "default_l1_capacity")]
    pub l1_capacity: usize,
    /// TTL when neither the namespace nor the period heuristic decides
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
    #[serde(default)]
    pub persistent: Option<PersistentTierConfig>,
    #[serde(default)]
    pub namespaces: Vec<NamespaceConfig>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            pushdown_enabled: true,
            l1_capacity: DEFAULT_L1_CAPACITY,
            default_ttl_secs: DEFAULT_TTL_SECS,
            remote: None,
            persistent: None,
            namespaces: Vec::new(),
        }
    }
}

impl CacheSettings {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let settings: Self = serde_yaml::from_str(yaml)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from a `.json`, `.yaml` or `.yml` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            _ => Self::from_yaml_str(&text),
        }
    }

    pub fn with_namespace(mut self, namespace: NamespaceConfig) -> Self {
        self.namespaces.push(namespace);
        self
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.l1_capacity == 0 {
            return Err(Error::Config("l1_capacity must be positive".into()));
        }
        if self.default_ttl_secs == 0 {
            return Err(Error::Config("default_ttl_secs must be positive".into()));
        }
        if let Some(remote) = &self.remote {
            if remote.url.is_empty() {
                return Err(Error::Config("remote.url must not be empty".into()));
            }
            if remote.op_timeout_ms == 0 {
                return Err(Error::Config("remote.op_timeout_ms must be positive".into()));
            }
        }
        if let Some(persistent) = &self.persistent {
            persistent.validate()?;
        }
        NamespaceRegistry::new(self.namespaces.clone()).map(|_| ())
    }

    /// Validate and build the namespace registry
    pub fn registry(&self) -> Result<NamespaceRegistry> {
        NamespaceRegistry::new(self.namespaces.clone())
    }
}

// =============================================================================
// Tests
// =============================================================================
