//! Cache Keys
//!
//! Keys are derived from `(namespace, canonical params)`. Parameter maps are
//! `BTreeMap`s and nested JSON objects are BTree-backed, so the canonical
//! JSON never depends on insertion order.

use std::collections::BTreeMap;
use std::fmt;

use sha2::{Digest, Sha256};

/// Request parameters sent to the origin
pub type Params = BTreeMap<String, serde_json::Value>;

/// Width of the hex content hash used in keys and file names
pub const CONTENT_HASH_LEN: usize = 16;

/// Canonical JSON for a parameter map
pub fn canonical_params(params: &Params) -> String {
    // BTreeMap<String, Value> serialization cannot fail
    serde_json::to_string(params).unwrap_or_default()
}

/// Fixed-width hex prefix of SHA-256 over `namespace:canonical_json`
pub fn content_hash(namespace: &str, params: &Params) -> String {
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update(b":");
    hasher.update(canonical_params(params).as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..CONTENT_HASH_LEN].to_string()
}

/// Cache key - namespace plus content hash
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    namespace: String,
    hash: String,
}

impl CacheKey {
    /// Derive the key for a logical query
    pub fn new(namespace: impl Into<String>, params: &Params) -> Self {
        let namespace = namespace.into();
        let hash = content_hash(&namespace, params);
        Self { namespace, hash }
    }

    /// Rebuild a key from a stored hash
    pub fn from_parts(namespace: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            hash: hash.into(),
        }
    }

    #[inline]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[inline]
    pub fn hash(&self) -> &str {
        &self.hash
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.hash)
    }
}

// =============================================================================
// Tests
// =============================================================================
