//! Cache Entry Types
//!
//! Volatile-tier entries: a shared table payload plus access metadata.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use super::key::Params;
use crate::table::Table;

/// Metadata for cache entries
#[derive(Debug)]
pub struct EntryMetadata {
    /// Payload size in bytes
    size_bytes: u64,
    /// Wall-clock creation time
    created_at: DateTime<Utc>,
    /// Monotonic creation time for expiry checks
    created_instant: Instant,
    /// Last access (milliseconds since `created_instant`)
    last_access_ms: AtomicU64,
    /// Access count
    access_count: AtomicU64,
    /// Time to live (`None` = no expiry)
    ttl: Option<Duration>,
}

impl EntryMetadata {
    /// Create new entry metadata
    pub fn new(size_bytes: u64, ttl: Option<Duration>) -> Self {
        Self {
            size_bytes,
            created_at: Utc::now(),
            created_instant: Instant::now(),
            last_access_ms: AtomicU64::new(0),
            access_count: AtomicU64::new(0),
            ttl,
        }
    }

    #[inline]
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    #[inline]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[inline]
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Record an access and return the new count
    #[inline]
    pub fn record_access(&self) -> u64 {
        let elapsed = self.created_instant.elapsed().as_millis() as u64;
        self.last_access_ms.store(elapsed, Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[inline]
    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    /// Time since the last access (or creation)
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_access_ms.load(Ordering::Relaxed));
        self.created_instant.elapsed().saturating_sub(last)
    }

    /// Check if entry has expired
    #[inline]
    pub fn is_expired(&self) -> bool {
        match self.ttl {
            Some(ttl) => self.created_instant.elapsed() >= ttl,
            None => false,
        }
    }
}

impl Clone for EntryMetadata {
    fn clone(&self) -> Self {
        Self {
            size_bytes: self.size_bytes,
            created_at: self.created_at,
            created_instant: self.created_instant,
            last_access_ms: AtomicU64::new(self.last_access_ms.load(Ordering::Relaxed)),
            access_count: AtomicU64::new(self.access_count.load(Ordering::Relaxed)),
            ttl: self.ttl,
        }
    }
}

/// Cache entry containing a table and its metadata
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Entry metadata
    pub metadata: EntryMetadata,
    /// Shared payload; clones are cheap
    payload: Arc<Table>,
    /// Parameters that produced the payload
    source_params: Arc<Params>,
}

impl CacheEntry {
    /// Create a new cache entry
    pub fn new(payload: Arc<Table>, source_params: Params, ttl: Option<Duration>) -> Self {
        let size = payload.estimated_size();
        Self {
            metadata: EntryMetadata::new(size, ttl),
            payload,
            source_params: Arc::new(source_params),
        }
    }

    #[inline]
    pub fn payload(&self) -> &Arc<Table> {
        &self.payload
    }

    #[inline]
    pub fn source_params(&self) -> &Params {
        &self.source_params
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.metadata.size_bytes()
    }

    #[inline]
    pub fn record_access(&self) -> u64 {
        self.metadata.record_access()
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.metadata.is_expired()
    }
}

// =============================================================================
// Tests
// =============================================================================
