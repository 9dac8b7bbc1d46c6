//! Error types for the tiered fetch cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the tiered fetch cache
///
/// Only [`Error::Origin`], [`Error::UnknownColumn`] and [`Error::Config`]
/// are ever returned from the public fetch path. Everything raised by a
/// cache tier is logged and converted into a miss.
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Arrow encode/decode error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    /// Remote cache backend error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    // =========================================================================
    // Cache Errors
    // =========================================================================
    /// A cache tier backend is unreachable or failed
    #[error("Cache tier {tier} unavailable: {reason}")]
    CacheUnavailable { tier: String, reason: String },

    /// Payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    // =========================================================================
    // Origin Errors
    // =========================================================================
    /// The origin fetch callback failed; the inner error is carried unchanged
    #[error("Origin fetch failed: {0}")]
    Origin(anyhow::Error),

    // =========================================================================
    // Filter Errors
    // =========================================================================
    /// Filter spec is malformed or uses an unsupported operator
    #[error("Invalid filter on column '{column}': {reason}")]
    InvalidFilter { column: String, reason: String },

    /// Filter references a column the result table does not have
    #[error("Unknown filter column '{column}'; valid columns: {}", available.join(", "))]
    UnknownColumn {
        column: String,
        available: Vec<String>,
    },

    // =========================================================================
    // Compression Errors
    // =========================================================================
    /// Compression failed
    #[error("Compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },
}

impl Error {
    /// Wrap an origin failure
    pub fn origin(err: impl Into<anyhow::Error>) -> Self {
        Error::Origin(err.into())
    }

    /// Shorthand for a tier outage
    pub fn unavailable(tier: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::CacheUnavailable {
            tier: tier.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that must reach the caller of a fetch
    pub fn is_caller_visible(&self) -> bool {
        matches!(
            self,
            Error::Origin(_) | Error::UnknownColumn { .. } | Error::Config(_)
        )
    }
}
