//! Crate-wide error taxonomy.
//!
//! Mirrors the kinds enumerated in the cache error taxonomy: near-cache,
//! far-cache connection/timeout, data-source, lock-timeout, serialization.
//! Most of these never escape the facade (see `propagation policy`); this
//! type exists for the collaborator traits and for constructors, which are
//! allowed to fail loudly.

use thiserror::Error;

/// Error taxonomy for the cache and its collaborators.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The near-cache adapter failed (treated as a miss, never surfaced).
    #[error("near-cache error: {0}")]
    Near(String),

    /// The far-cache connection could not be established or was dropped.
    #[error("far-cache connection error: {0}")]
    L2Connection(String),

    /// The far-cache call exceeded its deadline.
    #[error("far-cache timeout: {0}")]
    L2Timeout(String),

    /// The data-source loader failed.
    #[error("data-source error: {0}")]
    DataSource(String),

    /// A distributed lock could not be acquired within its timeout.
    #[error("lock acquisition timeout for key {0:?}")]
    LockTimeout(String),

    /// Encoding or decoding an `Entry` failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration supplied at construction time.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The operation was cancelled because the cache is shutting down.
    #[error("operation cancelled")]
    Cancelled,
}

/// Convenience result alias.
pub type CacheResult<T> = Result<T, CacheError>;

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            CacheError::L2Timeout(err.to_string())
        } else {
            CacheError::L2Connection(err.to_string())
        }
    }
}

/// Classification of an error for the retry/breaker policy (§4.10).
///
/// This is distinct from `CacheError` itself: several `CacheError` variants
/// collapse to the same `CacheErrorType` tag, and classification is what the
/// retry executor and circuit breaker actually dispatch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheErrorType {
    L1Error,
    L2Connection,
    L2Timeout,
    DataSource,
    LockTimeout,
    Serialization,
}

impl CacheError {
    /// Classify this error into the taxonomy used by the retry policy.
    pub fn classify(&self) -> CacheErrorType {
        match self {
            CacheError::Near(_) => CacheErrorType::L1Error,
            CacheError::L2Connection(_) => CacheErrorType::L2Connection,
            CacheError::L2Timeout(_) => CacheErrorType::L2Timeout,
            CacheError::DataSource(_) => CacheErrorType::DataSource,
            CacheError::LockTimeout(_) => CacheErrorType::LockTimeout,
            CacheError::Serialization(_) => CacheErrorType::Serialization,
            CacheError::Config(_) | CacheError::Cancelled => CacheErrorType::L1Error,
        }
    }
}
