//! # tandem-cache
//!
//! A two-tier (near/far) read-through and write-through cache facade with
//! four mass-miss protections: penetration (approximate membership
//! filtering), avalanche (TTL jitter), breakdown (hot-key detection plus a
//! distributed single-flight lock), and downstream failure (a three-state
//! circuit breaker).
//!
//! ## Architecture
//!
//! - `model`: the `Entry<V>` record and the shared enumerations
//! - `config`: frozen, validated configuration for every collaborator
//! - `error`: the crate-wide error taxonomy and its retry/breaker classification
//! - `key`: key-to-string codec and the data-source loader contract
//! - `filter`: the Bloom-backed approximate membership filter
//! - `hotkey`: the sliding-window hot-key detector
//! - `breaker`: the three-state circuit breaker
//! - `near`: the process-local (L1) cache trait and `moka` implementation
//! - `far`: the shared (L2) cache trait, lock protocol, and `redis` implementation
//! - `metrics`: hit/miss/event/latency recording and Prometheus export
//! - `retry`: exponential-backoff retry and error-disposition policy
//! - `scheduler`: the delayed double-delete task scheduler
//! - `facade`: `TieredCache<K, V>` and `CacheBuilder<K, V>`, the public API
//!
//! ## Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use tandem_cache::facade::CacheBuilder;
//! use tandem_cache::far::InMemoryFarCache;
//! use tandem_cache::near::MokaNearCache;
//! use tandem_cache::config::CacheConfig;
//!
//! # async fn example(loader: Arc<dyn tandem_cache::key::DataLoader<String, String>>) -> tandem_cache::error::CacheResult<()> {
//! let config = CacheConfig::default();
//! let cache = CacheBuilder::new()
//!     .near(Arc::new(MokaNearCache::new(&config.near)))
//!     .far(Arc::new(InMemoryFarCache::default()))
//!     .loader(loader)
//!     .config(config)
//!     .build()?;
//!
//! let value = cache.get(&"user:1".to_string()).await?;
//! # let _ = value;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod breaker;
pub mod config;
pub mod error;
pub mod facade;
pub mod far;
pub mod filter;
pub mod hotkey;
pub mod key;
pub mod metrics;
pub mod model;
pub mod near;
pub mod retry;
pub mod scheduler;

pub use breaker::{BreakerState, CircuitBreaker};
pub use config::CacheConfig;
pub use error::{CacheError, CacheErrorType, CacheResult};
pub use facade::{CacheBuilder, TieredCache};
pub use far::{FarCache, LockAttempt};
pub use key::{DataLoader, KeyCodec};
pub use metrics::MetricsRecorder;
pub use model::{CacheEventType, CacheLevel, CacheOperation, Entry};
pub use near::NearCache;

/// Crate version, re-exported for diagnostics and metrics labeling.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name, re-exported for diagnostics and metrics labeling.
pub const NAME: &str = env!("CARGO_PKG_NAME");
