//! Counter store trait for abstracting in-process and shared implementations.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::memory::MemoryStore;
use super::redis_store::RedisStore;
use crate::config::StoreConfig;
use crate::error::Result;

/// Trait for counter store implementations.
///
/// This trait abstracts over both the in-process `MemoryStore` and the
/// Redis-backed `RedisStore` so the limiter works with either. Keys are
/// opaque strings; namespacing is the caller's job.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment the request counter for `key` and return the new count.
    ///
    /// A key with no live counter starts at 1.
    async fn increment_request(&self, key: &str) -> Result<u64>;

    /// Current request count for `key`, or 0 if there is none.
    async fn get_request_count(&self, key: &str) -> Result<u64>;

    /// Block `key` for `duration` starting now, replacing any earlier block.
    async fn block_key(&self, key: &str, duration: Duration) -> Result<()>;

    /// Whether `key` is inside an active block window.
    ///
    /// Expired blocks read as unblocked and are removed.
    async fn is_blocked(&self, key: &str) -> Result<bool>;

    /// Clear the request counter for `key`. Block state is left alone.
    async fn reset_key(&self, key: &str) -> Result<()>;

    /// The duration passed to the latest `block_key` for `key`, or zero.
    async fn get_block_duration(&self, key: &str) -> Result<Duration>;

    /// Record a block duration for `key`.
    ///
    /// The Redis backend stores this on the block marker itself, so it also
    /// (re)blocks the key. The in-process backend keeps it separately from the
    /// block expiry and does not block.
    async fn set_block_duration(&self, key: &str, duration: Duration) -> Result<()>;
}

/// Build the store selected by configuration.
///
/// A configured Redis address selects the shared backend, which must answer a
/// ping before this returns. Without one the in-process backend is used.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn CounterStore>> {
    let window = config.counter_window();

    match config.redis_addr.as_deref().filter(|addr| !addr.is_empty()) {
        Some(addr) => {
            let store = RedisStore::connect(
                addr,
                config.redis_password.as_deref(),
                config.redis_db,
                window,
            )
            .await?;
            store.ping().await?;
            info!(addr = %addr, db = config.redis_db, "Using Redis counter store");
            Ok(Arc::new(store))
        }
        None => {
            warn!("Redis not configured, using in-process counter store");
            Ok(Arc::new(MemoryStore::new(window)))
        }
    }
}
