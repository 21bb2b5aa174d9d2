//! Core rate limiter implementation.

use std::sync::Arc;
use tracing::{debug, error, trace, warn};

use super::key::ClassificationKey;
use super::rules::{FailureMode, LimiterConfig, RateLimitResult};
use super::store::CounterStore;
use crate::error::{Result, TollgateError};

/// The rate limiter that decides whether a request may proceed.
///
/// The limiter itself holds no mutable state; counters and blocks live in
/// the counter store, so it can be shared freely across tasks.
pub struct RateLimiter {
    /// Counter store backing this limiter
    store: Arc<dyn CounterStore>,
    /// Quotas and block times
    config: LimiterConfig,
}

impl RateLimiter {
    /// Create a new rate limiter over the given store.
    pub fn new(store: Arc<dyn CounterStore>, config: LimiterConfig) -> Self {
        Self { store, config }
    }

    /// Decide whether a request from `ip` carrying `token` may proceed.
    ///
    /// A non-empty token classifies the request on its own; the address is
    /// then ignored entirely. Store failures are resolved by the configured
    /// [`FailureMode`].
    pub async fn allow_request(&self, ip: &str, token: &str) -> RateLimitResult {
        let key = ClassificationKey::classify(ip, token);

        trace!(key = %key, "Checking rate limit");

        match self.evaluate(&key).await {
            Ok(result) => result,
            Err(e) => self.on_store_error(&key, e),
        }
    }

    async fn evaluate(&self, key: &ClassificationKey) -> Result<RateLimitResult> {
        let store_key = key.store_key();

        // A blocked key is rejected without counting the request. A zero
        // duration means the block lapsed between the two reads.
        if self.store.is_blocked(&store_key).await? {
            let block_time = self.store.get_block_duration(&store_key).await?;
            if !block_time.is_zero() {
                debug!(
                    key = %key,
                    block_time_secs = block_time.as_secs(),
                    "Rejected request from blocked key"
                );
                return Ok(RateLimitResult::deny(block_time));
            }
            trace!(key = %key, "Block expired during check");
        }

        let requests = self.store.increment_request(&store_key).await?;
        let limit = self.config.quota_for(key.kind);

        if requests > limit {
            let block_time = self.config.block_duration_for(key);
            self.store.block_key(&store_key, block_time).await?;
            // The next window after the block starts from zero.
            self.store.reset_key(&store_key).await?;

            warn!(
                key = %key,
                requests = requests,
                limit = limit,
                block_time_secs = block_time.as_secs(),
                "Rate limit exceeded, key blocked"
            );
            return Ok(RateLimitResult::deny(block_time));
        }

        trace!(key = %key, requests = requests, limit = limit, "Request allowed");
        Ok(RateLimitResult::allow())
    }

    fn on_store_error(&self, key: &ClassificationKey, e: TollgateError) -> RateLimitResult {
        let mode = self.config.failure_mode;
        error!(
            key = %key,
            error = %e,
            failure_mode = ?mode,
            "Counter store failed during rate limit check"
        );

        match mode {
            FailureMode::Open => RateLimitResult::allow(),
            FailureMode::Closed => {
                RateLimitResult::deny(self.config.default_block_duration(key.kind))
            }
        }
    }
}
