//! Counter store backed by Redis.
//!
//! Counters are plain integer keys that decay with a TTL equal to the counting
//! window. Blocks are separate marker keys under `rate_limiter:block:` whose
//! TTL is the block duration and whose value is that duration in milliseconds.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::time::Duration;
use tracing::{debug, info};

use super::store::CounterStore;
use crate::error::{Result, TollgateError};

/// Prefix of block marker keys.
pub const BLOCK_KEY_PREFIX: &str = "rate_limiter:block:";

/// How long the startup ping may take.
const PING_TIMEOUT: Duration = Duration::from_secs(2);

/// A counter store shared by every instance pointed at the same Redis.
#[derive(Clone)]
pub struct RedisStore {
    /// Multiplexed connection, cloned per command
    conn: MultiplexedConnection,
    /// Length of a counting window
    window: Duration,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("window", &self.window)
            .finish()
    }
}

impl RedisStore {
    /// Open a connection to the Redis server at `addr`.
    ///
    /// `addr` is either `host:port` or a full `redis://` URL.
    pub async fn connect(
        addr: &str,
        password: Option<&str>,
        db: i64,
        window: Duration,
    ) -> Result<Self> {
        info!(addr = %addr, db = db, "Connecting to Redis");

        let client = Client::open(redis_url(addr, password, db).as_str())?;
        let conn = client.get_multiplexed_async_connection().await?;

        Ok(Self { conn, window })
    }

    /// Check that the server answers.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let ping = redis::cmd("PING");
        let reply: String = tokio::time::timeout(PING_TIMEOUT, ping.query_async(&mut conn))
            .await
            .map_err(|_| TollgateError::Store("Redis ping timed out".to_string()))??;
        debug!(reply = %reply, "Redis ping succeeded");
        Ok(())
    }

    /// Write the block marker for `key` with the duration as both value and TTL.
    async fn write_block_marker(&self, key: &str, duration: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let marker = block_marker_key(key);

        if duration.is_zero() {
            let _: () = conn.del(marker).await?;
            return Ok(());
        }

        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let _: () = conn.pset_ex(marker, millis, millis).await?;
        Ok(())
    }
}

/// Build a connection URL from an address, optional password and database index.
fn redis_url(addr: &str, password: Option<&str>, db: i64) -> String {
    if addr.starts_with("redis://") || addr.starts_with("rediss://") {
        return addr.to_string();
    }

    match password.filter(|p| !p.is_empty()) {
        Some(password) => format!("redis://:{}@{}/{}", password, addr, db),
        None => format!("redis://{}/{}", addr, db),
    }
}

/// The block marker key for a store key.
pub fn block_marker_key(key: &str) -> String {
    format!("{}{}", BLOCK_KEY_PREFIX, key)
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment_request(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.incr(key, 1u64).await?;

        // A crash between INCR and EXPIRE leaves the counter without a TTL
        // until the next reset.
        if count == 1 {
            let secs = self.window.as_secs().max(1) as i64;
            let _: () = conn.expire(key, secs).await?;
        }

        Ok(count)
    }

    async fn get_request_count(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let count: Option<u64> = conn.get(key).await?;
        Ok(count.unwrap_or(0))
    }

    async fn block_key(&self, key: &str, duration: Duration) -> Result<()> {
        self.write_block_marker(key, duration).await
    }

    async fn is_blocked(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(block_marker_key(key)).await?;
        Ok(exists)
    }

    async fn reset_key(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn get_block_duration(&self, key: &str) -> Result<Duration> {
        let mut conn = self.conn.clone();
        let millis: Option<u64> = conn.get(block_marker_key(key)).await?;
        Ok(Duration::from_millis(millis.unwrap_or(0)))
    }

    async fn set_block_duration(&self, key: &str, duration: Duration) -> Result<()> {
        self.write_block_marker(key, duration).await
    }
}
