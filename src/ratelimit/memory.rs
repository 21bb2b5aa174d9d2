//! In-process counter store.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::store::CounterStore;
use crate::error::Result;

/// A request counter within its fixed window.
#[derive(Debug, Clone, Copy)]
struct WindowCount {
    /// Requests seen in this window
    count: u64,
    /// When the window closes and the counter reads as zero
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct MemoryState {
    requests: HashMap<String, WindowCount>,
    blocked: HashMap<String, Instant>,
    block_durations: HashMap<String, Duration>,
    /// When the next full sweep of expired entries is due
    next_sweep: Option<Instant>,
}

impl MemoryState {
    /// Sweep expired entries for every key, at most once per `interval`.
    fn sweep_if_due(&mut self, now: Instant, interval: Duration) {
        if self.next_sweep.is_some_and(|due| now < due) {
            return;
        }
        self.next_sweep = Some(now + interval);
        self.purge_expired(now);
    }

    /// Remove every closed window and expired block.
    fn purge_expired(&mut self, now: Instant) {
        self.requests.retain(|_, entry| now < entry.expires_at);

        let blocked = &mut self.blocked;
        let block_durations = &mut self.block_durations;
        blocked.retain(|key, expiry| {
            let active = now < *expiry;
            if !active {
                block_durations.remove(key);
            }
            active
        });
    }

    /// Drop the counter for `key` if its window has closed.
    fn expire_counter(&mut self, key: &str, now: Instant) {
        if self
            .requests
            .get(key)
            .is_some_and(|entry| now >= entry.expires_at)
        {
            self.requests.remove(key);
        }
    }

    /// Drop the block record for `key` if it has expired.
    ///
    /// Returns `true` while the block is still active.
    fn check_block(&mut self, key: &str, now: Instant) -> bool {
        let expiry = match self.blocked.get(key) {
            Some(expiry) => *expiry,
            None => return false,
        };
        if now < expiry {
            return true;
        }

        self.blocked.remove(key);
        self.block_durations.remove(key);
        false
    }
}

/// Counter store held in process memory.
///
/// All state sits behind one mutex. Every operation is short and never
/// awaits while holding it, so increments on the same key are strictly
/// ordered and none are lost. Expired entries of keys that are never seen
/// again are swept from `increment_request` once per counting window.
pub struct MemoryStore {
    /// Length of a counting window
    window: Duration,
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    /// Create a store whose counters decay after `window`.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: Mutex::new(MemoryState::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_COUNTER_WINDOW)
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment_request(&self, key: &str) -> Result<u64> {
        let now = Instant::now();
        let window = self.window;
        let mut state = self.state.lock();
        state.sweep_if_due(now, window);
        state.expire_counter(key, now);

        let entry = state
            .requests
            .entry(key.to_string())
            .or_insert_with(|| WindowCount {
                count: 0,
                expires_at: now + window,
            });
        entry.count += 1;
        Ok(entry.count)
    }

    async fn get_request_count(&self, key: &str) -> Result<u64> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.expire_counter(key, now);
        Ok(state.requests.get(key).map_or(0, |entry| entry.count))
    }

    async fn block_key(&self, key: &str, duration: Duration) -> Result<()> {
        let now = Instant::now();
        let mut state = self.state.lock();
        if duration.is_zero() {
            state.blocked.remove(key);
            state.block_durations.remove(key);
            return Ok(());
        }
        state.blocked.insert(key.to_string(), now + duration);
        state.block_durations.insert(key.to_string(), duration);
        Ok(())
    }

    async fn is_blocked(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        let mut state = self.state.lock();
        Ok(state.check_block(key, now))
    }

    async fn reset_key(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.requests.remove(key);
        Ok(())
    }

    async fn get_block_duration(&self, key: &str) -> Result<Duration> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.check_block(key, now);
        Ok(state
            .block_durations
            .get(key)
            .copied()
            .unwrap_or(Duration::ZERO))
    }

    async fn set_block_duration(&self, key: &str, duration: Duration) -> Result<()> {
        let mut state = self.state.lock();
        state.block_durations.insert(key.to_string(), duration);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const KEY: &str = "ip:192.168.1.100";

    #[tokio::test]
    async fn test_increment_and_count() {
        let store = MemoryStore::default();

        assert_eq!(store.get_request_count(KEY).await.unwrap(), 0);
        assert_eq!(store.increment_request(KEY).await.unwrap(), 1);
        assert_eq!(store.increment_request(KEY).await.unwrap(), 2);
        assert_eq!(store.get_request_count(KEY).await.unwrap(), 2);
        assert_eq!(store.state.lock().requests.len(), 1);
    }

    #[tokio::test]
    async fn test_reset_clears_counter_only() {
        let store = MemoryStore::default();

        store.increment_request(KEY).await.unwrap();
        store.block_key(KEY, Duration::from_secs(30)).await.unwrap();
        store.reset_key(KEY).await.unwrap();

        assert_eq!(store.get_request_count(KEY).await.unwrap(), 0);
        assert!(store.is_blocked(KEY).await.unwrap());
        assert_eq!(store.increment_request(KEY).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_counter_decays_after_window() {
        let store = MemoryStore::new(Duration::from_millis(50));

        store.increment_request(KEY).await.unwrap();
        store.increment_request(KEY).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(store.get_request_count(KEY).await.unwrap(), 0);
        assert_eq!(store.increment_request(KEY).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_block_round_trip() {
        let store = MemoryStore::default();

        store.block_key(KEY, Duration::from_secs(120)).await.unwrap();
        assert!(store.is_blocked(KEY).await.unwrap());
        assert_eq!(
            store.get_block_duration(KEY).await.unwrap(),
            Duration::from_secs(120)
        );
    }

    #[tokio::test]
    async fn test_block_overwrites_previous() {
        let store = MemoryStore::default();

        store.block_key(KEY, Duration::from_secs(120)).await.unwrap();
        store.block_key(KEY, Duration::from_secs(5)).await.unwrap();
        assert_eq!(
            store.get_block_duration(KEY).await.unwrap(),
            Duration::from_secs(5)
        );
    }

    #[tokio::test]
    async fn test_block_expires_and_stays_expired() {
        let store = MemoryStore::default();

        store.block_key(KEY, Duration::from_millis(50)).await.unwrap();
        assert!(store.is_blocked(KEY).await.unwrap());

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(!store.is_blocked(KEY).await.unwrap());
        assert!(!store.is_blocked(KEY).await.unwrap());
        assert_eq!(store.get_block_duration(KEY).await.unwrap(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_zero_block_clears_block() {
        let store = MemoryStore::default();

        store.block_key(KEY, Duration::from_secs(60)).await.unwrap();
        store.block_key(KEY, Duration::ZERO).await.unwrap();
        assert!(!store.is_blocked(KEY).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_block_duration_does_not_block() {
        let store = MemoryStore::default();

        store
            .set_block_duration(KEY, Duration::from_secs(10))
            .await
            .unwrap();

        assert!(!store.is_blocked(KEY).await.unwrap());
        assert_eq!(
            store.get_block_duration(KEY).await.unwrap(),
            Duration::from_secs(10)
        );
    }

    #[tokio::test]
    async fn test_expired_entries_swept_without_revisiting() {
        let store = MemoryStore::new(Duration::from_millis(50));

        for i in 0..1000 {
            let key = format!("ip:10.0.{}.{}", i / 256, i % 256);
            store.increment_request(&key).await.unwrap();
            if i % 10 == 0 {
                store.block_key(&key, Duration::from_millis(50)).await.unwrap();
            }
        }

        tokio::time::sleep(Duration::from_millis(120)).await;
        store.increment_request(KEY).await.unwrap();

        let state = store.state.lock();
        assert_eq!(state.requests.len(), 1);
        assert!(state.requests.contains_key(KEY));
        assert!(state.blocked.is_empty());
        assert!(state.block_durations.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_keeps_live_entries() {
        let store = MemoryStore::new(Duration::from_millis(40));

        store.increment_request("ip:1.1.1.1").await.unwrap();
        store.block_key("ip:1.1.1.1", Duration::from_secs(60)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        store.increment_request(KEY).await.unwrap();

        assert!(store.is_blocked("ip:1.1.1.1").await.unwrap());
        assert_eq!(
            store.get_block_duration("ip:1.1.1.1").await.unwrap(),
            Duration::from_secs(60)
        );
        assert_eq!(store.get_request_count("ip:1.1.1.1").await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(MemoryStore::default());
        let mut handles = Vec::new();

        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..20 {
                    store.increment_request(KEY).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get_request_count(KEY).await.unwrap(), 1000);
    }
}
