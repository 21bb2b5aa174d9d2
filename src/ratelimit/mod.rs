//! Rate limiting logic and counter storage.

mod key;
mod limiter;
mod memory;
mod redis_store;
mod rules;
mod store;

pub use key::{ClassificationKey, KeyKind};
pub use limiter::RateLimiter;
pub use memory::MemoryStore;
pub use redis_store::{block_marker_key, RedisStore, BLOCK_KEY_PREFIX};
pub use rules::{parse_block_time_list, FailureMode, LimiterConfig, RateLimitResult};
pub use store::{connect, CounterStore};
