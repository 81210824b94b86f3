//! Bounded associative caches shared across the runtime
//!
//! [`lru`] provides the generic capacity-bounded LRU store instantiated
//! as the schema cache and as the backing store of the session
//! manager. [`rate_limiter`] provides the per-client fixed-window
//! limiter used by the transports.

pub mod lru;
pub mod rate_limiter;

pub use lru::{BoundedLruCache, CacheStats};
pub use rate_limiter::{RateLimiter, Verdict};
