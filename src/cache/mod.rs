//! Client-side query cache.
//!
//! Holds the results of backend reads keyed by [`QueryKey`]:
//!
//! - concurrent reads of the same key share one fetch,
//! - [`QueryCache::invalidate`] marks entries stale before it returns, so the
//!   next read of a matching key waits for a fresh fetch,
//! - [`QueryCache::reset`] drops everything (logout, manual refresh).
//!
//! The cache is an ordinary value built by the application root and handed
//! to the services that need it.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! post_limit = 500
//! feed_limit = 16
//! ```

mod config;
mod keys;
mod lock;
mod store;

pub use config::CacheConfig;
pub use keys::{QueryFilter, QueryKey};
pub use store::{CacheEpoch, QueryCache, QuerySlot};
