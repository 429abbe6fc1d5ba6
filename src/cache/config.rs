//! Cache configuration.

use std::num::NonZeroUsize;

use serde::Deserialize;

const DEFAULT_POST_LIMIT: usize = 500;
const DEFAULT_FEED_LIMIT: usize = 16;
const DEFAULT_PROFILE_LIMIT: usize = 200;
const DEFAULT_RELATION_LIMIT: usize = 200;

/// Query cache configuration from `chorus.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When false every read goes to the backend and nothing is stored.
    pub enabled: bool,
    /// Maximum post detail entries.
    pub post_limit: usize,
    /// Maximum feeds (one per feed kind or author).
    pub feed_limit: usize,
    /// Maximum profile summaries.
    pub profile_limit: usize,
    /// Maximum follower/following lists.
    pub relation_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            post_limit: DEFAULT_POST_LIMIT,
            feed_limit: DEFAULT_FEED_LIMIT,
            profile_limit: DEFAULT_PROFILE_LIMIT,
            relation_limit: DEFAULT_RELATION_LIMIT,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            post_limit: settings.post_limit,
            feed_limit: settings.feed_limit,
            profile_limit: settings.profile_limit,
            relation_limit: settings.relation_limit,
        }
    }
}

/// Zero limits clamp to one entry.
pub(crate) fn non_zero(limit: usize) -> NonZeroUsize {
    NonZeroUsize::new(limit).unwrap_or(NonZeroUsize::MIN)
}
