//! Cache key definitions.

use crate::domain::types::{FeedKind, PostId, ProfileId};

/// Identifies one cached query result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    /// Detail view of a single post.
    Post(PostId),
    /// Paged feed of one kind.
    Posts(FeedKind),
    /// Profile summary.
    Profile(ProfileId),
    /// Profiles following the given profile.
    Followers(ProfileId),
    /// Profiles the given profile follows.
    Following(ProfileId),
}

impl QueryKey {
    /// Short label used for log fields and metric labels.
    pub fn family(&self) -> &'static str {
        match self {
            QueryKey::Post(_) => "post",
            QueryKey::Posts(_) => "posts",
            QueryKey::Profile(_) => "profile",
            QueryKey::Followers(_) => "followers",
            QueryKey::Following(_) => "following",
        }
    }
}

/// Selects the entries an invalidation applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryFilter {
    /// Every entry.
    All,
    /// Every feed, whatever its kind.
    AllFeeds,
    /// One key.
    Exact(QueryKey),
    /// A profile together with its follower and following lists.
    ProfileGraph(ProfileId),
}

impl QueryFilter {
    pub fn matches(&self, key: &QueryKey) -> bool {
        match (self, key) {
            (QueryFilter::All, _) => true,
            (QueryFilter::AllFeeds, QueryKey::Posts(_)) => true,
            (QueryFilter::AllFeeds, _) => false,
            (QueryFilter::Exact(expected), key) => expected == key,
            (
                QueryFilter::ProfileGraph(profile),
                QueryKey::Profile(id) | QueryKey::Followers(id) | QueryKey::Following(id),
            ) => profile == id,
            (QueryFilter::ProfileGraph(_), _) => false,
        }
    }
}
