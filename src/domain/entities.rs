//! Domain entities mirrored from backend rows.
//!
//! Field names follow the backend's column names so that a validated record
//! serializes back into the same shape it was parsed from.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::types::{PostId, ProfileId};

/// Summary of a profile as embedded in posts and relationship lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: ProfileId,
    pub name: String,
    pub handle: String,
    /// Storage path inside the `avatars` bucket, not a URL.
    pub avatar_url: Option<String>,
}

/// One like on a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeRecord {
    pub profile_id: ProfileId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: PostId,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub posted_at: OffsetDateTime,
    /// Storage path inside the `images` bucket, not a URL.
    pub attachment_url: Option<String>,
    pub author: ProfileRecord,
    /// Insertion-ordered; a profile appears at most once.
    pub likes: Vec<LikeRecord>,
}

/// Directed "follows" relationship.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FollowEdge {
    pub follower_id: ProfileId,
    pub following_id: ProfileId,
}

/// Membership of a profile in a post's likes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LikeEdge {
    pub profile_id: ProfileId,
    pub post_id: PostId,
}
