//! Repository traits describing the hosted backend.
//!
//! Reads hand back the raw JSON the backend produced; callers validate it
//! with `domain::schema` before anything reaches a view. Writes are
//! single-shot and never retried here.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;

use crate::application::pagination::RowRange;
use crate::domain::entities::{FollowEdge, LikeEdge};
use crate::domain::types::{Bucket, PostId, ProfileId};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("not authorized: {message}")]
    Unauthorized { message: String },
    #[error("object storage error: {0}")]
    Storage(String),
    #[error("backend timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Row filter applied to the post table before ordering and ranging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostFilter {
    All,
    /// `author_id in (..)`
    Authors(Vec<ProfileId>),
    /// `id in (..)`
    Ids(Vec<PostId>),
    /// `author_id = ..`
    Author(ProfileId),
}

#[derive(Debug, Clone)]
pub struct InsertPostParams {
    pub author_id: ProfileId,
    pub content: String,
    pub posted_at: OffsetDateTime,
}

/// Object payload for the storage collaborator.
#[derive(Debug, Clone)]
pub struct UploadObject {
    pub bytes: Bytes,
    pub content_type: String,
}

/// Location of an object after upload, relative to its bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub path: String,
}

#[async_trait]
pub trait PostsRepo: Send + Sync {
    /// Posts joined with author and likes, newest first, limited to `range`.
    async fn select_posts(&self, filter: &PostFilter, range: RowRange) -> Result<Value, RepoError>;

    /// A single joined post, `None` when no row matches.
    async fn select_post(&self, id: &PostId) -> Result<Option<Value>, RepoError>;

    /// Insert a post row and return `{ "id": .. }`.
    async fn insert_post(&self, params: InsertPostParams) -> Result<Value, RepoError>;

    async fn update_attachment(&self, id: &PostId, path: &str) -> Result<(), RepoError>;
}

#[async_trait]
pub trait LikesRepo: Send + Sync {
    /// `[{ "post_id": .. }]` for every like by `profile`.
    async fn select_liked_post_ids(&self, profile: &ProfileId) -> Result<Value, RepoError>;

    /// All rows matching the edge (zero or one in a consistent store).
    async fn select_like(&self, edge: &LikeEdge) -> Result<Value, RepoError>;

    async fn insert_like(&self, edge: &LikeEdge) -> Result<(), RepoError>;

    /// Returns the number of rows removed.
    async fn delete_like(&self, edge: &LikeEdge) -> Result<u64, RepoError>;
}

#[async_trait]
pub trait FollowsRepo: Send + Sync {
    /// `[{ "following_id": .. }]` for every profile `follower` follows.
    async fn select_following_ids(&self, follower: &ProfileId) -> Result<Value, RepoError>;

    /// `[{ "following": { profile } }]` for every profile `follower` follows.
    async fn select_following(&self, follower: &ProfileId) -> Result<Value, RepoError>;

    /// `[{ "follower": { profile } }]` for every profile following `followee`.
    async fn select_followers(&self, followee: &ProfileId) -> Result<Value, RepoError>;

    async fn select_follow(&self, edge: &FollowEdge) -> Result<Value, RepoError>;

    async fn insert_follow(&self, edge: &FollowEdge) -> Result<(), RepoError>;

    /// Returns the number of rows removed.
    async fn delete_follow(&self, edge: &FollowEdge) -> Result<u64, RepoError>;
}

#[async_trait]
pub trait ProfilesRepo: Send + Sync {
    async fn select_profile(&self, id: &ProfileId) -> Result<Option<Value>, RepoError>;

    /// Point the profile at a stored avatar, or clear it with `None`.
    async fn update_avatar(&self, id: &ProfileId, path: Option<&str>) -> Result<(), RepoError>;
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `object` under `key`. With `upsert == false` an existing key is
    /// a `RepoError::Duplicate`.
    async fn upload(
        &self,
        bucket: Bucket,
        key: &str,
        object: UploadObject,
        upsert: bool,
    ) -> Result<StoredObject, RepoError>;

    /// Resolve a stored path to a fetchable URL.
    fn public_url(&self, bucket: Bucket, path: &str) -> String;
}
