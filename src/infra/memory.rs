//! In-process backend.
//!
//! Implements every backend contract over plain collections and answers with
//! the same JSON row shapes as the REST adapter. Call counters and injectable
//! faults make it the backend of choice for tests and offline runs.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde_json::{Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::application::pagination::RowRange;
use crate::application::repos::{
    FollowsRepo, InsertPostParams, LikesRepo, ObjectStorage, PostFilter, PostsRepo,
    ProfilesRepo, RepoError, StoredObject, UploadObject,
};
use crate::domain::entities::{FollowEdge, LikeEdge, ProfileRecord};
use crate::domain::types::{Bucket, PostId, ProfileId};

/// Backend operations, for counting calls and injecting faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    SelectPosts,
    SelectPost,
    InsertPost,
    UpdateAttachment,
    SelectLikedPostIds,
    SelectLike,
    InsertLike,
    DeleteLike,
    SelectFollowingIds,
    SelectFollowing,
    SelectFollowers,
    SelectFollow,
    InsertFollow,
    DeleteFollow,
    SelectProfile,
    UpdateAvatar,
    Upload,
}

/// How an operation misbehaves once a fault is injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Fail with a persistence error.
    Error,
    /// Reads return no rows, as if a concurrent write was not yet visible.
    StaleRead,
    /// Reads return a structurally invalid body.
    Malformed,
}

#[derive(Debug, Clone)]
struct StoredPost {
    id: PostId,
    author_id: ProfileId,
    content: String,
    posted_at: OffsetDateTime,
    attachment_url: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    profiles: Vec<ProfileRecord>,
    posts: Vec<StoredPost>,
    likes: Vec<LikeEdge>,
    follows: Vec<FollowEdge>,
    objects: HashMap<(Bucket, String), UploadObject>,
    next_post: u64,
}

impl State {
    fn profile(&self, id: &ProfileId) -> Option<&ProfileRecord> {
        self.profiles.iter().find(|profile| &profile.id == id)
    }

    fn post_row(&self, post: &StoredPost) -> Result<Value, RepoError> {
        let author = self.profile(&post.author_id).ok_or_else(|| {
            RepoError::Persistence(format!("post `{}` has no author row", post.id))
        })?;
        let posted_at = post
            .posted_at
            .format(&Rfc3339)
            .map_err(RepoError::from_persistence)?;
        let likes: Vec<Value> = self
            .likes
            .iter()
            .filter(|like| like.post_id == post.id)
            .map(|like| json!({ "profile_id": like.profile_id }))
            .collect();
        Ok(json!({
            "id": post.id,
            "content": post.content,
            "posted_at": posted_at,
            "attachment_url": post.attachment_url,
            "author": profile_row(author),
            "likes": likes,
        }))
    }
}

fn profile_row(profile: &ProfileRecord) -> Value {
    json!({
        "id": profile.id,
        "name": profile.name,
        "handle": profile.handle,
        "avatar_url": profile.avatar_url,
    })
}

#[derive(Debug, Default)]
pub struct InMemoryBackend {
    state: Mutex<State>,
    calls: DashMap<Operation, usize>,
    faults: DashMap<Operation, Fault>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, RepoError> {
        self.state
            .lock()
            .map_err(|_| RepoError::Persistence("in-memory store poisoned".to_string()))
    }

    /// Count the call and return the injected fault, if any. `Error` faults
    /// short-circuit here.
    fn enter(&self, op: Operation) -> Result<Option<Fault>, RepoError> {
        *self.calls.entry(op).or_insert(0) += 1;
        match self.faults.get(&op).map(|fault| *fault) {
            Some(Fault::Error) => Err(RepoError::Persistence(format!(
                "injected failure in {op:?}"
            ))),
            other => Ok(other),
        }
    }

    pub fn calls(&self, op: Operation) -> usize {
        self.calls.get(&op).map_or(0, |count| *count)
    }

    pub fn inject(&self, op: Operation, fault: Fault) {
        self.faults.insert(op, fault);
    }

    pub fn heal(&self, op: Operation) {
        self.faults.remove(&op);
    }

    pub fn add_profile(&self, id: ProfileId, name: &str, handle: &str) -> Result<ProfileRecord, RepoError> {
        let profile = ProfileRecord {
            id,
            name: name.to_string(),
            handle: handle.to_string(),
            avatar_url: None,
        };
        self.state()?.profiles.push(profile.clone());
        Ok(profile)
    }

    pub fn add_post(
        &self,
        author: &ProfileId,
        content: &str,
        posted_at: OffsetDateTime,
    ) -> Result<PostId, RepoError> {
        let mut state = self.state()?;
        insert_post_row(&mut state, author.clone(), content.to_string(), posted_at)
    }

    pub fn add_like(&self, profile: &ProfileId, post: &PostId) -> Result<(), RepoError> {
        let mut state = self.state()?;
        let edge = LikeEdge {
            profile_id: profile.clone(),
            post_id: post.clone(),
        };
        if !state.likes.contains(&edge) {
            state.likes.push(edge);
        }
        Ok(())
    }

    pub fn add_follow(&self, follower: &ProfileId, following: &ProfileId) -> Result<(), RepoError> {
        let mut state = self.state()?;
        let edge = FollowEdge {
            follower_id: follower.clone(),
            following_id: following.clone(),
        };
        if !state.follows.contains(&edge) {
            state.follows.push(edge);
        }
        Ok(())
    }

    pub fn has_like(&self, profile: &ProfileId, post: &PostId) -> bool {
        self.state().is_ok_and(|state| {
            state
                .likes
                .iter()
                .any(|like| &like.profile_id == profile && &like.post_id == post)
        })
    }

    pub fn has_follow(&self, follower: &ProfileId, following: &ProfileId) -> bool {
        self.state().is_ok_and(|state| {
            state
                .follows
                .iter()
                .any(|edge| &edge.follower_id == follower && &edge.following_id == following)
        })
    }

    pub fn object(&self, bucket: Bucket, key: &str) -> Option<Bytes> {
        let state = self.state().ok()?;
        state
            .objects
            .get(&(bucket, key.to_string()))
            .map(|object| object.bytes.clone())
    }

    pub fn attachment_of(&self, post: &PostId) -> Option<String> {
        let state = self.state().ok()?;
        state
            .posts
            .iter()
            .find(|stored| &stored.id == post)
            .and_then(|stored| stored.attachment_url.clone())
    }

    pub fn post_count(&self) -> usize {
        self.state().map_or(0, |state| state.posts.len())
    }
}

fn insert_post_row(
    state: &mut State,
    author_id: ProfileId,
    content: String,
    posted_at: OffsetDateTime,
) -> Result<PostId, RepoError> {
    state.next_post += 1;
    let id = PostId::new(format!("p-{}", state.next_post)).map_err(RepoError::from_persistence)?;
    state.posts.push(StoredPost {
        id: id.clone(),
        author_id,
        content,
        posted_at,
        attachment_url: None,
    });
    Ok(id)
}

fn rows_or_fault(
    fault: Option<Fault>,
    rows: impl FnOnce() -> Result<Value, RepoError>,
) -> Result<Value, RepoError> {
    match fault {
        Some(Fault::StaleRead) => Ok(Value::Array(Vec::new())),
        Some(Fault::Malformed) => Ok(json!({ "unexpected": true })),
        _ => rows(),
    }
}

fn matches_filter(post: &StoredPost, filter: &PostFilter) -> bool {
    match filter {
        PostFilter::All => true,
        PostFilter::Authors(authors) => authors.contains(&post.author_id),
        PostFilter::Ids(ids) => ids.contains(&post.id),
        PostFilter::Author(author) => &post.author_id == author,
    }
}

#[async_trait]
impl PostsRepo for InMemoryBackend {
    async fn select_posts(&self, filter: &PostFilter, range: RowRange) -> Result<Value, RepoError> {
        let fault = self.enter(Operation::SelectPosts)?;
        rows_or_fault(fault, || {
            let state = self.state()?;
            let mut selected: Vec<(usize, &StoredPost)> = state
                .posts
                .iter()
                .enumerate()
                .filter(|(_, post)| matches_filter(post, filter))
                .collect();
            // Newest first; later inserts win ties.
            selected.sort_by(|(ia, a), (ib, b)| b.posted_at.cmp(&a.posted_at).then(ib.cmp(ia)));
            let rows = selected
                .into_iter()
                .skip(range.from)
                .take(range.row_count())
                .map(|(_, post)| state.post_row(post))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(rows))
        })
    }

    async fn select_post(&self, id: &PostId) -> Result<Option<Value>, RepoError> {
        match self.enter(Operation::SelectPost)? {
            Some(Fault::StaleRead) => return Ok(None),
            Some(Fault::Malformed) => return Ok(Some(json!({ "id": id }))),
            _ => {}
        }
        let state = self.state()?;
        state
            .posts
            .iter()
            .find(|post| &post.id == id)
            .map(|post| state.post_row(post))
            .transpose()
    }

    async fn insert_post(&self, params: InsertPostParams) -> Result<Value, RepoError> {
        self.enter(Operation::InsertPost)?;
        let mut state = self.state()?;
        if state.profile(&params.author_id).is_none() {
            return Err(RepoError::InvalidInput {
                message: format!("unknown author `{}`", params.author_id),
            });
        }
        let id = insert_post_row(&mut state, params.author_id, params.content, params.posted_at)?;
        Ok(json!({ "id": id }))
    }

    async fn update_attachment(&self, id: &PostId, path: &str) -> Result<(), RepoError> {
        self.enter(Operation::UpdateAttachment)?;
        let mut state = self.state()?;
        let post = state
            .posts
            .iter_mut()
            .find(|post| &post.id == id)
            .ok_or(RepoError::NotFound)?;
        post.attachment_url = Some(path.to_string());
        Ok(())
    }
}

#[async_trait]
impl LikesRepo for InMemoryBackend {
    async fn select_liked_post_ids(&self, profile: &ProfileId) -> Result<Value, RepoError> {
        let fault = self.enter(Operation::SelectLikedPostIds)?;
        rows_or_fault(fault, || {
            let state = self.state()?;
            Ok(Value::Array(
                state
                    .likes
                    .iter()
                    .filter(|like| &like.profile_id == profile)
                    .map(|like| json!({ "post_id": like.post_id }))
                    .collect(),
            ))
        })
    }

    async fn select_like(&self, edge: &LikeEdge) -> Result<Value, RepoError> {
        let fault = self.enter(Operation::SelectLike)?;
        rows_or_fault(fault, || {
            let state = self.state()?;
            Ok(Value::Array(
                state
                    .likes
                    .iter()
                    .filter(|like| *like == edge)
                    .map(|like| json!(like))
                    .collect(),
            ))
        })
    }

    async fn insert_like(&self, edge: &LikeEdge) -> Result<(), RepoError> {
        self.enter(Operation::InsertLike)?;
        let mut state = self.state()?;
        if state.likes.contains(edge) {
            return Err(RepoError::Duplicate {
                constraint: "like_pkey".to_string(),
            });
        }
        state.likes.push(edge.clone());
        Ok(())
    }

    async fn delete_like(&self, edge: &LikeEdge) -> Result<u64, RepoError> {
        self.enter(Operation::DeleteLike)?;
        let mut state = self.state()?;
        let before = state.likes.len();
        state.likes.retain(|like| like != edge);
        Ok((before - state.likes.len()) as u64)
    }
}

#[async_trait]
impl FollowsRepo for InMemoryBackend {
    async fn select_following_ids(&self, follower: &ProfileId) -> Result<Value, RepoError> {
        let fault = self.enter(Operation::SelectFollowingIds)?;
        rows_or_fault(fault, || {
            let state = self.state()?;
            Ok(Value::Array(
                state
                    .follows
                    .iter()
                    .filter(|edge| &edge.follower_id == follower)
                    .map(|edge| json!({ "following_id": edge.following_id }))
                    .collect(),
            ))
        })
    }

    async fn select_following(&self, follower: &ProfileId) -> Result<Value, RepoError> {
        let fault = self.enter(Operation::SelectFollowing)?;
        rows_or_fault(fault, || {
            let state = self.state()?;
            Ok(Value::Array(
                state
                    .follows
                    .iter()
                    .filter(|edge| &edge.follower_id == follower)
                    .filter_map(|edge| state.profile(&edge.following_id))
                    .map(|profile| json!({ "following": profile_row(profile) }))
                    .collect(),
            ))
        })
    }

    async fn select_followers(&self, followee: &ProfileId) -> Result<Value, RepoError> {
        let fault = self.enter(Operation::SelectFollowers)?;
        rows_or_fault(fault, || {
            let state = self.state()?;
            Ok(Value::Array(
                state
                    .follows
                    .iter()
                    .filter(|edge| &edge.following_id == followee)
                    .filter_map(|edge| state.profile(&edge.follower_id))
                    .map(|profile| json!({ "follower": profile_row(profile) }))
                    .collect(),
            ))
        })
    }

    async fn select_follow(&self, edge: &FollowEdge) -> Result<Value, RepoError> {
        let fault = self.enter(Operation::SelectFollow)?;
        rows_or_fault(fault, || {
            let state = self.state()?;
            Ok(Value::Array(
                state
                    .follows
                    .iter()
                    .filter(|existing| *existing == edge)
                    .map(|existing| json!(existing))
                    .collect(),
            ))
        })
    }

    async fn insert_follow(&self, edge: &FollowEdge) -> Result<(), RepoError> {
        self.enter(Operation::InsertFollow)?;
        let mut state = self.state()?;
        if state.follows.contains(edge) {
            return Err(RepoError::Duplicate {
                constraint: "follow_pkey".to_string(),
            });
        }
        state.follows.push(edge.clone());
        Ok(())
    }

    async fn delete_follow(&self, edge: &FollowEdge) -> Result<u64, RepoError> {
        self.enter(Operation::DeleteFollow)?;
        let mut state = self.state()?;
        let before = state.follows.len();
        state.follows.retain(|existing| existing != edge);
        Ok((before - state.follows.len()) as u64)
    }
}

#[async_trait]
impl ProfilesRepo for InMemoryBackend {
    async fn select_profile(&self, id: &ProfileId) -> Result<Option<Value>, RepoError> {
        match self.enter(Operation::SelectProfile)? {
            Some(Fault::StaleRead) => return Ok(None),
            Some(Fault::Malformed) => return Ok(Some(json!({ "id": id }))),
            _ => {}
        }
        let state = self.state()?;
        Ok(state.profile(id).map(profile_row))
    }

    async fn update_avatar(&self, id: &ProfileId, path: Option<&str>) -> Result<(), RepoError> {
        self.enter(Operation::UpdateAvatar)?;
        let mut state = self.state()?;
        let profile = state
            .profiles
            .iter_mut()
            .find(|profile| &profile.id == id)
            .ok_or(RepoError::NotFound)?;
        profile.avatar_url = path.map(str::to_string);
        Ok(())
    }
}

#[async_trait]
impl ObjectStorage for InMemoryBackend {
    async fn upload(
        &self,
        bucket: Bucket,
        key: &str,
        object: UploadObject,
        upsert: bool,
    ) -> Result<StoredObject, RepoError> {
        self.enter(Operation::Upload)?;
        let mut state = self.state()?;
        let slot = (bucket, key.to_string());
        if !upsert && state.objects.contains_key(&slot) {
            return Err(RepoError::Duplicate {
                constraint: format!("{}/{key}", bucket.as_str()),
            });
        }
        state.objects.insert(slot, object);
        Ok(StoredObject {
            path: key.to_string(),
        })
    }

    fn public_url(&self, bucket: Bucket, path: &str) -> String {
        format!("memory://{}/{path}", bucket.as_str())
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::domain::schema::parse_posts;

    fn profile(backend: &InMemoryBackend, id: &str) -> ProfileId {
        backend
            .add_profile(ProfileId::new(id).expect("valid id"), id, id)
            .expect("seed profile")
            .id
    }

    #[tokio::test]
    async fn posts_come_back_newest_first_within_range() {
        let backend = InMemoryBackend::new();
        let author = profile(&backend, "u-1");
        let older = backend
            .add_post(&author, "older", datetime!(2025-03-01 09:00 UTC))
            .expect("seed post");
        let newer = backend
            .add_post(&author, "newer", datetime!(2025-03-01 10:00 UTC))
            .expect("seed post");

        let rows = backend
            .select_posts(&PostFilter::All, RowRange { from: 0, to: 24 })
            .await
            .expect("rows");
        let posts = parse_posts(&rows).expect("valid rows");
        assert_eq!(
            posts.iter().map(|post| post.id.clone()).collect::<Vec<_>>(),
            vec![newer, older.clone()]
        );

        let rows = backend
            .select_posts(&PostFilter::All, RowRange { from: 1, to: 25 })
            .await
            .expect("rows");
        let posts = parse_posts(&rows).expect("valid rows");
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, older);
    }

    #[tokio::test]
    async fn duplicate_like_insert_is_rejected() {
        let backend = InMemoryBackend::new();
        let author = profile(&backend, "u-1");
        let post = backend
            .add_post(&author, "hi", datetime!(2025-03-01 10:00 UTC))
            .expect("seed post");
        let edge = LikeEdge {
            profile_id: author,
            post_id: post,
        };

        backend.insert_like(&edge).await.expect("first insert");
        assert!(matches!(
            backend.insert_like(&edge).await,
            Err(RepoError::Duplicate { .. })
        ));
        assert_eq!(backend.delete_like(&edge).await.expect("delete"), 1);
        assert_eq!(backend.delete_like(&edge).await.expect("delete"), 0);
    }

    #[tokio::test]
    async fn injected_faults_apply_until_healed() {
        let backend = InMemoryBackend::new();
        let viewer = profile(&backend, "u-1");

        backend.inject(Operation::SelectFollowingIds, Fault::Error);
        assert!(backend.select_following_ids(&viewer).await.is_err());

        backend.heal(Operation::SelectFollowingIds);
        assert_eq!(
            backend.select_following_ids(&viewer).await.expect("rows"),
            json!([])
        );
        assert_eq!(backend.calls(Operation::SelectFollowingIds), 2);
    }

    #[tokio::test]
    async fn upload_without_upsert_refuses_overwrite() {
        let backend = InMemoryBackend::new();
        let object = || UploadObject {
            bytes: Bytes::from_static(b"img"),
            content_type: "image/png".to_string(),
        };

        backend
            .upload(Bucket::Images, "p-1", object(), false)
            .await
            .expect("first upload");
        assert!(matches!(
            backend.upload(Bucket::Images, "p-1", object(), false).await,
            Err(RepoError::Duplicate { .. })
        ));
        backend
            .upload(Bucket::Images, "p-1", object(), true)
            .await
            .expect("upsert");
    }
}
