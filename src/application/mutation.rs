//! Optimistic like and follow toggles.
//!
//! The view flips first, the backend toggle runs, and the affected queries
//! are invalidated whatever the outcome. Cached collections are never
//! patched; views converge once the refetched snapshot arrives.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::application::error::AppError;
use crate::application::posts::PostQueries;
use crate::application::profiles::ProfileQueries;
use crate::application::view::{FeedViewModel, FollowViewModel};
use crate::cache::{QueryCache, QueryFilter, QueryKey};
use crate::domain::error::DomainError;
use crate::domain::types::{EdgeChange, FeedKind, PostId};

/// What happens to the local flag when the backend call fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RollbackPolicy {
    /// Leave the flag flipped; the invalidation refetch corrects the count
    /// but not the override.
    #[default]
    KeepFlipped,
    /// Restore the flag to what it was before the toggle.
    RollbackOnError,
}

#[derive(Clone)]
pub struct MutationController {
    posts: PostQueries,
    profiles: ProfileQueries,
    cache: Arc<QueryCache>,
    policy: RollbackPolicy,
}

impl MutationController {
    pub fn new(
        posts: PostQueries,
        profiles: ProfileQueries,
        cache: Arc<QueryCache>,
        policy: RollbackPolicy,
    ) -> Self {
        Self {
            posts,
            profiles,
            cache,
            policy,
        }
    }

    pub fn policy(&self) -> RollbackPolicy {
        self.policy
    }

    /// Toggle the viewer's like on `post`, which must be rendered by `view`.
    pub async fn toggle_like(
        &self,
        view: &mut FeedViewModel,
        post: &PostId,
    ) -> Result<EdgeChange, AppError> {
        let (previous, now_on) = view
            .flip_like(post)
            .ok_or_else(|| DomainError::not_found("post", post))?;
        let viewer = view.viewer().clone();

        let result = self.posts.toggle_like(&viewer, post).await;

        self.cache
            .invalidate(&QueryFilter::Exact(QueryKey::Post(post.clone())));
        self.cache.invalidate(&QueryFilter::AllFeeds);

        match result {
            Ok(change) => {
                if change.is_present() != now_on {
                    debug!(post = %post, "Like toggle disagreed with the local flag");
                }
                Ok(change)
            }
            Err(err) => {
                warn!(post = %post, error = %err, policy = ?self.policy, "Like toggle failed");
                if self.policy == RollbackPolicy::RollbackOnError {
                    view.restore_like(post, previous);
                }
                Err(err)
            }
        }
    }

    /// Toggle whether the viewer follows the profile shown by `view`.
    ///
    /// A self-follow is rejected before the local flag moves.
    pub async fn toggle_follow(&self, view: &mut FollowViewModel) -> Result<EdgeChange, AppError> {
        if !view.can_follow() {
            return Err(DomainError::validation("a profile cannot follow itself").into());
        }

        let viewer = view.viewer().clone();
        let target = view.target().clone();
        let previous = view.state().local();
        let now_on = view.state_mut().flip();

        let result = self.profiles.toggle_following(&viewer, &target).await;

        self.cache
            .invalidate(&QueryFilter::ProfileGraph(target.clone()));
        self.cache
            .invalidate(&QueryFilter::ProfileGraph(viewer.clone()));
        self.cache.invalidate(&QueryFilter::Exact(QueryKey::Posts(
            FeedKind::Following,
        )));

        match result {
            Ok(change) => {
                if change.is_present() != now_on {
                    debug!(target = %target, "Follow toggle disagreed with the local flag");
                }
                Ok(change)
            }
            Err(err) => {
                warn!(target = %target, error = %err, policy = ?self.policy, "Follow toggle failed");
                if self.policy == RollbackPolicy::RollbackOnError {
                    view.state_mut().restore_local(previous);
                }
                Err(err)
            }
        }
    }
}
