//! Services of one signed-in viewer, wired around a shared query cache.

use std::sync::Arc;

use tracing::info;

use crate::application::error::AppError;
use crate::application::feed::FeedService;
use crate::application::mutation::{MutationController, RollbackPolicy};
use crate::application::posts::PostQueries;
use crate::application::profiles::ProfileQueries;
use crate::application::repos::{FollowsRepo, LikesRepo, ObjectStorage, PostsRepo, ProfilesRepo};
use crate::cache::{QueryCache, QueryKey};
use crate::domain::entities::{PostRecord, ProfileRecord};
use crate::domain::types::{PostId, ProfileId};

/// Backend handles a session is built from.
#[derive(Clone)]
pub struct Backend {
    pub posts: Arc<dyn PostsRepo>,
    pub likes: Arc<dyn LikesRepo>,
    pub follows: Arc<dyn FollowsRepo>,
    pub profiles: Arc<dyn ProfilesRepo>,
    pub storage: Arc<dyn ObjectStorage>,
}

impl Backend {
    /// Use one adapter for every contract.
    pub fn from_shared<B>(backend: Arc<B>) -> Self
    where
        B: PostsRepo + LikesRepo + FollowsRepo + ProfilesRepo + ObjectStorage + 'static,
    {
        Self {
            posts: backend.clone(),
            likes: backend.clone(),
            follows: backend.clone(),
            profiles: backend.clone(),
            storage: backend,
        }
    }
}

#[derive(Clone)]
pub struct Session {
    viewer: ProfileId,
    cache: Arc<QueryCache>,
    posts: PostQueries,
    profiles: ProfileQueries,
    feeds: FeedService,
    mutations: MutationController,
}

impl Session {
    pub fn new(
        viewer: ProfileId,
        backend: Backend,
        cache: Arc<QueryCache>,
        policy: RollbackPolicy,
    ) -> Self {
        let posts = PostQueries::new(
            backend.posts,
            backend.likes,
            backend.follows.clone(),
            backend.storage.clone(),
        );
        let profiles = ProfileQueries::new(backend.profiles, backend.follows, backend.storage);
        let feeds = FeedService::new(posts.clone(), cache.clone());
        let mutations =
            MutationController::new(posts.clone(), profiles.clone(), cache.clone(), policy);

        Self {
            viewer,
            cache,
            posts,
            profiles,
            feeds,
            mutations,
        }
    }

    pub fn viewer(&self) -> &ProfileId {
        &self.viewer
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn posts(&self) -> &PostQueries {
        &self.posts
    }

    pub fn profiles(&self) -> &ProfileQueries {
        &self.profiles
    }

    pub fn feeds(&self) -> &FeedService {
        &self.feeds
    }

    pub fn mutations(&self) -> &MutationController {
        &self.mutations
    }

    /// Cached post detail.
    pub async fn post(&self, id: &PostId) -> Result<Option<PostRecord>, AppError> {
        self.cache
            .posts()
            .get_or_fetch(&QueryKey::Post(id.clone()), |_| self.posts.get_post(id))
            .await
    }

    /// Cached profile summary.
    pub async fn profile(&self, id: &ProfileId) -> Result<Option<ProfileRecord>, AppError> {
        self.cache
            .profiles()
            .get_or_fetch(&QueryKey::Profile(id.clone()), |_| {
                self.profiles.get_profile(id)
            })
            .await
    }

    /// Cached list of profiles following `id`.
    pub async fn followers(&self, id: &ProfileId) -> Result<Vec<ProfileRecord>, AppError> {
        self.cache
            .relations()
            .get_or_fetch(&QueryKey::Followers(id.clone()), |_| {
                self.profiles.get_profile_followers(id)
            })
            .await
    }

    /// Cached list of profiles `id` follows.
    pub async fn following(&self, id: &ProfileId) -> Result<Vec<ProfileRecord>, AppError> {
        self.cache
            .relations()
            .get_or_fetch(&QueryKey::Following(id.clone()), |_| {
                self.profiles.get_profile_following(id)
            })
            .await
    }

    /// End the session: nothing cached for this viewer survives.
    pub fn sign_out(&self) {
        self.cache.reset();
        info!(viewer = %self.viewer, "Session closed");
    }
}
