//! Profile queries: summaries, relationship lists, follows and avatars.

use std::sync::Arc;

use tracing::{debug, info};

use crate::application::error::AppError;
use crate::application::posts::NewAttachment;
use crate::application::repos::{FollowsRepo, ObjectStorage, ProfilesRepo, RepoError};
use crate::domain::entities::{FollowEdge, ProfileRecord};
use crate::domain::error::DomainError;
use crate::domain::schema::{count_rows, parse_embedded_profiles, parse_profile};
use crate::domain::types::{Bucket, EdgeChange, ProfileId};

#[derive(Clone)]
pub struct ProfileQueries {
    profiles: Arc<dyn ProfilesRepo>,
    follows: Arc<dyn FollowsRepo>,
    storage: Arc<dyn ObjectStorage>,
}

impl ProfileQueries {
    pub fn new(
        profiles: Arc<dyn ProfilesRepo>,
        follows: Arc<dyn FollowsRepo>,
        storage: Arc<dyn ObjectStorage>,
    ) -> Self {
        Self {
            profiles,
            follows,
            storage,
        }
    }

    /// `Ok(None)` when no profile has this id. Backend failures are errors.
    pub async fn get_profile(&self, id: &ProfileId) -> Result<Option<ProfileRecord>, AppError> {
        let row = self.profiles.select_profile(id).await?;
        Ok(row.as_ref().map(parse_profile).transpose()?)
    }

    /// Unfollow `target` if `viewer` follows it, follow it otherwise.
    pub async fn toggle_following(
        &self,
        viewer: &ProfileId,
        target: &ProfileId,
    ) -> Result<EdgeChange, AppError> {
        if viewer == target {
            return Err(DomainError::validation("a profile cannot follow itself").into());
        }

        let edge = FollowEdge {
            follower_id: viewer.clone(),
            following_id: target.clone(),
        };

        let existing = self.follows.select_follow(&edge).await?;
        if count_rows(&existing, "follow")? > 0 {
            let removed = self.follows.delete_follow(&edge).await?;
            if removed == 0 {
                debug!(viewer = %viewer, target = %target, "Follow was already removed");
            }
            return Ok(EdgeChange::Deleted);
        }

        match self.follows.insert_follow(&edge).await {
            Ok(()) => Ok(EdgeChange::Inserted),
            Err(RepoError::Duplicate { constraint }) => {
                debug!(viewer = %viewer, target = %target, constraint, "Follow already present");
                Ok(EdgeChange::Inserted)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Replace the avatar of `profile` with `file`, or clear it with `None`.
    ///
    /// Clearing leaves the stored object in place.
    pub async fn update_avatar(
        &self,
        profile: &ProfileId,
        file: Option<NewAttachment>,
    ) -> Result<(), AppError> {
        let Some(file) = file else {
            self.profiles.update_avatar(profile, None).await?;
            info!(profile = %profile, "Avatar cleared");
            return Ok(());
        };

        let stored = self
            .storage
            .upload(Bucket::Avatars, profile.as_str(), file.into_upload(), true)
            .await?;
        self.profiles
            .update_avatar(profile, Some(&stored.path))
            .await?;
        info!(profile = %profile, path = %stored.path, "Avatar updated");
        Ok(())
    }

    /// Profiles following `profile`.
    pub async fn get_profile_followers(
        &self,
        profile: &ProfileId,
    ) -> Result<Vec<ProfileRecord>, AppError> {
        let rows = self.follows.select_followers(profile).await?;
        Ok(parse_embedded_profiles(&rows, "follower")?)
    }

    /// Profiles `profile` follows.
    pub async fn get_profile_following(
        &self,
        profile: &ProfileId,
    ) -> Result<Vec<ProfileRecord>, AppError> {
        let rows = self.follows.select_following(profile).await?;
        Ok(parse_embedded_profiles(&rows, "following")?)
    }

    /// URL of a stored avatar.
    pub fn avatar_url(&self, path: &str) -> String {
        self.storage.public_url(Bucket::Avatars, path)
    }
}
