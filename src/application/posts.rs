//! Post queries: single posts, feed pages, likes and post creation.

use std::sync::Arc;

use bytes::Bytes;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::application::error::{AppError, WriteStage};
use crate::application::pagination::{OffsetCursor, PageRequest};
use crate::application::repos::{
    FollowsRepo, InsertPostParams, LikesRepo, ObjectStorage, PostFilter, PostsRepo, RepoError,
    UploadObject,
};
use crate::domain::entities::{LikeEdge, PostRecord};
use crate::domain::posts::validate_content;
use crate::domain::schema::{
    count_rows, parse_inserted_post_id, parse_post, parse_post_id_column, parse_posts,
    parse_profile_id_column,
};
use crate::domain::types::{Bucket, EdgeChange, PostId, ProfileId};

/// File picked by the user to attach to a post or use as an avatar.
#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub file_name: String,
    pub bytes: Bytes,
}

impl NewAttachment {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    pub(crate) fn into_upload(self) -> UploadObject {
        let content_type = mime_guess::from_path(&self.file_name)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        UploadObject {
            bytes: self.bytes,
            content_type,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreatePostCommand {
    pub author: ProfileId,
    pub content: String,
    pub attachment: Option<NewAttachment>,
}

#[derive(Clone)]
pub struct PostQueries {
    posts: Arc<dyn PostsRepo>,
    likes: Arc<dyn LikesRepo>,
    follows: Arc<dyn FollowsRepo>,
    storage: Arc<dyn ObjectStorage>,
}

impl PostQueries {
    pub fn new(
        posts: Arc<dyn PostsRepo>,
        likes: Arc<dyn LikesRepo>,
        follows: Arc<dyn FollowsRepo>,
        storage: Arc<dyn ObjectStorage>,
    ) -> Self {
        Self {
            posts,
            likes,
            follows,
            storage,
        }
    }

    /// `Ok(None)` when no post has this id.
    pub async fn get_post(&self, id: &PostId) -> Result<Option<PostRecord>, AppError> {
        let row = self.posts.select_post(id).await?;
        Ok(row.as_ref().map(parse_post).transpose()?)
    }

    /// One page of every post, newest first.
    pub async fn get_feed(&self, cursor: OffsetCursor) -> Result<Vec<PostRecord>, AppError> {
        self.select_page(&PostFilter::All, cursor).await
    }

    /// One page of posts by profiles `viewer` follows.
    ///
    /// The followed set is read again for every page. When it is empty no
    /// post query is issued.
    pub async fn get_following_feed(
        &self,
        viewer: &ProfileId,
        cursor: OffsetCursor,
    ) -> Result<Vec<PostRecord>, AppError> {
        let rows = self.follows.select_following_ids(viewer).await?;
        let authors = parse_profile_id_column(&rows, "following_id")?;
        if authors.is_empty() {
            debug!(viewer = %viewer, "Viewer follows nobody; following feed is empty");
            return Ok(Vec::new());
        }
        self.select_page(&PostFilter::Authors(authors), cursor).await
    }

    /// One page of posts `viewer` liked, newest post first.
    ///
    /// Same once-per-page set read and empty short-circuit as the following
    /// feed.
    pub async fn get_likes_feed(
        &self,
        viewer: &ProfileId,
        cursor: OffsetCursor,
    ) -> Result<Vec<PostRecord>, AppError> {
        let rows = self.likes.select_liked_post_ids(viewer).await?;
        let ids = parse_post_id_column(&rows, "post_id")?;
        if ids.is_empty() {
            debug!(viewer = %viewer, "Viewer liked nothing; liked feed is empty");
            return Ok(Vec::new());
        }
        self.select_page(&PostFilter::Ids(ids), cursor).await
    }

    /// One page of posts written by `author`.
    pub async fn get_author_feed(
        &self,
        author: &ProfileId,
        cursor: OffsetCursor,
    ) -> Result<Vec<PostRecord>, AppError> {
        self.select_page(&PostFilter::Author(author.clone()), cursor)
            .await
    }

    /// Remove `viewer`'s like if present, add it otherwise.
    ///
    /// A concurrent toggle that wins the race (unique violation on insert,
    /// nothing to delete) still reports success.
    pub async fn toggle_like(
        &self,
        viewer: &ProfileId,
        post: &PostId,
    ) -> Result<EdgeChange, AppError> {
        let edge = LikeEdge {
            profile_id: viewer.clone(),
            post_id: post.clone(),
        };

        let existing = self.likes.select_like(&edge).await?;
        if count_rows(&existing, "like")? > 0 {
            let removed = self.likes.delete_like(&edge).await?;
            if removed == 0 {
                debug!(viewer = %viewer, post = %post, "Like was already removed");
            }
            return Ok(EdgeChange::Deleted);
        }

        match self.likes.insert_like(&edge).await {
            Ok(()) => Ok(EdgeChange::Inserted),
            Err(RepoError::Duplicate { constraint }) => {
                debug!(viewer = %viewer, post = %post, constraint, "Like already present");
                Ok(EdgeChange::Inserted)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Insert a post, then upload and link its attachment if one was given.
    ///
    /// The insert is never rolled back. A failure after it is reported as
    /// [`AppError::PartialFailure`] carrying the new post id.
    pub async fn create_post(&self, command: CreatePostCommand) -> Result<PostId, AppError> {
        let CreatePostCommand {
            author,
            content,
            attachment,
        } = command;
        let content = validate_content(&content)?.to_string();

        let row = self
            .posts
            .insert_post(InsertPostParams {
                author_id: author.clone(),
                content,
                posted_at: OffsetDateTime::now_utc(),
            })
            .await?;
        let post_id = parse_inserted_post_id(&row)?;
        info!(post = %post_id, author = %author, "Post created");

        let Some(attachment) = attachment else {
            return Ok(post_id);
        };

        let stored = match self
            .storage
            .upload(
                Bucket::Images,
                post_id.as_str(),
                attachment.into_upload(),
                false,
            )
            .await
        {
            Ok(stored) => stored,
            Err(source) => {
                warn!(post = %post_id, error = %source, "Attachment upload failed");
                return Err(AppError::partial(
                    post_id,
                    WriteStage::AttachmentUpload,
                    source,
                ));
            }
        };

        if let Err(source) = self.posts.update_attachment(&post_id, &stored.path).await {
            warn!(post = %post_id, error = %source, "Attachment link failed");
            return Err(AppError::partial(
                post_id,
                WriteStage::AttachmentLink,
                source,
            ));
        }

        Ok(post_id)
    }

    /// URL of a stored attachment.
    pub fn attachment_url(&self, path: &str) -> String {
        self.storage.public_url(Bucket::Images, path)
    }

    async fn select_page(
        &self,
        filter: &PostFilter,
        cursor: OffsetCursor,
    ) -> Result<Vec<PostRecord>, AppError> {
        let range = PageRequest::feed(cursor).range();
        let rows = self.posts.select_posts(filter, range).await?;
        Ok(parse_posts(&rows)?)
    }
}
