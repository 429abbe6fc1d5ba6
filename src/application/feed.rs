//! Feed pagination engine.
//!
//! Turns 25-item backend pages into one append-only list per feed kind,
//! stored in the query cache under `QueryKey::Posts(kind)`.

use std::sync::Arc;

use tracing::debug;

use crate::application::error::AppError;
use crate::application::pagination::{FeedPages, OffsetCursor};
use crate::application::posts::PostQueries;
use crate::cache::{QueryCache, QueryKey};
use crate::domain::entities::PostRecord;
use crate::domain::types::{FeedKind, ProfileId};

#[derive(Clone)]
pub struct FeedService {
    posts: PostQueries,
    cache: Arc<QueryCache>,
}

impl FeedService {
    pub fn new(posts: PostQueries, cache: Arc<QueryCache>) -> Self {
        Self { posts, cache }
    }

    /// One page of `kind` as seen by `viewer`, straight from the backend.
    pub async fn fetch_page(
        &self,
        kind: &FeedKind,
        viewer: &ProfileId,
        cursor: OffsetCursor,
    ) -> Result<Vec<PostRecord>, AppError> {
        match kind {
            FeedKind::All => self.posts.get_feed(cursor).await,
            FeedKind::Following => self.posts.get_following_feed(viewer, cursor).await,
            FeedKind::Liked => self.posts.get_likes_feed(viewer, cursor).await,
            FeedKind::Author(author) => self.posts.get_author_feed(author, cursor).await,
        }
    }

    /// Cached pages of `kind`.
    ///
    /// With nothing cached the first page is fetched. A stale entry is
    /// refetched page by page, as many pages as it held, each cursor taken
    /// from the pages just refetched.
    pub async fn load(
        &self,
        kind: &FeedKind,
        viewer: &ProfileId,
    ) -> Result<FeedPages<PostRecord>, AppError> {
        let key = QueryKey::Posts(kind.clone());
        self.cache
            .feeds()
            .get_or_fetch(&key, |previous| async move {
                let wanted = previous.map_or(1, |pages| pages.page_count().max(1));
                self.refetch(kind, viewer, wanted).await
            })
            .await
    }

    /// Append the next page of `kind`. Does nothing once the last held page
    /// came back short.
    ///
    /// When the held pages were invalidated or reset while waiting for the
    /// feed's gate, the feed is refetched from cursor zero instead: one page
    /// more than the stale entry held, or just the first page after a reset.
    pub async fn load_next(
        &self,
        kind: &FeedKind,
        viewer: &ProfileId,
    ) -> Result<FeedPages<PostRecord>, AppError> {
        let current = self.load(kind, viewer).await?;
        if !current.has_next_page() {
            return Ok(current);
        }

        let key = QueryKey::Posts(kind.clone());
        let slot = self.cache.feeds();
        let stale_key = &key;
        let enabled = self.cache.config().enabled;
        slot.update(&key, |held| async move {
            // Without a cache nothing can retire the pages just loaded.
            let held = if enabled { held } else { Some(current) };
            let Some(mut pages) = held else {
                let wanted = slot
                    .peek(stale_key)
                    .map_or(1, |stale| stale.page_count() + 1);
                debug!(kind = %kind, wanted, "Held feed retired, refetching");
                return self.refetch(kind, viewer, wanted).await;
            };
            let Some(cursor) = pages.next_cursor() else {
                return Ok(pages);
            };
            let page = self.fetch_page(kind, viewer, cursor).await?;
            debug!(
                kind = %kind,
                cursor = cursor.offset(),
                fetched = page.len(),
                "Appended feed page"
            );
            pages.push_page(page);
            Ok(pages)
        })
        .await
    }

    /// Drop every cached query so the next read of any feed starts again
    /// from cursor zero.
    pub fn reset(&self) {
        self.cache.reset();
    }

    async fn refetch(
        &self,
        kind: &FeedKind,
        viewer: &ProfileId,
        wanted: usize,
    ) -> Result<FeedPages<PostRecord>, AppError> {
        let mut pages = FeedPages::empty();
        while pages.page_count() < wanted {
            let Some(cursor) = pages.next_cursor() else {
                break;
            };
            let page = self.fetch_page(kind, viewer, cursor).await?;
            pages.push_page(page);
        }
        debug!(
            kind = %kind,
            pages = pages.page_count(),
            items = pages.len(),
            "Fetched feed"
        );
        Ok(pages)
    }
}

/// Whether rendering the item at `rendered_index` (counted across all
/// pages) should request the next page: only the last item of the last page
/// does, and only while more pages may exist.
pub fn should_prefetch<T>(pages: &FeedPages<T>, rendered_index: usize) -> bool {
    pages.has_next_page() && !pages.is_empty() && rendered_index + 1 == pages.len()
}
