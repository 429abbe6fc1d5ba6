//! Offset pagination helpers shared by every feed.
//!
//! A cursor is the number of items already retrieved, not a row key. Items
//! inserted at the head of a feed while it is being paged shift later pages
//! by the same amount.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use crate::domain::posts::FEED_PAGE_SIZE;

/// Zero-based item offset into a time-ordered sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct OffsetCursor(usize);

impl OffsetCursor {
    pub const START: OffsetCursor = OffsetCursor(0);

    pub fn new(offset: usize) -> Self {
        Self(offset)
    }

    pub fn offset(self) -> usize {
        self.0
    }
}

impl fmt::Display for OffsetCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OffsetCursor {
    type Err = PaginationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<usize>()
            .map(Self)
            .map_err(|err| PaginationError::InvalidCursor(format!("`{s}`: {err}")))
    }
}

/// Inclusive row range `[from, to]` over the ordered result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRange {
    pub from: usize,
    pub to: usize,
}

impl RowRange {
    pub fn row_count(self) -> usize {
        self.to - self.from + 1
    }
}

/// Cursor-aware pagination request.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub limit: usize,
    pub cursor: OffsetCursor,
}

impl PageRequest {
    pub fn new(limit: usize, cursor: OffsetCursor) -> Self {
        Self {
            limit: limit.max(1),
            cursor,
        }
    }

    /// A standard feed page starting at `cursor`.
    pub fn feed(cursor: OffsetCursor) -> Self {
        Self::new(FEED_PAGE_SIZE, cursor)
    }

    pub fn range(&self) -> RowRange {
        RowRange {
            from: self.cursor.offset(),
            to: self.cursor.offset() + self.limit - 1,
        }
    }
}

/// Pages of one feed, in fetch order.
///
/// Cursors are always derived from the pages actually held; nothing about
/// the next offset is stored on the side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedPages<T> {
    pages: Vec<Vec<T>>,
    page_size: usize,
}

impl<T> FeedPages<T> {
    pub fn empty() -> Self {
        Self::with_page_size(FEED_PAGE_SIZE)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            pages: Vec::new(),
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn pages(&self) -> &[Vec<T>] {
        &self.pages
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn push_page(&mut self, page: Vec<T>) {
        self.pages.push(page);
    }

    /// Total number of items across all held pages.
    pub fn len(&self) -> usize {
        self.pages.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn items(&self) -> impl Iterator<Item = &T> {
        self.pages.iter().flatten()
    }

    /// Offset the next page would start at.
    pub fn cursor(&self) -> OffsetCursor {
        OffsetCursor::new(self.len())
    }

    /// A full last page means more may exist; a short or empty one ends the
    /// feed. With no pages yet, the first page is always wanted.
    pub fn has_next_page(&self) -> bool {
        self.pages
            .last()
            .is_none_or(|page| page.len() >= self.page_size)
    }

    /// Cursor for the next request, or `None` once the feed is exhausted.
    pub fn next_cursor(&self) -> Option<OffsetCursor> {
        self.has_next_page().then(|| self.cursor())
    }
}

impl<T> Default for FeedPages<T> {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Debug, Error)]
pub enum PaginationError {
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),
}
