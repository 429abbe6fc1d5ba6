//! View models owned by one mounted view.
//!
//! A view keeps the last snapshot it received plus local toggle overrides.
//! Displayed like and follower counts are derived from both on every render
//! and never stored.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::debug;

use crate::application::pagination::FeedPages;
use crate::domain::entities::{PostRecord, ProfileRecord};
use crate::domain::types::{PostId, ProfileId};

/// Mount token shared by a view and the tasks fetching for it.
#[derive(Debug, Clone, Default)]
pub struct ViewHandle {
    generation: Arc<AtomicU64>,
}

impl ViewHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ticket for a request issued now.
    pub fn ticket(&self) -> ViewTicket {
        ViewTicket {
            handle: self.clone(),
            generation: self.generation.load(Ordering::SeqCst),
        }
    }

    /// Invalidate every outstanding ticket.
    pub fn unmount(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct ViewTicket {
    handle: ViewHandle,
    generation: u64,
}

impl ViewTicket {
    /// False once the view that issued the request was unmounted.
    pub fn is_current(&self) -> bool {
        self.handle.generation.load(Ordering::SeqCst) == self.generation
    }
}

/// Membership and count for one toggle control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleState {
    snapshot_member: bool,
    snapshot_count: usize,
    local: Option<bool>,
}

impl ToggleState {
    pub fn from_snapshot(member: bool, count: usize) -> Self {
        Self {
            snapshot_member: member,
            snapshot_count: count,
            local: None,
        }
    }

    pub fn with_local(mut self, local: Option<bool>) -> Self {
        self.local = local;
        self
    }

    /// Local override when present, snapshot membership otherwise.
    pub fn is_on(&self) -> bool {
        self.local.unwrap_or(self.snapshot_member)
    }

    /// `count - [member] + [on]`
    pub fn displayed_count(&self) -> usize {
        self.snapshot_count
            .saturating_sub(usize::from(self.snapshot_member))
            + usize::from(self.is_on())
    }

    pub fn local(&self) -> Option<bool> {
        self.local
    }

    /// Flip the displayed state and return the new one.
    pub fn flip(&mut self) -> bool {
        let next = !self.is_on();
        self.local = Some(next);
        next
    }

    pub fn restore_local(&mut self, local: Option<bool>) {
        self.local = local;
    }

    /// Take a new snapshot. The override is dropped once the snapshot
    /// agrees with it.
    pub fn set_snapshot(&mut self, member: bool, count: usize) {
        self.snapshot_member = member;
        self.snapshot_count = count;
        if self.local == Some(member) {
            self.local = None;
        }
    }
}

/// A post ready to render.
#[derive(Debug, Clone, Serialize)]
pub struct PostCard<'a> {
    pub post: &'a PostRecord,
    pub liked: bool,
    pub like_count: usize,
}

/// Pages of one feed as seen by one viewer.
#[derive(Debug, Clone)]
pub struct FeedViewModel {
    viewer: ProfileId,
    pages: FeedPages<PostRecord>,
    like_overrides: HashMap<PostId, bool>,
    handle: ViewHandle,
}

impl FeedViewModel {
    pub fn new(viewer: ProfileId) -> Self {
        Self {
            viewer,
            pages: FeedPages::empty(),
            like_overrides: HashMap::new(),
            handle: ViewHandle::new(),
        }
    }

    pub fn viewer(&self) -> &ProfileId {
        &self.viewer
    }

    pub fn pages(&self) -> &FeedPages<PostRecord> {
        &self.pages
    }

    pub fn handle(&self) -> &ViewHandle {
        &self.handle
    }

    /// Accept `pages` fetched under `ticket`. Returns false, leaving the
    /// model untouched, when the view was unmounted in the meantime.
    pub fn apply(&mut self, ticket: &ViewTicket, pages: FeedPages<PostRecord>) -> bool {
        if !ticket.is_current() {
            debug!(viewer = %self.viewer, "Discarded feed response for unmounted view");
            return false;
        }
        self.set_snapshot(pages);
        true
    }

    /// Replace the held pages and drop overrides the new pages agree with.
    pub fn set_snapshot(&mut self, pages: FeedPages<PostRecord>) {
        let viewer = &self.viewer;
        self.like_overrides.retain(|id, local| {
            match pages.items().find(|post| &post.id == id) {
                Some(post) => post.is_liked_by(viewer) != *local,
                None => true,
            }
        });
        self.pages = pages;
    }

    pub fn like_state(&self, post: &PostId) -> Option<ToggleState> {
        self.pages
            .items()
            .find(|record| &record.id == post)
            .map(|record| self.state_of(record))
    }

    /// Flip the local like flag of `post`, returning the previous override
    /// and the new state. `None` when the post is not in this view.
    pub fn flip_like(&mut self, post: &PostId) -> Option<(Option<bool>, bool)> {
        let mut state = self.like_state(post)?;
        let previous = state.local();
        let next = state.flip();
        self.like_overrides.insert(post.clone(), next);
        Some((previous, next))
    }

    pub fn restore_like(&mut self, post: &PostId, local: Option<bool>) {
        match local {
            Some(value) => {
                self.like_overrides.insert(post.clone(), value);
            }
            None => {
                self.like_overrides.remove(post);
            }
        }
    }

    pub fn cards(&self) -> Vec<PostCard<'_>> {
        self.pages
            .items()
            .map(|post| {
                let state = self.state_of(post);
                PostCard {
                    post,
                    liked: state.is_on(),
                    like_count: state.displayed_count(),
                }
            })
            .collect()
    }

    fn state_of(&self, post: &PostRecord) -> ToggleState {
        ToggleState::from_snapshot(post.is_liked_by(&self.viewer), post.like_count())
            .with_local(self.like_overrides.get(&post.id).copied())
    }
}

/// Follow button and follower count on a profile page.
#[derive(Debug, Clone)]
pub struct FollowViewModel {
    viewer: ProfileId,
    target: ProfileId,
    state: ToggleState,
    handle: ViewHandle,
}

impl FollowViewModel {
    /// Build from the target's follower list.
    pub fn new(viewer: ProfileId, target: ProfileId, followers: &[ProfileRecord]) -> Self {
        let state = Self::snapshot(&viewer, followers);
        Self {
            viewer,
            target,
            state,
            handle: ViewHandle::new(),
        }
    }

    pub fn viewer(&self) -> &ProfileId {
        &self.viewer
    }

    pub fn target(&self) -> &ProfileId {
        &self.target
    }

    pub fn state(&self) -> ToggleState {
        self.state
    }

    pub fn state_mut(&mut self) -> &mut ToggleState {
        &mut self.state
    }

    pub fn handle(&self) -> &ViewHandle {
        &self.handle
    }

    /// The follow button is hidden on the viewer's own page.
    pub fn can_follow(&self) -> bool {
        self.viewer != self.target
    }

    pub fn apply(&mut self, ticket: &ViewTicket, followers: &[ProfileRecord]) -> bool {
        if !ticket.is_current() {
            debug!(target = %self.target, "Discarded followers response for unmounted view");
            return false;
        }
        let fresh = Self::snapshot(&self.viewer, followers);
        self.state
            .set_snapshot(fresh.snapshot_member, fresh.snapshot_count);
        true
    }

    fn snapshot(viewer: &ProfileId, followers: &[ProfileRecord]) -> ToggleState {
        let member = followers.iter().any(|profile| &profile.id == viewer);
        ToggleState::from_snapshot(member, followers.len())
    }
}
