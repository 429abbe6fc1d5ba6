//! Optimistic like and follow toggles over the in-memory backend.

use std::sync::Arc;

use async_trait::async_trait;
use chorus::{
    application::{
        error::AppError,
        mutation::RollbackPolicy,
        repos::{LikesRepo, RepoError},
        session::{Backend, Session},
        view::{FeedViewModel, FollowViewModel},
    },
    cache::{QueryCache, QueryKey},
    domain::{
        entities::LikeEdge,
        error::DomainError,
        types::{EdgeChange, FeedKind, PostId, ProfileId},
    },
    infra::memory::{Fault, InMemoryBackend, Operation},
};
use serde_json::{Value, json};
use time::macros::datetime;

struct Fixture {
    backend: Arc<InMemoryBackend>,
    viewer: ProfileId,
    author: ProfileId,
    post: PostId,
}

fn fixture() -> Fixture {
    let backend = Arc::new(InMemoryBackend::new());
    let viewer = backend
        .add_profile(ProfileId::new("u-1").expect("valid id"), "Viewer", "viewer")
        .expect("seed viewer")
        .id;
    let author = backend
        .add_profile(ProfileId::new("u-2").expect("valid id"), "Author", "author")
        .expect("seed author")
        .id;
    let post = backend
        .add_post(&author, "hello", datetime!(2025-03-01 10:00 UTC))
        .expect("seed post");
    Fixture {
        backend,
        viewer,
        author,
        post,
    }
}

fn session(fixture: &Fixture, policy: RollbackPolicy) -> Session {
    Session::new(
        fixture.viewer.clone(),
        Backend::from_shared(fixture.backend.clone()),
        Arc::new(QueryCache::default()),
        policy,
    )
}

async fn mounted_feed(session: &Session) -> FeedViewModel {
    let mut view = FeedViewModel::new(session.viewer().clone());
    let ticket = view.handle().ticket();
    let pages = session
        .feeds()
        .load(&FeedKind::All, session.viewer())
        .await
        .expect("feed");
    assert!(view.apply(&ticket, pages));
    view
}

async fn refresh(session: &Session, view: &mut FeedViewModel) {
    let ticket = view.handle().ticket();
    let pages = session
        .feeds()
        .load(&FeedKind::All, session.viewer())
        .await
        .expect("refetch");
    view.apply(&ticket, pages);
}

#[tokio::test]
async fn like_then_unlike_restores_the_edge() {
    let fixture = fixture();
    let session = session(&fixture, RollbackPolicy::KeepFlipped);
    let mut view = mounted_feed(&session).await;

    let change = session
        .mutations()
        .toggle_like(&mut view, &fixture.post)
        .await
        .expect("like");
    assert_eq!(change, EdgeChange::Inserted);
    assert!(fixture.backend.has_like(&fixture.viewer, &fixture.post));

    let state = view.like_state(&fixture.post).expect("rendered");
    assert!(state.is_on());
    assert_eq!(state.displayed_count(), 1);

    refresh(&session, &mut view).await;
    let state = view.like_state(&fixture.post).expect("rendered");
    assert_eq!(state.local(), None, "override dropped once the snapshot agrees");
    assert_eq!(state.displayed_count(), 1);

    let change = session
        .mutations()
        .toggle_like(&mut view, &fixture.post)
        .await
        .expect("unlike");
    assert_eq!(change, EdgeChange::Deleted);
    assert!(!fixture.backend.has_like(&fixture.viewer, &fixture.post));

    refresh(&session, &mut view).await;
    let state = view.like_state(&fixture.post).expect("rendered");
    assert!(!state.is_on());
    assert_eq!(state.displayed_count(), 0);
}

#[tokio::test]
async fn optimistic_count_counts_the_viewer_once() {
    let fixture = fixture();
    let other = fixture
        .backend
        .add_profile(ProfileId::new("u-3").expect("valid id"), "Other", "other")
        .expect("seed other")
        .id;
    fixture.backend.add_like(&other, &fixture.post).expect("seed like");
    fixture
        .backend
        .add_like(&fixture.viewer, &fixture.post)
        .expect("seed like");
    let session = session(&fixture, RollbackPolicy::KeepFlipped);
    let mut view = mounted_feed(&session).await;

    let (_, now_on) = view.flip_like(&fixture.post).expect("rendered");
    assert!(!now_on);
    assert_eq!(view.like_state(&fixture.post).expect("rendered").displayed_count(), 1);

    view.flip_like(&fixture.post).expect("rendered");
    assert_eq!(view.like_state(&fixture.post).expect("rendered").displayed_count(), 2);
}

#[tokio::test]
async fn keep_flipped_leaves_the_override_after_a_failure() {
    let fixture = fixture();
    fixture.backend.inject(Operation::InsertLike, Fault::Error);
    let session = session(&fixture, RollbackPolicy::KeepFlipped);
    let mut view = mounted_feed(&session).await;

    let err = session
        .mutations()
        .toggle_like(&mut view, &fixture.post)
        .await
        .expect_err("insert fails");
    assert!(matches!(err, AppError::Repo(RepoError::Persistence(_))));

    let state = view.like_state(&fixture.post).expect("rendered");
    assert_eq!(state.local(), Some(true));
    assert_eq!(state.displayed_count(), 1);

    assert!(
        !session
            .cache()
            .feeds()
            .is_fresh(&QueryKey::Posts(FeedKind::All)),
        "feeds are invalidated even when the toggle fails"
    );

    refresh(&session, &mut view).await;
    let state = view.like_state(&fixture.post).expect("rendered");
    assert_eq!(state.local(), Some(true));
}

#[tokio::test]
async fn rollback_on_error_restores_the_previous_flag() {
    let fixture = fixture();
    fixture.backend.inject(Operation::InsertLike, Fault::Error);
    let session = session(&fixture, RollbackPolicy::RollbackOnError);
    let mut view = mounted_feed(&session).await;

    session
        .mutations()
        .toggle_like(&mut view, &fixture.post)
        .await
        .expect_err("insert fails");

    let state = view.like_state(&fixture.post).expect("rendered");
    assert_eq!(state.local(), None);
    assert!(!state.is_on());
    assert_eq!(state.displayed_count(), 0);
}

#[tokio::test]
async fn duplicate_insert_from_a_racing_toggle_is_success() {
    let fixture = fixture();
    fixture
        .backend
        .add_like(&fixture.viewer, &fixture.post)
        .expect("seed like");
    fixture.backend.inject(Operation::SelectLike, Fault::StaleRead);
    let session = session(&fixture, RollbackPolicy::KeepFlipped);

    let change = session
        .posts()
        .toggle_like(&fixture.viewer, &fixture.post)
        .await
        .expect("benign duplicate");
    assert_eq!(change, EdgeChange::Inserted);
    assert_eq!(fixture.backend.calls(Operation::InsertLike), 1);
    assert!(fixture.backend.has_like(&fixture.viewer, &fixture.post));
}

/// Reports a like that a concurrent toggle already removed.
struct PhantomLikes(Arc<InMemoryBackend>);

#[async_trait]
impl LikesRepo for PhantomLikes {
    async fn select_liked_post_ids(&self, profile: &ProfileId) -> Result<Value, RepoError> {
        self.0.select_liked_post_ids(profile).await
    }

    async fn select_like(&self, edge: &LikeEdge) -> Result<Value, RepoError> {
        Ok(json!([edge]))
    }

    async fn insert_like(&self, edge: &LikeEdge) -> Result<(), RepoError> {
        self.0.insert_like(edge).await
    }

    async fn delete_like(&self, edge: &LikeEdge) -> Result<u64, RepoError> {
        self.0.delete_like(edge).await
    }
}

#[tokio::test]
async fn deleting_an_already_removed_like_is_success() {
    let fixture = fixture();
    let mut backend = Backend::from_shared(fixture.backend.clone());
    let likes: Arc<dyn LikesRepo> = Arc::new(PhantomLikes(fixture.backend.clone()));
    backend.likes = likes;
    let session = Session::new(
        fixture.viewer.clone(),
        backend,
        Arc::new(QueryCache::default()),
        RollbackPolicy::KeepFlipped,
    );

    let change = session
        .posts()
        .toggle_like(&fixture.viewer, &fixture.post)
        .await
        .expect("benign delete");
    assert_eq!(change, EdgeChange::Deleted);
    assert_eq!(fixture.backend.calls(Operation::DeleteLike), 1);
}

#[tokio::test]
async fn liking_a_post_outside_the_view_is_rejected_before_any_request() {
    let fixture = fixture();
    let session = session(&fixture, RollbackPolicy::KeepFlipped);
    let mut view = mounted_feed(&session).await;
    let unknown = PostId::new("p-404").expect("valid id");

    let err = session
        .mutations()
        .toggle_like(&mut view, &unknown)
        .await
        .expect_err("not rendered");
    assert!(matches!(err, AppError::Domain(DomainError::NotFound { .. })));
    assert_eq!(fixture.backend.calls(Operation::SelectLike), 0);
}

#[tokio::test]
async fn responses_for_an_unmounted_view_are_discarded() {
    let fixture = fixture();
    let session = session(&fixture, RollbackPolicy::KeepFlipped);
    let mut view = FeedViewModel::new(fixture.viewer.clone());

    let ticket = view.handle().ticket();
    let pages = session
        .feeds()
        .load(&FeedKind::All, &fixture.viewer)
        .await
        .expect("feed");
    view.handle().unmount();

    assert!(!view.apply(&ticket, pages));
    assert!(view.pages().is_empty());
}

#[tokio::test]
async fn follow_toggle_updates_followers_after_refetch() {
    let fixture = fixture();
    let session = session(&fixture, RollbackPolicy::KeepFlipped);

    let followers = session.followers(&fixture.author).await.expect("followers");
    assert!(followers.is_empty());
    let mut view = FollowViewModel::new(fixture.viewer.clone(), fixture.author.clone(), &followers);
    assert!(view.can_follow());

    let change = session
        .mutations()
        .toggle_follow(&mut view)
        .await
        .expect("follow");
    assert_eq!(change, EdgeChange::Inserted);
    assert!(fixture.backend.has_follow(&fixture.viewer, &fixture.author));
    assert_eq!(view.state().displayed_count(), 1);

    let ticket = view.handle().ticket();
    let followers = session.followers(&fixture.author).await.expect("refetched");
    assert_eq!(followers.len(), 1);
    assert!(view.apply(&ticket, &followers));
    assert_eq!(view.state().local(), None);
    assert!(view.state().is_on());

    let following = session.following(&fixture.viewer).await.expect("following");
    assert_eq!(following[0].id, fixture.author);
}

#[tokio::test]
async fn following_yourself_is_rejected_without_flipping() {
    let fixture = fixture();
    let session = session(&fixture, RollbackPolicy::KeepFlipped);
    let mut view = FollowViewModel::new(fixture.viewer.clone(), fixture.viewer.clone(), &[]);
    assert!(!view.can_follow());

    let err = session
        .mutations()
        .toggle_follow(&mut view)
        .await
        .expect_err("self follow");
    assert!(err.is_validation());
    assert_eq!(fixture.backend.calls(Operation::SelectFollow), 0);
    assert_eq!(view.state().local(), None);
    assert!(!view.state().is_on());
    assert_eq!(view.state().displayed_count(), 0);
}
