//! Post creation with attachments, avatar updates and partial failures.

use std::sync::Arc;

use bytes::Bytes;
use chorus::{
    application::{
        error::{AppError, WriteStage},
        mutation::RollbackPolicy,
        posts::{CreatePostCommand, NewAttachment},
        session::{Backend, Session},
    },
    cache::QueryCache,
    domain::types::{Bucket, ProfileId},
    infra::memory::{Fault, InMemoryBackend, Operation},
};

fn setup() -> (Arc<InMemoryBackend>, Session) {
    let backend = Arc::new(InMemoryBackend::new());
    let viewer = backend
        .add_profile(ProfileId::new("u-1").expect("valid id"), "Viewer", "viewer")
        .expect("seed viewer")
        .id;
    let session = Session::new(
        viewer,
        Backend::from_shared(backend.clone()),
        Arc::new(QueryCache::default()),
        RollbackPolicy::KeepFlipped,
    );
    (backend, session)
}

fn command(session: &Session, attachment: Option<NewAttachment>) -> CreatePostCommand {
    CreatePostCommand {
        author: session.viewer().clone(),
        content: "first light".to_string(),
        attachment,
    }
}

fn image() -> NewAttachment {
    NewAttachment::new("sunrise.png", Bytes::from_static(b"\x89PNG"))
}

#[tokio::test]
async fn text_post_is_created() {
    let (backend, session) = setup();

    let id = session
        .posts()
        .create_post(command(&session, None))
        .await
        .expect("created");

    let post = session.post(&id).await.expect("read").expect("exists");
    assert_eq!(post.content, "first light");
    assert_eq!(post.author.id, *session.viewer());
    assert!(post.attachment_url.is_none());
    assert_eq!(backend.calls(Operation::Upload), 0);
}

#[tokio::test]
async fn attachment_is_stored_under_the_post_id_and_linked() {
    let (backend, session) = setup();

    let id = session
        .posts()
        .create_post(command(&session, Some(image())))
        .await
        .expect("created");

    assert_eq!(
        backend.object(Bucket::Images, id.as_str()),
        Some(Bytes::from_static(b"\x89PNG"))
    );
    let path = backend.attachment_of(&id).expect("linked");
    assert_eq!(path, id.as_str());
    assert_eq!(
        session.posts().attachment_url(&path),
        format!("memory://images/{id}")
    );
}

#[tokio::test]
async fn blank_content_is_rejected_before_any_write() {
    let (backend, session) = setup();
    let mut blank = command(&session, None);
    blank.content = "   ".to_string();

    let err = session
        .posts()
        .create_post(blank)
        .await
        .expect_err("blank");
    assert!(err.is_validation());
    assert_eq!(backend.calls(Operation::InsertPost), 0);
}

#[tokio::test]
async fn failed_upload_reports_the_created_post() {
    let (backend, session) = setup();
    backend.inject(Operation::Upload, Fault::Error);

    let err = session
        .posts()
        .create_post(command(&session, Some(image())))
        .await
        .expect_err("upload fails");

    match err {
        AppError::PartialFailure { post_id, stage, .. } => {
            assert_eq!(stage, WriteStage::AttachmentUpload);
            let post = session.post(&post_id).await.expect("read").expect("kept");
            assert!(post.attachment_url.is_none());
        }
        other => panic!("expected partial failure, got {other:?}"),
    }
    assert_eq!(backend.post_count(), 1);
}

#[tokio::test]
async fn failed_link_reports_the_created_post() {
    let (backend, session) = setup();
    backend.inject(Operation::UpdateAttachment, Fault::Error);

    let err = session
        .posts()
        .create_post(command(&session, Some(image())))
        .await
        .expect_err("link fails");

    match err {
        AppError::PartialFailure { post_id, stage, .. } => {
            assert_eq!(stage, WriteStage::AttachmentLink);
            assert!(backend.object(Bucket::Images, post_id.as_str()).is_some());
            assert!(backend.attachment_of(&post_id).is_none());
        }
        other => panic!("expected partial failure, got {other:?}"),
    }
}

#[tokio::test]
async fn avatar_is_replaced_then_cleared() {
    let (backend, session) = setup();
    let viewer = session.viewer().clone();

    session
        .profiles()
        .update_avatar(&viewer, Some(NewAttachment::new("me.jpg", Bytes::from_static(b"one"))))
        .await
        .expect("first avatar");
    session
        .profiles()
        .update_avatar(&viewer, Some(NewAttachment::new("me.jpg", Bytes::from_static(b"two"))))
        .await
        .expect("replaced avatar");
    assert_eq!(
        backend.object(Bucket::Avatars, viewer.as_str()),
        Some(Bytes::from_static(b"two"))
    );

    let profile = session
        .profiles()
        .get_profile(&viewer)
        .await
        .expect("read")
        .expect("exists");
    assert_eq!(profile.avatar_url.as_deref(), Some(viewer.as_str()));

    session
        .profiles()
        .update_avatar(&viewer, None)
        .await
        .expect("cleared");
    let profile = session
        .profiles()
        .get_profile(&viewer)
        .await
        .expect("read")
        .expect("exists");
    assert!(profile.avatar_url.is_none());
    assert!(backend.object(Bucket::Avatars, viewer.as_str()).is_some());
}
