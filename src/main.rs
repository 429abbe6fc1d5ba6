use std::{path::Path, process, sync::Arc};

use chorus::{
    application::{
        error::{AppError, ErrorReport},
        pagination::FeedPages,
        posts::{CreatePostCommand, NewAttachment},
        session::{Backend, Session},
        view::{FeedViewModel, FollowViewModel},
    },
    cache::{CacheConfig, QueryCache},
    config::{self, BookmarksCommand, Command, FeedArgs, FeedChoice, PostCommand, ProfileCommand},
    domain::{
        error::DomainError,
        posts::avatar_initials,
        types::{FeedKind, PostId, ProfileId},
    },
    infra::{bookmarks::BookmarkStore, error::InfraError, rest::RestBackend, telemetry},
};
use serde::Serialize;
use serde_json::json;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    let report = ErrorReport::from_error("chorus", error);
    let log = || error!(source = report.source, chain = ?report.messages, "application error");
    if dispatcher::has_been_set() {
        log();
    } else {
        let subscriber = tracing_fmt()
            .with_max_level(Level::ERROR)
            .with_writer(std::io::stderr)
            .finish();
        let dispatch = Dispatch::new(subscriber);
        dispatcher::with_default(&dispatch, log);
    }
    eprintln!("{}", error.presentation_message());
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging)?;

    match cli_args.command {
        Command::Bookmarks(command) => run_bookmarks(&settings, command).await,
        command => {
            let session = build_session(&settings)?;
            match command {
                Command::Feed(args) => run_feed(&session, args).await,
                Command::Post(command) => run_post(&session, command).await,
                Command::Profile(command) => run_profile(&session, command).await,
                Command::Bookmarks(_) => Ok(()),
            }
        }
    }
}

fn build_session(settings: &config::Settings) -> Result<Session, AppError> {
    let user_id = settings.backend.user_id.as_deref().ok_or_else(|| {
        InfraError::configuration("backend.user_id is required for this command")
    })?;
    let viewer = ProfileId::new(user_id)?;
    let backend = RestBackend::from_settings(&settings.backend)?;
    let cache = Arc::new(QueryCache::new(CacheConfig::from(&settings.cache)));
    info!(viewer = %viewer, cache_enabled = settings.cache.enabled, "Session started");
    Ok(Session::new(
        viewer,
        Backend::from_shared(Arc::new(backend)),
        cache,
        settings.mutations.rollback,
    ))
}

async fn run_feed(session: &Session, args: FeedArgs) -> Result<(), AppError> {
    let kind = match args.author {
        Some(author) => FeedKind::Author(ProfileId::new(author)?),
        None => match args.kind {
            FeedChoice::All => FeedKind::All,
            FeedChoice::Following => FeedKind::Following,
            FeedChoice::Liked => FeedKind::Liked,
        },
    };

    let feeds = session.feeds();
    if let Some(cursor) = args.cursor {
        let page = feeds.fetch_page(&kind, session.viewer(), cursor).await?;
        return print_json(&json!({
            "kind": kind.to_string(),
            "cursor": cursor.offset(),
            "posts": page,
        }));
    }

    let mut pages = feeds.load(&kind, session.viewer()).await?;
    while pages.page_count() < args.pages && pages.has_next_page() {
        pages = feeds.load_next(&kind, session.viewer()).await?;
    }

    let mut view = FeedViewModel::new(session.viewer().clone());
    let ticket = view.handle().ticket();
    view.apply(&ticket, pages);
    print_json(&json!({
        "kind": kind.to_string(),
        "pages": view.pages().page_count(),
        "next_cursor": view.pages().next_cursor().map(|cursor| cursor.offset()),
        "posts": view.cards(),
    }))
}

async fn run_post(session: &Session, command: PostCommand) -> Result<(), AppError> {
    match command {
        PostCommand::Show { id } => {
            let id = PostId::new(id)?;
            let post = session
                .post(&id)
                .await?
                .ok_or_else(|| DomainError::not_found("post", &id))?;
            print_json(&post)
        }
        PostCommand::Create { content, attach } => {
            let attachment = match attach {
                Some(path) => Some(read_attachment(&path).await?),
                None => None,
            };
            let post_id = session
                .posts()
                .create_post(CreatePostCommand {
                    author: session.viewer().clone(),
                    content,
                    attachment,
                })
                .await?;
            print_json(&json!({ "id": post_id }))
        }
        PostCommand::Like { id } => {
            let id = PostId::new(id)?;
            let post = session
                .post(&id)
                .await?
                .ok_or_else(|| DomainError::not_found("post", &id))?;

            let mut view = FeedViewModel::new(session.viewer().clone());
            let mut pages = FeedPages::empty();
            pages.push_page(vec![post]);
            let ticket = view.handle().ticket();
            view.apply(&ticket, pages);

            let change = session.mutations().toggle_like(&mut view, &id).await?;

            if let Some(refetched) = session.post(&id).await? {
                let mut pages = FeedPages::empty();
                pages.push_page(vec![refetched]);
                view.apply(&ticket, pages);
            }
            print_json(&json!({
                "liked": change.is_present(),
                "post": view.cards().first(),
            }))
        }
    }
}

async fn run_profile(session: &Session, command: ProfileCommand) -> Result<(), AppError> {
    match command {
        ProfileCommand::Show { id } => {
            let id = ProfileId::new(id)?;
            let profile = session
                .profile(&id)
                .await?
                .ok_or_else(|| DomainError::not_found("profile", &id))?;
            let avatar = match profile.avatar_url.as_deref() {
                Some(path) => json!({ "url": session.profiles().avatar_url(path) }),
                None => json!({ "initials": avatar_initials(&profile.name) }),
            };
            print_json(&json!({ "profile": profile, "avatar": avatar }))
        }
        ProfileCommand::Follow { id } => {
            let target = ProfileId::new(id)?;
            let followers = session.followers(&target).await?;
            let mut view = FollowViewModel::new(session.viewer().clone(), target.clone(), &followers);
            let change = session.mutations().toggle_follow(&mut view).await?;

            let ticket = view.handle().ticket();
            let followers = session.followers(&target).await?;
            view.apply(&ticket, &followers);
            print_json(&json!({
                "following": change.is_present(),
                "followers": view.state().displayed_count(),
            }))
        }
        ProfileCommand::Followers { id } => {
            let id = ProfileId::new(id)?;
            print_json(&session.followers(&id).await?)
        }
        ProfileCommand::Following { id } => {
            let id = ProfileId::new(id)?;
            print_json(&session.following(&id).await?)
        }
        ProfileCommand::Avatar { file, clear } => {
            let file = match (file, clear) {
                (Some(path), false) => Some(read_attachment(&path).await?),
                (None, true) => None,
                _ => {
                    return Err(DomainError::validation("pass either --file or --clear").into());
                }
            };
            let cleared = file.is_none();
            session.profiles().update_avatar(session.viewer(), file).await?;
            print_json(&json!({ "profile": session.viewer(), "cleared": cleared }))
        }
    }
}

async fn run_bookmarks(settings: &config::Settings, command: BookmarksCommand) -> Result<(), AppError> {
    let mut store = BookmarkStore::load(settings.bookmarks.path.clone()).await?;
    match command {
        BookmarksCommand::List => print_json(&store.list()),
        BookmarksCommand::Toggle { id } => {
            let id = PostId::new(id)?;
            let bookmarked = store.toggle(&id).await?;
            print_json(&json!({ "id": id, "bookmarked": bookmarked }))
        }
    }
}

async fn read_attachment(path: &Path) -> Result<NewAttachment, AppError> {
    let bytes = tokio::fs::read(path).await.map_err(InfraError::from)?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| DomainError::validation(format!("`{}` is not a file", path.display())))?;
    Ok(NewAttachment::new(file_name, bytes))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), AppError> {
    let body = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to encode output: {err}")))?;
    println!("{body}");
    Ok(())
}
