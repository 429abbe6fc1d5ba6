use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint, builder::BoolishValueParser};

use crate::application::pagination::OffsetCursor;

/// Command-line arguments for the chorus client.
#[derive(Debug, Parser)]
#[command(name = "chorus", version, about = "Social feed client")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "CHORUS_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the backend base URL.
    #[arg(long = "backend-url", value_name = "URL", global = true)]
    pub backend_url: Option<String>,

    /// Override the backend API key.
    #[arg(long = "api-key", value_name = "KEY", global = true)]
    pub api_key: Option<String>,

    /// Override the signed-in user's access token.
    #[arg(long = "access-token", value_name = "TOKEN", global = true)]
    pub access_token: Option<String>,

    /// Override the signed-in user's profile id.
    #[arg(long = "user-id", value_name = "ID", global = true)]
    pub user_id: Option<String>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Toggle the query cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub cache_enabled: Option<bool>,

    /// What a failed like or follow does to the local flag.
    #[arg(long = "rollback-policy", value_name = "POLICY", global = true)]
    pub rollback_policy: Option<String>,

    /// Override the bookmark file.
    #[arg(long = "bookmarks-path", value_name = "PATH", value_hint = ValueHint::FilePath, global = true)]
    pub bookmarks_path: Option<PathBuf>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Print pages of a feed.
    Feed(FeedArgs),
    /// Read, write and like posts.
    #[command(subcommand)]
    Post(PostCommand),
    /// Read profiles and manage follows.
    #[command(subcommand)]
    Profile(ProfileCommand),
    /// Local bookmarks.
    #[command(subcommand)]
    Bookmarks(BookmarksCommand),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum FeedChoice {
    #[default]
    All,
    Following,
    Liked,
}

#[derive(Debug, Args, Clone)]
pub struct FeedArgs {
    /// Which feed to read.
    #[arg(long, value_enum, default_value_t = FeedChoice::All)]
    pub kind: FeedChoice,

    /// Read posts of one profile instead.
    #[arg(long, value_name = "PROFILE_ID", conflicts_with = "kind")]
    pub author: Option<String>,

    /// Number of pages to load.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(usize))]
    pub pages: usize,

    /// Fetch one uncached page starting at this offset instead.
    #[arg(long, value_name = "OFFSET", conflicts_with = "pages")]
    pub cursor: Option<OffsetCursor>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum PostCommand {
    /// Show one post.
    Show { id: String },
    /// Publish a post, optionally with an image.
    Create {
        #[arg(long)]
        content: String,
        #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
        attach: Option<PathBuf>,
    },
    /// Like or unlike a post.
    Like { id: String },
}

#[derive(Debug, Subcommand, Clone)]
pub enum ProfileCommand {
    /// Show a profile summary.
    Show { id: String },
    /// Follow or unfollow a profile.
    Follow { id: String },
    /// List profiles following a profile.
    Followers { id: String },
    /// List profiles a profile follows.
    Following { id: String },
    /// Replace or clear the signed-in user's avatar.
    Avatar {
        #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath, conflicts_with = "clear")]
        file: Option<PathBuf>,
        #[arg(long, action = clap::ArgAction::SetTrue)]
        clear: bool,
    },
}

#[derive(Debug, Subcommand, Clone)]
pub enum BookmarksCommand {
    /// List bookmarked post ids.
    List,
    /// Add or remove a bookmark.
    Toggle { id: String },
}
