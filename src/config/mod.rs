//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::application::mutation::RollbackPolicy;

mod cli;

pub use cli::{
    BookmarksCommand, CliArgs, Command, FeedArgs, FeedChoice, GlobalOverrides, PostCommand,
    ProfileCommand,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "chorus";
const ENV_PREFIX: &str = "CHORUS";
const DEFAULT_TIMEOUT_SECS: u64 = 15;
const DEFAULT_BOOKMARKS_PATH: &str = "chorus-bookmarks.json";
const DEFAULT_POST_LIMIT: usize = 500;
const DEFAULT_FEED_LIMIT: usize = 16;
const DEFAULT_PROFILE_LIMIT: usize = 200;
const DEFAULT_RELATION_LIMIT: usize = 200;

/// Fully-resolved client settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub backend: BackendSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub mutations: MutationSettings,
    pub bookmarks: BookmarkSettings,
}

#[derive(Debug, Clone)]
pub struct BackendSettings {
    /// Project base URL; `None` until configured.
    pub url: Option<Url>,
    pub api_key: Option<String>,
    /// Access token of the signed-in user, sent as a bearer token.
    pub access_token: Option<String>,
    /// Profile id of the signed-in user.
    pub user_id: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub post_limit: usize,
    pub feed_limit: usize,
    pub profile_limit: usize,
    pub relation_limit: usize,
}

#[derive(Debug, Clone)]
pub struct MutationSettings {
    pub rollback: RollbackPolicy,
}

#[derive(Debug, Clone)]
pub struct BookmarkSettings {
    pub path: PathBuf,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    load_layers(cli, None)
}

/// `env` replaces the process environment when given.
fn load_layers(
    cli: &CliArgs,
    env: Option<config::Map<String, String>>,
) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .source(env),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    backend: RawBackendSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    mutations: RawMutationSettings,
    bookmarks: RawBookmarkSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(url) = overrides.backend_url.as_ref() {
            self.backend.url = Some(url.clone());
        }
        if let Some(key) = overrides.api_key.as_ref() {
            self.backend.api_key = Some(key.clone());
        }
        if let Some(token) = overrides.access_token.as_ref() {
            self.backend.access_token = Some(token.clone());
        }
        if let Some(user) = overrides.user_id.as_ref() {
            self.backend.user_id = Some(user.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(policy) = overrides.rollback_policy.as_ref() {
            self.mutations.rollback = Some(policy.clone());
        }
        if let Some(path) = overrides.bookmarks_path.as_ref() {
            self.bookmarks.path = Some(path.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            backend,
            logging,
            cache,
            mutations,
            bookmarks,
        } = raw;

        Ok(Self {
            backend: build_backend_settings(backend)?,
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache),
            mutations: build_mutation_settings(mutations)?,
            bookmarks: build_bookmark_settings(bookmarks)?,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn build_backend_settings(backend: RawBackendSettings) -> Result<BackendSettings, LoadError> {
    let url = match non_blank(backend.url) {
        Some(raw) => {
            let url = Url::parse(&raw)
                .map_err(|err| LoadError::invalid("backend.url", format!("`{raw}`: {err}")))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(LoadError::invalid(
                    "backend.url",
                    "scheme must be http or https",
                ));
            }
            Some(url)
        }
        None => None,
    };

    let timeout_secs = backend.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "backend.timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(BackendSettings {
        url,
        api_key: non_blank(backend.api_key),
        access_token: non_blank(backend.access_token),
        user_id: non_blank(backend.user_id),
        timeout: Duration::from_secs(timeout_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::WARN,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> CacheSettings {
    CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        post_limit: cache.post_limit.unwrap_or(DEFAULT_POST_LIMIT),
        feed_limit: cache.feed_limit.unwrap_or(DEFAULT_FEED_LIMIT),
        profile_limit: cache.profile_limit.unwrap_or(DEFAULT_PROFILE_LIMIT),
        relation_limit: cache.relation_limit.unwrap_or(DEFAULT_RELATION_LIMIT),
    }
}

fn build_mutation_settings(mutations: RawMutationSettings) -> Result<MutationSettings, LoadError> {
    let rollback = match mutations.rollback.as_deref().map(str::trim) {
        None | Some("") | Some("keep_flipped") => RollbackPolicy::KeepFlipped,
        Some("rollback_on_error") => RollbackPolicy::RollbackOnError,
        Some(other) => {
            return Err(LoadError::invalid(
                "mutations.rollback",
                format!("unknown policy `{other}`; expected keep_flipped or rollback_on_error"),
            ));
        }
    };
    Ok(MutationSettings { rollback })
}

fn build_bookmark_settings(bookmarks: RawBookmarkSettings) -> Result<BookmarkSettings, LoadError> {
    let path = bookmarks
        .path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BOOKMARKS_PATH));
    if path.as_os_str().is_empty() {
        return Err(LoadError::invalid("bookmarks.path", "path must not be empty"));
    }
    Ok(BookmarkSettings { path })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBackendSettings {
    url: Option<String>,
    api_key: Option<String>,
    access_token: Option<String>,
    user_id: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    post_limit: Option<usize>,
    feed_limit: Option<usize>,
    profile_limit: Option<usize>,
    relation_limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawMutationSettings {
    rollback: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBookmarkSettings {
    path: Option<PathBuf>,
}
