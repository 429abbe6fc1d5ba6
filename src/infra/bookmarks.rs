//! Device-local bookmarks.
//!
//! A JSON array of post ids kept in one file, oldest bookmark first. Never
//! synced to the backend.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::domain::types::PostId;

use super::error::InfraError;

#[derive(Debug, Clone)]
pub struct BookmarkStore {
    path: PathBuf,
    ids: Vec<PostId>,
}

impl BookmarkStore {
    /// Read the bookmark file at `path`. A missing file is an empty list.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, InfraError> {
        let path = path.into();
        let ids = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Vec::new(),
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(|source| InfraError::CorruptBookmarks {
                    path: path.clone(),
                    source,
                })?
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self { path, ids })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, id: &PostId) -> bool {
        self.ids.contains(id)
    }

    pub fn list(&self) -> &[PostId] {
        &self.ids
    }

    /// Add `id` when absent, remove it when present, and persist. Returns
    /// whether the post is bookmarked afterwards.
    pub async fn toggle(&mut self, id: &PostId) -> Result<bool, InfraError> {
        let bookmarked = if let Some(position) = self.ids.iter().position(|held| held == id) {
            self.ids.remove(position);
            false
        } else {
            self.ids.push(id.clone());
            true
        };
        self.persist().await?;
        debug!(post = %id, bookmarked, "Toggled bookmark");
        Ok(bookmarked)
    }

    async fn persist(&self) -> Result<(), InfraError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec(&self.ids).map_err(|source| InfraError::CorruptBookmarks {
            path: self.path.clone(),
            source,
        })?;
        tokio::fs::write(&self.path, body).await?;
        Ok(())
    }
}
