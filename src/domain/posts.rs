//! Post-level helpers over validated records.

use super::entities::PostRecord;
use super::error::DomainError;
use super::types::ProfileId;

/// Number of posts in one backend page.
pub const FEED_PAGE_SIZE: usize = 25;

impl PostRecord {
    /// Whether `profile` appears among the post's likes.
    pub fn is_liked_by(&self, profile: &ProfileId) -> bool {
        self.likes.iter().any(|like| &like.profile_id == profile)
    }

    pub fn like_count(&self) -> usize {
        self.likes.len()
    }
}

/// Validate the text of a new post. Blank drafts are rejected.
pub fn validate_content(content: &str) -> Result<&str, DomainError> {
    if content.trim().is_empty() {
        return Err(DomainError::validation("post content must not be empty"));
    }
    Ok(content)
}

/// Two-letter fallback shown when a profile has no avatar.
pub fn avatar_initials(name: &str) -> String {
    name.chars().take(2).collect::<String>().to_uppercase()
}
