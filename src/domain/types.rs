//! Identifier newtypes and feed kinds shared by every layer.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::DomainError;

/// Opaque identifier of a post row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(String);

/// Opaque identifier of a profile row (equal to the identity provider's user id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileId(String);

macro_rules! opaque_id {
    ($ty:ident, $entity:literal) => {
        impl $ty {
            /// Wrap a raw identifier, rejecting empty or whitespace-only input.
            pub fn new(raw: impl Into<String>) -> Result<Self, DomainError> {
                let raw = raw.into();
                if raw.trim().is_empty() {
                    return Err(DomainError::empty_identifier($entity));
                }
                Ok(Self(raw))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<&str> for $ty {
            type Error = DomainError;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }
    };
}

opaque_id!(PostId, "post");
opaque_id!(ProfileId, "profile");

/// Which filter is applied to the post table before pagination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FeedKind {
    /// Every post.
    All,
    /// Posts whose author the viewer follows.
    Following,
    /// Posts the viewer liked.
    Liked,
    /// Posts written by one profile.
    Author(ProfileId),
}

impl FeedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::All => "all",
            FeedKind::Following => "following",
            FeedKind::Liked => "liked",
            FeedKind::Author(_) => "author",
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedKind::Author(profile) => write!(f, "author:{profile}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// What a toggle did to an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeChange {
    Inserted,
    Deleted,
}

impl EdgeChange {
    /// Whether the edge exists after the toggle.
    pub fn is_present(self) -> bool {
        matches!(self, EdgeChange::Inserted)
    }
}

/// Object-store namespaces used by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Images,
    Avatars,
}

impl Bucket {
    pub fn as_str(self) -> &'static str {
        match self {
            Bucket::Images => "images",
            Bucket::Avatars => "avatars",
        }
    }
}
