use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

use crate::application::repos::RepoError;
use crate::domain::error::DomainError;
use crate::domain::schema::SchemaError;
use crate::domain::types::PostId;
use crate::infra::error::InfraError;

/// Flattened error chain for display at the outer surface.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }
}

/// Second phase of a two-phase write that can fail after the first phase
/// already committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStage {
    AttachmentUpload,
    AttachmentLink,
}

impl WriteStage {
    pub fn as_str(self) -> &'static str {
        match self {
            WriteStage::AttachmentUpload => "attachment upload",
            WriteStage::AttachmentLink => "attachment link",
        }
    }
}

impl fmt::Display for WriteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    /// Caller input rejected before any request was issued.
    #[error(transparent)]
    Domain(#[from] DomainError),
    /// Backend answered with a shape that failed validation.
    #[error("response validation failed: {0}")]
    Schema(#[from] SchemaError),
    /// Backend refused the read or write.
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("post `{post_id}` was created but the {stage} step failed")]
    PartialFailure {
        post_id: PostId,
        stage: WriteStage,
        #[source]
        source: RepoError,
    },
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    pub fn partial(post_id: PostId, stage: WriteStage, source: RepoError) -> Self {
        Self::PartialFailure {
            post_id,
            stage,
            source,
        }
    }

    /// Whether the error came from bad caller input rather than the backend.
    pub fn is_validation(&self) -> bool {
        matches!(self, AppError::Domain(_))
    }

    pub fn presentation_message(&self) -> &'static str {
        match self {
            AppError::Domain(_) => "Request could not be processed",
            AppError::Schema(_) => "The server sent data this client does not understand",
            AppError::Repo(RepoError::Duplicate { .. }) => "That change was already applied",
            AppError::Repo(RepoError::Timeout) => "The server took too long to answer",
            AppError::Repo(_) => "The server refused the request",
            AppError::PartialFailure { .. } => "Post published without its attachment",
            AppError::Infra(InfraError::Configuration { .. }) => "Client misconfigured",
            AppError::Infra(InfraError::Telemetry(_)) => "Logging subsystem could not start",
            AppError::Infra(InfraError::Io(_) | InfraError::CorruptBookmarks { .. }) => {
                "Local storage failure"
            }
            AppError::Infra(InfraError::Http(_)) => "Network failure",
            AppError::Unexpected(_) => "Unexpected error occurred",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_failure_keeps_post_id_and_cause() {
        let err = AppError::partial(
            PostId::new("p-9").expect("valid id"),
            WriteStage::AttachmentLink,
            RepoError::Persistence("row locked".to_string()),
        );
        let report = ErrorReport::from_error("test", &err);
        assert_eq!(
            report.messages,
            vec![
                "post `p-9` was created but the attachment link step failed".to_string(),
                "persistence error: row locked".to_string(),
            ]
        );
        assert_eq!(
            err.presentation_message(),
            "Post published without its attachment"
        );
    }

    #[test]
    fn domain_errors_are_validation() {
        let err = AppError::from(DomainError::empty_identifier("post"));
        assert!(err.is_validation());
        assert!(!AppError::unexpected("boom").is_validation());
    }
}
