use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("{entity} identifier must not be empty")]
    EmptyIdentifier { entity: &'static str },
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("domain validation failed: {message}")]
    Validation { message: String },
}

impl DomainError {
    pub fn empty_identifier(entity: &'static str) -> Self {
        Self::EmptyIdentifier { entity }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}
