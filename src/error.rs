//! Crate-wide error taxonomy.
//!
//! Every fallible operation in the control plane returns a [`DomainError`].
//! The variant itself carries the failure kind used by REST and channel
//! error mapping; nothing upstream needs to pattern-match on anything finer.

use thiserror::Error;

/// The taxonomy described in the design notes: a tag, not a type per failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AuthFailed,
    NotFound,
    InvalidState,
    Permission,
    Conflict,
    Unavailable,
    Storage,
    Decode,
}

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid state transition: {0}")]
    InvalidState(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("target unavailable: {0}")]
    Unavailable(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("malformed message: {0}")]
    Decode(String),
}

impl DomainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::AuthFailed(_) => ErrorKind::AuthFailed,
            DomainError::NotFound { .. } => ErrorKind::NotFound,
            DomainError::InvalidState(_) => ErrorKind::InvalidState,
            DomainError::Permission(_) => ErrorKind::Permission,
            DomainError::Conflict(_) => ErrorKind::Conflict,
            DomainError::Unavailable(_) => ErrorKind::Unavailable,
            DomainError::Storage(_) => ErrorKind::Storage,
            DomainError::Decode(_) => ErrorKind::Decode,
        }
    }

    /// Machine-readable code used in REST error bodies and channel error envelopes.
    pub fn code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::AuthFailed => "AUTH_FAILED",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::InvalidState => "INVALID_STATE",
            ErrorKind::Permission => "PERMISSION",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Unavailable => "UNAVAILABLE",
            ErrorKind::Storage => "STORAGE",
            ErrorKind::Decode => "DECODE",
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        DomainError::NotFound { entity, id: id.into() }
    }
}

impl From<rusqlite::Error> for DomainError {
    fn from(e: rusqlite::Error) -> Self {
        DomainError::Storage(e.to_string())
    }
}

impl From<r2d2::Error> for DomainError {
    fn from(e: r2d2::Error) -> Self {
        DomainError::Storage(e.to_string())
    }
}

impl From<std::io::Error> for DomainError {
    fn from(e: std::io::Error) -> Self {
        DomainError::Storage(e.to_string())
    }
}

pub type DomainResult<T> = Result<T, DomainError>;
