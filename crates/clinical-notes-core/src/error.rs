//! Engine error taxonomy.
//!
//! Every failure surfaced to a caller maps onto one HTTP-style status and a
//! stable error code. Storage and serialization failures are collapsed into a
//! generic 500 message so SQL never leaks to a client.

use serde_json::{json, Value};
use thiserror::Error;

use crate::db::DbError;
use crate::models::NoteStatus;
use crate::validation::FieldError;

#[derive(Error, Debug)]
pub enum NotesError {
    #[error("{message}")]
    Validation {
        message: String,
        errors: Vec<FieldError>,
    },

    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("A clinical note already exists for this appointment")]
    DuplicateNote,

    #[error("Note version conflict: expected version {expected}, current version is {current}")]
    VersionConflict { expected: i64, current: i64 },

    #[error("{message}")]
    BusinessRule { code: &'static str, message: String },

    #[error("Cannot {action} a note with status {status}")]
    InvalidTransition {
        action: &'static str,
        status: NoteStatus,
    },

    #[error("Too many requests, retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Credential hashing error: {0}")]
    Credential(#[from] bcrypt::BcryptError),
}

pub type NotesResult<T> = Result<T, NotesError>;

impl From<rusqlite::Error> for NotesError {
    fn from(e: rusqlite::Error) -> Self {
        NotesError::Database(DbError::Sqlite(e))
    }
}

impl NotesError {
    pub fn validation(message: impl Into<String>, errors: Vec<FieldError>) -> Self {
        NotesError::Validation {
            message: message.into(),
            errors,
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        NotesError::Forbidden(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        NotesError::NotFound(what.into())
    }

    pub fn business(code: &'static str, message: impl Into<String>) -> Self {
        NotesError::BusinessRule {
            code,
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            NotesError::Validation { .. } => 400,
            NotesError::Unauthenticated(_) => 401,
            NotesError::Forbidden(_) => 403,
            NotesError::NotFound(_) => 404,
            NotesError::DuplicateNote | NotesError::VersionConflict { .. } => 409,
            NotesError::BusinessRule { .. } | NotesError::InvalidTransition { .. } => 422,
            NotesError::RateLimited { .. } => 429,
            NotesError::Database(DbError::NotFound(_)) => 404,
            NotesError::Database(DbError::Duplicate(_)) => 409,
            NotesError::Database(_) | NotesError::Serialization(_) | NotesError::Credential(_) => 500,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            NotesError::Validation { .. } => "VALIDATION_FAILED",
            NotesError::Unauthenticated(_) => "UNAUTHENTICATED",
            NotesError::Forbidden(_) => "FORBIDDEN",
            NotesError::NotFound(_) => "NOT_FOUND",
            NotesError::DuplicateNote => "DUPLICATE_NOTE",
            NotesError::VersionConflict { .. } => "VERSION_CONFLICT",
            NotesError::BusinessRule { code, .. } => *code,
            NotesError::InvalidTransition { .. } => "INVALID_TRANSITION",
            NotesError::RateLimited { .. } => "RATE_LIMITED",
            NotesError::Database(DbError::NotFound(_)) => "NOT_FOUND",
            NotesError::Database(DbError::Duplicate(_)) => "DUPLICATE",
            NotesError::Database(_) | NotesError::Serialization(_) | NotesError::Credential(_) => {
                "INTERNAL_ERROR"
            }
        }
    }

    /// Message safe to return to a caller.
    pub fn public_message(&self) -> String {
        match self {
            NotesError::Database(DbError::NotFound(what)) => format!("{what} not found"),
            NotesError::Database(DbError::Duplicate(what)) => format!("{what} already exists"),
            NotesError::Database(_) | NotesError::Serialization(_) | NotesError::Credential(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Structured detail for the response envelope.
    pub fn details(&self) -> Option<Value> {
        match self {
            NotesError::Validation { errors, .. } => Some(json!({ "errors": errors })),
            NotesError::VersionConflict { expected, current } => Some(json!({
                "expectedVersion": expected,
                "currentVersion": current,
            })),
            NotesError::RateLimited { retry_after_secs } => {
                Some(json!({ "retryAfter": retry_after_secs }))
            }
            _ => None,
        }
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, NotesError::Forbidden(_))
    }
}
