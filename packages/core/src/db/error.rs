//! Store Error Types
//!
//! One variant per domain failure kind. Driver errors are translated at the
//! call site into the closest kind, carrying the path, identifier or SQL
//! fragment that failed as context.

use crate::codec::CodecError;
use crate::query::QueryError;
use std::path::PathBuf;
use thiserror::Error;

/// Sub-kind of a backend failure, derived from the driver's error code/message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendFailureKind {
    Authentication,
    SchemaMissing,
    Generic,
}

/// Flat classification of a `StoreError`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    ReferentialIntegrity,
    ConstraintViolation,
    Unsupported,
    ValueFormat,
    Namespace,
    InvalidState,
    Backend(BackendFailureKind),
}

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Node store operation errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Path or identifier absent
    #[error("Item not found: {0}")]
    NotFound(String),

    /// Path or identifier collision on insert
    #[error("Item already exists: {0}")]
    AlreadyExists(String),

    /// Strong reference target missing or deleted while referenced
    #[error("Referential integrity violation: {0}")]
    ReferentialIntegrity(String),

    /// Illegal structural operation or failed node type validation
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Value fails its type's grammar
    #[error("Invalid value format: {0}")]
    ValueFormat(String),

    /// Unknown or immutable namespace prefix
    #[error("Namespace error: {0}")]
    Namespace(String),

    /// Call made in the wrong session or transaction state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Failed to establish database connection
    #[error("Failed to connect to database at {path}: {source}")]
    ConnectionFailed {
        path: PathBuf,
        source: libsql::Error,
    },

    /// Failed to create parent directory
    #[error("Failed to create parent directory for database: {0}")]
    DirectoryCreationFailed(#[from] std::io::Error),

    /// Driver, schema or stored-data failure
    #[error("Backend failure ({kind:?}): {context}")]
    Backend {
        kind: BackendFailureKind,
        context: String,
        #[source]
        source: Option<BoxedSource>,
    },
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            StoreError::ReferentialIntegrity(_) => ErrorKind::ReferentialIntegrity,
            StoreError::ConstraintViolation(_) => ErrorKind::ConstraintViolation,
            StoreError::Unsupported(_) => ErrorKind::Unsupported,
            StoreError::ValueFormat(_) => ErrorKind::ValueFormat,
            StoreError::Namespace(_) => ErrorKind::Namespace,
            StoreError::InvalidState(_) => ErrorKind::InvalidState,
            StoreError::ConnectionFailed { .. } | StoreError::DirectoryCreationFailed(_) => {
                ErrorKind::Backend(BackendFailureKind::Generic)
            }
            StoreError::Backend { kind, .. } => ErrorKind::Backend(*kind),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists(what.into())
    }

    pub fn referential_integrity(msg: impl Into<String>) -> Self {
        Self::ReferentialIntegrity(msg.into())
    }

    pub fn constraint(msg: impl Into<String>) -> Self {
        Self::ConstraintViolation(msg.into())
    }

    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported(what.into())
    }

    pub fn value_format(msg: impl Into<String>) -> Self {
        Self::ValueFormat(msg.into())
    }

    pub fn namespace(msg: impl Into<String>) -> Self {
        Self::Namespace(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn connection_failed(path: PathBuf, source: libsql::Error) -> Self {
        Self::ConnectionFailed { path, source }
    }

    /// Generic backend failure without a driver error
    pub fn backend(context: impl Into<String>) -> Self {
        Self::Backend {
            kind: BackendFailureKind::Generic,
            context: context.into(),
            source: None,
        }
    }

    /// Translate a driver error, classifying it by its message
    ///
    /// `UNIQUE constraint` failures become `AlreadyExists`; authorization
    /// failures and missing tables become the matching backend sub-kind.
    pub fn sql(context: impl Into<String>, error: libsql::Error) -> Self {
        let context = context.into();
        let message = error.to_string();

        if message.contains("UNIQUE constraint") {
            return Self::AlreadyExists(format!("{}: {}", context, message));
        }

        let kind = if message.contains("no such table") {
            BackendFailureKind::SchemaMissing
        } else if message.contains("not authorized") || message.contains("SQLITE_AUTH") {
            BackendFailureKind::Authentication
        } else {
            BackendFailureKind::Generic
        };

        Self::Backend {
            kind,
            context,
            source: Some(Box::new(error)),
        }
    }

    /// Stored blob failed to decode
    pub fn corrupt(context: impl Into<String>, error: CodecError) -> Self {
        Self::Backend {
            kind: BackendFailureKind::Generic,
            context: context.into(),
            source: Some(Box::new(error)),
        }
    }

    /// Caller-supplied properties failed to encode
    pub fn encode(context: impl Into<String>, error: CodecError) -> Self {
        if error.is_value_error() {
            Self::ValueFormat(format!("{}: {}", context.into(), error))
        } else {
            Self::corrupt(context, error)
        }
    }
}

impl From<QueryError> for StoreError {
    fn from(error: QueryError) -> Self {
        match error {
            QueryError::Unsupported(kind) => Self::Unsupported(kind),
            QueryError::ValueFormat(msg) => Self::ValueFormat(msg),
            QueryError::UnknownPrefix(prefix) => {
                Self::Namespace(format!("unknown namespace prefix '{}'", prefix))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PropertyType;

    #[test]
    fn test_kinds() {
        assert_eq!(StoreError::not_found("/a").kind(), ErrorKind::NotFound);
        assert_eq!(
            StoreError::backend("boom").kind(),
            ErrorKind::Backend(BackendFailureKind::Generic)
        );
        assert_eq!(
            StoreError::from(QueryError::UnknownPrefix("x".to_string())).kind(),
            ErrorKind::Namespace
        );
    }

    #[test]
    fn test_codec_error_mapping() {
        let mismatch = CodecError::TypeMismatch {
            property: "n".to_string(),
            expected: PropertyType::Long,
        };
        assert_eq!(StoreError::encode("/a", mismatch).kind(), ErrorKind::ValueFormat);

        let unknown = CodecError::UnknownType("Blob".to_string());
        assert_eq!(
            StoreError::corrupt("/a", unknown).kind(),
            ErrorKind::Backend(BackendFailureKind::Generic)
        );
    }
}
