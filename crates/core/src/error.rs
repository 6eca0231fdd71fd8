//! Error model for the data-access layer.

use thiserror::Error;

use crate::approval::ApprovalStatus;
use crate::id::TenantId;

/// Result type used across the data-access layer.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Repository-level error.
///
/// Every variant except `Storage` is raised before the persistence port is
/// touched, so a failed call never leaves partial side effects behind.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// A caller-supplied argument was out of range (e.g. paging parameters).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A required entity was not supplied.
    #[error("provided {entity_type} was null")]
    NullEntity { entity_type: &'static str },

    /// A required collection of entities was not supplied.
    #[error("provided collection of {entity_type} was null")]
    NullEntityCollection { entity_type: &'static str },

    /// The referenced id is not visible through the scoped view.
    #[error("{entity_type} not found: {id}")]
    NotFound { entity_type: &'static str, id: String },

    /// A mutation targeted an entity owned by another tenant.
    #[error("tenant mismatch: current tenant is {expected}, entity belongs to {found}")]
    TenantMismatch { expected: TenantId, found: TenantId },

    /// An approval transition was requested from a terminal status.
    #[error("invalid approval transition: {from} -> {to}")]
    InvalidTransition {
        from: ApprovalStatus,
        to: ApprovalStatus,
    },

    /// The cancellation signal fired before storage was reached.
    #[error("operation cancelled")]
    Cancelled,

    /// Opaque failure reported by the persistence port.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl RepositoryError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(entity_type: &'static str, id: impl core::fmt::Debug) -> Self {
        Self::NotFound {
            entity_type,
            id: format!("{id:?}"),
        }
    }

    /// True for errors raised by validation rather than by storage.
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::Storage(_) | Self::Cancelled)
    }
}

/// Failure reported by a persistence port implementation.
///
/// The repository never interprets or retries these; they are passed through.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("storage conflict: {0}")]
    Conflict(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}
