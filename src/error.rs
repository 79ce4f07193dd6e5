//! Error handling module
//!
//! Provides the unified error taxonomy for the deletion core. Every variant
//! carries a stable machine-readable code; callers branch on the code, the
//! message is for humans only.

use crate::store::StoreError;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the deletion core
#[derive(Error, Debug)]
pub enum DeletionError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Record {0} is already inactive")]
    AlreadyInactive(String),

    #[error("Snapshot {0} not found")]
    SnapshotNotFound(Uuid),

    #[error("Snapshot {0} has expired")]
    SnapshotExpired(Uuid),

    #[error("Snapshot {0} was already used for a rollback")]
    SnapshotAlreadyUsed(Uuid),

    /// The atomic cascade unit aborted; all writes were rolled back by the
    /// store. The snapshot id (when one was captured) remains usable for
    /// manual recovery.
    #[error("Cascade aborted: {message}")]
    Transaction {
        message: String,
        snapshot_id: Option<Uuid>,
    },

    #[error("Rollback finished with {conflicts} conflict(s) and {failures} failure(s)")]
    PartialRestore { conflicts: usize, failures: usize },

    #[error("Snapshot capture failed: {0}")]
    Snapshot(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Registry error: {0}")]
    Registry(String),
}

impl DeletionError {
    /// Stable machine-readable code driving programmatic handling
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::AlreadyInactive(_) => "ALREADY_INACTIVE",
            Self::SnapshotNotFound(_) => "SNAPSHOT_NOT_FOUND",
            Self::SnapshotExpired(_) => "SNAPSHOT_EXPIRED",
            Self::SnapshotAlreadyUsed(_) => "SNAPSHOT_ALREADY_USED",
            Self::Transaction { .. } => "TRANSACTION_ABORTED",
            Self::PartialRestore { .. } => "PARTIAL_RESTORE",
            Self::Snapshot(_) => "SNAPSHOT_ERROR",
            Self::Store(_) => "STORE_ERROR",
            Self::Registry(_) => "REGISTRY_ERROR",
        }
    }

    /// Short user-facing message, separate from internal diagnostic detail
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound(what) => format!("{} was not found", what),
            Self::AlreadyInactive(id) => {
                format!("Record {} was already deleted by another operation", id)
            }
            Self::SnapshotNotFound(id) => format!("Snapshot {} does not exist", id),
            Self::SnapshotExpired(id) => {
                format!("Snapshot {} is past its retention window", id)
            }
            Self::SnapshotAlreadyUsed(id) => {
                format!("Snapshot {} was already consumed by a rollback", id)
            }
            Self::Transaction { snapshot_id, .. } => match snapshot_id {
                Some(id) => format!(
                    "The deletion was aborted and no changes were applied; snapshot {} is available for recovery",
                    id
                ),
                None => "The deletion was aborted and no changes were applied".to_string(),
            },
            Self::PartialRestore { .. } => {
                "The rollback completed with some records left unrestored".to_string()
            }
            Self::Snapshot(_) => "Snapshot capture failed; nothing was deleted".to_string(),
            Self::Store(_) => "A storage error occurred".to_string(),
            Self::Registry(_) => "The relationship registry is misconfigured".to_string(),
        }
    }

    /// Snapshot id surfaced alongside the error, when one exists
    pub fn snapshot_id(&self) -> Option<Uuid> {
        match self {
            Self::Transaction { snapshot_id, .. } => *snapshot_id,
            Self::SnapshotNotFound(id)
            | Self::SnapshotExpired(id)
            | Self::SnapshotAlreadyUsed(id) => Some(*id),
            _ => None,
        }
    }
}

/// Wire shape for a failed operation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<Uuid>,
}

impl From<&DeletionError> for ErrorBody {
    fn from(err: &DeletionError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.user_message(),
            details: Some(err.to_string()),
            snapshot_id: err.snapshot_id(),
        }
    }
}

/// Result type alias used throughout the core
pub type CoreResult<T> = Result<T, DeletionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(DeletionError::NotFound("person".into()).code(), "NOT_FOUND");
        assert_eq!(
            DeletionError::SnapshotExpired(Uuid::nil()).code(),
            "SNAPSHOT_EXPIRED"
        );
        assert_eq!(
            DeletionError::Transaction {
                message: "boom".into(),
                snapshot_id: None,
            }
            .code(),
            "TRANSACTION_ABORTED"
        );
    }

    #[test]
    fn test_transaction_error_surfaces_snapshot_id() {
        let snapshot_id = Uuid::new_v4();
        let err = DeletionError::Transaction {
            message: "write failed".into(),
            snapshot_id: Some(snapshot_id),
        };
        assert_eq!(err.snapshot_id(), Some(snapshot_id));
        let body = ErrorBody::from(&err);
        assert_eq!(body.snapshot_id, Some(snapshot_id));
        assert!(body.message.contains(&snapshot_id.to_string()));
    }
}
