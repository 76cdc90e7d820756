//! Error taxonomy for the sync engine.
//!
//! Transport-level failures ([`RemoteWriteError`], [`UploadError`],
//! [`SubscriptionError`]) come from gateway implementations. The executor and
//! multiplexer convert them into [`SyncError`] before anything reaches a
//! caller.

use crate::record::EntityKind;
use thiserror::Error;

/// Result alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// A remote write or delete was rejected (network or validation).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("remote write failed: {reason}")]
pub struct RemoteWriteError {
    pub reason: String,
}

impl RemoteWriteError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A binary upload failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("upload failed: {reason}")]
pub struct UploadError {
    pub reason: String,
}

impl UploadError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A feed could not be established.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("subscription failed: {reason}")]
pub struct SubscriptionError {
    pub reason: String,
}

impl SubscriptionError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Errors surfaced to callers of the sync engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    /// No project is selected; nothing is loaded.
    #[error("No project scope selected")]
    ScopeMissing,

    /// A feed failed to establish; the slice keeps its last known value.
    #[error("Subscription for {kind} failed: {reason}")]
    Subscription { kind: EntityKind, reason: String },

    /// The remote rejected a write; the optimistic value was rolled back.
    #[error("Remote rejected {kind}/{id}: {reason}")]
    MutationConflict {
        kind: EntityKind,
        id: String,
        reason: String,
    },

    /// A binary upload failed; its local preview was removed.
    #[error("Upload to {path} failed: {reason}")]
    UploadFailure { path: String, reason: String },

    /// Rejected before any mutation was issued.
    #[error("Precondition failed: {0}")]
    ValidationPrecondition(String),

    #[error("{kind}/{id} not found")]
    NotFound { kind: EntityKind, id: String },

    #[error("Cache error: {0}")]
    Cache(String),
}

impl SyncError {
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::ValidationPrecondition(msg.into())
    }

    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn conflict(kind: EntityKind, id: impl Into<String>, err: RemoteWriteError) -> Self {
        Self::MutationConflict {
            kind,
            id: id.into(),
            reason: err.reason,
        }
    }

    pub fn upload(path: impl Into<String>, err: UploadError) -> Self {
        Self::UploadFailure {
            path: path.into(),
            reason: err.reason,
        }
    }

    pub fn subscription(kind: EntityKind, err: SubscriptionError) -> Self {
        Self::Subscription {
            kind,
            reason: err.reason,
        }
    }

    /// Whether local state was reverted because of this error.
    pub fn rolled_back(&self) -> bool {
        matches!(
            self,
            Self::MutationConflict { .. } | Self::UploadFailure { .. }
        )
    }
}
