use shared::{domain::ItemId, error::ValidationError};
use thiserror::Error;

use crate::types::MutationKind;

/// Failure of a single call against the remote item collection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("request timed out")]
    Timeout,
    #[error("network failure: {0}")]
    Network(String),
    #[error("server responded with status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl RemoteError {
    /// Transient conditions a caller may retry. The coordinator itself never does.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Timeout | RemoteError::Network(_) => true,
            RemoteError::Status { status, .. } => *status >= 500,
            RemoteError::NotFound(_) | RemoteError::Malformed(_) => false,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum MutationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("item {id} is still being created")]
    CreatePending { id: ItemId },
    #[error("item {id} is not in the local mirror")]
    UnknownItem { id: ItemId },
    #[error("baseline for item {id} describes item {baseline_id}")]
    BaselineMismatch { id: ItemId, baseline_id: ItemId },
    #[error("{kind} of item {id} failed: {source}")]
    Remote {
        kind: MutationKind,
        id: ItemId,
        #[source]
        source: RemoteError,
    },
    #[error("{kind} of item {id} was aborted before it resolved")]
    Aborted { kind: MutationKind, id: ItemId },
}

impl MutationError {
    pub fn id(&self) -> Option<&ItemId> {
        match self {
            MutationError::Validation(_) => None,
            MutationError::CreatePending { id }
            | MutationError::UnknownItem { id }
            | MutationError::BaselineMismatch { id, .. }
            | MutationError::Remote { id, .. }
            | MutationError::Aborted { id, .. } => Some(id),
        }
    }

    pub fn kind(&self) -> Option<MutationKind> {
        match self {
            MutationError::Remote { kind, .. } | MutationError::Aborted { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            MutationError::Remote { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.remote().is_some_and(RemoteError::is_retryable)
    }
}
