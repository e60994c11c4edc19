use thiserror::Error;

use super::types::RowId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Persistence call failed at the transport level (network, 5xx).
    /// The optimistic change has been rolled back; retry is up to the user.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server rejected the payload. Message is surfaced verbatim.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The current session does not own the row it tried to mutate.
    /// Rejected locally, no network round-trip was made.
    #[error("Permission denied: {0}")]
    Ownership(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Row '{0}' not found")]
    RowNotFound(RowId),

    #[error("Container '{0}' not found")]
    ContainerNotFound(RowId),

    #[error("Row '{0}' already exists in this collection")]
    DuplicateRow(RowId),

    #[error("Index {index} out of bounds for container '{container}' (len {len})")]
    IndexOutOfBounds {
        container: RowId,
        index: usize,
        len: usize,
    },

    #[error("Subscription closed: {0}")]
    SubscriptionClosed(String),

    #[error("Screen is not mounted")]
    NotMounted,
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Transport and validation failures trigger rollback of the optimistic
    /// change; everything else is rejected before any state is touched.
    pub fn rolls_back(&self) -> bool {
        matches!(self, SyncError::Transport(_) | SyncError::Validation(_))
    }
}
