use crate::model::ModelError;
use crate::model::UserId;
use crate::repository::error::RepositoryError;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ServiceError {
    #[error("DatabaseError: {0}")]
    DatabaseError(#[from] RepositoryError),
}

/// Errors that abort a dispatch run before any delivery is attempted.
///
/// Per-subscription delivery failures never surface here; they are counted
/// in the run summary instead.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DispatchError {
    #[error("Invalid message: {0}")]
    InvalidMessage(#[from] ModelError),

    #[error("Failed to resolve audience: {0}")]
    AudienceResolution(#[source] RepositoryError),

    #[error("User {user_id} reached the limit of {limit} notifications per window.")]
    QuotaExceeded { user_id: UserId, limit: u32 },

    #[error("Failed to check quota: {0}")]
    QuotaCheck(#[from] ServiceError),
}
