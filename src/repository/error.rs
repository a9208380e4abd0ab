#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RepositoryError {
    #[error("Database request failed: {0}")]
    RequestFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Database returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse database response: {0}")]
    JsonParseFailed(#[from] serde_json::Error),

    #[error("Not found: {message}")]
    NotFound { message: String },
}

impl From<wreq::Error> for RepositoryError {
    fn from(e: wreq::Error) -> Self {
        RepositoryError::RequestFailed(Box::new(e))
    }
}
