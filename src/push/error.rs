#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("Push request failed: {0}")]
    RequestFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Push gateway rejected the request (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid push gateway response: {message}")]
    InvalidResponse { message: String },
}

impl From<wreq::Error> for TransportError {
    fn from(e: wreq::Error) -> Self {
        TransportError::RequestFailed(Box::new(e))
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        TransportError::InvalidResponse {
            message: e.to_string(),
        }
    }
}
