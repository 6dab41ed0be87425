use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// The upstream answered the initial request with a non-success status.
    #[error("upstream rejected request [{status}]: {body}")]
    UpstreamRejected { status: StatusCode, body: String },
    /// The connection failed while sending the request or reading the body.
    #[error("upstream transport error: {0}")]
    Transport(#[source] reqwest::Error),
    /// A data frame that is neither `[DONE]` nor a chat-completion chunk.
    #[error("malformed upstream event: {reason}")]
    MalformedEvent { reason: String, data: String },
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl RelayError {
    pub fn upstream_status(&self) -> Option<StatusCode> {
        match self {
            RelayError::UpstreamRejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}
