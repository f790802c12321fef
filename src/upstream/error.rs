use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream responded {status}: {message}")]
    Status { status: StatusCode, message: String },
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("request body could not be encoded: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("upstream response could not be decoded: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("invalid upstream url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("invalid value for header `{0}`")]
    InvalidHeader(&'static str),
}

impl UpstreamError {
    /// Whether another attempt may succeed: 408, any 5xx, or a failure with
    /// no HTTP response at all.
    pub fn is_transient(&self) -> bool {
        match self {
            UpstreamError::Status { status, .. } => {
                *status == StatusCode::REQUEST_TIMEOUT || status.is_server_error()
            }
            UpstreamError::Transport(_) => true,
            UpstreamError::Encode(_)
            | UpstreamError::Decode(_)
            | UpstreamError::InvalidUrl(_)
            | UpstreamError::InvalidHeader(_) => false,
        }
    }

    /// HTTP status returned by the upstream, if it answered.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            UpstreamError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn status_error(status: StatusCode, message: impl Into<String>) -> Self {
        UpstreamError::Status {
            status,
            message: message.into(),
        }
    }
}
