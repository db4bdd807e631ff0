use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OpsError {
    /// Connect failure or non-success status on any fetch or stream open.
    #[error("transport error: {0}")]
    Transport(String),

    /// The body of a follow stream errored mid-read.
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

pub type Result<T> = std::result::Result<T, OpsError>;

impl From<reqwest::Error> for OpsError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            OpsError::MalformedResponse(e.to_string())
        } else {
            OpsError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for OpsError {
    fn from(e: serde_json::Error) -> Self {
        OpsError::MalformedResponse(e.to_string())
    }
}

impl IntoResponse for OpsError {
    fn into_response(self) -> Response {
        let status = match self {
            OpsError::NotFound(_) => StatusCode::NOT_FOUND,
            OpsError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            OpsError::Transport(_)
            | OpsError::StreamInterrupted(_)
            | OpsError::MalformedResponse(_) => StatusCode::BAD_GATEWAY,
        };
        (status, self.to_string()).into_response()
    }
}
