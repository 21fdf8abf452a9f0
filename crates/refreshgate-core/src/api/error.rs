use thiserror::Error;

use crate::refresh::RefreshError;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Connection failed: {0}")]
    Connection(String),
}

#[derive(Error, Debug)]
pub enum ApiError {
    /// Renewal failed for infrastructure reasons; the session is intact.
    #[error("Transient network error during credential renewal: {0}")]
    TransientNetwork(String),

    /// Renewal was refused; the session has been terminated.
    #[error("Credential rejected - login required")]
    AuthRejected,

    /// The replayed request was still unauthorized after a successful renewal.
    #[error("Request unauthorized again after credential renewal")]
    RequestRetryExhausted,

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Failed to encode request body: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    pub(crate) fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    /// Map a non-success status to an error.
    ///
    /// 401 only reaches here once recovery has already been spent on the
    /// request, so it maps to `RequestRetryExhausted`.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => ApiError::RequestRetryExhausted,
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }
}

impl From<RefreshError> for ApiError {
    fn from(err: RefreshError) -> Self {
        match err {
            RefreshError::Transient(msg) => ApiError::TransientNetwork(msg),
            RefreshError::AuthRejected => ApiError::AuthRejected,
        }
    }
}
