use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

pub type Result<T, E = ServiceError> = std::result::Result<T, E>;

/// Failure talking to a third-party service (egress, chat APIs, OAuth).
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Request timed out")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Upstream returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    /// The job exists but has already finished, failed or been aborted.
    #[error("Job has already ended: {0}")]
    JobEnded(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Failed to authorize request: {0}")]
    Auth(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            GatewayError::Timeout
        } else if error.is_decode() {
            GatewayError::Decode(error.to_string())
        } else {
            GatewayError::Transport(error.to_string())
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("No {0} account connected")]
    NotConnected(String),

    #[error("Stored {0} token has expired and cannot be refreshed")]
    Expired(String),

    #[error("Failed to refresh {provider} token: {message}")]
    Refresh { provider: String, message: String },
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("No active egress job for this destination")]
    NoActiveJob,

    #[error("Destination is already streaming")]
    AlreadyRunning,

    #[error("Gateway failure: {0}")]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ServiceError {
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => "not_found",
            ServiceError::InvalidState(_) => "invalid_state",
            ServiceError::NoActiveJob => "no_active_job",
            ServiceError::AlreadyRunning => "already_running",
            ServiceError::Gateway(_) => "gateway_failure",
            ServiceError::Credential(_) => "credential",
            ServiceError::InvalidInput(_) => "invalid_input",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::InvalidState(_)
            | ServiceError::NoActiveJob
            | ServiceError::AlreadyRunning => StatusCode::CONFLICT,
            ServiceError::Gateway(GatewayError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
            ServiceError::Gateway(_) => StatusCode::BAD_GATEWAY,
            ServiceError::Credential(_) => StatusCode::FAILED_DEPENDENCY,
            ServiceError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}
