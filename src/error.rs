use serde::Deserialize;
use thiserror::Error;

/// Common result type used across the SDK.
pub type Result<T> = std::result::Result<T, DocDbError>;

/// Unified error enum surfaced by all public APIs.
#[derive(Error, Debug)]
pub enum DocDbError {
    #[error("config error: {0}")]
    Config(String),
    #[error("connection error: {0}")]
    Connect(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("request cannot be resent: {0}")]
    Resend(String),
    #[error("request failed with status {status}: {message}")]
    FailedRequest {
        status: u16,
        message_code: Option<String>,
        message: String,
    },
    #[error("illegal state: {0}")]
    IllegalState(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DocDbError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DocDbError::NotFound(_))
    }

    /// Map a non-success HTTP status onto the error taxonomy.
    ///
    /// `what` names the addressed resource and is used when the server body
    /// carries no message of its own.
    pub fn from_status(status: u16, body: &[u8], what: &str) -> Self {
        let detail = ErrorEnvelope::parse(body);
        let message = detail
            .as_ref()
            .and_then(|d| d.message.clone())
            .unwrap_or_else(|| what.to_string());
        match status {
            401 => DocDbError::Auth(message),
            403 => DocDbError::Forbidden(message),
            404 => DocDbError::NotFound(message),
            _ => DocDbError::FailedRequest {
                status,
                message_code: detail.and_then(|d| d.message_code),
                message,
            },
        }
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for DocDbError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            DocDbError::Connect(format!("request timed out: {value}"))
        } else {
            DocDbError::Connect(value.to_string())
        }
    }
}

/// Treat a missing resource as success, logging it instead.
pub fn tolerate_not_found(result: Result<()>, what: &str) -> Result<()> {
    match result {
        Err(DocDbError::NotFound(msg)) => {
            tracing::warn!(resource = what, %msg, "resource already absent");
            Ok(())
        }
        other => other,
    }
}

/// Server error body: `{"errorResponse": {"statusCode": .., "messageCode": .., "message": ..}}`.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(rename = "errorResponse")]
    error_response: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "messageCode")]
    message_code: Option<String>,
    message: Option<String>,
}

impl ErrorEnvelope {
    fn parse(body: &[u8]) -> Option<ErrorDetail> {
        if body.is_empty() {
            return None;
        }
        serde_json::from_slice::<ErrorEnvelope>(body)
            .ok()
            .map(|e| e.error_response)
    }
}
