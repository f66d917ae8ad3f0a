//! Model backend error types

use thiserror::Error;

/// Model backend error with classification
#[derive(Debug, Error)]
#[error("{message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
}

impl LlmError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_ready(model_id: &str) -> Self {
        Self::new(
            LlmErrorKind::NotReady,
            format!("model {model_id} is not ready"),
        )
    }

    pub fn unknown_model(model_id: &str) -> Self {
        Self::new(
            LlmErrorKind::UnknownModel,
            format!("unknown model: {model_id}"),
        )
    }

    pub fn load_failed(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::LoadFailed, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Timeout, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::ServerError, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::InvalidRequest, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Unknown, message)
    }

    /// Classify a reqwest failure the way every HTTP backend needs it.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(err.to_string())
        } else if err.is_connect() || err.is_request() {
            Self::network(err.to_string())
        } else if err.is_decode() {
            Self::invalid_request(format!("malformed backend response: {err}"))
        } else {
            Self::unknown(err.to_string())
        }
    }

    /// Map a non-success HTTP status to an error kind.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = format!("backend returned {status}: {body}");
        if status.is_server_error() {
            Self::server_error(message)
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Self::load_failed(message)
        } else {
            Self::invalid_request(message)
        }
    }
}

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// Active model is unloaded, loading, or failed to load
    NotReady,
    /// No descriptor with that id
    UnknownModel,
    /// Backend refused or failed to load weights
    LoadFailed,
    /// Connection refused, reset, DNS
    Network,
    /// Request exceeded its deadline
    Timeout,
    /// Backend 5xx
    ServerError,
    /// Backend rejected the request (4xx, bad payload)
    InvalidRequest,
    Unknown,
}

impl LlmErrorKind {
    /// Whether the caller may try the same request again later.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::NotReady | Self::Network | Self::Timeout | Self::ServerError
        )
    }
}
