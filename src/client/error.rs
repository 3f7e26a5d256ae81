//! Cloud client errors.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::error::{FieldMessage, ProviderError};
use crate::retry::{RetryDecision, Retryable};

/// Substrings of 400 responses that mean "try again shortly".
const BUSY_MARKERS: &[&str] = &[
    "busy",
    "please try again",
    "unable to perform a lookup",
];

/// A non-success response from the Linode API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{status}] {}", self.message())]
pub struct ApiError {
    /// HTTP status code.
    pub status: u16,
    /// Per-field messages from the `errors` array.
    pub errors: Vec<FieldMessage>,
    /// Value of the `X-Request-Id` response header.
    pub request_id: Option<String>,
    /// Value of the `Retry-After` response header.
    pub retry_after: Option<Duration>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorEntry>,
}

#[derive(Deserialize)]
struct ErrorEntry {
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    reason: String,
}

impl ApiError {
    /// Build an error from a status and a response body.
    pub fn from_body(status: u16, body: &Value, request_id: Option<String>) -> Self {
        let errors = serde_json::from_value::<ErrorBody>(body.clone())
            .map(|b| {
                b.errors
                    .into_iter()
                    .map(|e| FieldMessage {
                        field: e.field,
                        reason: e.reason,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self {
            status,
            errors,
            request_id,
            retry_after: None,
        }
    }

    /// Build an error with a single message.
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            errors: vec![FieldMessage {
                field: None,
                reason: reason.into(),
            }],
            request_id: None,
            retry_after: None,
        }
    }

    /// The joined per-field messages.
    pub fn message(&self) -> String {
        if self.errors.is_empty() {
            return "no error details returned".to_string();
        }
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Whether any message contains `needle`, case-insensitively.
    pub fn mentions(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.errors
            .iter()
            .any(|e| e.reason.to_lowercase().contains(&needle))
    }

    fn is_busy(&self) -> bool {
        self.status == 400 && BUSY_MARKERS.iter().any(|m| self.mentions(m))
    }
}

/// Errors returned by [`Client`](super::Client).
#[derive(Debug, Error)]
pub enum ClientError {
    /// The API answered with a non-success status.
    #[error("API error {0}")]
    Api(#[from] ApiError),

    /// The request never got an answer.
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body did not match the expected shape.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// The caller's cancellation token fired.
    #[error("request cancelled")]
    Cancelled,
}

impl ClientError {
    /// The HTTP status, for API errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api(e) => Some(e.status),
            _ => None,
        }
    }

    /// Whether the API answered 404.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

impl Retryable for ClientError {
    fn retry_decision(&self) -> RetryDecision {
        match self {
            Self::Transport(_) => RetryDecision::Retry,
            Self::Api(e) => match e.status {
                408 | 429 => e
                    .retry_after
                    .map(RetryDecision::RetryAfter)
                    .unwrap_or(RetryDecision::Retry),
                500..=599 => RetryDecision::Retry,
                400 if e.is_busy() => RetryDecision::Retry,
                _ => RetryDecision::Stop,
            },
            Self::Decode(_) | Self::Cancelled => RetryDecision::Stop,
        }
    }
}

impl From<ClientError> for ProviderError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Api(e) => match e.status {
                404 => ProviderError::NotFound(e.message()),
                409 => ProviderError::Conflict(e.message()),
                status => ProviderError::Api {
                    status,
                    request_id: e.request_id,
                    messages: e.errors,
                },
            },
            ClientError::Transport(msg) => ProviderError::Transport(msg),
            ClientError::Decode(e) => ProviderError::Serialization(e),
            ClientError::Cancelled => ProviderError::Cancelled("request aborted".to_string()),
        }
    }
}
