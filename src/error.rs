//! Error types for the Linode provider.
//!
//! [`ProviderError`] is the taxonomy surfaced to the host. Operations that can
//! leave remote side effects behind return [`ApplyError`], which pairs the
//! error with whatever partial state the engine managed to record.

use crate::schema::Diagnostic;
use serde_json::Value;
use thiserror::Error;

/// A single per-field message returned by the Linode API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMessage {
    /// The request field the message refers to, if any.
    pub field: Option<String>,
    /// The reason given by the API.
    pub reason: String,
}

impl std::fmt::Display for FieldMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.field {
            Some(field) => write!(f, "[{}] {}", field, self.reason),
            None => f.write_str(&self.reason),
        }
    }
}

/// Errors that can occur while serving a provider operation.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// A pre-flight validator rejected the configuration.
    #[error("Validation error: {}", summarize(.0))]
    Validation(Vec<Diagnostic>),

    /// The remote object does not exist.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The remote API reported a conflicting concurrent modification.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A waiter deadline elapsed before the remote object became ready.
    #[error("Timed out after {elapsed_secs}s waiting for {what} (last observed: {})", .last_observed.as_deref().unwrap_or("nothing"))]
    Timeout {
        /// What was being waited for.
        what: String,
        /// Seconds spent waiting.
        elapsed_secs: u64,
        /// The last observed status, for diagnosis.
        last_observed: Option<String>,
    },

    /// Any other error returned by the API.
    #[error("API error [{status}]: {}{}", join_messages(.messages), request_suffix(.request_id))]
    Api {
        /// HTTP status code.
        status: u16,
        /// Request identifier echoed by the API, if any.
        request_id: Option<String>,
        /// Per-field messages.
        messages: Vec<FieldMessage>,
    },

    /// The host cancelled the operation.
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// The provider is misconfigured or not configured yet.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource or data source type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// An import identifier could not be parsed.
    #[error("Invalid import ID {id:?}: {reason}")]
    InvalidImportId {
        /// The raw identifier supplied by the host.
        id: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A state document carries an identifier the engine cannot use.
    #[error("Invalid identifier {0:?}")]
    InvalidIdentifier(String),

    /// A network-level failure that survived client retries.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A local file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProviderError {
    /// Build a validation error from a single diagnostic.
    pub fn invalid(diagnostic: Diagnostic) -> Self {
        Self::Validation(vec![diagnostic])
    }

    /// Whether this error means the remote object is gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether the host cancelled the operation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// The HTTP status associated with this error, if it came from the API.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::NotFound(_) => Some(404),
            Self::Conflict(_) => Some(409),
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Convert this error into diagnostics for the host.
    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        match self {
            Self::Validation(diagnostics) => diagnostics,
            other => vec![Diagnostic::error(other.to_string())],
        }
    }
}

fn summarize(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| match &d.attribute {
            Some(path) => format!("{}: {}", path, d.summary),
            None => d.summary.clone(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn join_messages(messages: &[FieldMessage]) -> String {
    if messages.is_empty() {
        return "no error details returned".to_string();
    }
    messages
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn request_suffix(request_id: &Option<String>) -> String {
    match request_id {
        Some(id) => format!(" (request id {})", id),
        None => String::new(),
    }
}

/// A failed apply step, carrying the partial state recorded before failing.
///
/// When `state` is `Some`, the host must persist it: it holds every
/// identifier the engine created so no remote object is orphaned.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ApplyError {
    /// The underlying failure.
    #[source]
    pub error: ProviderError,
    /// Partial state to persist, if anything was created.
    pub state: Option<Value>,
}

impl ApplyError {
    /// An error with no remote side effects.
    pub fn clean(error: ProviderError) -> Self {
        Self { error, state: None }
    }

    /// An error after the engine recorded some state.
    pub fn partial(error: ProviderError, state: Value) -> Self {
        Self {
            error,
            state: Some(state),
        }
    }
}

impl From<ProviderError> for ApplyError {
    fn from(error: ProviderError) -> Self {
        Self::clean(error)
    }
}

/// Result alias used across the crate.
pub type Result<T, E = ProviderError> = std::result::Result<T, E>;
