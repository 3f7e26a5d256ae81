//! Shared value types for provider implementations.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProviderError;

/// Placeholder stored in place of a sensitive value.
pub const REDACTED: &str = "[REDACTED]";

/// A managed remote object as the engine sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceInstance {
    /// The resource kind, e.g. `linode_volume`.
    pub kind: String,
    /// The identifier exactly as the API returned it.
    pub id: String,
    /// Observed attribute values.
    pub attributes: Value,
    /// Last-known remote generation token, for kinds that expose one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<String>,
    /// Creation timestamp reported by the API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
}

impl ResourceInstance {
    /// Build an instance from a state document, reading `id`, `updated` and `created`.
    pub fn from_state(kind: impl Into<String>, state: &Value) -> Result<Self, ProviderError> {
        let id = state_id(state)?;
        Ok(Self {
            kind: kind.into(),
            id,
            attributes: state.clone(),
            generation: state
                .get("updated")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            created: state
                .get("created")
                .and_then(Value::as_str)
                .and_then(parse_timestamp),
        })
    }
}

/// An imported resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedResource {
    /// The resource type.
    pub resource_type: String,
    /// The imported state.
    pub state: Value,
}

impl ImportedResource {
    /// Create a new imported resource.
    pub fn new(resource_type: impl Into<String>, state: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            state,
        }
    }
}

/// Provider metadata returned by GetMetadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderMetadata {
    /// List of resource type names.
    pub resources: Vec<String>,
    /// List of data source type names.
    pub data_sources: Vec<String>,
}

/// Check that an identifier can be persisted.
pub fn validate_identifier(id: &str) -> Result<(), ProviderError> {
    if id.is_empty() || id == "0" {
        return Err(ProviderError::InvalidIdentifier(id.to_string()));
    }
    Ok(())
}

/// Extract the identifier from a state document.
pub fn state_id(state: &Value) -> Result<String, ProviderError> {
    let id = match state.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    validate_identifier(&id)?;
    Ok(id)
}

/// Parse a timestamp as returned by the API or supplied by a user.
///
/// Accepts RFC 3339 and the zone-less `YYYY-MM-DDTHH:MM:SS` form the API
/// uses, which is UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}
