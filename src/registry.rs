//! Resource registry.
//!
//! Each resource kind is one [`Resource`] implementation registered under its
//! kind name. The engine is written once against this trait; adding a kind
//! means adding one registry entry.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::client::Client;
use crate::config::ProviderConfig;
use crate::datasource::DataSource;
use crate::diff::Plan;
use crate::error::ProviderError;
use crate::schema::{Diagnostic, ProviderSchema, Schema};
use crate::sweeper::Sweeper;
use crate::types::{validate_identifier, ProviderMetadata};
use crate::waiter::WaitSpec;

/// Default per-operation deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Everything an operation needs: the shared client, configuration, the
/// cancellation token and the operation deadline.
#[derive(Debug, Clone)]
pub struct OpContext {
    /// Shared API client.
    pub client: Client,
    /// Provider configuration.
    pub config: Arc<ProviderConfig>,
    /// Fires when the host cancels or the provider stops.
    pub cancel: CancellationToken,
    /// When the operation must finish.
    pub deadline: Option<Instant>,
    /// State the operation has already changed remotely.
    progress: Arc<Mutex<Map<String, Value>>>,
}

impl OpContext {
    /// A context without a deadline.
    pub fn new(client: Client, config: Arc<ProviderConfig>, cancel: CancellationToken) -> Self {
        Self {
            client,
            config,
            cancel,
            deadline: None,
            progress: Arc::default(),
        }
    }

    /// Bound the operation.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// A wait spec clamped to the operation deadline.
    pub fn wait(
        &self,
        description: impl Into<String>,
        interval: Duration,
        timeout: Duration,
    ) -> WaitSpec {
        WaitSpec::new(description, interval, timeout).within(self.deadline)
    }

    /// Record a state value the remote side now holds, such as a new
    /// identifier. Recorded values survive a later failure of the same
    /// operation and end up in its partial state.
    pub fn record(&self, key: &str, value: Value) {
        self.progress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value);
    }

    /// Everything recorded so far.
    pub fn recorded(&self) -> Value {
        Value::Object(self.progress.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }
}

/// Per-operation deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Create deadline.
    pub create: Duration,
    /// Update deadline.
    pub update: Duration,
    /// Delete deadline.
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::uniform(DEFAULT_TIMEOUT)
    }
}

impl Timeouts {
    /// Explicit deadlines.
    pub fn new(create: Duration, update: Duration, delete: Duration) -> Self {
        Self {
            create,
            update,
            delete,
        }
    }

    /// The same deadline for every operation.
    pub fn uniform(timeout: Duration) -> Self {
        Self::new(timeout, timeout, timeout)
    }

    /// Apply a `timeouts` object from a desired document.
    pub fn with_overrides(mut self, desired: &Value) -> Result<Self, ProviderError> {
        let Some(overrides) = desired.get("timeouts").and_then(Value::as_object) else {
            return Ok(self);
        };
        for (op, raw) in overrides {
            let Some(raw) = raw.as_str() else {
                continue;
            };
            let parsed = parse_duration(raw).ok_or_else(|| {
                ProviderError::invalid(
                    Diagnostic::error(format!("invalid duration {:?}", raw))
                        .with_attribute(format!("timeouts.{}", op)),
                )
            })?;
            match op.as_str() {
                "create" => self.create = parsed,
                "update" => self.update = parsed,
                "delete" => self.delete = parsed,
                other => {
                    return Err(ProviderError::invalid(
                        Diagnostic::error(format!("unknown timeout {:?}", other))
                            .with_attribute("timeouts"),
                    ))
                },
            }
        }
        Ok(self)
    }
}

/// Parse `30s`, `10m`, `1h` or combinations such as `1h30m`.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let mut total = 0u64;
    let mut digits = String::new();
    for c in raw.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let n: u64 = digits.parse().ok()?;
        digits.clear();
        total += match c {
            'h' => n * 3600,
            'm' => n * 60,
            's' => n,
            _ => return None,
        };
    }
    if !digits.is_empty() {
        return None;
    }
    Some(Duration::from_secs(total))
}

/// How an external import identifier maps onto a seed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportRule {
    /// A single non-zero identifier.
    Id,
    /// Parts joined by `separator`, assigned to `fields` in order. The field
    /// named `id` becomes the identifier.
    Compound {
        /// Part separator, e.g. `,`.
        separator: char,
        /// Attribute receiving each part.
        fields: &'static [&'static str],
    },
    /// Kept verbatim as the identifier (names, compound keys the read path
    /// parses itself).
    Opaque,
}

impl ImportRule {
    /// Parse `raw` into a seed state.
    pub fn parse(&self, raw: &str) -> Result<Value, ProviderError> {
        let invalid = |reason: String| ProviderError::InvalidImportId {
            id: raw.to_string(),
            reason,
        };
        match self {
            Self::Id => {
                validate_identifier(raw)
                    .map_err(|_| invalid("expected a non-zero identifier".to_string()))?;
                Ok(json!({ "id": raw }))
            },
            Self::Compound { separator, fields } => {
                let parts: Vec<&str> = raw.split(*separator).map(str::trim).collect();
                if parts.len() != fields.len() || parts.iter().any(|p| p.is_empty() || *p == "0") {
                    return Err(invalid(format!(
                        "expected {}",
                        fields
                            .iter()
                            .map(|f| format!("<{}>", f))
                            .collect::<Vec<_>>()
                            .join(&separator.to_string())
                    )));
                }
                let mut seed = serde_json::Map::new();
                for (field, part) in fields.iter().zip(parts) {
                    let value = match part.parse::<i64>() {
                        Ok(n) if *field != "id" => json!(n),
                        _ => json!(part),
                    };
                    seed.insert(field.to_string(), value);
                }
                Ok(Value::Object(seed))
            },
            Self::Opaque => {
                if raw.trim().is_empty() {
                    return Err(invalid("identifier must not be empty".to_string()));
                }
                Ok(json!({ "id": raw }))
            },
        }
    }
}

/// Result of a create step.
#[derive(Debug, Clone, PartialEq)]
pub struct Created {
    /// The identifier exactly as the API returned it.
    pub id: String,
    /// Values known only at create time (e.g. a one-time secret) or
    /// ownership records, merged into the state handed to Read.
    pub seed: Value,
}

impl Created {
    /// A create result with no extra values.
    pub fn new(id: impl ToString) -> Self {
        Self {
            id: id.to_string(),
            seed: json!({}),
        }
    }

    /// Attach seed values.
    pub fn with_seed(mut self, seed: Value) -> Self {
        self.seed = seed;
        self
    }
}

/// The capability set of one resource kind.
///
/// `desired` documents passed to the handlers are already validated and
/// resolved against the schema (defaults applied).
#[async_trait]
pub trait Resource: Send + Sync {
    /// Kind name, e.g. `linode_volume`.
    fn name(&self) -> &'static str;

    /// Attribute schema.
    fn schema(&self) -> Schema;

    /// Default deadlines.
    fn timeouts(&self) -> Timeouts {
        Timeouts::default()
    }

    /// Cross-field checks the schema cannot express.
    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let _ = config;
        Vec::new()
    }

    /// How import identifiers are parsed.
    fn import_rule(&self) -> ImportRule {
        ImportRule::Id
    }

    /// Turn an external import identifier into a seed state.
    fn import_state(&self, raw: &str) -> Result<Value, ProviderError> {
        self.import_rule().parse(raw)
    }

    /// Create the remote object and return its identifier.
    ///
    /// Must not wait for readiness; that belongs in [`Resource::post_create`]
    /// so the identifier is recorded first.
    async fn create(&self, ctx: &OpContext, desired: &Value) -> Result<Created, ProviderError>;

    /// Steps after the identifier is recorded: waits and dependent objects.
    ///
    /// `partial` is the desired document overlaid with the create seed.
    async fn post_create(
        &self,
        ctx: &OpContext,
        id: &str,
        partial: &Value,
    ) -> Result<(), ProviderError> {
        let _ = (ctx, id, partial);
        Ok(())
    }

    /// Observe the remote object. `prior` carries seed and ownership values.
    async fn read(&self, ctx: &OpContext, id: &str, prior: &Value) -> Result<Value, ProviderError>;

    /// Apply an in-place plan and return a seed for the follow-up Read; an
    /// `id` in the seed replaces the identifier.
    ///
    /// Identifiers changed or created along the way go through
    /// [`OpContext::record`] as soon as they exist, so a failure in a later
    /// step still reports them.
    async fn update(
        &self,
        ctx: &OpContext,
        id: &str,
        prior: &Value,
        desired: &Value,
        plan: &Plan,
    ) -> Result<Value, ProviderError>;

    /// Delete the remote object. A 404 is handled by the engine.
    async fn delete(&self, ctx: &OpContext, id: &str, state: &Value) -> Result<(), ProviderError>;

    /// Whether Delete waits for the object to disappear.
    fn confirms_deletion(&self, config: &ProviderConfig) -> bool {
        let _ = config;
        true
    }

    /// Report a status for deletion polling; NotFound once gone.
    async fn deletion_status(&self, ctx: &OpContext, id: &str) -> Result<String, ProviderError> {
        let state = self.read(ctx, id, &Value::Null).await?;
        Ok(state
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("present")
            .to_string())
    }

    /// Cleanup routine for leaked test fixtures.
    fn sweeper(&self) -> Option<Arc<dyn Sweeper>> {
        None
    }
}

/// Kind name to handler table for resources and data sources.
#[derive(Clone, Default)]
pub struct Registry {
    resources: BTreeMap<&'static str, Arc<dyn Resource>>,
    data_sources: BTreeMap<&'static str, Arc<dyn DataSource>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("resources", &self.resources.keys().collect::<Vec<_>>())
            .field("data_sources", &self.data_sources.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource kind.
    pub fn with_resource(mut self, resource: impl Resource + 'static) -> Self {
        self.resources.insert(resource.name(), Arc::new(resource));
        self
    }

    /// Register a data source.
    pub fn with_data_source(mut self, data_source: impl DataSource + 'static) -> Self {
        self.data_sources
            .insert(data_source.name(), Arc::new(data_source));
        self
    }

    /// Look up a resource kind.
    pub fn resource(&self, kind: &str) -> Result<Arc<dyn Resource>, ProviderError> {
        self.resources
            .get(kind)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownResource(kind.to_string()))
    }

    /// Look up a data source.
    pub fn data_source(&self, kind: &str) -> Result<Arc<dyn DataSource>, ProviderError> {
        self.data_sources
            .get(kind)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownResource(kind.to_string()))
    }

    /// All registered resources.
    pub fn resources(&self) -> impl Iterator<Item = &Arc<dyn Resource>> {
        self.resources.values()
    }

    /// Sweepers of every registered kind that has one.
    pub fn sweepers(&self) -> Vec<Arc<dyn Sweeper>> {
        self.resources.values().filter_map(|r| r.sweeper()).collect()
    }

    /// Schemas of everything registered.
    pub fn provider_schema(&self) -> ProviderSchema {
        let mut schema =
            ProviderSchema::new().with_provider_config(crate::config::provider_schema());
        for (name, resource) in &self.resources {
            schema = schema.with_resource(*name, resource.schema());
        }
        for (name, data_source) in &self.data_sources {
            schema = schema.with_data_source(*name, data_source.schema());
        }
        schema
    }

    /// Names of everything registered.
    pub fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            resources: self.resources.keys().map(|k| k.to_string()).collect(),
            data_sources: self.data_sources.keys().map(|k| k.to_string()).collect(),
        }
    }
}
