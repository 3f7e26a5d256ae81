//! Reconciliation engine.
//!
//! Drives the lifecycle of every resource kind through the [`Resource`]
//! capability trait:
//!
//! - **Create** records the identifier before any post-create step, so a
//!   failed wait still returns a partial state holding the identifier.
//! - **Read** maps a 404 to "absent".
//! - **Update** applies an in-place plan, then re-reads.
//! - **Delete** treats 404 as success and waits for the object to disappear.
//! - **Import** parses the external identifier, then reads.
//!
//! Every operation runs under the kind's deadline and the caller's
//! cancellation token. Returned state is redacted unless the schema persists
//! sensitive values.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::client::Client;
use crate::config::ProviderConfig;
use crate::diff::{self, Plan};
use crate::error::{ApplyError, ProviderError};
use crate::registry::{OpContext, Registry, Resource, DEFAULT_TIMEOUT};
use crate::schema::{has_errors, Diagnostic, Schema};
use crate::types::{state_id, validate_identifier, ImportedResource};
use crate::validation::{resolve_desired, validate};
use crate::waiter::wait_for_deletion;

/// Drives resource operations against a configured client.
#[derive(Debug, Clone)]
pub struct Engine {
    registry: Arc<Registry>,
    client: Client,
    config: Arc<ProviderConfig>,
}

impl Engine {
    /// Create an engine.
    pub fn new(registry: Arc<Registry>, client: Client, config: Arc<ProviderConfig>) -> Self {
        Self {
            registry,
            client,
            config,
        }
    }

    /// The registry this engine dispatches to.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The shared client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The provider configuration.
    pub fn config(&self) -> &Arc<ProviderConfig> {
        &self.config
    }

    fn context(&self, cancel: &CancellationToken, deadline: Instant) -> OpContext {
        OpContext::new(self.client.clone(), self.config.clone(), cancel.child_token())
            .with_deadline(deadline)
    }

    /// Schema and cross-field validation.
    pub fn validate(&self, kind: &str, config: &Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let resource = self.registry.resource(kind)?;
        Ok(check_config(resource.as_ref(), config))
    }

    /// Compute the plan for moving `prior` to `desired`.
    #[instrument(skip(self, prior, desired), name = "engine.plan")]
    pub fn plan(
        &self,
        kind: &str,
        prior: Option<&Value>,
        desired: &Value,
    ) -> Result<Plan, ProviderError> {
        let resource = self.registry.resource(kind)?;
        let plan = plan_change(resource.as_ref(), prior, desired)?;
        debug!(
            resource_type = %kind,
            changes = plan.changes().count(),
            requires_replace = plan.requires_replace,
            "Planned"
        );
        Ok(plan)
    }

    /// Create a resource and return its observed state.
    #[instrument(skip(self, desired, cancel), name = "engine.create")]
    pub async fn create(
        &self,
        kind: &str,
        desired: &Value,
        cancel: &CancellationToken,
    ) -> Result<Value, ApplyError> {
        let resource = self.registry.resource(kind)?;
        let schema = resource.schema();
        let desired = prepare(resource.as_ref(), &schema, desired)?;
        let timeouts = resource.timeouts().with_overrides(&desired)?;
        let deadline = Instant::now() + timeouts.create;
        let ctx = self.context(cancel, deadline);

        let created = bounded(
            &ctx,
            format!("{} create", kind),
            timeouts.create,
            resource.create(&ctx, &desired),
        )
        .await?;

        validate_identifier(&created.id)?;
        let id = created.id.clone();
        info!(resource_type = %kind, id = %id, "Created");

        let mut partial = overlay(&desired, &created.seed);
        set_id(&mut partial, &id);

        let what = format!("{} {} to become ready", kind, id);
        let finished = bounded(&ctx, what, timeouts.create, async {
            resource.post_create(&ctx, &id, &partial).await?;
            resource.read(&ctx, &id, &partial).await
        })
        .await;

        match finished {
            Ok(observed) => Ok(self.output(&schema, &partial, observed, &id)),
            Err(error) => {
                warn!(
                    resource_type = %kind,
                    id = %id,
                    error = %error,
                    "Create did not finish; returning partial state"
                );
                let kept = self.output(&schema, &partial, Value::Object(Map::new()), &id);
                Err(ApplyError::partial(error, kept))
            },
        }
    }

    /// Read the current state; `None` when the object no longer exists.
    #[instrument(skip(self, state, cancel), name = "engine.read")]
    pub async fn read(
        &self,
        kind: &str,
        state: &Value,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>, ProviderError> {
        let resource = self.registry.resource(kind)?;
        let schema = resource.schema();
        let id = state_id(state)?;
        let timeout = resource.timeouts().with_overrides(state)?.create;
        let ctx = self.context(cancel, Instant::now() + timeout);

        let what = format!("{} {} read", kind, id);
        match bounded(&ctx, what, timeout, resource.read(&ctx, &id, state)).await {
            Ok(observed) => Ok(Some(self.output(&schema, state, observed, &id))),
            Err(e) if e.is_not_found() => {
                warn!(
                    resource_type = %kind,
                    id = %id,
                    "Resource no longer exists; removing from state"
                );
                Ok(None)
            },
            Err(e) => Err(e),
        }
    }

    /// Apply an in-place update.
    #[instrument(skip(self, prior, desired, cancel), name = "engine.update")]
    pub async fn update(
        &self,
        kind: &str,
        prior: &Value,
        desired: &Value,
        cancel: &CancellationToken,
    ) -> Result<Value, ApplyError> {
        let resource = self.registry.resource(kind)?;
        let schema = resource.schema();
        let plan = self.plan(kind, Some(prior), desired)?;
        if plan.requires_replace {
            return Err(ApplyError::clean(ProviderError::Configuration(format!(
                "{} change requires replacement: {}",
                kind,
                plan.render().trim_end()
            ))));
        }
        let id = state_id(prior)?;
        let timeouts = resource.timeouts().with_overrides(desired)?;
        let ctx = self.context(cancel, Instant::now() + timeouts.update);

        let mut planned = plan.planned_state.clone();
        set_id(&mut planned, &id);

        let result = bounded(&ctx, format!("{} {} update", kind, id), timeouts.update, async {
            let returned = if plan.is_empty() {
                Value::Object(Map::new())
            } else {
                resource.update(&ctx, &id, prior, &planned, &plan).await?
            };
            let seed = overlay(&ctx.recorded(), &returned);
            let mut next = overlay(&planned, &seed);
            let new_id = state_id(&next).unwrap_or_else(|_| id.clone());
            set_id(&mut next, &new_id);
            let observed = resource.read(&ctx, &new_id, &next).await?;
            Ok((next, observed, new_id))
        })
        .await;

        match result {
            Ok((next, observed, new_id)) => {
                let changes = plan.changes().count();
                info!(resource_type = %kind, id = %new_id, changes, "Updated");
                Ok(self.output(&schema, &next, observed, &new_id))
            },
            Err(error) => {
                let mut kept = overlay(prior, &ctx.recorded());
                let kept_id = state_id(&kept).unwrap_or(id);
                set_id(&mut kept, &kept_id);
                warn!(
                    resource_type = %kind,
                    id = %kept_id,
                    error = %error,
                    "Update did not finish; returning partial state"
                );
                Err(ApplyError::partial(error, kept))
            },
        }
    }

    /// Delete a resource. Deleting something already gone succeeds.
    #[instrument(skip(self, state, cancel), name = "engine.delete")]
    pub async fn delete(
        &self,
        kind: &str,
        state: &Value,
        cancel: &CancellationToken,
    ) -> Result<(), ApplyError> {
        let resource = self.registry.resource(kind)?;
        let id = state_id(state)?;
        let timeouts = resource.timeouts().with_overrides(state)?;
        let ctx = self.context(cancel, Instant::now() + timeouts.delete);

        let result = bounded(&ctx, format!("{} {} delete", kind, id), timeouts.delete, async {
            match resource.delete(&ctx, &id, state).await {
                Ok(()) => {},
                Err(e) if e.is_not_found() => {
                    warn!(resource_type = %kind, id = %id, "Already deleted");
                    return Ok(());
                },
                Err(e) => return Err(e),
            }
            if resource.confirms_deletion(&self.config) {
                let spec = ctx.wait(
                    format!("{} {} to be deleted", kind, id),
                    self.config.event_poll_interval,
                    timeouts.delete,
                );
                wait_for_deletion(&spec, &ctx.cancel, || resource.deletion_status(&ctx, &id)).await?;
            }
            Ok(())
        })
        .await;

        match result {
            Ok(()) => {
                info!(resource_type = %kind, id = %id, "Deleted");
                Ok(())
            },
            Err(error) => Err(ApplyError::partial(error, state.clone())),
        }
    }

    /// Import an existing object by its external identifier.
    #[instrument(skip(self, cancel), name = "engine.import")]
    pub async fn import(
        &self,
        kind: &str,
        raw_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let resource = self.registry.resource(kind)?;
        let seed = resource.import_state(raw_id)?;
        match self.read(kind, &seed, cancel).await? {
            Some(state) => {
                info!(resource_type = %kind, id = %raw_id, "Imported");
                Ok(vec![ImportedResource::new(kind, state)])
            },
            None => Err(ProviderError::NotFound(format!(
                "cannot import non-existent {} {:?}",
                kind, raw_id
            ))),
        }
    }

    /// Move a resource from `prior` to `desired`.
    ///
    /// No prior creates, no desired deletes, a replacing plan deletes then
    /// creates, anything else updates. Returns `None` when the resource no
    /// longer exists.
    #[instrument(skip(self, prior, desired, cancel), name = "engine.apply")]
    pub async fn apply(
        &self,
        kind: &str,
        prior: Option<&Value>,
        desired: Option<&Value>,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>, ApplyError> {
        match (prior.filter(|p| !p.is_null()), desired.filter(|d| !d.is_null())) {
            (None, None) => Ok(None),
            (None, Some(desired)) => self.create(kind, desired, cancel).await.map(Some),
            (Some(prior), None) => self.delete(kind, prior, cancel).await.map(|()| None),
            (Some(prior), Some(desired)) => {
                let plan = self.plan(kind, Some(prior), desired)?;
                if plan.requires_replace {
                    info!(resource_type = %kind, "Replacing");
                    self.delete(kind, prior, cancel).await?;
                    self.create(kind, desired, cancel).await.map(Some)
                } else {
                    self.update(kind, prior, desired, cancel).await.map(Some)
                }
            },
        }
    }

    /// Run a data source lookup.
    #[instrument(skip(self, config, cancel), name = "engine.read_data_source")]
    pub async fn read_data_source(
        &self,
        kind: &str,
        config: &Value,
        cancel: &CancellationToken,
    ) -> Result<Value, ProviderError> {
        let source = self.registry.data_source(kind)?;
        let schema = source.schema();
        let diagnostics = validate(&schema, config);
        if has_errors(&diagnostics) {
            return Err(ProviderError::Validation(
                diagnostics.into_iter().filter(Diagnostic::is_error).collect(),
            ));
        }
        let resolved = resolve_desired(&schema, config);
        let ctx = self.context(cancel, Instant::now() + DEFAULT_TIMEOUT);
        let what = format!("{} lookup", kind);
        let state = bounded(&ctx, what, DEFAULT_TIMEOUT, source.read(&ctx, &resolved)).await?;
        debug!(data_source = %kind, "Read data source");
        Ok(state)
    }

    fn output(&self, schema: &Schema, prior: &Value, observed: Value, id: &str) -> Value {
        let mut state = carry_forward(schema, prior, observed);
        set_id(&mut state, id);
        self.redact(schema, state)
    }

    fn redact(&self, schema: &Schema, state: Value) -> Value {
        if schema.persist_sensitive {
            state
        } else {
            diff::redact_state(schema, &state)
        }
    }
}

/// Plan a change of one resource; validation errors fail the plan.
pub(crate) fn plan_change(
    resource: &dyn Resource,
    prior: Option<&Value>,
    desired: &Value,
) -> Result<Plan, ProviderError> {
    let diagnostics = check_config(resource, desired);
    if has_errors(&diagnostics) {
        return Err(ProviderError::Validation(
            diagnostics.into_iter().filter(Diagnostic::is_error).collect(),
        ));
    }
    diff::plan(&resource.schema(), prior, desired)
}

/// Schema diagnostics, then the kind's own checks when the schema passes.
pub(crate) fn check_config(resource: &dyn Resource, config: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = validate(&resource.schema(), config);
    if !has_errors(&diagnostics) {
        diagnostics.extend(resource.validate(config));
    }
    diagnostics
}

fn prepare(
    resource: &dyn Resource,
    schema: &Schema,
    desired: &Value,
) -> Result<Value, ProviderError> {
    let diagnostics = check_config(resource, desired);
    if has_errors(&diagnostics) {
        return Err(ProviderError::Validation(
            diagnostics.into_iter().filter(Diagnostic::is_error).collect(),
        ));
    }
    Ok(resolve_desired(schema, desired))
}

/// Run `fut` until it finishes, the deadline passes or the caller cancels.
async fn bounded<T, F>(
    ctx: &OpContext,
    what: String,
    limit: Duration,
    fut: F,
) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    let deadline = ctx.deadline.unwrap_or_else(|| Instant::now() + limit);
    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err(ProviderError::Cancelled(what)),
        result = tokio::time::timeout_at(deadline, fut) => match result {
            Ok(inner) => inner,
            Err(_) => {
                ctx.cancel.cancel();
                Err(ProviderError::Timeout {
                    what,
                    elapsed_secs: limit.as_secs(),
                    last_observed: None,
                })
            },
        },
    }
}

/// Shallow overlay of `top` onto `base`.
fn overlay(base: &Value, top: &Value) -> Value {
    let mut out = base.as_object().cloned().unwrap_or_default();
    if let Some(top) = top.as_object() {
        for (k, v) in top {
            out.insert(k.clone(), v.clone());
        }
    }
    Value::Object(out)
}

fn set_id(state: &mut Value, id: &str) {
    if let Some(map) = state.as_object_mut() {
        map.insert("id".to_string(), Value::String(id.to_string()));
    }
}

/// Keep configuration-only values Read cannot observe.
///
/// An attribute missing from `observed` keeps its prior value; the
/// `timeouts` object is carried as-is.
fn carry_forward(schema: &Schema, prior: &Value, observed: Value) -> Value {
    let mut state = match observed {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    let Some(prior) = prior.as_object() else {
        return Value::Object(state);
    };
    let names = schema
        .block
        .attributes
        .keys()
        .chain(schema.block.blocks.keys())
        .map(String::as_str)
        .chain(["timeouts"]);
    for name in names {
        if state.contains_key(name) {
            continue;
        }
        if let Some(value) = prior.get(name).filter(|v| !v.is_null()) {
            state.insert(name.to_string(), value.clone());
        }
    }
    Value::Object(state)
}
