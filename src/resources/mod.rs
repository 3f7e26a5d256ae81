//! Resource kinds.
//!
//! One module per kind. Each exposes a unit struct implementing
//! [`Resource`](crate::registry::Resource) plus the flatten functions its
//! data sources share.

pub mod domain;
pub mod domain_record;
pub mod firewall;
pub mod image;
pub mod instance;
pub mod lke_cluster;
pub mod object_storage_bucket;
pub mod object_storage_key;
pub mod object_storage_object;
pub mod rdns;
pub mod sshkey;
pub mod stackscript;
pub mod token;
pub mod user;
pub mod vlan;
pub mod volume;

use std::time::Duration;

use serde_json::{Map, Value};

use crate::datasource::sources;
use crate::diff::Plan;
use crate::error::ProviderError;
use crate::registry::{OpContext, Registry};
use crate::waiter::{wait_until, Poll};

/// Every resource kind and data source.
pub fn registry() -> Registry {
    let registry = Registry::new()
        .with_resource(domain::Domain)
        .with_resource(domain_record::DomainRecord)
        .with_resource(firewall::Firewall)
        .with_resource(image::Image)
        .with_resource(instance::Instance)
        .with_resource(lke_cluster::LkeCluster)
        .with_resource(object_storage_bucket::Bucket)
        .with_resource(object_storage_key::ObjectStorageKey)
        .with_resource(object_storage_object::Object)
        .with_resource(rdns::Rdns)
        .with_resource(sshkey::SshKey)
        .with_resource(stackscript::StackScript)
        .with_resource(token::Token)
        .with_resource(user::User)
        .with_resource(vlan::Vlan)
        .with_resource(volume::Volume)
        .with_data_source(firewall::FirewallDataSource)
        .with_data_source(lke_cluster::LkeClusterDataSource);
    sources::register(registry)
}

/// Parse a numeric identifier.
pub(crate) fn numeric_id(kind: &str, id: &str) -> Result<i64, ProviderError> {
    id.parse::<i64>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| ProviderError::InvalidIdentifier(format!("{} {}", kind, id)))
}

/// Render a JSON identifier as a string.
pub(crate) fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Replace a numeric `id` with its string form.
pub(crate) fn stringify_id(mut raw: Value) -> Value {
    if let Some(id) = raw.get("id").and_then(id_text) {
        raw["id"] = Value::String(id);
    }
    raw
}

/// The listed fields of `source` that are set.
pub(crate) fn pick(source: &Value, fields: &[&str]) -> Value {
    let mut out = Map::new();
    for field in fields {
        if let Some(v) = source.get(*field).filter(|v| !v.is_null()) {
            out.insert(field.to_string(), v.clone());
        }
    }
    Value::Object(out)
}

/// The listed fields the plan changes, with their desired values; `None`
/// when none changed. Cleared collections are sent as empty lists.
pub(crate) fn changed(plan: &Plan, desired: &Value, fields: &[&str]) -> Option<Value> {
    let mut out = Map::new();
    for field in fields {
        if !plan.has_change(field) {
            continue;
        }
        let value = match desired.get(*field) {
            None | Some(Value::Null) if matches!(*field, "tags" | "images" | "scopes") => {
                Value::Array(Vec::new())
            },
            None => Value::Null,
            Some(v) => v.clone(),
        };
        out.insert(field.to_string(), value);
    }
    (!out.is_empty()).then_some(Value::Object(out))
}

/// Integer members of a set or list attribute.
pub(crate) fn int_set(value: Option<&Value>) -> Vec<i64> {
    let mut out: Vec<i64> = value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default();
    out.sort_unstable();
    out.dedup();
    out
}

fn status_of(value: &Value) -> String {
    value
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

/// Poll `path` until `ready` holds. A 404 counts as not ready yet.
pub(crate) async fn wait_for<P>(
    ctx: &OpContext,
    description: String,
    path: &str,
    interval: Duration,
    timeout: Duration,
    ready: P,
) -> Result<Value, ProviderError>
where
    P: Fn(&Value) -> bool,
{
    let spec = ctx.wait(description, interval, timeout);
    let ready = &ready;
    wait_until(&spec, &ctx.cancel, || async move {
        match ctx.client.get::<Value>(path, &ctx.cancel).await {
            Ok(current) if ready(&current) => Ok(Poll::Ready(current)),
            Ok(current) => Ok(Poll::Pending(status_of(&current))),
            Err(e) if e.is_not_found() => Ok(Poll::Pending("not found".to_string())),
            Err(e) => Err(e.into()),
        }
    })
    .await
    .map_err(ProviderError::from)
}

/// Poll `path` until its `status` is one of `targets`.
pub(crate) async fn wait_for_status(
    ctx: &OpContext,
    description: String,
    path: &str,
    targets: &[&str],
    timeout: Duration,
) -> Result<Value, ProviderError> {
    wait_for(ctx, description, path, ctx.config.event_poll_interval, timeout, |v| {
        targets.contains(&status_of(v).as_str())
    })
    .await
}

/// A context over `mock` with millisecond polling.
#[cfg(test)]
pub(crate) fn test_context(mock: &crate::testing::MockTransport) -> OpContext {
    use std::sync::Arc;
    let config = crate::config::ProviderConfig::with_token("t").with_poll_interval(Duration::from_millis(1));
    OpContext::new(
        crate::client::Client::new(Arc::new(mock.clone())),
        Arc::new(config),
        tokio_util::sync::CancellationToken::new(),
    )
}
