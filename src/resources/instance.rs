//! `linode_instance`: a virtual machine.
//!
//! Create posts the whole instance and returns; waiting for a VLAN
//! interface to appear and for the instance to reach `running` (or
//! `offline` when not booted) happens in the post-create step so the
//! identifier is recorded first. Update is composed of the field PUT and
//! the resize, backups, private IP and power sub-endpoints.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::{changed, id_text, numeric_id, pick, stringify_id, wait_for, wait_for_status};
use crate::client::ApiFilter;
use crate::config::ProviderConfig;
use crate::datasource::project;
use crate::diff::Plan;
use crate::error::ProviderError;
use crate::registry::{Created, OpContext, Resource, Timeouts};
use crate::schema::{
    Attribute, AttributeFlags, AttributeType, Block, Diagnostic, NestedBlock, Schema, Validator,
};
use crate::sweeper::{CollectionSweeper, Sweeper};
use crate::waiter::{wait_until, Poll};

pub(crate) const KIND: &str = "linode_instance";
const COLLECTION: &str = "/linode/instances";

const CREATE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const UPDATE_TIMEOUT: Duration = Duration::from_secs(20 * 60);
const DELETE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const VLAN_TIMEOUT: Duration = Duration::from_secs(30);

const CREATE_FIELDS: &[&str] = &[
    "label",
    "region",
    "type",
    "image",
    "root_pass",
    "authorized_keys",
    "authorized_users",
    "stackscript_id",
    "stackscript_data",
    "group",
    "tags",
    "private_ip",
    "backups_enabled",
];

const PUT_FIELDS: &[&str] = &["label", "group", "tags", "watchdog_enabled"];

/// Instance resource.
pub struct Instance;

fn interface_block() -> Block {
    Block::new()
        .with_attribute(
            "purpose",
            Attribute::required_string().with_validator(Validator::one_of(["public", "vlan"])),
        )
        .with_attribute("label", Attribute::optional_string())
        .with_attribute("ipam_address", Attribute::optional_string())
}

fn specs_block() -> Block {
    Block::new()
        .with_attribute("disk", Attribute::computed_int64())
        .with_attribute("memory", Attribute::computed_int64())
        .with_attribute("vcpus", Attribute::computed_int64())
        .with_attribute("transfer", Attribute::computed_int64())
}

pub(crate) fn schema() -> Schema {
    Schema::v0()
        .persisting_sensitive()
        .with_attribute("id", Attribute::computed_string())
        .with_attribute(
            "label",
            Attribute::optional_string()
                .computed_when_unset()
                .with_validator(Validator::matches(
                    r"^[a-zA-Z0-9][a-zA-Z0-9_.-]{1,62}[a-zA-Z0-9]$",
                    "label must be 3-64 characters of letters, digits, dots, dashes and underscores",
                )),
        )
        .with_attribute("region", Attribute::required_string().with_force_new())
        .with_attribute(
            "type",
            Attribute::required_string()
                .with_description("Plan type; changing it resizes the instance"),
        )
        .with_attribute("image", Attribute::optional_string().with_force_new())
        .with_attribute(
            "root_pass",
            Attribute::optional_string().sensitive().with_force_new(),
        )
        .with_attribute("authorized_keys", Attribute::string_list().with_force_new())
        .with_attribute("authorized_users", Attribute::string_list().with_force_new())
        .with_attribute("stackscript_id", Attribute::optional_int64().with_force_new())
        .with_attribute(
            "stackscript_data",
            Attribute::new(AttributeType::map(AttributeType::String), AttributeFlags::optional())
                .sensitive()
                .with_force_new(),
        )
        .with_attribute("group", Attribute::optional_string())
        .with_attribute("tags", Attribute::string_set())
        .with_attribute(
            "private_ip",
            Attribute::optional_bool().with_default(Value::Bool(false)),
        )
        .with_attribute("backups_enabled", Attribute::optional_bool().computed_when_unset())
        .with_attribute(
            "watchdog_enabled",
            Attribute::optional_bool().with_default(Value::Bool(true)),
        )
        .with_attribute("booted", Attribute::optional_bool().computed_when_unset())
        .with_attribute("status", Attribute::computed_string())
        .with_attribute("ip_address", Attribute::computed_string())
        .with_attribute("private_ip_address", Attribute::computed_string())
        .with_attribute(
            "ipv4",
            Attribute::new(AttributeType::set(AttributeType::String), AttributeFlags::computed()),
        )
        .with_attribute("ipv6", Attribute::computed_string())
        .with_block("interface", NestedBlock::list(interface_block()).with_force_new())
        .with_block("specs", NestedBlock::single(specs_block()).computed())
}

pub(crate) fn flatten(raw: Value) -> Value {
    let mut state = stringify_id(raw);
    let addresses: Vec<Ipv4Addr> = state
        .get("ipv4")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|a| a.as_str()?.parse().ok()).collect())
        .unwrap_or_default();
    let public = addresses.iter().find(|a| !a.is_private());
    let private = addresses.iter().find(|a| a.is_private());

    state["ip_address"] = public.map_or(Value::Null, |a| json!(a.to_string()));
    state["private_ip_address"] = private.map_or(Value::Null, |a| json!(a.to_string()));
    state["private_ip"] = json!(private.is_some());
    state["backups_enabled"] = state
        .pointer("/backups/enabled")
        .cloned()
        .unwrap_or(Value::Bool(false));
    state["booted"] = json!(state["status"] == "running");
    project(&schema().block, state)
}

fn item_path(id: &str) -> String {
    format!("{}/{}", COLLECTION, id)
}

fn create_body(desired: &Value) -> Value {
    let mut body = pick(desired, CREATE_FIELDS);
    if let Some(map) = body.as_object_mut() {
        if let Some(booted) = desired.get("booted").and_then(Value::as_bool) {
            map.insert("booted".to_string(), json!(booted));
        }
        if let Some(interfaces) = desired.get("interface").and_then(Value::as_array) {
            let interfaces: Vec<Value> = interfaces
                .iter()
                .map(|i| pick(i, &["purpose", "label", "ipam_address"]))
                .collect();
            map.insert("interfaces".to_string(), Value::Array(interfaces));
        }
    }
    body
}

fn vlan_labels(desired: &Value) -> Vec<String> {
    desired
        .get("interface")
        .and_then(Value::as_array)
        .map(|interfaces| {
            interfaces
                .iter()
                .filter(|i| i["purpose"] == "vlan")
                .filter_map(|i| i["label"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Wait until a VLAN named `label` is listed in the instance's region.
async fn wait_for_vlan(ctx: &OpContext, label: &str, region: &Value) -> Result<(), ProviderError> {
    let spec = ctx.wait(
        format!("VLAN {} to appear", label),
        ctx.config.event_poll_interval.min(Duration::from_secs(1)),
        VLAN_TIMEOUT,
    );
    let mut filter = ApiFilter::new().eq("label", label);
    if let Some(region) = region.as_str() {
        filter = filter.eq("region", region);
    }
    let filter = &filter;
    wait_until(&spec, &ctx.cancel, || async move {
        let vlans: Vec<Value> = ctx
            .client
            .list("/networking/vlans", Some(filter), &ctx.cancel)
            .await?;
        Ok(if vlans.iter().any(|v| v["label"] == label) {
            Poll::Ready(())
        } else {
            Poll::Pending("absent".to_string())
        })
    })
    .await
    .map_err(ProviderError::from)
}

async fn power(ctx: &OpContext, id: &str, boot: bool) -> Result<(), ProviderError> {
    let (action, target) = if boot { ("boot", "running") } else { ("shutdown", "offline") };
    info!(instance = %id, action, "Changing power state");
    ctx.client
        .post::<Value, _>(&format!("{}/{}", item_path(id), action), &json!({}), &ctx.cancel)
        .await?;
    wait_for_status(
        ctx,
        format!("instance {} to become {}", id, target),
        &item_path(id),
        &[target],
        UPDATE_TIMEOUT,
    )
    .await?;
    Ok(())
}

#[async_trait]
impl Resource for Instance {
    fn name(&self) -> &'static str {
        KIND
    }

    fn schema(&self) -> Schema {
        schema()
    }

    fn timeouts(&self) -> Timeouts {
        Timeouts::new(CREATE_TIMEOUT, UPDATE_TIMEOUT, DELETE_TIMEOUT)
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        let has = |f: &str| config.get(f).is_some_and(|v| !v.is_null());
        if has("stackscript_id") && !has("image") {
            diagnostics.push(
                Diagnostic::error("image is required when stackscript_id is set")
                    .with_attribute("image"),
            );
        }
        for (i, interface) in config
            .get("interface")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .enumerate()
        {
            let unlabelled = interface.get("label").map_or(true, Value::is_null);
            if interface["purpose"] == "vlan" && unlabelled {
                diagnostics.push(
                    Diagnostic::error("VLAN interfaces need a label")
                        .with_attribute(format!("interface.{}.label", i)),
                );
            }
        }
        diagnostics
    }

    async fn create(&self, ctx: &OpContext, desired: &Value) -> Result<Created, ProviderError> {
        let instance: Value = ctx
            .client
            .post(COLLECTION, &create_body(desired), &ctx.cancel)
            .await?;
        Ok(Created::new(id_text(&instance["id"]).unwrap_or_default()))
    }

    async fn post_create(
        &self,
        ctx: &OpContext,
        id: &str,
        partial: &Value,
    ) -> Result<(), ProviderError> {
        for label in vlan_labels(partial) {
            wait_for_vlan(ctx, &label, &partial["region"]).await?;
        }
        if ctx.config.skip_instance_ready_poll {
            debug!(instance = %id, "Skipping readiness poll");
            return Ok(());
        }
        let target = if partial["booted"].as_bool() == Some(false) {
            "offline"
        } else {
            "running"
        };
        wait_for_status(
            ctx,
            format!("instance {} to become {}", id, target),
            &item_path(id),
            &[target],
            CREATE_TIMEOUT,
        )
        .await?;
        Ok(())
    }

    async fn read(
        &self,
        ctx: &OpContext,
        id: &str,
        _prior: &Value,
    ) -> Result<Value, ProviderError> {
        numeric_id(KIND, id)?;
        let instance: Value = ctx.client.get(&item_path(id), &ctx.cancel).await?;
        Ok(flatten(instance))
    }

    async fn update(
        &self,
        ctx: &OpContext,
        id: &str,
        prior: &Value,
        desired: &Value,
        plan: &Plan,
    ) -> Result<Value, ProviderError> {
        let path = item_path(id);

        if let Some(body) = changed(plan, desired, PUT_FIELDS) {
            ctx.client.put::<Value, _>(&path, &body, &ctx.cancel).await?;
        }

        if plan.has_change("type") {
            let target = desired["type"].clone();
            info!(instance = %id, r#type = %target, "Resizing instance");
            let body = json!({"type": target});
            ctx.client
                .post::<Value, _>(&format!("{}/resize", path), &body, &ctx.cancel)
                .await?;
            wait_for(
                ctx,
                format!("instance {} to finish resizing", id),
                &path,
                ctx.config.event_poll_interval,
                UPDATE_TIMEOUT,
                |v| {
                    v["type"] == target
                        && matches!(v["status"].as_str(), Some("running" | "offline"))
                },
            )
            .await?;
        }

        if plan.has_change("backups_enabled") {
            let action = match desired["backups_enabled"].as_bool() {
                Some(true) => "enable",
                _ => "cancel",
            };
            ctx.client
                .post::<Value, _>(&format!("{}/backups/{}", path, action), &json!({}), &ctx.cancel)
                .await?;
        }

        if plan.has_change("private_ip") {
            if desired["private_ip"].as_bool() != Some(true) {
                return Err(ProviderError::invalid(
                    Diagnostic::error("a private IP cannot be removed from an instance")
                        .with_attribute("private_ip"),
                ));
            }
            ctx.client
                .post::<Value, _>(
                    &format!("{}/ips", path),
                    &json!({"type": "ipv4", "public": false}),
                    &ctx.cancel,
                )
                .await?;
        }

        let was_booted = prior["booted"].as_bool();
        match desired["booted"].as_bool() {
            Some(boot) if plan.has_change("booted") && was_booted != Some(boot) => {
                power(ctx, id, boot).await?;
            },
            _ => {},
        }

        Ok(Value::Object(Map::new()))
    }

    async fn delete(&self, ctx: &OpContext, id: &str, _state: &Value) -> Result<(), ProviderError> {
        Ok(ctx.client.delete(&item_path(id), &ctx.cancel).await?)
    }

    fn confirms_deletion(&self, config: &ProviderConfig) -> bool {
        !config.skip_instance_delete_poll
    }

    fn sweeper(&self) -> Option<Arc<dyn Sweeper>> {
        Some(Arc::new(CollectionSweeper::new(KIND, COLLECTION)))
    }
}
