//! `linode_volume`: block storage, optionally attached to an instance.
//!
//! `linode_id` of 0 means detached. Attachment changes always detach
//! first and wait for the volume to report no instance before attaching.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::{changed, id_text, numeric_id, pick, stringify_id, wait_for, wait_for_status};
use crate::datasource::project;
use crate::diff::Plan;
use crate::error::ProviderError;
use crate::registry::{Created, OpContext, Resource, Timeouts};
use crate::schema::{Attribute, AttributeFlags, AttributeType, Diagnostic, Schema, Validator};
use crate::sweeper::{CollectionSweeper, Sweeper};

pub(crate) const KIND: &str = "linode_volume";
const COLLECTION: &str = "/volumes";

const CREATE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const UPDATE_TIMEOUT: Duration = Duration::from_secs(20 * 60);
const DELETE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Volume resource.
pub struct Volume;

pub(crate) fn schema() -> Schema {
    Schema::v0()
        .with_attribute("id", Attribute::computed_string())
        .with_attribute(
            "label",
            Attribute::required_string().with_validator(Validator::length_between(1, 32)),
        )
        .with_attribute("region", Attribute::required_string().with_force_new())
        .with_attribute(
            "size",
            Attribute::new(AttributeType::Int64, AttributeFlags::optional_computed())
                .with_validator(Validator::int_at_least(10))
                .with_description("Size in GB; volumes can only grow"),
        )
        .with_attribute(
            "linode_id",
            Attribute::new(AttributeType::Int64, AttributeFlags::optional_computed())
                .with_description("Instance to attach to, 0 for none"),
        )
        .with_attribute("filesystem_path", Attribute::computed_string())
        .with_attribute("status", Attribute::computed_string())
        .with_attribute("tags", Attribute::string_set())
}

pub(crate) fn flatten(raw: Value) -> Value {
    let mut state = project(&schema().block, stringify_id(raw));
    if state["linode_id"].is_null() {
        state["linode_id"] = json!(0);
    }
    state
}

fn volume_path(id: &str) -> String {
    format!("{}/{}", COLLECTION, id)
}

fn attached_to(volume: &Value) -> i64 {
    volume["linode_id"].as_i64().unwrap_or(0)
}

async fn wait_attached(
    ctx: &OpContext,
    id: &str,
    linode_id: i64,
    timeout: Duration,
) -> Result<(), ProviderError> {
    let description = match linode_id {
        0 => format!("volume {} to detach", id),
        l => format!("volume {} to attach to instance {}", id, l),
    };
    wait_for(
        ctx,
        description,
        &volume_path(id),
        ctx.config.event_poll_interval,
        timeout,
        |v| attached_to(v) == linode_id,
    )
    .await?;
    Ok(())
}

async fn detach(ctx: &OpContext, id: &str, timeout: Duration) -> Result<(), ProviderError> {
    info!(volume = %id, "Detaching volume");
    ctx.client
        .post::<Value, _>(&format!("{}/detach", volume_path(id)), &json!({}), &ctx.cancel)
        .await?;
    wait_attached(ctx, id, 0, timeout).await
}

async fn attach(
    ctx: &OpContext,
    id: &str,
    linode_id: i64,
    timeout: Duration,
) -> Result<(), ProviderError> {
    info!(volume = %id, linode_id, "Attaching volume");
    ctx.client
        .post::<Value, _>(
            &format!("{}/attach", volume_path(id)),
            &json!({ "linode_id": linode_id }),
            &ctx.cancel,
        )
        .await?;
    wait_attached(ctx, id, linode_id, timeout).await
}

#[async_trait]
impl Resource for Volume {
    fn name(&self) -> &'static str {
        KIND
    }

    fn schema(&self) -> Schema {
        schema()
    }

    fn timeouts(&self) -> Timeouts {
        Timeouts::new(CREATE_TIMEOUT, UPDATE_TIMEOUT, DELETE_TIMEOUT)
    }

    async fn create(&self, ctx: &OpContext, desired: &Value) -> Result<Created, ProviderError> {
        let mut body = pick(desired, &["label", "region", "size", "tags"]);
        if let Some(linode_id) = desired["linode_id"].as_i64().filter(|l| *l > 0) {
            body["linode_id"] = json!(linode_id);
        }
        let volume: Value = ctx.client.post(COLLECTION, &body, &ctx.cancel).await?;
        Ok(Created::new(id_text(&volume["id"]).unwrap_or_default()))
    }

    async fn post_create(
        &self,
        ctx: &OpContext,
        id: &str,
        partial: &Value,
    ) -> Result<(), ProviderError> {
        if let Some(linode_id) = partial["linode_id"].as_i64().filter(|l| *l > 0) {
            wait_attached(ctx, id, linode_id, CREATE_TIMEOUT).await?;
        }
        wait_for_status(
            ctx,
            format!("volume {} to become active", id),
            &volume_path(id),
            &["active"],
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
        let volume: Value = ctx.client.get(&volume_path(id), &ctx.cancel).await?;
        Ok(flatten(volume))
    }

    async fn update(
        &self,
        ctx: &OpContext,
        id: &str,
        prior: &Value,
        desired: &Value,
        plan: &Plan,
    ) -> Result<Value, ProviderError> {
        let path = volume_path(id);

        if plan.has_change("size") {
            let current = prior["size"].as_i64().unwrap_or(0);
            let size = desired["size"].as_i64().unwrap_or(current);
            if size < current {
                let message = format!("volume size cannot shrink from {} to {}", current, size);
                return Err(ProviderError::invalid(
                    Diagnostic::error(message).with_attribute("size"),
                ));
            }
            let body = json!({ "size": size });
            ctx.client
                .post::<Value, _>(&format!("{}/resize", path), &body, &ctx.cancel)
                .await?;
            wait_for_status(
                ctx,
                format!("volume {} to finish resizing", id),
                &path,
                &["active"],
                UPDATE_TIMEOUT,
            )
            .await?;
        }

        if let Some(body) = changed(plan, desired, &["label", "tags"]) {
            ctx.client.put::<Value, _>(&path, &body, &ctx.cancel).await?;
        }

        if plan.has_change("linode_id") {
            let wanted = desired["linode_id"].as_i64().unwrap_or(0);
            let volume: Value = ctx.client.get(&path, &ctx.cancel).await?;
            let current = attached_to(&volume);
            if current != wanted {
                if current != 0 {
                    detach(ctx, id, UPDATE_TIMEOUT).await?;
                }
                if wanted != 0 {
                    attach(ctx, id, wanted, UPDATE_TIMEOUT).await?;
                }
            }
        }
        Ok(json!({}))
    }

    async fn delete(&self, ctx: &OpContext, id: &str, _state: &Value) -> Result<(), ProviderError> {
        let path = volume_path(id);
        let volume: Value = ctx.client.get(&path, &ctx.cancel).await?;
        if attached_to(&volume) != 0 {
            detach(ctx, id, DELETE_TIMEOUT).await?;
        }
        Ok(ctx.client.delete(&path, &ctx.cancel).await?)
    }

    fn sweeper(&self) -> Option<Arc<dyn Sweeper>> {
        Some(Arc::new(CollectionSweeper::new(KIND, COLLECTION)))
    }
}
