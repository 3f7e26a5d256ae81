//! `linode_vlan`: a private layer-2 network in one region.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{id_text, int_set, numeric_id};
use crate::diff::Plan;
use crate::error::ProviderError;
use crate::registry::{Created, OpContext, Resource};
use crate::schema::{Attribute, AttributeFlags, AttributeType, Block, NestedBlock, Schema};
use crate::sweeper::{CollectionSweeper, Sweeper};

pub(crate) const KIND: &str = "linode_vlan";
const COLLECTION: &str = "/networking/vlans";

/// VLAN resource.
pub struct Vlan;

pub(crate) fn schema() -> Schema {
    let attached = Block::new()
        .with_attribute("id", Attribute::computed_int64())
        .with_attribute("mac_address", Attribute::computed_string())
        .with_attribute("ipv4_address", Attribute::computed_string());

    Schema::v0()
        .with_attribute("id", Attribute::computed_string())
        .with_attribute("description", Attribute::optional_string().with_force_new())
        .with_attribute("region", Attribute::required_string().with_force_new())
        .with_attribute("cidr_block", Attribute::optional_string().with_force_new())
        .with_attribute(
            "linodes",
            Attribute::new(
                AttributeType::set(AttributeType::Int64),
                AttributeFlags::optional_computed(),
            )
            .with_description("Instances to attach"),
        )
        .with_block("attached_linodes", NestedBlock::list(attached).computed())
}

pub(crate) fn flatten(raw: Value) -> Value {
    let attached: Vec<Value> = raw["linodes"]
        .as_array()
        .map(|linodes| {
            linodes
                .iter()
                .map(|l| {
                    json!({
                        "id": l["id"],
                        "mac_address": l["mac_address"],
                        "ipv4_address": l["ipv4_address"],
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    let linodes: Vec<i64> = attached.iter().filter_map(|l| l["id"].as_i64()).collect();

    json!({
        "id": id_text(&raw["id"]),
        "description": raw["description"],
        "region": raw["region"],
        "cidr_block": raw["cidr_block"],
        "linodes": linodes,
        "attached_linodes": attached,
    })
}

fn vlan_path(id: &str) -> String {
    format!("{}/{}", COLLECTION, id)
}

async fn detach(ctx: &OpContext, id: &str, linodes: &[i64]) -> Result<(), ProviderError> {
    if linodes.is_empty() {
        return Ok(());
    }
    debug!(vlan = %id, ?linodes, "Detaching instances");
    ctx.client
        .post::<Value, _>(
            &format!("{}/detach", vlan_path(id)),
            &json!({ "linodes": linodes }),
            &ctx.cancel,
        )
        .await?;
    Ok(())
}

async fn attach(ctx: &OpContext, id: &str, linodes: &[i64]) -> Result<(), ProviderError> {
    if linodes.is_empty() {
        return Ok(());
    }
    debug!(vlan = %id, ?linodes, "Attaching instances");
    ctx.client
        .post::<Value, _>(
            &format!("{}/attach", vlan_path(id)),
            &json!({ "linodes": linodes }),
            &ctx.cancel,
        )
        .await?;
    Ok(())
}

fn attached_ids(vlan: &Value) -> Vec<i64> {
    let ids: Vec<Value> = vlan["linodes"]
        .as_array()
        .map(|ls| ls.iter().map(|l| l["id"].clone()).collect())
        .unwrap_or_default();
    int_set(Some(&Value::Array(ids)))
}

#[async_trait]
impl Resource for Vlan {
    fn name(&self) -> &'static str {
        KIND
    }

    fn schema(&self) -> Schema {
        schema()
    }

    async fn create(&self, ctx: &OpContext, desired: &Value) -> Result<Created, ProviderError> {
        let mut body = json!({
            "region": desired["region"],
            "linodes": int_set(desired.get("linodes")),
        });
        for field in ["description", "cidr_block"] {
            if let Some(v) = desired.get(field).filter(|v| !v.is_null()) {
                body[field] = v.clone();
            }
        }
        let vlan: Value = ctx.client.post(COLLECTION, &body, &ctx.cancel).await?;
        Ok(Created::new(id_text(&vlan["id"]).unwrap_or_default()))
    }

    async fn read(
        &self,
        ctx: &OpContext,
        id: &str,
        _prior: &Value,
    ) -> Result<Value, ProviderError> {
        numeric_id(KIND, id)?;
        let vlan: Value = ctx.client.get(&vlan_path(id), &ctx.cancel).await?;
        Ok(flatten(vlan))
    }

    async fn update(
        &self,
        ctx: &OpContext,
        id: &str,
        _prior: &Value,
        desired: &Value,
        plan: &Plan,
    ) -> Result<Value, ProviderError> {
        if !plan.has_change("linodes") {
            return Ok(json!({}));
        }
        let vlan: Value = ctx.client.get(&vlan_path(id), &ctx.cancel).await?;
        let current = attached_ids(&vlan);
        let wanted = int_set(desired.get("linodes"));

        let to_detach: Vec<i64> = current.iter().copied().filter(|l| !wanted.contains(l)).collect();
        let to_attach: Vec<i64> = wanted.iter().copied().filter(|l| !current.contains(l)).collect();
        detach(ctx, id, &to_detach).await?;
        attach(ctx, id, &to_attach).await?;
        Ok(json!({}))
    }

    async fn delete(&self, ctx: &OpContext, id: &str, _state: &Value) -> Result<(), ProviderError> {
        let vlan: Value = ctx.client.get(&vlan_path(id), &ctx.cancel).await?;
        detach(ctx, id, &attached_ids(&vlan)).await?;
        Ok(ctx.client.delete(&vlan_path(id), &ctx.cancel).await?)
    }

    fn sweeper(&self) -> Option<Arc<dyn Sweeper>> {
        Some(Arc::new(
            CollectionSweeper::new(KIND, COLLECTION).with_label_field("description"),
        ))
    }
}
