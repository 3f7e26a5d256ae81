//! `linode_object_storage_key`: an access key pair for object storage.
//!
//! The secret is only returned by the create call. It travels to state
//! through the create seed and is kept from prior state on every Read.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{changed, id_text, numeric_id, stringify_id};
use crate::datasource::project;
use crate::diff::Plan;
use crate::error::ProviderError;
use crate::registry::{Created, OpContext, Resource};
use crate::schema::{
    Attribute, AttributeFlags, AttributeType, Block, NestedBlock, Schema, Validator,
};
use crate::sweeper::{CollectionSweeper, Sweeper};

pub(crate) const KIND: &str = "linode_object_storage_key";
const COLLECTION: &str = "/object-storage/keys";

/// Object storage key resource.
pub struct ObjectStorageKey;

pub(crate) fn schema() -> Schema {
    let access = Block::new()
        .with_attribute("bucket_name", Attribute::required_string())
        .with_attribute("cluster", Attribute::required_string())
        .with_attribute(
            "permissions",
            Attribute::required_string()
                .with_validator(Validator::one_of(["read_only", "read_write"])),
        );

    Schema::v0()
        .persisting_sensitive()
        .with_attribute("id", Attribute::computed_string())
        .with_attribute(
            "label",
            Attribute::required_string().with_validator(Validator::length_between(1, 50)),
        )
        .with_attribute("access_key", Attribute::computed_string())
        .with_attribute(
            "secret_key",
            Attribute::new(AttributeType::String, AttributeFlags::computed().sensitive()),
        )
        .with_attribute("limited", Attribute::computed_bool())
        .with_block(
            "bucket_access",
            NestedBlock::set(access)
                .with_force_new()
                .with_primary_key(["bucket_name", "cluster"]),
        )
}

pub(crate) fn flatten(raw: Value) -> Value {
    let mut state = stringify_id(raw);
    if let Some(map) = state.as_object_mut() {
        map.remove("secret_key");
    }
    project(&schema().block, state)
}

#[async_trait]
impl Resource for ObjectStorageKey {
    fn name(&self) -> &'static str {
        KIND
    }

    fn schema(&self) -> Schema {
        schema()
    }

    async fn create(&self, ctx: &OpContext, desired: &Value) -> Result<Created, ProviderError> {
        let mut body = json!({ "label": desired["label"] });
        if let Some(access) = desired.get("bucket_access").filter(|a| a.is_array()) {
            body["bucket_access"] = access.clone();
        }
        let key: Value = ctx.client.post(COLLECTION, &body, &ctx.cancel).await?;
        Ok(Created::new(id_text(&key["id"]).unwrap_or_default())
            .with_seed(json!({ "secret_key": key["secret_key"] })))
    }

    async fn read(&self, ctx: &OpContext, id: &str, prior: &Value) -> Result<Value, ProviderError> {
        numeric_id(KIND, id)?;
        let key: Value = ctx
            .client
            .get(&format!("{}/{}", COLLECTION, id), &ctx.cancel)
            .await?;
        let mut state = flatten(key);
        if let Some(secret) = prior.get("secret_key").filter(|s| s.is_string()) {
            state["secret_key"] = secret.clone();
        }
        Ok(state)
    }

    async fn update(
        &self,
        ctx: &OpContext,
        id: &str,
        _prior: &Value,
        desired: &Value,
        plan: &Plan,
    ) -> Result<Value, ProviderError> {
        if let Some(body) = changed(plan, desired, &["label"]) {
            ctx.client
                .put::<Value, _>(&format!("{}/{}", COLLECTION, id), &body, &ctx.cancel)
                .await?;
        }
        Ok(json!({}))
    }

    async fn delete(&self, ctx: &OpContext, id: &str, _state: &Value) -> Result<(), ProviderError> {
        Ok(ctx
            .client
            .delete(&format!("{}/{}", COLLECTION, id), &ctx.cancel)
            .await?)
    }

    fn sweeper(&self) -> Option<Arc<dyn Sweeper>> {
        Some(Arc::new(CollectionSweeper::new(KIND, COLLECTION)))
    }
}
