//! `linode_token`: a personal access token.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{changed, id_text, numeric_id, stringify_id};
use crate::datasource::project;
use crate::diff::Plan;
use crate::error::ProviderError;
use crate::registry::{Created, OpContext, Resource};
use crate::schema::{Attribute, AttributeFlags, AttributeType, Schema};
use crate::sweeper::{CollectionSweeper, Sweeper};

pub(crate) const KIND: &str = "linode_token";
const COLLECTION: &str = "/profile/tokens";

/// Personal access token resource.
pub struct Token;

pub(crate) fn schema() -> Schema {
    Schema::v0()
        .persisting_sensitive()
        .with_attribute("id", Attribute::computed_string())
        .with_attribute("label", Attribute::optional_string())
        .with_attribute(
            "scopes",
            Attribute::required_string()
                .with_force_new()
                .with_description("Space separated OAuth scopes, or `*`"),
        )
        .with_attribute(
            "expiry",
            Attribute::new(AttributeType::Timestamp, AttributeFlags::optional_computed())
                .with_force_new(),
        )
        .with_attribute("created", Attribute::computed_timestamp())
        .with_attribute(
            "token",
            Attribute::new(AttributeType::String, AttributeFlags::computed().sensitive()),
        )
}

fn flatten(raw: Value) -> Value {
    let mut state = stringify_id(raw);
    if let Some(map) = state.as_object_mut() {
        // Listing and reading only ever return a truncated prefix.
        map.remove("token");
    }
    project(&schema().block, state)
}

#[async_trait]
impl Resource for Token {
    fn name(&self) -> &'static str {
        KIND
    }

    fn schema(&self) -> Schema {
        schema()
    }

    async fn create(&self, ctx: &OpContext, desired: &Value) -> Result<Created, ProviderError> {
        let mut body = json!({ "scopes": desired["scopes"] });
        for field in ["label", "expiry"] {
            if let Some(v) = desired.get(field).filter(|v| !v.is_null()) {
                body[field] = v.clone();
            }
        }
        let token: Value = ctx.client.post(COLLECTION, &body, &ctx.cancel).await?;
        Ok(Created::new(id_text(&token["id"]).unwrap_or_default())
            .with_seed(json!({ "token": token["token"] })))
    }

    async fn read(&self, ctx: &OpContext, id: &str, prior: &Value) -> Result<Value, ProviderError> {
        numeric_id(KIND, id)?;
        let token: Value = ctx
            .client
            .get(&format!("{}/{}", COLLECTION, id), &ctx.cancel)
            .await?;
        let mut state = flatten(token);
        if let Some(secret) = prior.get("token").filter(|s| s.is_string()) {
            state["token"] = secret.clone();
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
