//! `linode_stackscript`: a deployment script.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{changed, id_text, numeric_id, pick, stringify_id};
use crate::datasource::project;
use crate::diff::Plan;
use crate::error::ProviderError;
use crate::registry::{Created, OpContext, Resource};
use crate::schema::{
    Attribute, AttributeFlags, AttributeType, Block, NestedBlock, Schema, Validator,
};
use crate::sweeper::{CollectionSweeper, Sweeper};

pub(crate) const KIND: &str = "linode_stackscript";
const COLLECTION: &str = "/linode/stackscripts";

const FIELDS: &[&str] = &["label", "script", "description", "rev_note", "is_public", "images"];

/// StackScript resource.
pub struct StackScript;

pub(crate) fn user_defined_field_block() -> Block {
    Block::new()
        .with_attribute("label", Attribute::computed_string())
        .with_attribute("name", Attribute::computed_string())
        .with_attribute("example", Attribute::computed_string())
        .with_attribute("one_of", Attribute::computed_string())
        .with_attribute("many_of", Attribute::computed_string())
        .with_attribute("default", Attribute::computed_string())
}

pub(crate) fn schema() -> Schema {
    Schema::v0()
        .with_attribute("id", Attribute::computed_string())
        .with_attribute(
            "label",
            Attribute::required_string().with_validator(Validator::length_between(3, 128)),
        )
        .with_attribute("script", Attribute::required_string())
        .with_attribute("description", Attribute::required_string())
        .with_attribute("rev_note", Attribute::optional_string().computed_when_unset())
        .with_attribute(
            "is_public",
            Attribute::optional_bool()
                .with_default(Value::Bool(false))
                .with_force_new()
                .with_description("Published StackScripts cannot be made private again"),
        )
        .with_attribute(
            "images",
            Attribute::new(AttributeType::set(AttributeType::String), AttributeFlags::required()),
        )
        .with_attribute("deployments_active", Attribute::computed_int64())
        .with_attribute("deployments_total", Attribute::computed_int64())
        .with_attribute("user_gravatar_id", Attribute::computed_string())
        .with_attribute("username", Attribute::computed_string())
        .with_attribute("created", Attribute::computed_timestamp())
        .with_attribute("updated", Attribute::computed_timestamp())
        .with_block(
            "user_defined_fields",
            NestedBlock::list(user_defined_field_block()).computed(),
        )
}

pub(crate) fn flatten(raw: Value) -> Value {
    project(&schema().block, stringify_id(raw))
}

#[async_trait]
impl Resource for StackScript {
    fn name(&self) -> &'static str {
        KIND
    }

    fn schema(&self) -> Schema {
        schema()
    }

    async fn create(&self, ctx: &OpContext, desired: &Value) -> Result<Created, ProviderError> {
        let script: Value = ctx
            .client
            .post(COLLECTION, &pick(desired, FIELDS), &ctx.cancel)
            .await?;
        Ok(Created::new(id_text(&script["id"]).unwrap_or_default()))
    }

    async fn read(
        &self,
        ctx: &OpContext,
        id: &str,
        _prior: &Value,
    ) -> Result<Value, ProviderError> {
        numeric_id(KIND, id)?;
        let script: Value = ctx
            .client
            .get(&format!("{}/{}", COLLECTION, id), &ctx.cancel)
            .await?;
        Ok(flatten(script))
    }

    async fn update(
        &self,
        ctx: &OpContext,
        id: &str,
        _prior: &Value,
        desired: &Value,
        plan: &Plan,
    ) -> Result<Value, ProviderError> {
        if let Some(body) = changed(plan, desired, FIELDS) {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ApiResponse, Method};
    use crate::resources::test_context as ctx;
    use crate::testing::MockTransport;

    #[test]
    fn test_publishing_forces_replacement() {
        let prior = json!({
            "id": "3", "label": "setup", "script": "#!/bin/sh", "description": "d",
            "images": ["linode/debian12"], "is_public": false
        });
        let mut desired = prior.clone();
        desired.as_object_mut().unwrap().remove("id");
        desired["is_public"] = json!(true);
        let plan = crate::diff::plan(&schema(), Some(&prior), &desired).unwrap();
        assert!(plan.requires_replace);
    }

    #[tokio::test]
    async fn test_update_sends_new_revision() {
        let mock = MockTransport::new();
        mock.respond(Method::Put, "/linode/stackscripts/3", ApiResponse::ok());

        let prior = json!({
            "id": "3", "label": "setup", "script": "#!/bin/sh", "description": "d",
            "images": ["linode/debian12"], "is_public": false, "rev_note": "initial"
        });
        let desired = json!({
            "label": "setup", "script": "#!/bin/bash", "description": "d",
            "images": ["linode/debian12"], "is_public": false, "rev_note": "bash"
        });
        let plan = crate::diff::plan(&schema(), Some(&prior), &desired).unwrap();
        StackScript
            .update(&ctx(&mock), "3", &prior, &desired, &plan)
            .await
            .unwrap();
        assert_eq!(
            mock.requests()[0].body,
            Some(json!({"script": "#!/bin/bash", "rev_note": "bash"}))
        );
    }

    #[test]
    fn test_flatten_keeps_user_defined_fields() {
        let state = flatten(json!({
            "id": 3,
            "label": "setup",
            "mine": true,
            "user_defined_fields": [{"label": "Name", "name": "name", "example": "bob"}]
        }));
        assert_eq!(state["id"], "3");
        assert_eq!(state["user_defined_fields"][0]["name"], "name");
        assert!(state.get("mine").is_none());
    }
}
