//! `linode_sshkey`: a public key stored on the profile.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{changed, numeric_id, stringify_id};
use crate::datasource::project;
use crate::diff::Plan;
use crate::error::ProviderError;
use crate::registry::{Created, OpContext, Resource};
use crate::schema::{Attribute, Schema, Validator};
use crate::sweeper::{CollectionSweeper, Sweeper};

pub(crate) const KIND: &str = "linode_sshkey";
const COLLECTION: &str = "/profile/sshkeys";

/// SSH key resource.
pub struct SshKey;

pub(crate) fn schema() -> Schema {
    Schema::v0()
        .with_attribute("id", Attribute::computed_string())
        .with_attribute(
            "label",
            Attribute::required_string()
                .with_description("A label for the key")
                .with_validator(Validator::length_between(1, 64)),
        )
        .with_attribute(
            "ssh_key",
            Attribute::required_string()
                .with_description("The public key")
                .with_force_new(),
        )
        .with_attribute("created", Attribute::computed_timestamp())
}

pub(crate) fn flatten(raw: Value) -> Value {
    let mut state = stringify_id(raw);
    if let Some(key) = state.get("ssh_key").and_then(Value::as_str) {
        state["ssh_key"] = Value::String(key.trim().to_string());
    }
    project(&schema().block, state)
}

#[async_trait]
impl Resource for SshKey {
    fn name(&self) -> &'static str {
        KIND
    }

    fn schema(&self) -> Schema {
        schema()
    }

    async fn create(&self, ctx: &OpContext, desired: &Value) -> Result<Created, ProviderError> {
        let body = json!({ "label": desired["label"], "ssh_key": desired["ssh_key"] });
        let key: Value = ctx.client.post(COLLECTION, &body, &ctx.cancel).await?;
        Ok(Created::new(super::id_text(&key["id"]).unwrap_or_default()))
    }

    async fn read(
        &self,
        ctx: &OpContext,
        id: &str,
        _prior: &Value,
    ) -> Result<Value, ProviderError> {
        numeric_id(KIND, id)?;
        let key: Value = ctx
            .client
            .get(&format!("{}/{}", COLLECTION, id), &ctx.cancel)
            .await?;
        Ok(flatten(key))
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ApiResponse, Method};
    use crate::resources::test_context as ctx;
    use crate::testing::MockTransport;

    #[tokio::test]
    async fn test_create_and_read() {
        let mock = MockTransport::new();
        mock.respond(
            Method::Post,
            COLLECTION,
            ApiResponse::json(200, json!({"id": 11, "label": "laptop", "ssh_key": "ssh-ed25519 AAAA"})),
        );
        mock.respond(
            Method::Get,
            "/profile/sshkeys/11",
            ApiResponse::json(
                200,
                json!({"id": 11, "label": "laptop", "ssh_key": "ssh-ed25519 AAAA\n", "created": "2024-01-01T00:00:00"}),
            ),
        );

        let created = SshKey
            .create(&ctx(&mock), &json!({"label": "laptop", "ssh_key": "ssh-ed25519 AAAA"}))
            .await
            .unwrap();
        assert_eq!(created.id, "11");

        let state = SshKey.read(&ctx(&mock), "11", &Value::Null).await.unwrap();
        assert_eq!(state["id"], "11");
        assert_eq!(state["ssh_key"], "ssh-ed25519 AAAA");
    }

    #[tokio::test]
    async fn test_read_rejects_bad_identifier() {
        let mock = MockTransport::new();
        let err = SshKey.read(&ctx(&mock), "abc", &Value::Null).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidIdentifier(_)));
        assert!(mock.requests().is_empty());
    }
}
