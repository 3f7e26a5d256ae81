//! `linode_user`: an account user, identified by username.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::diff::Plan;
use crate::error::ProviderError;
use crate::registry::{Created, ImportRule, OpContext, Resource};
use crate::schema::{Attribute, AttributeFlags, AttributeType, Schema, Validator};
use crate::sweeper::{CollectionSweeper, Sweeper};

pub(crate) const KIND: &str = "linode_user";
const COLLECTION: &str = "/account/users";

/// Account user resource.
pub struct User;

pub(crate) fn schema() -> Schema {
    Schema::v0()
        .with_attribute("id", Attribute::computed_string())
        .with_attribute("email", Attribute::required_string().with_force_new())
        .with_attribute(
            "username",
            Attribute::required_string().with_validator(Validator::length_between(3, 32)),
        )
        .with_attribute(
            "restricted",
            Attribute::optional_bool().with_default(Value::Bool(false)),
        )
        .with_attribute(
            "ssh_keys",
            Attribute::new(AttributeType::list(AttributeType::String), AttributeFlags::computed()),
        )
        .with_attribute("tfa_enabled", Attribute::computed_bool())
}

pub(crate) fn flatten(raw: Value) -> Value {
    json!({
        "id": raw["username"],
        "username": raw["username"],
        "email": raw["email"],
        "restricted": raw["restricted"],
        "ssh_keys": raw.get("ssh_keys").cloned().unwrap_or_else(|| json!([])),
        "tfa_enabled": raw["tfa_enabled"],
    })
}

fn user_path(username: &str) -> String {
    format!("{}/{}", COLLECTION, username)
}

#[async_trait]
impl Resource for User {
    fn name(&self) -> &'static str {
        KIND
    }

    fn schema(&self) -> Schema {
        schema()
    }

    fn import_rule(&self) -> ImportRule {
        ImportRule::Opaque
    }

    async fn create(&self, ctx: &OpContext, desired: &Value) -> Result<Created, ProviderError> {
        let body = json!({
            "email": desired["email"],
            "username": desired["username"],
            "restricted": desired["restricted"].as_bool().unwrap_or(false),
        });
        let user: Value = ctx.client.post(COLLECTION, &body, &ctx.cancel).await?;
        Ok(Created::new(user["username"].as_str().unwrap_or_default()))
    }

    async fn read(
        &self,
        ctx: &OpContext,
        id: &str,
        _prior: &Value,
    ) -> Result<Value, ProviderError> {
        let user: Value = ctx.client.get(&user_path(id), &ctx.cancel).await?;
        Ok(flatten(user))
    }

    async fn update(
        &self,
        ctx: &OpContext,
        id: &str,
        _prior: &Value,
        desired: &Value,
        plan: &Plan,
    ) -> Result<Value, ProviderError> {
        if !plan.has_change("username") && !plan.has_change("restricted") {
            return Ok(json!({}));
        }
        let body = json!({
            "username": desired["username"],
            "restricted": desired["restricted"].as_bool().unwrap_or(false),
        });
        let user: Value = ctx.client.put(&user_path(id), &body, &ctx.cancel).await?;
        let renamed = user["username"].as_str().unwrap_or(id);
        ctx.record("id", json!(renamed));
        ctx.record("username", json!(renamed));
        Ok(json!({}))
    }

    async fn delete(&self, ctx: &OpContext, id: &str, _state: &Value) -> Result<(), ProviderError> {
        Ok(ctx.client.delete(&user_path(id), &ctx.cancel).await?)
    }

    fn sweeper(&self) -> Option<Arc<dyn Sweeper>> {
        Some(Arc::new(
            CollectionSweeper::new(KIND, COLLECTION)
                .with_label_field("username")
                .with_id(|user| user.get("username")?.as_str().map(str::to_string)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ApiResponse, Method};
    use crate::resources::test_context as ctx;
    use crate::testing::MockTransport;

    #[tokio::test]
    async fn test_rename_moves_identifier() {
        let mock = MockTransport::new();
        mock.respond(
            Method::Put,
            "/account/users/alice",
            ApiResponse::json(200, json!({"username": "alice2", "email": "a@example.com", "restricted": true})),
        );

        let prior = json!({"id": "alice", "username": "alice", "email": "a@example.com", "restricted": false});
        let desired = json!({"username": "alice2", "email": "a@example.com", "restricted": true});
        let plan = crate::diff::plan(&schema(), Some(&prior), &desired).unwrap();
        assert!(!plan.requires_replace);

        let ctx = ctx(&mock);
        User.update(&ctx, "alice", &prior, &desired, &plan).await.unwrap();
        assert_eq!(ctx.recorded()["id"], "alice2");
        assert_eq!(
            mock.requests()[0].body,
            Some(json!({"username": "alice2", "restricted": true}))
        );
    }

    #[tokio::test]
    async fn test_read_uses_username_as_id() {
        let mock = MockTransport::new();
        mock.respond(
            Method::Get,
            "/account/users/bob",
            ApiResponse::json(200, json!({"username": "bob", "email": "b@example.com", "restricted": false, "tfa_enabled": true})),
        );
        let state = User.read(&ctx(&mock), "bob", &Value::Null).await.unwrap();
        assert_eq!(state["id"], "bob");
        assert_eq!(state["tfa_enabled"], true);
        assert_eq!(state["ssh_keys"], json!([]));
    }

    #[test]
    fn test_email_change_replaces() {
        let prior = json!({"id": "bob", "username": "bob", "email": "b@example.com", "restricted": false});
        let desired = json!({"username": "bob", "email": "new@example.com"});
        let plan = crate::diff::plan(&schema(), Some(&prior), &desired).unwrap();
        assert!(plan.requires_replace);
    }
}
