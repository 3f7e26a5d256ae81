//! `linode_object_storage_bucket`: a bucket in an object storage cluster.
//!
//! Buckets have no numeric identifier; state uses `<cluster>:<label>`.
//! Access settings and the TLS certificate live on their own endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::datasource::project;
use crate::diff::Plan;
use crate::error::ProviderError;
use crate::registry::{Created, ImportRule, OpContext, Resource};
use crate::schema::{Attribute, Block, NestedBlock, Schema, Validator};
use crate::sweeper::{CollectionSweeper, Sweeper};

pub(crate) const KIND: &str = "linode_object_storage_bucket";
const COLLECTION: &str = "/object-storage/buckets";

pub(crate) const ACLS: [&str; 4] =
    ["private", "public-read", "authenticated-read", "public-read-write"];

/// Object storage bucket resource.
pub struct Bucket;

pub(crate) fn schema() -> Schema {
    let cert = Block::new()
        .with_attribute("certificate", Attribute::required_string().sensitive())
        .with_attribute("private_key", Attribute::required_string().sensitive());

    Schema::v0()
        .persisting_sensitive()
        .with_attribute("id", Attribute::computed_string())
        .with_attribute("cluster", Attribute::required_string().with_force_new())
        .with_attribute(
            "label",
            Attribute::required_string()
                .with_force_new()
                .with_validator(Validator::length_between(3, 63)),
        )
        .with_attribute(
            "acl",
            Attribute::optional_string()
                .with_default(json!("private"))
                .with_validator(Validator::one_of(ACLS)),
        )
        .with_attribute(
            "cors_enabled",
            Attribute::optional_bool().with_default(Value::Bool(true)),
        )
        .with_attribute("hostname", Attribute::computed_string())
        .with_attribute("created", Attribute::computed_timestamp())
        .with_attribute("objects", Attribute::computed_int64())
        .with_attribute("size", Attribute::computed_int64())
        .with_block("cert", NestedBlock::single(cert).with_max_items(1))
}

/// Split `<cluster>:<label>`.
pub(crate) fn parse_id(id: &str) -> Result<(&str, &str), ProviderError> {
    match id.split_once(':') {
        Some((cluster, label)) if !cluster.is_empty() && !label.is_empty() => Ok((cluster, label)),
        _ => Err(ProviderError::InvalidIdentifier(format!(
            "{} {:?}, expected <cluster>:<label>",
            KIND, id
        ))),
    }
}

fn bucket_path(id: &str) -> Result<String, ProviderError> {
    let (cluster, label) = parse_id(id)?;
    Ok(format!("{}/{}/{}", COLLECTION, cluster, label))
}

fn sweep_id(item: &Value) -> Option<String> {
    Some(format!("{}:{}", item.get("cluster")?.as_str()?, item.get("label")?.as_str()?))
}

fn sweep_path(_id: &str, item: &Value) -> String {
    format!(
        "{}/{}/{}",
        COLLECTION,
        item["cluster"].as_str().unwrap_or_default(),
        item["label"].as_str().unwrap_or_default()
    )
}

async fn upload_cert(ctx: &OpContext, path: &str, cert: &Value) -> Result<(), ProviderError> {
    debug!(bucket = %path, "Uploading certificate");
    let body = json!({
        "certificate": cert["certificate"],
        "private_key": cert["private_key"],
    });
    ctx.client
        .post::<Value, _>(&format!("{}/ssl", path), &body, &ctx.cancel)
        .await?;
    Ok(())
}

#[async_trait]
impl Resource for Bucket {
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
            "cluster": desired["cluster"],
            "label": desired["label"],
            "acl": desired["acl"],
            "cors_enabled": desired["cors_enabled"],
        });
        let bucket: Value = ctx.client.post(COLLECTION, &body, &ctx.cancel).await?;
        let id = format!(
            "{}:{}",
            bucket["cluster"].as_str().unwrap_or_default(),
            bucket["label"].as_str().unwrap_or_default()
        );
        Ok(Created::new(id))
    }

    async fn post_create(
        &self,
        ctx: &OpContext,
        id: &str,
        partial: &Value,
    ) -> Result<(), ProviderError> {
        match partial.get("cert").filter(|c| c.is_object()) {
            Some(cert) => upload_cert(ctx, &bucket_path(id)?, cert).await,
            None => Ok(()),
        }
    }

    async fn read(
        &self,
        ctx: &OpContext,
        id: &str,
        _prior: &Value,
    ) -> Result<Value, ProviderError> {
        let path = bucket_path(id)?;
        let bucket: Value = ctx.client.get(&path, &ctx.cancel).await?;
        let access: Value = ctx
            .client
            .get(&format!("{}/access", path), &ctx.cancel)
            .await?;
        let ssl: Value = ctx.client.get(&format!("{}/ssl", path), &ctx.cancel).await?;

        let mut state = project(&schema().block, bucket);
        state["id"] = json!(id);
        state["acl"] = access["acl"].clone();
        state["cors_enabled"] = access["cors_enabled"].clone();
        if ssl["ssl"].as_bool() != Some(true) {
            state["cert"] = Value::Null;
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
        let path = bucket_path(id)?;

        if plan.has_change("acl") || plan.has_change("cors_enabled") {
            let body = json!({
                "acl": desired["acl"],
                "cors_enabled": desired["cors_enabled"],
            });
            ctx.client
                .post::<Value, _>(&format!("{}/access", path), &body, &ctx.cancel)
                .await?;
        }

        if plan.has_change("cert") {
            ctx.client
                .delete(&format!("{}/ssl", path), &ctx.cancel)
                .await?;
            if let Some(cert) = desired.get("cert").filter(|c| c.is_object()) {
                upload_cert(ctx, &path, cert).await?;
            }
        }
        Ok(json!({}))
    }

    async fn delete(&self, ctx: &OpContext, id: &str, _state: &Value) -> Result<(), ProviderError> {
        Ok(ctx.client.delete(&bucket_path(id)?, &ctx.cancel).await?)
    }

    fn sweeper(&self) -> Option<Arc<dyn Sweeper>> {
        Some(Arc::new(
            CollectionSweeper::new(KIND, COLLECTION)
                .with_id(sweep_id)
                .with_item_path(sweep_path),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ApiResponse, Method};
    use crate::resources::test_context as ctx;
    use crate::testing::MockTransport;

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("us-east-1:assets").unwrap(), ("us-east-1", "assets"));
        assert!(parse_id("assets").is_err());
        assert!(parse_id(":assets").is_err());
    }

    #[test]
    fn test_sweep_addresses_bucket_by_cluster_and_label() {
        let item = json!({"cluster": "us-east-1", "label": "tf-test-a"});
        assert_eq!(sweep_id(&item).as_deref(), Some("us-east-1:tf-test-a"));
        assert_eq!(sweep_path("ignored", &item), "/object-storage/buckets/us-east-1/tf-test-a");
    }

    #[tokio::test]
    async fn test_read_combines_access_and_ssl() {
        let mock = MockTransport::new();
        let path = "/object-storage/buckets/us-east-1/assets";
        mock.respond(
            Method::Get,
            path,
            ApiResponse::json(
                200,
                json!({"cluster": "us-east-1", "label": "assets", "hostname": "assets.us-east-1.example", "objects": 3, "size": 42}),
            ),
        );
        mock.respond(
            Method::Get,
            &format!("{}/access", path),
            ApiResponse::json(200, json!({"acl": "public-read", "cors_enabled": false})),
        );
        mock.respond(Method::Get, &format!("{}/ssl", path), ApiResponse::json(200, json!({"ssl": false})));

        let state = Bucket
            .read(&ctx(&mock), "us-east-1:assets", &Value::Null)
            .await
            .unwrap();
        assert_eq!(state["id"], "us-east-1:assets");
        assert_eq!(state["acl"], "public-read");
        assert_eq!(state["cors_enabled"], false);
        assert_eq!(state["objects"], 3);
        assert!(state["cert"].is_null());
    }

    #[tokio::test]
    async fn test_certificate_rotation_replaces_ssl() {
        let mock = MockTransport::new();
        let path = "/object-storage/buckets/us-east-1/assets";
        mock.respond(Method::Delete, &format!("{}/ssl", path), ApiResponse::ok());
        mock.respond(Method::Post, &format!("{}/ssl", path), ApiResponse::ok());

        let prior = json!({
            "id": "us-east-1:assets", "cluster": "us-east-1", "label": "assets",
            "acl": "private", "cors_enabled": true,
            "cert": {"certificate": "old", "private_key": "old-key"}
        });
        let desired = json!({
            "cluster": "us-east-1", "label": "assets", "acl": "private", "cors_enabled": true,
            "cert": {"certificate": "new", "private_key": "new-key"}
        });
        let plan = crate::diff::plan(&schema(), Some(&prior), &desired).unwrap();
        Bucket
            .update(&ctx(&mock), "us-east-1:assets", &prior, &desired, &plan)
            .await
            .unwrap();

        assert_eq!(mock.requests_to(Method::Delete, &format!("{}/ssl", path)).len(), 1);
        let upload = mock.requests_to(Method::Post, &format!("{}/ssl", path));
        assert_eq!(upload[0].body.as_ref().unwrap()["certificate"], "new");
        assert!(mock.requests_to(Method::Post, &format!("{}/access", path)).is_empty());
    }
}
