//! `linode_object_storage_object`: one object in a bucket.
//!
//! Objects are written and deleted through presigned URLs the API hands
//! out; listing and ACL changes go through the regular API. The identifier
//! is `<cluster>/<bucket>/<key>`.

use async_trait::async_trait;
use base64::Engine as _;
use serde_json::{json, Value};
use tracing::debug;

use super::object_storage_bucket::ACLS;
use crate::client::{ApiRequest, Method, RawBody};
use crate::diff::Plan;
use crate::error::ProviderError;
use crate::registry::{Created, ImportRule, OpContext, Resource};
use crate::schema::{Attribute, Diagnostic, Schema, Validator};

pub(crate) const KIND: &str = "linode_object_storage_object";

const SOURCES: [&str; 3] = ["content", "content_base64", "source"];

/// Object storage object resource.
pub struct Object;

pub(crate) fn schema() -> Schema {
    Schema::v0()
        .with_attribute("id", Attribute::computed_string())
        .with_attribute("bucket", Attribute::required_string().with_force_new())
        .with_attribute("cluster", Attribute::required_string().with_force_new())
        .with_attribute("key", Attribute::required_string().with_force_new())
        .with_attribute("content", Attribute::optional_string())
        .with_attribute(
            "content_base64",
            Attribute::optional_string().with_validator(Validator::Base64),
        )
        .with_attribute(
            "source",
            Attribute::optional_string().with_description("Path of a local file to upload"),
        )
        .with_attribute("content_type", Attribute::optional_string().computed_when_unset())
        .with_attribute(
            "acl",
            Attribute::optional_string()
                .with_default(json!("private"))
                .with_validator(Validator::one_of(ACLS)),
        )
        .with_attribute("etag", Attribute::computed_string())
}

struct Location<'a> {
    cluster: &'a str,
    bucket: &'a str,
    key: &'a str,
}

impl<'a> Location<'a> {
    fn parse(id: &'a str) -> Result<Self, ProviderError> {
        let mut parts = id.splitn(3, '/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(cluster), Some(bucket), Some(key))
                if !cluster.is_empty() && !bucket.is_empty() && !key.is_empty() =>
            {
                Ok(Self { cluster, bucket, key })
            },
            _ => Err(ProviderError::InvalidIdentifier(format!(
                "{} {:?}, expected <cluster>/<bucket>/<key>",
                KIND, id
            ))),
        }
    }

    fn bucket_path(&self) -> String {
        format!("/object-storage/buckets/{}/{}", self.cluster, self.bucket)
    }
}

fn object_id(desired: &Value) -> String {
    format!(
        "{}/{}/{}",
        desired["cluster"].as_str().unwrap_or_default(),
        desired["bucket"].as_str().unwrap_or_default(),
        desired["key"].as_str().unwrap_or_default()
    )
}

/// The bytes to upload, from whichever source is set.
async fn body_of(desired: &Value) -> Result<Vec<u8>, ProviderError> {
    if let Some(content) = desired.get("content").and_then(Value::as_str) {
        return Ok(content.as_bytes().to_vec());
    }
    if let Some(encoded) = desired.get("content_base64").and_then(Value::as_str) {
        return base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| {
                ProviderError::invalid(
                    Diagnostic::error(format!("content_base64 is not valid base64: {}", e))
                        .with_attribute("content_base64"),
                )
            });
    }
    if let Some(path) = desired.get("source").and_then(Value::as_str) {
        return Ok(tokio::fs::read(path).await?);
    }
    Err(ProviderError::invalid(Diagnostic::error(
        "one of content, content_base64 or source must be set",
    )))
}

async fn presign(
    ctx: &OpContext,
    location: &Location<'_>,
    method: Method,
    content_type: Option<&str>,
) -> Result<String, ProviderError> {
    let mut body = json!({ "method": method.as_str(), "name": location.key });
    if let Some(content_type) = content_type {
        body["content_type"] = json!(content_type);
    }
    let url: Value = ctx
        .client
        .post(&format!("{}/object-url", location.bucket_path()), &body, &ctx.cancel)
        .await?;
    url["url"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ProviderError::Transport("object-url response without url".to_string()))
}

async fn put_object(
    ctx: &OpContext,
    location: &Location<'_>,
    desired: &Value,
) -> Result<(), ProviderError> {
    let bytes = body_of(desired).await?;
    let content_type = desired
        .get("content_type")
        .and_then(Value::as_str)
        .unwrap_or("application/octet-stream");
    let acl = desired.get("acl").and_then(Value::as_str).unwrap_or("private");
    let url = presign(ctx, location, Method::Put, Some(content_type)).await?;

    debug!(key = %location.key, bytes = bytes.len(), "Uploading object");
    let raw = RawBody {
        bytes,
        headers: vec![
            ("Content-Type".to_string(), content_type.to_string()),
            ("x-amz-acl".to_string(), acl.to_string()),
        ],
    };
    ctx.client.upload(Method::Put, &url, raw, &ctx.cancel).await?;
    Ok(())
}

#[async_trait]
impl Resource for Object {
    fn name(&self) -> &'static str {
        KIND
    }

    fn schema(&self) -> Schema {
        schema()
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let set = SOURCES
            .iter()
            .filter(|f| config.get(**f).is_some_and(|v| !v.is_null()))
            .count();
        if set == 1 {
            Vec::new()
        } else {
            vec![Diagnostic::error("exactly one of content, content_base64 or source must be set")]
        }
    }

    fn import_rule(&self) -> ImportRule {
        ImportRule::Opaque
    }

    async fn create(&self, ctx: &OpContext, desired: &Value) -> Result<Created, ProviderError> {
        let id = object_id(desired);
        put_object(ctx, &Location::parse(&id)?, desired).await?;
        Ok(Created::new(id))
    }

    async fn read(
        &self,
        ctx: &OpContext,
        id: &str,
        _prior: &Value,
    ) -> Result<Value, ProviderError> {
        let location = Location::parse(id)?;
        let bucket = location.bucket_path();

        let request = ApiRequest::new(Method::Get, format!("{}/object-list", bucket))
            .with_query("prefix", location.key);
        let listing = ctx.client.execute(request, &ctx.cancel).await?.body;
        let object = listing["data"]
            .as_array()
            .and_then(|items| items.iter().find(|o| o["name"] == location.key))
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("{} {}", KIND, id)))?;

        let request = ApiRequest::new(Method::Get, format!("{}/object-acl", bucket))
            .with_query("name", location.key);
        let acl = ctx.client.execute(request, &ctx.cancel).await?.body;

        Ok(json!({
            "id": id,
            "cluster": location.cluster,
            "bucket": location.bucket,
            "key": location.key,
            "etag": object["etag"],
            "acl": acl["acl"],
        }))
    }

    async fn update(
        &self,
        ctx: &OpContext,
        id: &str,
        _prior: &Value,
        desired: &Value,
        plan: &Plan,
    ) -> Result<Value, ProviderError> {
        let location = Location::parse(id)?;
        let content_changed = SOURCES
            .iter()
            .chain(&["content_type"])
            .any(|f| plan.has_change(f));

        if content_changed {
            put_object(ctx, &location, desired).await?;
        } else if plan.has_change("acl") {
            ctx.client
                .put::<Value, _>(
                    &format!("{}/object-acl", location.bucket_path()),
                    &json!({ "name": location.key, "acl": desired["acl"] }),
                    &ctx.cancel,
                )
                .await?;
        }
        Ok(json!({}))
    }

    async fn delete(&self, ctx: &OpContext, id: &str, _state: &Value) -> Result<(), ProviderError> {
        let location = Location::parse(id)?;
        let url = presign(ctx, &location, Method::Delete, None).await?;
        let raw = RawBody {
            bytes: Vec::new(),
            headers: Vec::new(),
        };
        ctx.client.upload(Method::Delete, &url, raw, &ctx.cancel).await?;
        Ok(())
    }
}
