//! `linode_image`: a private image captured from a disk or uploaded from a
//! local file.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::{changed, id_text, wait_for_status};
use crate::client::{Method, RawBody};
use crate::datasource::project;
use crate::diff::Plan;
use crate::error::ProviderError;
use crate::registry::{Created, ImportRule, OpContext, Resource, Timeouts, DEFAULT_TIMEOUT};
use crate::schema::{Attribute, Diagnostic, Schema, Validator};
use crate::sweeper::{CollectionSweeper, Sweeper};

pub(crate) const KIND: &str = "linode_image";
const COLLECTION: &str = "/images";

const CREATE_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Image resource.
pub struct Image;

pub(crate) fn schema() -> Schema {
    Schema::v0()
        .with_attribute("id", Attribute::computed_string())
        .with_attribute(
            "label",
            Attribute::required_string().with_validator(Validator::length_between(1, 128)),
        )
        .with_attribute(
            "description",
            Attribute::optional_string().with_validator(Validator::length_between(0, 65000)),
        )
        .with_attribute("disk_id", Attribute::optional_int64().with_force_new())
        .with_attribute("linode_id", Attribute::optional_int64().with_force_new())
        .with_attribute(
            "file_path",
            Attribute::optional_string()
                .with_description("Local image file to upload")
                .with_force_new(),
        )
        .with_attribute("region", Attribute::optional_string().with_force_new())
        .with_attribute("created", Attribute::computed_timestamp())
        .with_attribute("created_by", Attribute::computed_string())
        .with_attribute("deprecated", Attribute::computed_bool())
        .with_attribute("is_public", Attribute::computed_bool())
        .with_attribute("size", Attribute::computed_int64())
        .with_attribute("status", Attribute::computed_string())
        .with_attribute("type", Attribute::computed_string())
        .with_attribute("expiry", Attribute::computed_timestamp())
        .with_attribute("vendor", Attribute::computed_string())
}

pub(crate) fn flatten(raw: Value) -> Value {
    project(&schema().block, raw)
}

fn is_set(config: &Value, field: &str) -> bool {
    config.get(field).is_some_and(|v| !v.is_null())
}

#[async_trait]
impl Resource for Image {
    fn name(&self) -> &'static str {
        KIND
    }

    fn schema(&self) -> Schema {
        schema()
    }

    fn timeouts(&self) -> Timeouts {
        Timeouts::new(CREATE_TIMEOUT, DEFAULT_TIMEOUT, DEFAULT_TIMEOUT)
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let from_disk = is_set(config, "disk_id") || is_set(config, "linode_id");
        let from_file = is_set(config, "file_path") || is_set(config, "region");
        let mut diagnostics = Vec::new();

        match (from_disk, from_file) {
            (true, true) => diagnostics.push(Diagnostic::error(
                "disk_id/linode_id conflict with file_path/region",
            )),
            (false, false) => diagnostics.push(Diagnostic::error(
                "one of disk_id with linode_id, or file_path with region, must be set",
            )),
            (true, false) => {
                for field in ["disk_id", "linode_id"] {
                    if !is_set(config, field) {
                        let message = format!("{} is required when capturing a disk", field);
                        diagnostics.push(Diagnostic::error(message).with_attribute(field));
                    }
                }
            },
            (false, true) => {
                for field in ["file_path", "region"] {
                    if !is_set(config, field) {
                        diagnostics.push(
                            Diagnostic::error(format!("{} is required when uploading", field))
                                .with_attribute(field),
                        );
                    }
                }
            },
        }
        diagnostics
    }

    // Image identifiers look like `private/123`.
    fn import_rule(&self) -> ImportRule {
        ImportRule::Opaque
    }

    async fn create(&self, ctx: &OpContext, desired: &Value) -> Result<Created, ProviderError> {
        if is_set(desired, "file_path") {
            let body = json!({
                "label": desired["label"],
                "region": desired["region"],
                "description": desired.get("description").cloned().unwrap_or(Value::Null),
            });
            let upload: Value = ctx
                .client
                .post(&format!("{}/upload", COLLECTION), &body, &ctx.cancel)
                .await?;
            let id = id_text(&upload["image"]["id"]).unwrap_or_default();
            return Ok(Created::new(id).with_seed(json!({ "upload_to": upload["upload_to"] })));
        }

        let body = json!({
            "disk_id": desired["disk_id"],
            "label": desired["label"],
            "description": desired.get("description").cloned().unwrap_or(Value::Null),
        });
        let image: Value = ctx.client.post(COLLECTION, &body, &ctx.cancel).await?;
        Ok(Created::new(id_text(&image["id"]).unwrap_or_default()))
    }

    async fn post_create(
        &self,
        ctx: &OpContext,
        id: &str,
        partial: &Value,
    ) -> Result<(), ProviderError> {
        if let (Some(path), Some(url)) = (
            partial.get("file_path").and_then(Value::as_str),
            partial.get("upload_to").and_then(Value::as_str),
        ) {
            let bytes = tokio::fs::read(path).await?;
            info!(image = %id, bytes = bytes.len(), "Uploading image");
            let raw = RawBody {
                bytes,
                headers: vec![("Content-Type".to_string(), "application/octet-stream".to_string())],
            };
            ctx.client.upload(Method::Put, url, raw, &ctx.cancel).await?;
        }

        wait_for_status(
            ctx,
            format!("image {} to become available", id),
            &format!("{}/{}", COLLECTION, id),
            &["available"],
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
        let image: Value = ctx
            .client
            .get(&format!("{}/{}", COLLECTION, id), &ctx.cancel)
            .await?;
        Ok(flatten(image))
    }

    async fn update(
        &self,
        ctx: &OpContext,
        id: &str,
        _prior: &Value,
        desired: &Value,
        plan: &Plan,
    ) -> Result<Value, ProviderError> {
        if let Some(body) = changed(plan, desired, &["label", "description"]) {
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
    use crate::client::ApiResponse;
    use crate::resources::test_context as ctx;
    use crate::testing::MockTransport;
    use std::io::Write;

    #[test]
    fn test_exactly_one_source() {
        assert!(Image.validate(&json!({"label": "x", "disk_id": 1, "linode_id": 2})).is_empty());
        assert!(Image.validate(&json!({"label": "x", "file_path": "a.img", "region": "us-east"})).is_empty());
        assert_eq!(Image.validate(&json!({"label": "x"})).len(), 1);
        assert_eq!(
            Image.validate(&json!({"label": "x", "disk_id": 1, "linode_id": 2, "file_path": "a"})).len(),
            1
        );
        let partial = Image.validate(&json!({"label": "x", "disk_id": 1}));
        assert_eq!(partial[0].attribute.as_deref(), Some("linode_id"));
    }

    #[tokio::test]
    async fn test_capture_from_disk_waits_for_available() {
        let mock = MockTransport::new();
        mock.respond(
            Method::Post,
            COLLECTION,
            ApiResponse::json(200, json!({"id": "private/5", "status": "creating"})),
        );
        mock.respond(Method::Get, "/images/private/5", ApiResponse::json(200, json!({"id": "private/5", "status": "creating"})));
        mock.respond(Method::Get, "/images/private/5", ApiResponse::json(200, json!({"id": "private/5", "status": "available"})));

        let desired = json!({"label": "golden", "disk_id": 10, "linode_id": 20});
        let created = Image.create(&ctx(&mock), &desired).await.unwrap();
        assert_eq!(created.id, "private/5");
        Image.post_create(&ctx(&mock), &created.id, &desired).await.unwrap();

        assert_eq!(mock.requests_to(Method::Get, "/images/private/5").len(), 2);
        assert_eq!(mock.requests()[0].body.as_ref().unwrap()["disk_id"], 10);
    }

    #[tokio::test]
    async fn test_upload_sends_file_to_presigned_url() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"disk-bytes").unwrap();
        let path = file.path().to_string_lossy().to_string();

        let mock = MockTransport::new();
        mock.respond(
            Method::Post,
            "/images/upload",
            ApiResponse::json(
                200,
                json!({"image": {"id": "private/9", "status": "pending_upload"}, "upload_to": "https://upload.example/abc"}),
            ),
        );
        mock.respond(Method::Put, "https://upload.example/abc", ApiResponse::ok());
        mock.respond(Method::Get, "/images/private/9", ApiResponse::json(200, json!({"id": "private/9", "status": "available"})));

        let desired = json!({"label": "up", "file_path": path, "region": "us-east"});
        let created = Image.create(&ctx(&mock), &desired).await.unwrap();
        assert_eq!(created.seed["upload_to"], "https://upload.example/abc");

        let mut partial = desired.clone();
        partial["upload_to"] = created.seed["upload_to"].clone();
        Image.post_create(&ctx(&mock), &created.id, &partial).await.unwrap();

        let uploads = mock.requests_to(Method::Put, "https://upload.example/abc");
        assert_eq!(uploads.len(), 1);
        assert!(uploads[0].presigned);
        assert_eq!(uploads[0].raw.as_ref().unwrap().bytes, b"disk-bytes".to_vec());
    }
}
