//! `linode_domain`: a DNS zone.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{changed, id_text, numeric_id, pick, stringify_id};
use crate::datasource::project;
use crate::diff::Plan;
use crate::error::ProviderError;
use crate::registry::{Created, OpContext, Resource};
use crate::schema::{Attribute, Diagnostic, DiffSuppress, Schema, Validator};
use crate::sweeper::{CollectionSweeper, Sweeper};

pub(crate) const KIND: &str = "linode_domain";
const COLLECTION: &str = "/domains";

const FIELDS: &[&str] = &[
    "domain",
    "type",
    "group",
    "status",
    "description",
    "master_ips",
    "axfr_ips",
    "ttl_sec",
    "retry_sec",
    "expire_sec",
    "refresh_sec",
    "soa_email",
    "tags",
];

/// DNS domain resource.
pub struct Domain;

fn seconds() -> Attribute {
    Attribute::optional_int64()
        .with_validator(Validator::int_at_least(0))
        .with_diff_suppress(DiffSuppress::DomainSeconds)
}

pub(crate) fn schema() -> Schema {
    Schema::v0()
        .with_attribute("id", Attribute::computed_string())
        .with_attribute(
            "domain",
            Attribute::required_string()
                .with_description("The zone name, e.g. example.com")
                .with_diff_suppress(DiffSuppress::TrailingDot),
        )
        .with_attribute(
            "type",
            Attribute::required_string()
                .with_force_new()
                .with_validator(Validator::one_of(["master", "slave"])),
        )
        .with_attribute(
            "group",
            Attribute::optional_string().with_validator(Validator::length_between(0, 50)),
        )
        .with_attribute(
            "status",
            Attribute::optional_string()
                .computed_when_unset()
                .with_validator(Validator::one_of(["active", "disabled", "edit_mode"])),
        )
        .with_attribute(
            "description",
            Attribute::optional_string().with_validator(Validator::length_between(0, 253)),
        )
        .with_attribute("master_ips", Attribute::string_set())
        .with_attribute("axfr_ips", Attribute::string_set())
        .with_attribute("ttl_sec", seconds())
        .with_attribute("retry_sec", seconds())
        .with_attribute("expire_sec", seconds())
        .with_attribute("refresh_sec", seconds())
        .with_attribute("soa_email", Attribute::optional_string())
        .with_attribute("tags", Attribute::string_set())
}

pub(crate) fn flatten(raw: Value) -> Value {
    project(&schema().block, stringify_id(raw))
}

#[async_trait]
impl Resource for Domain {
    fn name(&self) -> &'static str {
        KIND
    }

    fn schema(&self) -> Schema {
        schema()
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        match config.get("type").and_then(Value::as_str) {
            Some("master") if config.get("soa_email").map_or(true, Value::is_null) => {
                diagnostics.push(
                    Diagnostic::error("soa_email is required for master domains")
                        .with_attribute("soa_email"),
                );
            },
            Some("slave") if is_empty_list(config.get("master_ips")) => {
                diagnostics.push(
                    Diagnostic::error("master_ips is required for slave domains")
                        .with_attribute("master_ips"),
                );
            },
            _ => {},
        }
        diagnostics
    }

    async fn create(&self, ctx: &OpContext, desired: &Value) -> Result<Created, ProviderError> {
        let domain: Value = ctx
            .client
            .post(COLLECTION, &pick(desired, FIELDS), &ctx.cancel)
            .await?;
        Ok(Created::new(id_text(&domain["id"]).unwrap_or_default()))
    }

    async fn read(
        &self,
        ctx: &OpContext,
        id: &str,
        _prior: &Value,
    ) -> Result<Value, ProviderError> {
        numeric_id(KIND, id)?;
        let domain: Value = ctx
            .client
            .get(&format!("{}/{}", COLLECTION, id), &ctx.cancel)
            .await?;
        Ok(flatten(domain))
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
        Some(Arc::new(CollectionSweeper::new(KIND, COLLECTION).with_label_field("domain")))
    }
}

fn is_empty_list(value: Option<&Value>) -> bool {
    value
        .and_then(Value::as_array)
        .map_or(true, |items| items.is_empty())
}
