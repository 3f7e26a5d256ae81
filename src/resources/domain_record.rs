//! `linode_domain_record`: one record inside a domain.
//!
//! The API names the record type `type`; state calls it `record_type`.
//! Records live under their domain, so every call needs `domain_id` from
//! state and import takes `<domain_id>,<record_id>`.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{id_text, numeric_id, stringify_id};
use crate::config::ProviderConfig;
use crate::datasource::project;
use crate::diff::Plan;
use crate::error::ProviderError;
use crate::registry::{Created, ImportRule, OpContext, Resource};
use crate::schema::{Attribute, Diagnostic, DiffSuppress, Schema, Validator};

pub(crate) const KIND: &str = "linode_domain_record";

const FIELDS: &[&str] = &[
    "name", "ttl_sec", "target", "priority", "protocol", "service", "tag", "port", "weight",
];

/// DNS record resource.
pub struct DomainRecord;

pub(crate) fn schema() -> Schema {
    Schema::v0()
        .with_attribute("id", Attribute::computed_string())
        .with_attribute(
            "domain_id",
            Attribute::required_int64()
                .with_force_new()
                .with_validator(Validator::int_at_least(1)),
        )
        .with_attribute(
            "name",
            Attribute::optional_string()
                .computed_when_unset()
                .with_validator(Validator::length_between(0, 100)),
        )
        .with_attribute(
            "record_type",
            Attribute::required_string()
                .with_force_new()
                .with_validator(Validator::one_of([
                    "A", "AAAA", "NS", "MX", "CNAME", "TXT", "SRV", "PTR", "CAA",
                ])),
        )
        .with_attribute(
            "ttl_sec",
            Attribute::optional_int64().with_diff_suppress(DiffSuppress::DomainSeconds),
        )
        .with_attribute(
            "target",
            Attribute::required_string().with_diff_suppress(DiffSuppress::TrailingDot),
        )
        .with_attribute(
            "priority",
            Attribute::optional_int64().with_validator(Validator::int_between(0, 255)),
        )
        .with_attribute("protocol", Attribute::optional_string())
        .with_attribute("service", Attribute::optional_string())
        .with_attribute(
            "tag",
            Attribute::optional_string()
                .with_validator(Validator::one_of(["issue", "issuewild", "iodef"])),
        )
        .with_attribute("port", Attribute::optional_int64())
        .with_attribute("weight", Attribute::optional_int64())
}

pub(crate) fn flatten(raw: Value) -> Value {
    let mut state = stringify_id(raw);
    if let Some(map) = state.as_object_mut() {
        if let Some(record_type) = map.remove("type") {
            map.insert("record_type".to_string(), record_type);
        }
    }
    project(&schema().block, state)
}

fn domain_id(state: &Value) -> Result<i64, ProviderError> {
    state
        .get("domain_id")
        .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .filter(|id| *id > 0)
        .ok_or_else(|| ProviderError::InvalidIdentifier(format!("{} without domain_id", KIND)))
}

fn records_path(state: &Value) -> Result<String, ProviderError> {
    Ok(format!("/domains/{}/records", domain_id(state)?))
}

fn body(desired: &Value) -> Value {
    let mut out = Map::new();
    if let Some(t) = desired.get("record_type") {
        out.insert("type".to_string(), t.clone());
    }
    for field in FIELDS {
        if let Some(v) = desired.get(*field).filter(|v| !v.is_null()) {
            out.insert(field.to_string(), v.clone());
        }
    }
    Value::Object(out)
}

#[async_trait]
impl Resource for DomainRecord {
    fn name(&self) -> &'static str {
        KIND
    }

    fn schema(&self) -> Schema {
        schema()
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let record_type = config.get("record_type").and_then(Value::as_str);
        let has = |f: &str| config.get(f).is_some_and(|v| !v.is_null());
        let mut diagnostics = Vec::new();
        if record_type == Some("SRV") {
            for field in ["service", "protocol"] {
                if !has(field) {
                    diagnostics.push(
                        Diagnostic::error(format!("{} is required for SRV records", field))
                            .with_attribute(field),
                    );
                }
            }
        }
        if record_type == Some("CAA") && !has("tag") {
            diagnostics.push(
                Diagnostic::error("tag is required for CAA records").with_attribute("tag"),
            );
        }
        diagnostics
    }

    fn import_rule(&self) -> ImportRule {
        ImportRule::Compound {
            separator: ',',
            fields: &["domain_id", "id"],
        }
    }

    async fn create(&self, ctx: &OpContext, desired: &Value) -> Result<Created, ProviderError> {
        let record: Value = ctx
            .client
            .post(&records_path(desired)?, &body(desired), &ctx.cancel)
            .await?;
        Ok(Created::new(id_text(&record["id"]).unwrap_or_default()))
    }

    async fn read(&self, ctx: &OpContext, id: &str, prior: &Value) -> Result<Value, ProviderError> {
        numeric_id(KIND, id)?;
        let domain = domain_id(prior)?;
        let record: Value = ctx
            .client
            .get(&format!("/domains/{}/records/{}", domain, id), &ctx.cancel)
            .await?;
        let mut state = flatten(record);
        state["domain_id"] = json!(domain);
        Ok(state)
    }

    async fn update(
        &self,
        ctx: &OpContext,
        id: &str,
        prior: &Value,
        desired: &Value,
        plan: &Plan,
    ) -> Result<Value, ProviderError> {
        let mut patch = Map::new();
        for field in FIELDS {
            if plan.has_change(field) {
                let value = desired.get(*field).cloned().unwrap_or(Value::Null);
                patch.insert(field.to_string(), value);
            }
        }
        if !patch.is_empty() {
            let path = format!("{}/{}", records_path(prior)?, id);
            ctx.client
                .put::<Value, _>(&path, &Value::Object(patch), &ctx.cancel)
                .await?;
        }
        Ok(json!({}))
    }

    async fn delete(&self, ctx: &OpContext, id: &str, state: &Value) -> Result<(), ProviderError> {
        let path = format!("{}/{}", records_path(state)?, id);
        Ok(ctx.client.delete(&path, &ctx.cancel).await?)
    }

    fn confirms_deletion(&self, _config: &ProviderConfig) -> bool {
        false
    }
}
