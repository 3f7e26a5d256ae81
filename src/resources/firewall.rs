//! `linode_firewall`: a cloud firewall, its rules and attached devices.
//!
//! The API splits a firewall across three endpoints: the firewall itself,
//! `/rules` and `/devices`. Create posts the firewall with its rules, then
//! attaches devices, then disables it when requested. Update touches each
//! endpoint only when its part of the plan changed.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{changed, id_text, int_set, numeric_id};
use crate::datasource::{lookup_schema, DataSource};
use crate::diff::Plan;
use crate::error::ProviderError;
use crate::registry::{Created, OpContext, Resource};
use crate::schema::{
    Attribute, AttributeFlags, AttributeType, Block, DiffSuppress, NestedBlock, Schema, Validator,
};
use crate::sweeper::{CollectionSweeper, Sweeper};

pub(crate) const KIND: &str = "linode_firewall";
const COLLECTION: &str = "/networking/firewalls";

/// Firewall resource.
pub struct Firewall;

fn rule_block() -> Block {
    Block::new()
        .with_attribute("label", Attribute::optional_string())
        .with_attribute(
            "action",
            Attribute::required_string().with_validator(Validator::one_of(["ACCEPT", "DROP"])),
        )
        .with_attribute(
            "protocol",
            Attribute::required_string()
                .with_validator(Validator::one_of(["TCP", "UDP", "ICMP", "IPENCAP"])),
        )
        .with_attribute(
            "ports",
            Attribute::optional_string().with_diff_suppress(DiffSuppress::CommaSeparatedSet),
        )
        .with_attribute("ipv4", Attribute::string_list())
        .with_attribute("ipv6", Attribute::string_list())
}

fn device_block() -> Block {
    Block::new()
        .with_attribute("id", Attribute::computed_int64())
        .with_attribute("entity_id", Attribute::computed_int64())
        .with_attribute("type", Attribute::computed_string())
        .with_attribute("label", Attribute::computed_string())
        .with_attribute("url", Attribute::computed_string())
}

fn policy() -> Attribute {
    Attribute::required_string().with_validator(Validator::one_of(["ACCEPT", "DROP"]))
}

pub(crate) fn schema() -> Schema {
    Schema::v0()
        .with_attribute("id", Attribute::computed_string())
        .with_attribute(
            "label",
            Attribute::required_string().with_validator(Validator::length_between(3, 32)),
        )
        .with_attribute("tags", Attribute::string_set())
        .with_attribute(
            "disabled",
            Attribute::optional_bool().with_default(Value::Bool(false)),
        )
        .with_attribute("inbound_policy", policy())
        .with_attribute("outbound_policy", policy())
        .with_attribute(
            "linodes",
            Attribute::new(
                AttributeType::set(AttributeType::Int64),
                AttributeFlags::optional_computed(),
            )
            .with_description("Instances the firewall applies to"),
        )
        .with_attribute("status", Attribute::computed_string())
        .with_block("inbound", NestedBlock::list(rule_block()))
        .with_block("outbound", NestedBlock::list(rule_block()))
        .with_block("devices", NestedBlock::list(device_block()).computed())
}

fn rule_to_api(rule: &Value) -> Value {
    let mut out = Map::new();
    for field in ["label", "action", "protocol", "ports"] {
        if let Some(v) = rule.get(field).filter(|v| !v.is_null()) {
            out.insert(field.to_string(), v.clone());
        }
    }
    let mut addresses = Map::new();
    for family in ["ipv4", "ipv6"] {
        if let Some(v) = rule.get(family).filter(|v| !v.is_null()) {
            addresses.insert(family.to_string(), v.clone());
        }
    }
    out.insert("addresses".to_string(), Value::Object(addresses));
    Value::Object(out)
}

fn rule_from_api(rule: &Value) -> Value {
    let mut out = Map::new();
    for field in ["label", "action", "protocol", "ports"] {
        if let Some(v) = rule.get(field).filter(|v| !v.is_null()) {
            out.insert(field.to_string(), v.clone());
        }
    }
    for family in ["ipv4", "ipv6"] {
        if let Some(v) = rule.pointer(&format!("/addresses/{}", family)) {
            out.insert(family.to_string(), v.clone());
        }
    }
    Value::Object(out)
}

fn rules_to_api(desired: &Value) -> Value {
    let list = |name: &str| -> Value {
        Value::Array(
            desired
                .get(name)
                .and_then(Value::as_array)
                .map(|rules| rules.iter().map(rule_to_api).collect())
                .unwrap_or_default(),
        )
    };
    json!({
        "inbound": list("inbound"),
        "inbound_policy": desired["inbound_policy"],
        "outbound": list("outbound"),
        "outbound_policy": desired["outbound_policy"],
    })
}

fn device_from_api(device: &Value) -> Value {
    json!({
        "id": device["id"],
        "entity_id": device.pointer("/entity/id").cloned().unwrap_or(Value::Null),
        "type": device.pointer("/entity/type").cloned().unwrap_or(Value::Null),
        "label": device.pointer("/entity/label").cloned().unwrap_or(Value::Null),
        "url": device.pointer("/entity/url").cloned().unwrap_or(Value::Null),
    })
}

/// Combine the three endpoints into one state document.
pub(crate) fn flatten(firewall: Value, rules: &Value, devices: &[Value]) -> Value {
    let rule_list = |name: &str| -> Value {
        Value::Array(
            rules
                .get(name)
                .and_then(Value::as_array)
                .map(|rules| rules.iter().map(rule_from_api).collect())
                .unwrap_or_default(),
        )
    };
    let devices: Vec<Value> = devices.iter().map(device_from_api).collect();
    let linodes: Vec<Value> = devices
        .iter()
        .filter(|d| d["type"] == "linode")
        .map(|d| d["entity_id"].clone())
        .collect();
    let status = firewall["status"].clone();
    json!({
        "id": id_text(&firewall["id"]),
        "label": firewall["label"],
        "tags": firewall.get("tags").cloned().unwrap_or_else(|| json!([])),
        "status": status,
        "disabled": status == "disabled",
        "inbound": rule_list("inbound"),
        "inbound_policy": rules["inbound_policy"],
        "outbound": rule_list("outbound"),
        "outbound_policy": rules["outbound_policy"],
        "linodes": linodes,
        "devices": devices,
    })
}

async fn observe(ctx: &OpContext, id: &str) -> Result<Value, ProviderError> {
    numeric_id(KIND, id)?;
    let path = format!("{}/{}", COLLECTION, id);
    let firewall: Value = ctx.client.get(&path, &ctx.cancel).await?;
    let rules: Value = ctx
        .client
        .get(&format!("{}/rules", path), &ctx.cancel)
        .await?;
    let devices: Vec<Value> = ctx
        .client
        .list(&format!("{}/devices", path), None, &ctx.cancel)
        .await?;
    Ok(flatten(firewall, &rules, &devices))
}

/// Attach missing instances and detach extra ones. Non-instance devices are
/// left alone.
async fn reconcile_devices(ctx: &OpContext, id: &str, wanted: &[i64]) -> Result<(), ProviderError> {
    let path = format!("{}/{}/devices", COLLECTION, id);
    let devices: Vec<Value> = ctx.client.list(&path, None, &ctx.cancel).await?;
    let mut attached = Vec::new();

    for device in &devices {
        if device.pointer("/entity/type").and_then(Value::as_str) != Some("linode") {
            continue;
        }
        let Some(entity) = device.pointer("/entity/id").and_then(Value::as_i64) else {
            continue;
        };
        if wanted.contains(&entity) {
            attached.push(entity);
            continue;
        }
        let device_id = id_text(&device["id"]).unwrap_or_default();
        debug!(firewall = %id, linode = entity, "Detaching device");
        ctx.client
            .delete(&format!("{}/{}", path, device_id), &ctx.cancel)
            .await?;
    }

    for linode in wanted.iter().filter(|l| !attached.contains(l)) {
        debug!(firewall = %id, linode = *linode, "Attaching device");
        ctx.client
            .post::<Value, _>(&path, &json!({"id": linode, "type": "linode"}), &ctx.cancel)
            .await?;
    }
    Ok(())
}

#[async_trait]
impl Resource for Firewall {
    fn name(&self) -> &'static str {
        KIND
    }

    fn schema(&self) -> Schema {
        schema()
    }

    async fn create(&self, ctx: &OpContext, desired: &Value) -> Result<Created, ProviderError> {
        let body = json!({
            "label": desired["label"],
            "tags": desired.get("tags").cloned().unwrap_or_else(|| json!([])),
            "rules": rules_to_api(desired),
        });
        let firewall: Value = ctx.client.post(COLLECTION, &body, &ctx.cancel).await?;
        Ok(Created::new(id_text(&firewall["id"]).unwrap_or_default()))
    }

    async fn post_create(
        &self,
        ctx: &OpContext,
        id: &str,
        partial: &Value,
    ) -> Result<(), ProviderError> {
        let linodes = int_set(partial.get("linodes"));
        if !linodes.is_empty() {
            reconcile_devices(ctx, id, &linodes).await?;
        }
        if partial["disabled"].as_bool() == Some(true) {
            ctx.client
                .put::<Value, _>(
                    &format!("{}/{}", COLLECTION, id),
                    &json!({"status": "disabled"}),
                    &ctx.cancel,
                )
                .await?;
        }
        Ok(())
    }

    async fn read(
        &self,
        ctx: &OpContext,
        id: &str,
        _prior: &Value,
    ) -> Result<Value, ProviderError> {
        observe(ctx, id).await
    }

    async fn update(
        &self,
        ctx: &OpContext,
        id: &str,
        _prior: &Value,
        desired: &Value,
        plan: &Plan,
    ) -> Result<Value, ProviderError> {
        let path = format!("{}/{}", COLLECTION, id);

        let mut patch = changed(plan, desired, &["label", "tags"])
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();
        if plan.has_change("disabled") {
            let status = if desired["disabled"].as_bool() == Some(true) {
                "disabled"
            } else {
                "enabled"
            };
            patch.insert("status".to_string(), json!(status));
        }
        if !patch.is_empty() {
            ctx.client
                .put::<Value, _>(&path, &Value::Object(patch), &ctx.cancel)
                .await?;
        }

        if ["inbound", "outbound", "inbound_policy", "outbound_policy"]
            .iter()
            .any(|f| plan.has_change(f))
        {
            ctx.client
                .put::<Value, _>(&format!("{}/rules", path), &rules_to_api(desired), &ctx.cancel)
                .await?;
        }

        if plan.has_change("linodes") {
            reconcile_devices(ctx, id, &int_set(desired.get("linodes"))).await?;
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

/// `linode_firewall` data source: a firewall with its rules and devices.
pub struct FirewallDataSource;

#[async_trait]
impl DataSource for FirewallDataSource {
    fn name(&self) -> &'static str {
        KIND
    }

    fn schema(&self) -> Schema {
        lookup_schema(&schema().block, vec![("id", Attribute::required_int64())])
    }

    async fn read(&self, ctx: &OpContext, config: &Value) -> Result<Value, ProviderError> {
        let id = id_text(&config["id"]).unwrap_or_default();
        let mut state = observe(ctx, &id).await?;
        state["id"] = config["id"].clone();
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ApiResponse, Method};
    use crate::resources::test_context as ctx;
    use crate::testing::MockTransport;

    fn page(items: Value) -> ApiResponse {
        ApiResponse::json(200, json!({"data": items, "page": 1, "pages": 1}))
    }

    #[test]
    fn test_rules_round_trip_through_addresses() {
        let desired = json!({
            "inbound": [{"label": "ssh", "action": "ACCEPT", "protocol": "TCP", "ports": "22", "ipv4": ["0.0.0.0/0"]}],
            "inbound_policy": "DROP",
            "outbound_policy": "ACCEPT",
        });
        let api = rules_to_api(&desired);
        assert_eq!(api["inbound"][0]["addresses"]["ipv4"], json!(["0.0.0.0/0"]));
        assert_eq!(api["outbound"], json!([]));
        assert_eq!(rule_from_api(&api["inbound"][0]), desired["inbound"][0]);
    }

    #[tokio::test]
    async fn test_post_create_attaches_then_disables() {
        let mock = MockTransport::new();
        mock.respond(Method::Get, "/networking/firewalls/3/devices", page(json!([])));
        mock.respond(Method::Post, "/networking/firewalls/3/devices", ApiResponse::ok());
        mock.respond(Method::Put, "/networking/firewalls/3", ApiResponse::ok());

        Firewall
            .post_create(&ctx(&mock), "3", &json!({"linodes": [7, 8], "disabled": true}))
            .await
            .unwrap();

        let requests = mock.requests();
        let methods: Vec<_> = requests.iter().map(|r| (r.method, r.path.as_str())).collect();
        assert_eq!(
            methods,
            vec![
                (Method::Get, "/networking/firewalls/3/devices"),
                (Method::Post, "/networking/firewalls/3/devices"),
                (Method::Post, "/networking/firewalls/3/devices"),
                (Method::Put, "/networking/firewalls/3"),
            ]
        );
        assert_eq!(requests[3].body, Some(json!({"status": "disabled"})));
    }

    #[tokio::test]
    async fn test_reconcile_detaches_only_unwanted_instances() {
        let mock = MockTransport::new();
        mock.respond(
            Method::Get,
            "/networking/firewalls/3/devices",
            page(json!([
                {"id": 100, "entity": {"id": 7, "type": "linode"}},
                {"id": 101, "entity": {"id": 9, "type": "linode"}},
                {"id": 102, "entity": {"id": 4, "type": "nodebalancer"}}
            ])),
        );
        mock.respond(Method::Delete, "/networking/firewalls/3/devices/101", ApiResponse::ok());
        mock.respond(Method::Post, "/networking/firewalls/3/devices", ApiResponse::ok());

        reconcile_devices(&ctx(&mock), "3", &[7, 8]).await.unwrap();

        assert_eq!(mock.requests_to(Method::Delete, "/networking/firewalls/3/devices/101").len(), 1);
        let attach = mock.requests_to(Method::Post, "/networking/firewalls/3/devices");
        assert_eq!(attach.len(), 1);
        assert_eq!(attach[0].body, Some(json!({"id": 8, "type": "linode"})));
    }

    #[test]
    fn test_flatten_derives_disabled_and_linodes() {
        let state = flatten(
            json!({"id": 3, "label": "web", "status": "disabled", "tags": []}),
            &json!({"inbound": [], "inbound_policy": "DROP", "outbound": [], "outbound_policy": "ACCEPT"}),
            &[json!({"id": 100, "entity": {"id": 7, "type": "linode", "label": "a", "url": "/v4/linode/instances/7"}})],
        );
        assert_eq!(state["id"], "3");
        assert_eq!(state["disabled"], true);
        assert_eq!(state["linodes"], json!([7]));
        assert_eq!(state["devices"][0]["entity_id"], 7);
    }
}
