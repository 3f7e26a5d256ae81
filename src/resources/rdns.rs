//! `linode_rdns`: the reverse DNS name of a public address.
//!
//! There is nothing to create or delete: both set the `rdns` field of the
//! address. Deleting resets it to the default name.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::ProviderConfig;
use crate::diff::Plan;
use crate::error::ProviderError;
use crate::registry::{Created, ImportRule, OpContext, Resource};
use crate::schema::{Attribute, Schema, Validator};
use crate::sweeper::{CollectionSweeper, Sweeper};
use crate::waiter::{wait_until, Poll};

pub(crate) const KIND: &str = "linode_rdns";
const COLLECTION: &str = "/networking/ips";

const RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Reverse DNS resource.
pub struct Rdns;

pub(crate) fn schema() -> Schema {
    Schema::v0()
        .with_attribute("id", Attribute::computed_string())
        .with_attribute(
            "address",
            Attribute::required_string()
                .with_force_new()
                .with_validator(Validator::IpAddress),
        )
        .with_attribute(
            "rdns",
            Attribute::required_string().with_validator(Validator::length_between(3, 254)),
        )
        .with_attribute(
            "wait_for_available",
            Attribute::optional_bool()
                .with_default(Value::Bool(false))
                .with_description("Retry while the forward record has not propagated yet"),
        )
}

fn address_path(address: &str) -> String {
    format!("{}/{}", COLLECTION, address)
}

async fn set_rdns(
    ctx: &OpContext,
    address: &str,
    rdns: &Value,
    retry: bool,
) -> Result<(), ProviderError> {
    let path = address_path(address);
    let body = json!({ "rdns": rdns });
    if !retry {
        ctx.client.put::<Value, _>(&path, &body, &ctx.cancel).await?;
        return Ok(());
    }

    let spec = ctx.wait(
        format!("reverse DNS of {} to be accepted", address),
        RETRY_INTERVAL,
        crate::registry::DEFAULT_TIMEOUT,
    );
    let (path, body) = (&path, &body);
    wait_until(&spec, &ctx.cancel, || async move {
        match ctx.client.put::<Value, _>(path, body, &ctx.cancel).await {
            Ok(_) => Ok(Poll::Ready(())),
            Err(e) if e.status() == Some(400) => {
                debug!(address = %path, "Forward record not visible yet");
                Ok(Poll::Pending("rejected".to_string()))
            },
            Err(e) => Err(e.into()),
        }
    })
    .await
    .map_err(ProviderError::from)
}

#[async_trait]
impl Resource for Rdns {
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
        let address = desired["address"].as_str().unwrap_or_default();
        let retry = desired["wait_for_available"].as_bool().unwrap_or(false);
        set_rdns(ctx, address, &desired["rdns"], retry).await?;
        Ok(Created::new(address))
    }

    async fn read(
        &self,
        ctx: &OpContext,
        id: &str,
        _prior: &Value,
    ) -> Result<Value, ProviderError> {
        let ip: Value = ctx.client.get(&address_path(id), &ctx.cancel).await?;
        Ok(json!({
            "id": id,
            "address": id,
            "rdns": ip["rdns"],
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
        if plan.has_change("rdns") {
            let retry = desired["wait_for_available"].as_bool().unwrap_or(false);
            set_rdns(ctx, id, &desired["rdns"], retry).await?;
        }
        Ok(json!({}))
    }

    async fn delete(&self, ctx: &OpContext, id: &str, _state: &Value) -> Result<(), ProviderError> {
        set_rdns(ctx, id, &Value::Null, false).await
    }

    fn confirms_deletion(&self, _config: &ProviderConfig) -> bool {
        false
    }

    fn sweeper(&self) -> Option<Arc<dyn Sweeper>> {
        Some(Arc::new(
            CollectionSweeper::new(KIND, COLLECTION)
                .with_label_field("rdns")
                .with_id(|ip| ip.get("address")?.as_str().map(str::to_string))
                .resetting(json!({ "rdns": null }))
                .without_server_filter(),
        ))
    }
}
