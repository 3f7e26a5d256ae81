//! `linode_lke_cluster`: a managed Kubernetes cluster and its node pools.
//!
//! Pools are identified by the API, not by their position in the desired
//! list, so an update has to decide which existing pool serves which
//! desired entry. [`reconcile_pools`] keeps exact matches, then reuses
//! pools of the same type with the smallest node count change, creates
//! what is left and deletes the leftovers.
//!
//! A cluster may also carry pools created outside this resource. Once the
//! state records pool identifiers, only those pools are reported and
//! touched.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{changed, id_text, numeric_id, wait_for};
use crate::datasource::{lookup_schema, DataSource};
use crate::diff::Plan;
use crate::error::ProviderError;
use crate::registry::{Created, OpContext, Resource, Timeouts};
use crate::schema::{
    Attribute, AttributeFlags, AttributeType, Block, NestedBlock, Schema, Validator,
};
use crate::sweeper::{CollectionSweeper, Sweeper};
use crate::waiter::{wait_until, Poll};

pub(crate) const KIND: &str = "linode_lke_cluster";
const COLLECTION: &str = "/lke/clusters";

const CREATE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const UPDATE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const DELETE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// LKE cluster resource.
pub struct LkeCluster;

fn node_block() -> Block {
    Block::new()
        .with_attribute("id", Attribute::computed_string())
        .with_attribute("instance_id", Attribute::computed_int64())
        .with_attribute("status", Attribute::computed_string())
}

fn pool_block() -> Block {
    Block::new()
        .with_attribute("id", Attribute::computed_int64())
        .with_attribute(
            "count",
            Attribute::required_int64().with_validator(Validator::int_at_least(1)),
        )
        .with_attribute("type", Attribute::required_string())
        .with_block("nodes", NestedBlock::list(node_block()).computed())
}

pub(crate) fn schema() -> Schema {
    Schema::v0()
        .persisting_sensitive()
        .with_attribute("id", Attribute::computed_string())
        .with_attribute(
            "label",
            Attribute::required_string().with_validator(Validator::length_between(1, 32)),
        )
        .with_attribute("k8s_version", Attribute::required_string())
        .with_attribute("region", Attribute::required_string().with_force_new())
        .with_attribute("tags", Attribute::string_set())
        .with_attribute(
            "api_endpoints",
            Attribute::new(AttributeType::list(AttributeType::String), AttributeFlags::computed()),
        )
        .with_attribute(
            "kubeconfig",
            Attribute::new(AttributeType::String, AttributeFlags::computed().sensitive())
                .with_description("Base64-encoded kubeconfig"),
        )
        .with_attribute("status", Attribute::computed_string())
        .with_block("pool", NestedBlock::list(pool_block()).with_min_items(1))
}

/// Desired shape of one pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PoolSpec {
    pub(crate) kind: String,
    pub(crate) count: i64,
}

impl PoolSpec {
    fn of(pool: &Value) -> Option<Self> {
        Some(Self {
            kind: pool.get("type")?.as_str()?.to_string(),
            count: pool.get("count")?.as_i64()?,
        })
    }
}

/// An existing pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExistingPool {
    pub(crate) id: i64,
    pub(crate) spec: PoolSpec,
}

/// What it takes to move the existing pools onto the desired specs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct PoolChanges {
    /// For each desired spec, the pool serving it; `None` means create one.
    pub(crate) assigned: Vec<Option<i64>>,
    /// Pools to resize, with their new count.
    pub(crate) resize: Vec<(i64, i64)>,
    /// Pools no spec claimed.
    pub(crate) delete: Vec<i64>,
}

/// Match `existing` pools to `specs` with the fewest node changes.
pub(crate) fn reconcile_pools(specs: &[PoolSpec], existing: &[ExistingPool]) -> PoolChanges {
    let mut assigned: Vec<Option<i64>> = vec![None; specs.len()];
    let mut taken = vec![false; existing.len()];

    for (i, spec) in specs.iter().enumerate() {
        if let Some(j) = (0..existing.len()).find(|&j| !taken[j] && existing[j].spec == *spec) {
            assigned[i] = Some(existing[j].id);
            taken[j] = true;
        }
    }

    let mut candidates: Vec<(i64, usize, usize)> = Vec::new();
    for (i, spec) in specs.iter().enumerate() {
        if assigned[i].is_some() {
            continue;
        }
        for (j, pool) in existing.iter().enumerate() {
            if !taken[j] && pool.spec.kind == spec.kind {
                candidates.push(((pool.spec.count - spec.count).abs(), i, j));
            }
        }
    }
    candidates.sort_by_key(|&(diff, i, j)| (diff, i, existing[j].id));

    let mut resize = Vec::new();
    for (_, i, j) in candidates {
        if assigned[i].is_some() || taken[j] {
            continue;
        }
        assigned[i] = Some(existing[j].id);
        taken[j] = true;
        resize.push((existing[j].id, specs[i].count));
    }

    let delete = existing
        .iter()
        .zip(&taken)
        .filter(|(_, taken)| !**taken)
        .map(|(pool, _)| pool.id)
        .collect();

    PoolChanges {
        assigned,
        resize,
        delete,
    }
}

fn cluster_path(id: &str) -> String {
    format!("{}/{}", COLLECTION, id)
}

/// Pool identifiers recorded in a state document, in order.
fn owned_ids(state: &Value) -> Vec<i64> {
    state
        .get("pool")
        .and_then(Value::as_array)
        .map(|pools| pools.iter().filter_map(|p| p.get("id")?.as_i64()).collect())
        .unwrap_or_default()
}

fn flatten_pool(pool: &Value) -> Value {
    let nodes: Vec<Value> = pool
        .get("linodes")
        .and_then(Value::as_array)
        .map(|nodes| {
            nodes
                .iter()
                .map(|n| json!({"id": n["id"], "instance_id": n["instance_id"], "status": n["status"]}))
                .collect()
        })
        .unwrap_or_default();
    json!({
        "id": pool["id"],
        "count": pool["count"],
        "type": pool["type"],
        "nodes": nodes,
    })
}

/// Keep the owned pools, in owned order; every pool when nothing is owned.
fn select_pools(pools: Vec<Value>, owned: &[i64]) -> Vec<Value> {
    if owned.is_empty() {
        return pools;
    }
    owned
        .iter()
        .filter_map(|id| pools.iter().find(|p| p["id"].as_i64() == Some(*id)).cloned())
        .collect()
}

async fn list_pools(ctx: &OpContext, id: &str) -> Result<Vec<Value>, ProviderError> {
    Ok(ctx
        .client
        .list(&format!("{}/pools", cluster_path(id)), None, &ctx.cancel)
        .await?)
}

async fn observe(ctx: &OpContext, id: &str, owned: &[i64]) -> Result<Value, ProviderError> {
    numeric_id(KIND, id)?;
    let path = cluster_path(id);
    let cluster: Value = ctx.client.get(&path, &ctx.cancel).await?;
    let pools = select_pools(list_pools(ctx, id).await?, owned);
    let kubeconfig: Value = ctx
        .client
        .get(&format!("{}/kubeconfig", path), &ctx.cancel)
        .await?;
    let endpoints: Vec<Value> = ctx
        .client
        .list(&format!("{}/api-endpoints", path), None, &ctx.cancel)
        .await?;

    Ok(json!({
        "id": id,
        "label": cluster["label"],
        "k8s_version": cluster["k8s_version"],
        "region": cluster["region"],
        "tags": cluster.get("tags").cloned().unwrap_or_else(|| json!([])),
        "status": cluster["status"],
        "kubeconfig": kubeconfig["kubeconfig"],
        "api_endpoints": endpoints.iter().map(|e| e["endpoint"].clone()).collect::<Vec<_>>(),
        "pool": pools.iter().map(flatten_pool).collect::<Vec<_>>(),
    }))
}

fn pool_ready(pool: &Value) -> bool {
    let nodes = pool.get("linodes").and_then(Value::as_array);
    let count = pool.get("count").and_then(Value::as_i64).unwrap_or(0);
    nodes.is_some_and(|nodes| {
        nodes.len() as i64 == count && nodes.iter().all(|n| n["status"] == "ready")
    })
}

/// Wait until every node of each pool in `pool_ids` reports ready.
async fn wait_for_pools(
    ctx: &OpContext,
    id: &str,
    pool_ids: &[i64],
    timeout: Duration,
) -> Result<(), ProviderError> {
    for pool_id in pool_ids {
        let path = format!("{}/pools/{}", cluster_path(id), pool_id);
        let spec = ctx.wait(
            format!("LKE cluster {} pool {} nodes to be ready", id, pool_id),
            ctx.config.lke_node_ready_poll_interval,
            timeout,
        );
        let path = &path;
        wait_until(&spec, &ctx.cancel, || async move {
            let pool: Value = ctx.client.get(path, &ctx.cancel).await?;
            if pool_ready(&pool) {
                return Ok(Poll::Ready(()));
            }
            let ready = pool
                .get("linodes")
                .and_then(Value::as_array)
                .map_or(0, |nodes| nodes.iter().filter(|n| n["status"] == "ready").count());
            Ok(Poll::Pending(format!("{} nodes ready", ready)))
        })
        .await?;
    }
    Ok(())
}

#[async_trait]
impl Resource for LkeCluster {
    fn name(&self) -> &'static str {
        KIND
    }

    fn schema(&self) -> Schema {
        schema()
    }

    fn timeouts(&self) -> Timeouts {
        Timeouts::new(CREATE_TIMEOUT, UPDATE_TIMEOUT, DELETE_TIMEOUT)
    }

    async fn create(&self, ctx: &OpContext, desired: &Value) -> Result<Created, ProviderError> {
        let node_pools: Vec<Value> = desired
            .get("pool")
            .and_then(Value::as_array)
            .map(|pools| {
                pools
                    .iter()
                    .map(|p| json!({"type": p["type"], "count": p["count"]}))
                    .collect()
            })
            .unwrap_or_default();
        let body = json!({
            "label": desired["label"],
            "region": desired["region"],
            "k8s_version": desired["k8s_version"],
            "tags": desired.get("tags").cloned().unwrap_or_else(|| json!([])),
            "node_pools": node_pools,
        });
        let cluster: Value = ctx.client.post(COLLECTION, &body, &ctx.cancel).await?;
        Ok(Created::new(id_text(&cluster["id"]).unwrap_or_default()))
    }

    async fn post_create(
        &self,
        ctx: &OpContext,
        id: &str,
        _partial: &Value,
    ) -> Result<(), ProviderError> {
        wait_for(
            ctx,
            format!("LKE cluster {} to be ready", id),
            &cluster_path(id),
            ctx.config.lke_event_poll_interval,
            CREATE_TIMEOUT,
            |c| c["status"] == "ready",
        )
        .await?;
        let pool_ids: Vec<i64> = list_pools(ctx, id)
            .await?
            .iter()
            .filter_map(|p| p["id"].as_i64())
            .collect();
        wait_for_pools(ctx, id, &pool_ids, CREATE_TIMEOUT).await
    }

    async fn read(&self, ctx: &OpContext, id: &str, prior: &Value) -> Result<Value, ProviderError> {
        observe(ctx, id, &owned_ids(prior)).await
    }

    async fn update(
        &self,
        ctx: &OpContext,
        id: &str,
        prior: &Value,
        desired: &Value,
        plan: &Plan,
    ) -> Result<Value, ProviderError> {
        let path = cluster_path(id);

        if let Some(body) = changed(plan, desired, &["label", "k8s_version", "tags"]) {
            ctx.client.put::<Value, _>(&path, &body, &ctx.cancel).await?;
        }

        let owned = owned_ids(prior);
        let pools = select_pools(list_pools(ctx, id).await?, &owned);

        if plan.has_change("k8s_version") {
            info!(cluster = %id, "Recycling nodes for Kubernetes upgrade");
            ctx.client
                .post::<Value, _>(&format!("{}/recycle", path), &json!({}), &ctx.cancel)
                .await?;
        }

        let specs: Vec<PoolSpec> = desired
            .get("pool")
            .and_then(Value::as_array)
            .map(|pools| pools.iter().filter_map(PoolSpec::of).collect())
            .unwrap_or_default();
        let existing: Vec<ExistingPool> = pools
            .iter()
            .filter_map(|p| {
                Some(ExistingPool {
                    id: p["id"].as_i64()?,
                    spec: PoolSpec::of(p)?,
                })
            })
            .collect();
        let changes = reconcile_pools(&specs, &existing);
        debug!(cluster = %id, changes = ?changes, "Reconciled pools");

        // Pools that exist remotely and belong to this cluster's state.
        let mut live: Vec<Value> = pools.iter().map(flatten_pool).collect();

        let mut touched: Vec<i64> = Vec::new();
        for (pool_id, count) in &changes.resize {
            ctx.client
                .put::<Value, _>(
                    &format!("{}/pools/{}", path, pool_id),
                    &json!({"count": count}),
                    &ctx.cancel,
                )
                .await?;
            if let Some(entry) = live.iter_mut().find(|p| p["id"].as_i64() == Some(*pool_id)) {
                entry["count"] = json!(count);
            }
            ctx.record("pool", Value::Array(live.clone()));
            touched.push(*pool_id);
        }

        let mut assigned = Vec::with_capacity(specs.len());
        for (spec, pool_id) in specs.iter().zip(&changes.assigned) {
            let pool_id = match pool_id {
                Some(pool_id) => *pool_id,
                None => {
                    let pool: Value = ctx
                        .client
                        .post(
                            &format!("{}/pools", path),
                            &json!({"type": spec.kind, "count": spec.count}),
                            &ctx.cancel,
                        )
                        .await?;
                    let pool_id = pool["id"].as_i64().ok_or_else(|| {
                        let what = format!("pool created in LKE cluster {}", id);
                        ProviderError::InvalidIdentifier(what)
                    })?;
                    live.push(flatten_pool(&pool));
                    ctx.record("pool", Value::Array(live.clone()));
                    touched.push(pool_id);
                    pool_id
                },
            };
            assigned.push(json!({ "id": pool_id }));
        }

        for pool_id in &changes.delete {
            ctx.client
                .delete(&format!("{}/pools/{}", path, pool_id), &ctx.cancel)
                .await?;
            live.retain(|p| p["id"].as_i64() != Some(*pool_id));
            ctx.record("pool", Value::Array(live.clone()));
        }

        if plan.has_change("k8s_version") {
            touched = assigned.iter().filter_map(|p| p["id"].as_i64()).collect();
        }
        wait_for_pools(ctx, id, &touched, UPDATE_TIMEOUT).await?;

        Ok(json!({ "pool": assigned }))
    }

    async fn delete(&self, ctx: &OpContext, id: &str, _state: &Value) -> Result<(), ProviderError> {
        Ok(ctx.client.delete(&cluster_path(id), &ctx.cancel).await?)
    }

    async fn deletion_status(&self, ctx: &OpContext, id: &str) -> Result<String, ProviderError> {
        let cluster: Value = ctx.client.get(&cluster_path(id), &ctx.cancel).await?;
        Ok(cluster["status"].as_str().unwrap_or("present").to_string())
    }

    fn sweeper(&self) -> Option<Arc<dyn Sweeper>> {
        Some(Arc::new(CollectionSweeper::new(KIND, COLLECTION)))
    }
}

/// `linode_lke_cluster` data source. Reports every pool and omits the
/// kubeconfig.
pub struct LkeClusterDataSource;

#[async_trait]
impl DataSource for LkeClusterDataSource {
    fn name(&self) -> &'static str {
        KIND
    }

    fn schema(&self) -> Schema {
        lookup_schema(&schema().block, vec![("id", Attribute::required_int64())])
    }

    async fn read(&self, ctx: &OpContext, config: &Value) -> Result<Value, ProviderError> {
        let id = id_text(&config["id"]).unwrap_or_default();
        let mut state = observe(ctx, &id, &[]).await?;
        if let Some(map) = state.as_object_mut() {
            map.remove("kubeconfig");
        }
        state["id"] = config["id"].clone();
        Ok(state)
    }
}
