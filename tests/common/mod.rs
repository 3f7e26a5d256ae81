//! An in-memory Linode API for integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use linode_provider::async_trait;
use linode_provider::client::filter::matches;
use linode_provider::client::{ApiRequest, ApiResponse, ClientError, Method, Transport};
use linode_provider::testing::ProviderTester;
use linode_provider::LinodeProvider;
use serde_json::{json, Map, Value};

const CREATED: &str = "2026-01-01T00:00:00";

#[derive(Default)]
struct State {
    collections: Vec<Collection>,
    objects: BTreeMap<String, Value>,
    next_id: i64,
    failures: HashMap<(Method, String), VecDeque<u16>>,
    requests: Vec<ApiRequest>,
}

#[derive(Clone)]
struct Collection {
    template: Vec<String>,
    id_field: &'static str,
    defaults: Value,
}

impl Collection {
    fn matches(&self, path: &str) -> bool {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        segments.len() == self.template.len()
            && self
                .template
                .iter()
                .zip(&segments)
                .all(|(t, s)| t == "*" || t == s)
    }
}

/// Generic REST semantics over registered collections: POST creates, GET
/// lists or reads, PUT merges, DELETE removes. `attach`, `detach` and
/// `resize` actions on items update the matching fields.
///
/// Firewalls, LKE clusters, object storage and IP addresses get the extra
/// endpoints their resources call; see [`route`].
#[derive(Clone)]
pub struct FakeApi {
    state: Arc<Mutex<State>>,
}

impl Default for FakeApi {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeApi {
    /// A fake knowing the collections the integration tests touch.
    pub fn new() -> Self {
        let api = Self {
            state: Arc::new(Mutex::new(State {
                next_id: 100,
                ..Default::default()
            })),
        };
        api.collection("/profile/sshkeys", "id", json!({}))
            .collection("/domains", "id", json!({"status": "active", "tags": []}))
            .collection("/domains/*/records", "id", json!({}))
            .collection(
                "/volumes",
                "id",
                json!({"status": "active", "size": 20, "linode_id": null, "tags": []}),
            )
            .collection("/account/users", "username", json!({"ssh_keys": [], "tfa_enabled": false}))
            .collection("/linode/stackscripts", "id", json!({"deployments_active": 0, "deployments_total": 0, "mine": true}))
            .collection("/images", "id", json!({"status": "available", "is_public": false, "deprecated": false}))
            .collection("/networking/firewalls", "id", json!({"status": "enabled", "tags": []}))
            .collection("/networking/firewalls/*/devices", "id", json!({}))
            .collection("/lke/clusters", "id", json!({"status": "ready", "tags": []}))
            .collection("/lke/clusters/*/pools", "id", json!({}))
            .collection("/object-storage/keys", "id", json!({"access_key": "AKFAKE", "limited": false}))
            .collection("/networking/ips", "address", json!({"type": "ipv4", "public": true}))
    }

    /// Register a collection template (`*` matches one segment).
    pub fn collection(self, template: &str, id_field: &'static str, defaults: Value) -> Self {
        {
            let mut state = self.lock();
            state.collections.push(Collection {
                template: template.trim_matches('/').split('/').map(str::to_string).collect(),
                id_field,
                defaults,
            });
        }
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store an object directly under `collection`.
    pub fn insert(&self, collection: &str, object: Value) -> Value {
        let mut state = self.lock();
        insert_object(&mut state, collection, object)
    }

    /// The stored object at `path`.
    pub fn get(&self, path: &str) -> Option<Value> {
        self.lock().objects.get(path).cloned()
    }

    /// Remove the object at `path` behind the provider's back.
    pub fn remove(&self, path: &str) {
        self.lock().objects.remove(path);
    }

    /// Number of objects directly under `collection`.
    pub fn count(&self, collection: &str) -> usize {
        let state = self.lock();
        children(&state, collection).len()
    }

    /// Fail the next request to `method path` with `status`.
    pub fn fail_next(&self, method: Method, path: &str, status: u16) {
        self.lock()
            .failures
            .entry((method, path.to_string()))
            .or_default()
            .push_back(status);
    }

    /// Requests received, in order.
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.lock().requests.clone()
    }

    /// Requests matching `method` whose path starts with `prefix`.
    pub fn requests_to(&self, method: Method, prefix: &str) -> Vec<ApiRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path.starts_with(prefix))
            .collect()
    }
}

fn collection_of<'a>(state: &'a State, path: &str) -> Option<&'a Collection> {
    state.collections.iter().find(|c| c.matches(path))
}

fn children(state: &State, collection: &str) -> Vec<Value> {
    let prefix = format!("{}/", collection.trim_end_matches('/'));
    state
        .objects
        .iter()
        .filter(|(path, _)| path.strip_prefix(&prefix).is_some_and(|rest| !rest.contains('/')))
        .map(|(_, v)| v.clone())
        .collect()
}

fn merge(target: &mut Value, patch: &Value) {
    if let (Some(target), Some(patch)) = (target.as_object_mut(), patch.as_object()) {
        for (k, v) in patch {
            target.insert(k.clone(), v.clone());
        }
    }
}

fn insert_object(state: &mut State, collection: &str, body: Value) -> Value {
    let spec = collection_of(state, collection).cloned();
    let id_field = spec.as_ref().map_or("id", |c| c.id_field);

    let mut object = spec.map_or_else(|| json!({}), |c| c.defaults);
    object["created"] = json!(CREATED);
    merge(&mut object, &body);
    if id_field == "id" && object.get("id").map_or(true, Value::is_null) {
        state.next_id += 1;
        object["id"] = json!(state.next_id);
    }
    let key = match &object[id_field] {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    state
        .objects
        .insert(format!("{}/{}", collection.trim_end_matches('/'), key), object.clone());
    object
}

fn list(state: &State, request: &ApiRequest) -> ApiResponse {
    let filter = request.filter.clone().unwrap_or(Value::Null);
    let mut items: Vec<Value> = children(state, &request.path)
        .into_iter()
        .filter(|item| matches(&filter, item))
        .collect();
    items.sort_by_key(|i| i["id"].as_i64().unwrap_or_default());

    let page_size: usize = request
        .query_param("page_size")
        .and_then(|p| p.parse().ok())
        .unwrap_or(100);
    let page: usize = request.query_param("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    let pages = items.len().div_ceil(page_size).max(1);
    let data: Vec<Value> = items
        .into_iter()
        .skip((page - 1) * page_size)
        .take(page_size)
        .collect();
    ApiResponse::json(200, json!({"data": data, "page": page, "pages": pages}))
}

fn action(state: &mut State, request: &ApiRequest) -> Option<ApiResponse> {
    let (item, verb) = request.path.rsplit_once('/')?;
    let object = state.objects.get_mut(item)?;
    let body = request.body.clone().unwrap_or_else(|| Value::Object(Map::new()));
    match verb {
        "attach" => object["linode_id"] = body["linode_id"].clone(),
        "detach" => object["linode_id"] = Value::Null,
        "resize" => object["size"] = body["size"].clone(),
        _ => return None,
    }
    Some(ApiResponse::ok())
}

const KUBECONFIG: &str = "YXBpVmVyc2lvbjogdjEKa2luZDogQ29uZmlnCg==";

/// Reverse DNS name an address falls back to when reset.
pub fn default_rdns(address: &str) -> String {
    format!("{}.members.linode.com", address.replace('.', "-"))
}

fn nodes(pool: &Value) -> Value {
    let id = pool["id"].as_i64().unwrap_or_default();
    let count = pool["count"].as_i64().unwrap_or_default();
    (0..count)
        .map(|i| json!({"id": format!("{}-{}", id, i), "instance_id": id * 100 + i, "status": "ready"}))
        .collect()
}

fn insert_pool(state: &mut State, collection: &str, body: Value) -> Value {
    let mut pool = insert_object(state, collection, body);
    pool["linodes"] = nodes(&pool);
    state
        .objects
        .insert(format!("{}/{}", collection, pool["id"]), pool.clone());
    pool
}

fn bucket_path(cluster: &str, label: &str) -> String {
    format!("/object-storage/buckets/{}/{}", cluster, label)
}

/// Endpoints that are not plain collection CRUD. `None` falls through to
/// the generic handling.
fn route(state: &mut State, request: &ApiRequest) -> Option<ApiResponse> {
    let path = request.path.clone();
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    let body = request.body.clone().unwrap_or_else(|| json!({}));

    match (request.method, segments.as_slice()) {
        (Method::Post, ["lke", "clusters"]) => {
            let mut cluster = body;
            let pools = cluster.as_object_mut()?.remove("node_pools").unwrap_or_else(|| json!([]));
            let cluster = insert_object(state, "/lke/clusters", cluster);
            let collection = format!("/lke/clusters/{}/pools", cluster["id"]);
            for pool in pools.as_array().into_iter().flatten() {
                insert_pool(state, &collection, pool.clone());
            }
            Some(ApiResponse::json(200, cluster))
        },
        (Method::Post, ["lke", "clusters", _, "pools"]) => {
            let pool = insert_pool(state, &path, body);
            Some(ApiResponse::json(200, pool))
        },
        (Method::Put, ["lke", "clusters", _, "pools", _]) => {
            let pool = state.objects.get_mut(&path)?;
            merge(pool, &body);
            let linodes = nodes(pool);
            pool["linodes"] = linodes;
            Some(ApiResponse::json(200, pool.clone()))
        },
        (Method::Get, ["lke", "clusters", cluster, "kubeconfig"]) => {
            state.objects.get(&format!("/lke/clusters/{}", cluster))?;
            Some(ApiResponse::json(200, json!({"kubeconfig": KUBECONFIG})))
        },
        (Method::Get, ["lke", "clusters", cluster, "api-endpoints"]) => {
            state.objects.get(&format!("/lke/clusters/{}", cluster))?;
            let endpoint = format!("https://{}.lke.example:443", cluster);
            Some(ApiResponse::json(
                200,
                json!({"data": [{"endpoint": endpoint}], "page": 1, "pages": 1}),
            ))
        },
        (Method::Post, ["lke", "clusters", cluster, "recycle"]) => {
            state.objects.get(&format!("/lke/clusters/{}", cluster))?;
            Some(ApiResponse::ok())
        },
        (Method::Post, ["networking", "firewalls"]) => {
            let mut firewall = body;
            let rules = firewall.as_object_mut()?.remove("rules").unwrap_or_else(|| json!({}));
            let firewall = insert_object(state, "/networking/firewalls", firewall);
            state
                .objects
                .insert(format!("/networking/firewalls/{}/rules", firewall["id"]), rules);
            Some(ApiResponse::json(200, firewall))
        },
        (Method::Put, ["networking", "firewalls", _, "rules"]) => {
            let rules = state.objects.get_mut(&path)?;
            *rules = body;
            Some(ApiResponse::json(200, rules.clone()))
        },
        (Method::Post, ["networking", "firewalls", _, "devices"]) => {
            let linode = body["id"].clone();
            let entity = json!({
                "id": linode,
                "type": body["type"],
                "label": format!("linode{}", linode),
                "url": format!("/v4/linode/instances/{}", linode),
            });
            let device = insert_object(state, &path, json!({"entity": entity}));
            Some(ApiResponse::json(200, device))
        },
        (Method::Post, ["object-storage", "keys"]) => {
            let mut key = insert_object(state, "/object-storage/keys", body);
            key["secret_key"] = json!(format!("SECRET-{}", key["id"]));
            Some(ApiResponse::json(200, key))
        },
        (Method::Put, ["networking", "ips", address]) => {
            let ip = state.objects.get_mut(&path)?;
            ip["rdns"] = match &body["rdns"] {
                Value::Null => json!(default_rdns(address)),
                rdns => rdns.clone(),
            };
            Some(ApiResponse::json(200, ip.clone()))
        },
        (Method::Post, ["object-storage", "buckets"]) => {
            let (cluster, label) = (body["cluster"].as_str()?, body["label"].as_str()?);
            let mut bucket = json!({
                "hostname": format!("{}.{}.linodeobjects.example", label, cluster),
                "created": CREATED,
                "objects": 0,
                "size": 0,
                "certificate": null,
            });
            merge(&mut bucket, &body);
            state.objects.insert(bucket_path(cluster, label), bucket.clone());
            Some(ApiResponse::json(200, bucket))
        },
        (method, ["object-storage", "buckets", cluster, label, "access"]) => {
            let bucket = state.objects.get_mut(&bucket_path(cluster, label))?;
            if method == Method::Post {
                merge(bucket, &body);
                return Some(ApiResponse::ok());
            }
            Some(ApiResponse::json(
                200,
                json!({"acl": bucket["acl"], "cors_enabled": bucket["cors_enabled"]}),
            ))
        },
        (method, ["object-storage", "buckets", cluster, label, "ssl"]) => {
            let bucket = state.objects.get_mut(&bucket_path(cluster, label))?;
            match method {
                Method::Post => bucket["certificate"] = body["certificate"].clone(),
                Method::Delete => bucket["certificate"] = Value::Null,
                _ => {
                    let ssl = !bucket["certificate"].is_null();
                    return Some(ApiResponse::json(200, json!({"ssl": ssl})));
                },
            }
            Some(ApiResponse::ok())
        },
        _ => None,
    }
}

fn handle(state: &mut State, request: &ApiRequest) -> ApiResponse {
    if let Some(response) = route(state, request) {
        return response;
    }

    let path = request.path.clone();
    let is_collection = collection_of(state, &path).is_some();

    match request.method {
        Method::Get if is_collection => list(state, request),
        Method::Get => match state.objects.get(&path) {
            Some(object) => ApiResponse::json(200, object.clone()),
            None => ApiResponse::error(404, "Not found"),
        },
        Method::Post if is_collection => {
            let body = request.body.clone().unwrap_or(Value::Null);
            ApiResponse::json(200, insert_object(state, &path, body))
        },
        Method::Post => action(state, request).unwrap_or_else(|| ApiResponse::error(404, "Not found")),
        Method::Put => {
            let Some(mut object) = state.objects.remove(&path) else {
                return ApiResponse::error(404, "Not found");
            };
            merge(&mut object, request.body.as_ref().unwrap_or(&Value::Null));
            let (parent, _) = path.rsplit_once('/').unwrap_or(("", ""));
            let id_field = collection_of(state, parent).map_or("id", |c| c.id_field);
            let key = match &object[id_field] {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            state.objects.insert(format!("{}/{}", parent, key), object.clone());
            ApiResponse::json(200, object)
        },
        Method::Delete => match state.objects.remove(&path) {
            Some(_) => {
                let nested = format!("{}/", path);
                state.objects.retain(|k, _| !k.starts_with(&nested));
                ApiResponse::ok()
            },
            None => ApiResponse::error(404, "Not found"),
        },
    }
}

#[async_trait]
impl Transport for FakeApi {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let mut state = self.lock();
        state.requests.push(request.clone());
        let key = (request.method, request.path.clone());
        if let Some(status) = state.failures.get_mut(&key).and_then(VecDeque::pop_front) {
            return Ok(ApiResponse::error(status, "scripted failure"));
        }
        Ok(handle(&mut state, &request))
    }
}

/// A configured provider talking to `api`, with millisecond polling and no retries.
pub async fn provider(api: &FakeApi) -> ProviderTester<LinodeProvider> {
    let provider = LinodeProvider::new()
        .with_transport(Arc::new(api.clone()))
        .with_env(|_| None);
    let tester = ProviderTester::new(provider);
    tester
        .configure(json!({
            "token": "test-token",
            "event_poll_ms": 1,
            "lke_event_poll_ms": 1,
            "lke_node_ready_poll_ms": 1,
            "min_retry_delay_ms": 1,
            "max_retry_delay_ms": 1,
            "max_retries": 0
        }))
        .await
        .expect("configure");
    tester
}
