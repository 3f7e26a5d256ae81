mod common;

use common::{default_rdns, provider, FakeApi};
use linode_provider::client::Method;
use linode_provider::testing::{
    assert_plan_changes_attribute, assert_plan_no_changes, assert_plan_replaces,
    assert_plan_updates_in_place,
};
use linode_provider::ProviderService;
use serde_json::{json, Value};

const KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIBy1 tf-test";

#[tokio::test]
async fn test_sshkey_crud() {
    let api = FakeApi::new();
    let tester = provider(&api).await;

    let updated = tester
        .lifecycle_crud(
            "linode_sshkey",
            json!({"label": "tf-test-key", "ssh_key": KEY}),
            json!({"label": "tf-test-renamed", "ssh_key": KEY}),
        )
        .await
        .unwrap();

    assert_eq!(updated["label"], "tf-test-renamed");
    assert_eq!(api.count("/profile/sshkeys"), 0);
    assert_eq!(api.requests_to(Method::Put, "/profile/sshkeys/").len(), 1);
}

#[tokio::test]
async fn test_force_new_change_replaces() {
    let api = FakeApi::new();
    let tester = provider(&api).await;

    let created = tester
        .lifecycle_create("linode_sshkey", json!({"label": "tf-test-key", "ssh_key": KEY}))
        .await
        .unwrap();
    let first_id = created["id"].as_str().unwrap().to_string();

    let desired = json!({"label": "tf-test-key", "ssh_key": "ssh-ed25519 AAAAother tf-test"});
    let plan = tester
        .plan_update("linode_sshkey", created.clone(), desired.clone())
        .await
        .unwrap();
    assert_plan_replaces(&plan);

    let replaced = tester
        .lifecycle_update("linode_sshkey", created, desired)
        .await
        .unwrap();
    assert_ne!(replaced["id"], json!(first_id));
    assert!(api.get(&format!("/profile/sshkeys/{}", first_id)).is_none());
    assert_eq!(api.count("/profile/sshkeys"), 1);
}

#[tokio::test]
async fn test_out_of_band_deletion_drops_state() {
    let api = FakeApi::new();
    let tester = provider(&api).await;

    let created = tester
        .lifecycle_create("linode_sshkey", json!({"label": "tf-test-key", "ssh_key": KEY}))
        .await
        .unwrap();
    api.remove(&format!("/profile/sshkeys/{}", created["id"].as_str().unwrap()));

    assert!(tester.read("linode_sshkey", created).await.unwrap().is_none());
}

#[tokio::test]
async fn test_import_by_id() {
    let api = FakeApi::new();
    let existing = api.insert("/profile/sshkeys", json!({"label": "laptop", "ssh_key": KEY}));
    let tester = provider(&api).await;

    let imported = tester
        .import_resource("linode_sshkey", &existing["id"].to_string())
        .await
        .unwrap();
    assert_eq!(imported.len(), 1);
    assert_eq!(imported[0].state["label"], "laptop");

    assert!(tester.import_resource("linode_sshkey", "not-a-number").await.is_err());
    assert!(tester.import_resource("linode_sshkey", "0").await.is_err());
}

#[tokio::test]
async fn test_domain_with_record() {
    let api = FakeApi::new();
    let tester = provider(&api).await;

    let domain = tester
        .lifecycle_create(
            "linode_domain",
            json!({"domain": "tf-test.example", "type": "master", "soa_email": "admin@tf-test.example"}),
        )
        .await
        .unwrap();
    let domain_id: i64 = domain["id"].as_str().unwrap().parse().unwrap();

    let record = tester
        .lifecycle_create(
            "linode_domain_record",
            json!({"domain_id": domain_id, "name": "www", "record_type": "A", "target": "192.0.2.1"}),
        )
        .await
        .unwrap();
    assert_eq!(record["record_type"], "A");
    let stored = api
        .get(&format!("/domains/{}/records/{}", domain_id, record["id"].as_str().unwrap()))
        .unwrap();
    assert_eq!(stored["type"], "A");

    let imported = tester
        .import_resource(
            "linode_domain_record",
            &format!("{},{}", domain_id, record["id"].as_str().unwrap()),
        )
        .await
        .unwrap();
    assert_eq!(imported[0].state["target"], "192.0.2.1");

    tester.delete("linode_domain", domain).await.unwrap();
    assert_eq!(api.count("/domains"), 0);
    assert!(tester.read("linode_domain_record", record).await.unwrap().is_none());
}

#[tokio::test]
async fn test_volume_attach_and_detach() {
    let api = FakeApi::new();
    let tester = provider(&api).await;
    let config = |linode_id: i64| {
        json!({"label": "tf-test-vol", "region": "us-east", "size": 20, "linode_id": linode_id})
    };

    let mut volume = tester
        .lifecycle_create("linode_volume", config(0))
        .await
        .unwrap();
    assert_eq!(volume["linode_id"], 0);
    assert_eq!(volume["status"], "active");
    let plan = tester
        .plan_update("linode_volume", volume.clone(), config(0))
        .await
        .unwrap();
    assert_plan_no_changes(&plan);

    for linode_id in [5, 0, 7] {
        let desired = config(linode_id);
        let plan = tester
            .plan_update("linode_volume", volume.clone(), desired.clone())
            .await
            .unwrap();
        assert_plan_updates_in_place(&plan);
        assert_plan_changes_attribute(&plan, "linode_id");

        volume = tester
            .lifecycle_update("linode_volume", volume, desired.clone())
            .await
            .unwrap();
        assert_eq!(volume["linode_id"], linode_id);
        let path = format!("/volumes/{}", volume["id"].as_str().unwrap());
        assert_eq!(api.get(&path).unwrap()["linode_id"].as_i64().unwrap_or(0), linode_id);
        let plan = tester
            .plan_update("linode_volume", volume.clone(), desired)
            .await
            .unwrap();
        assert_plan_no_changes(&plan);
    }

    let actions = |verb: &str| {
        api.requests_to(Method::Post, "/volumes/")
            .iter()
            .filter(|r| r.path.ends_with(verb))
            .count()
    };
    assert_eq!(actions("/attach"), 2);
    assert_eq!(actions("/detach"), 1);

    tester.delete("linode_volume", volume).await.unwrap();
    assert_eq!(api.count("/volumes"), 0);
}

#[tokio::test]
async fn test_volume_grows_but_never_shrinks() {
    let api = FakeApi::new();
    let tester = provider(&api).await;

    let config = |size: i64| json!({"label": "tf-test-vol", "region": "us-east", "size": size});

    let volume = tester.lifecycle_create("linode_volume", config(20)).await.unwrap();
    let grown = tester
        .lifecycle_update("linode_volume", volume, config(30))
        .await
        .unwrap();
    assert_eq!(grown["size"], 30);

    let err = tester
        .update("linode_volume", grown, config(10))
        .await
        .unwrap_err();
    assert!(err.error.to_string().contains("cannot shrink"));
}

#[tokio::test]
async fn test_user_rename_keeps_object() {
    let api = FakeApi::new();
    let tester = provider(&api).await;

    let user = tester
        .lifecycle_create(
            "linode_user",
            json!({"username": "tf-test-alice", "email": "alice@example.com"}),
        )
        .await
        .unwrap();
    assert_eq!(user["id"], "tf-test-alice");
    assert_eq!(user["restricted"], false);

    let renamed = tester
        .lifecycle_update(
            "linode_user",
            user,
            json!({"username": "tf-test-alice2", "email": "alice@example.com", "restricted": true}),
        )
        .await
        .unwrap();
    assert_eq!(renamed["id"], "tf-test-alice2");
    assert!(api.get("/account/users/tf-test-alice").is_none());
    assert_eq!(api.get("/account/users/tf-test-alice2").unwrap()["restricted"], true);
}

#[tokio::test]
async fn test_user_rename_survives_failed_read() {
    let api = FakeApi::new();
    let tester = provider(&api).await;

    let user = tester
        .lifecycle_create(
            "linode_user",
            json!({"username": "tf-test-alice", "email": "alice@example.com"}),
        )
        .await
        .unwrap();
    api.fail_next(Method::Get, "/account/users/tf-test-alice2", 500);

    let err = tester
        .update(
            "linode_user",
            user,
            json!({"username": "tf-test-alice2", "email": "alice@example.com"}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.error.status(), Some(500));
    let partial = err.state.unwrap();
    assert_eq!(partial["id"], "tf-test-alice2");
    assert_eq!(partial["username"], "tf-test-alice2");
    assert!(api.get("/account/users/tf-test-alice2").is_some());

    let refreshed = tester.read("linode_user", partial).await.unwrap().unwrap();
    assert_eq!(refreshed["username"], "tf-test-alice2");
}

#[tokio::test]
async fn test_domain_rename_with_tags() {
    let api = FakeApi::new();
    let tester = provider(&api).await;
    let config = |domain: &str, tags: &[&str]| {
        json!({"domain": domain, "type": "master", "soa_email": "admin@tf-test.example", "tags": tags})
    };

    let updated = tester
        .lifecycle_crud(
            "linode_domain",
            config("tf-test.example", &["tf-a"]),
            config("tf-test-renamed.example", &["tf-b", "tf-a"]),
        )
        .await
        .unwrap();

    assert_eq!(updated["domain"], "tf-test-renamed.example");
    let mut tags: Vec<_> = updated["tags"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t.as_str().unwrap().to_string())
        .collect();
    tags.sort();
    assert_eq!(tags, vec!["tf-a", "tf-b"]);

    let puts = api.requests_to(Method::Put, "/domains/");
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].body.as_ref().unwrap()["domain"], "tf-test-renamed.example");
    assert_eq!(api.count("/domains"), 0);
}

fn rule(label: &str, ports: &str) -> Value {
    json!({"label": label, "action": "ACCEPT", "protocol": "TCP", "ports": ports, "ipv4": ["0.0.0.0/0"]})
}

#[tokio::test]
async fn test_firewall_widens_inbound_rules() {
    let api = FakeApi::new();
    let tester = provider(&api).await;
    let config = |inbound: Vec<Value>| {
        json!({
            "label": "tf-test-fw",
            "inbound_policy": "DROP",
            "outbound_policy": "ACCEPT",
            "linodes": [5],
            "inbound": inbound,
        })
    };

    let updated = tester
        .lifecycle_crud(
            "linode_firewall",
            config(vec![rule("ssh", "22")]),
            config(vec![rule("ssh", "22"), rule("web", "80,443"), rule("alt", "8080")]),
        )
        .await
        .unwrap();

    assert_eq!(updated["inbound"].as_array().unwrap().len(), 3);
    assert_eq!(updated["inbound"][1]["ports"], "80,443");
    assert_eq!(updated["outbound"], json!([]));
    assert_eq!(updated["linodes"], json!([5]));
    assert_eq!(updated["disabled"], false);

    let rule_puts = api
        .requests_to(Method::Put, "/networking/firewalls/")
        .into_iter()
        .filter(|r| r.path.ends_with("/rules"))
        .count();
    assert_eq!(rule_puts, 1);
    assert_eq!(api.count("/networking/firewalls"), 0);
}

const LKE: &str = "linode_lke_cluster";

fn lke_config(pools: Value) -> Value {
    json!({"label": "tf-test-lke", "region": "us-east", "k8s_version": "1.31", "pool": pools})
}

fn pools_of(state: &Value) -> Vec<Value> {
    state["pool"].as_array().cloned().unwrap_or_default()
}

#[tokio::test]
async fn test_lke_pool_scales_in_place() {
    let api = FakeApi::new();
    let tester = provider(&api).await;
    let sized = |count: i64| lke_config(json!([{"type": "g6-standard-2", "count": count}]));

    let cluster = tester.lifecycle_create(LKE, sized(3)).await.unwrap();
    let id = cluster["id"].as_str().unwrap().to_string();
    assert_eq!(cluster["status"], "ready");
    assert_eq!(pools_of(&cluster)[0]["nodes"].as_array().unwrap().len(), 3);
    assert!(cluster["kubeconfig"].as_str().is_some_and(|k| !k.is_empty()));
    assert_eq!(cluster["api_endpoints"].as_array().unwrap().len(), 1);
    let pool_id = pools_of(&cluster)[0]["id"].clone();

    let plan = tester.plan_update(LKE, cluster.clone(), sized(4)).await.unwrap();
    assert_plan_updates_in_place(&plan);
    assert_plan_changes_attribute(&plan, "pool.0.count");

    let scaled = tester.lifecycle_update(LKE, cluster, sized(4)).await.unwrap();
    let pools = pools_of(&scaled);
    assert_eq!(pools.len(), 1);
    assert_eq!(pools[0]["id"], pool_id);
    assert_eq!(pools[0]["count"], 4);
    assert_eq!(pools[0]["nodes"].as_array().unwrap().len(), 4);

    let pools_path = format!("/lke/clusters/{}/pools", id);
    assert!(api.requests_to(Method::Post, &pools_path).is_empty());
    assert_eq!(api.requests_to(Method::Put, &pools_path).len(), 1);
    let plan = tester.plan_update(LKE, scaled.clone(), sized(4)).await.unwrap();
    assert_plan_no_changes(&plan);

    tester.delete(LKE, scaled).await.unwrap();
    assert_eq!(api.count("/lke/clusters"), 0);
    assert_eq!(api.count(&pools_path), 0);
}

#[tokio::test]
async fn test_lke_unmanaged_pool_is_left_alone() {
    let api = FakeApi::new();
    let tester = provider(&api).await;
    let desired = lke_config(json!([{"type": "g6-standard-2", "count": 3}]));

    let cluster = tester.lifecycle_create(LKE, desired.clone()).await.unwrap();
    let id = cluster["id"].as_str().unwrap().to_string();
    let pools_path = format!("/lke/clusters/{}/pools", id);
    let sibling = api.insert(
        &pools_path,
        json!({"type": "g6-standard-4", "count": 1, "linodes": [{"id": "s-0", "instance_id": 1, "status": "ready"}]}),
    );

    let refreshed = tester.read(LKE, cluster).await.unwrap().unwrap();
    assert_eq!(pools_of(&refreshed).len(), 1);
    let plan = tester.plan_update(LKE, refreshed.clone(), desired.clone()).await.unwrap();
    assert_plan_no_changes(&plan);

    let mut retagged = desired;
    retagged["tags"] = json!(["tf-test"]);
    let applied = tester.lifecycle_update(LKE, refreshed, retagged).await.unwrap();
    assert_eq!(pools_of(&applied).len(), 1);
    assert_eq!(applied["tags"], json!(["tf-test"]));

    assert!(api.get(&format!("{}/{}", pools_path, sibling["id"])).is_some());
    assert!(api.requests_to(Method::Delete, &pools_path).is_empty());
    assert_eq!(api.count(&pools_path), 2);
}

#[tokio::test]
async fn test_lke_failed_update_keeps_created_pool() {
    let api = FakeApi::new();
    let tester = provider(&api).await;
    let one = lke_config(json!([{"type": "g6-standard-2", "count": 3}]));
    let two = lke_config(json!([
        {"type": "g6-standard-2", "count": 3},
        {"type": "g6-standard-4", "count": 2}
    ]));

    let cluster = tester.lifecycle_create(LKE, one).await.unwrap();
    let id = cluster["id"].as_str().unwrap().to_string();
    let pools_path = format!("/lke/clusters/{}/pools", id);
    api.fail_next(Method::Get, &format!("/lke/clusters/{}", id), 500);

    let err = tester.update(LKE, cluster, two.clone()).await.unwrap_err();
    assert_eq!(err.error.status(), Some(500));
    let partial = err.state.unwrap();
    assert_eq!(partial["id"], id.as_str());
    assert_eq!(pools_of(&partial).len(), 2);
    assert_eq!(api.count(&pools_path), 2);

    let plan = tester.plan_update(LKE, partial.clone(), two.clone()).await.unwrap();
    assert_plan_no_changes(&plan);
    let applied = tester.lifecycle_update(LKE, partial, two).await.unwrap();
    assert_eq!(pools_of(&applied).len(), 2);
    assert_eq!(api.count(&pools_path), 2);
    assert_eq!(api.requests_to(Method::Post, &pools_path).len(), 1);
}

#[tokio::test]
async fn test_object_storage_key_rename_keeps_secret() {
    let api = FakeApi::new();
    let tester = provider(&api).await;
    let kind = "linode_object_storage_key";

    let key = tester
        .lifecycle_create(kind, json!({"label": "tf-test-key"}))
        .await
        .unwrap();
    let secret = key["secret_key"].as_str().unwrap().to_string();
    assert!(secret.starts_with("SECRET-"));
    let stored = api
        .get(&format!("/object-storage/keys/{}", key["id"].as_str().unwrap()))
        .unwrap();
    assert!(stored.get("secret_key").is_none());

    let renamed = tester
        .update(kind, key, json!({"label": "tf-test-key2"}))
        .await
        .unwrap();
    assert_eq!(renamed["label"], "tf-test-key2");
    assert_eq!(renamed["secret_key"], secret.as_str());
    assert_eq!(renamed["access_key"], "AKFAKE");
    let plan = tester
        .plan_update(kind, renamed.clone(), json!({"label": "tf-test-key2"}))
        .await
        .unwrap();
    assert_plan_no_changes(&plan);

    tester.delete(kind, renamed).await.unwrap();
    assert_eq!(api.count("/object-storage/keys"), 0);
}

#[tokio::test]
async fn test_bucket_certificate_rotation() {
    let api = FakeApi::new();
    let tester = provider(&api).await;
    let kind = "linode_object_storage_bucket";
    let path = "/object-storage/buckets/us-east-1/tf-test-bucket";
    let config = |n: &str| {
        json!({
            "cluster": "us-east-1",
            "label": "tf-test-bucket",
            "cert": {"certificate": format!("CERT-{}", n), "private_key": format!("KEY-{}", n)}
        })
    };

    let bucket = tester.lifecycle_create(kind, config("A")).await.unwrap();
    assert_eq!(bucket["id"], "us-east-1:tf-test-bucket");
    assert_eq!(bucket["acl"], "private");
    assert_eq!(bucket["cert"]["certificate"], "CERT-A");
    let plan = tester.plan_update(kind, bucket.clone(), config("A")).await.unwrap();
    assert_plan_no_changes(&plan);

    let plan = tester.plan_update(kind, bucket.clone(), config("B")).await.unwrap();
    assert_plan_updates_in_place(&plan);
    assert_plan_changes_attribute(&plan, "cert");
    assert!(!plan.render().contains("KEY-B"));

    let rotated = tester.lifecycle_update(kind, bucket, config("B")).await.unwrap();
    assert_eq!(rotated["cert"]["certificate"], "CERT-B");
    assert_eq!(api.get(path).unwrap()["certificate"], "CERT-B");
    assert_eq!(api.requests_to(Method::Delete, &format!("{}/ssl", path)).len(), 1);
    let plan = tester.plan_update(kind, rotated.clone(), config("B")).await.unwrap();
    assert_plan_no_changes(&plan);

    tester.delete(kind, rotated).await.unwrap();
    assert!(api.get(path).is_none());
}

#[tokio::test]
async fn test_rdns_delete_restores_default_name() {
    let api = FakeApi::new();
    let address = "192.0.2.9";
    api.insert(
        "/networking/ips",
        json!({"address": address, "rdns": default_rdns(address), "linode_id": 5, "region": "us-east"}),
    );
    let tester = provider(&api).await;

    let rdns = tester
        .lifecycle_create("linode_rdns", json!({"address": address, "rdns": "tf-test.example.com"}))
        .await
        .unwrap();
    assert_eq!(rdns["id"], address);
    let ip = tester
        .read_data_source("linode_networking_ip", json!({"address": address}))
        .await
        .unwrap();
    assert_eq!(ip["rdns"], "tf-test.example.com");

    tester.delete("linode_rdns", rdns).await.unwrap();
    let ip = tester
        .read_data_source("linode_networking_ip", json!({"address": address}))
        .await
        .unwrap();
    assert_eq!(ip["rdns"], default_rdns(address));
    assert!(ip["rdns"].as_str().unwrap().ends_with(".members.linode.com"));
}

#[tokio::test]
async fn test_failed_create_reports_error() {
    let api = FakeApi::new();
    api.fail_next(Method::Post, "/profile/sshkeys", 400);
    let tester = provider(&api).await;

    let err = tester
        .create("linode_sshkey", json!({"label": "tf-test-key", "ssh_key": KEY}))
        .await
        .unwrap_err();
    assert_eq!(err.error.status(), Some(400));
    assert!(err.state.is_none());
    assert_eq!(api.count("/profile/sshkeys"), 0);
}

#[tokio::test]
async fn test_stop_cancels_later_operations() {
    let api = FakeApi::new();
    let tester = provider(&api).await;
    tester.stop().await.unwrap();

    let result = tester
        .provider()
        .create(
            "linode_sshkey",
            json!({"label": "tf-test-key", "ssh_key": KEY}),
            &tokio_util::sync::CancellationToken::new(),
        )
        .await;
    assert!(result.is_err());
    assert_eq!(api.count("/profile/sshkeys"), 0);
}
