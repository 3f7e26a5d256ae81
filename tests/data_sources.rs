mod common;

use common::{provider, FakeApi};
use serde_json::json;

#[tokio::test]
async fn test_domain_by_name() {
    let api = FakeApi::new();
    api.insert("/domains", json!({"domain": "other.example", "type": "master"}));
    let wanted = api.insert("/domains", json!({"domain": "tf-test.example", "type": "master", "soa_email": "a@tf-test.example"}));
    let tester = provider(&api).await;

    let state = tester
        .read_data_source("linode_domain", json!({"domain": "tf-test.example"}))
        .await
        .unwrap();
    assert_eq!(state["id"], wanted["id"].to_string());
    assert_eq!(state["soa_email"], "a@tf-test.example");
}

#[tokio::test]
async fn test_missing_lookup_is_not_found() {
    let api = FakeApi::new();
    let tester = provider(&api).await;

    let err = tester
        .read_data_source("linode_sshkey", json!({"label": "nope"}))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_stackscripts_filter_and_latest() {
    let api = FakeApi::new();
    api.insert(
        "/linode/stackscripts",
        json!({"label": "tf-test-old", "created": "2025-01-01T00:00:00", "images": ["linode/debian12"], "is_public": false}),
    );
    api.insert(
        "/linode/stackscripts",
        json!({"label": "tf-test-new", "created": "2026-03-01T00:00:00", "images": ["linode/debian12"], "is_public": false}),
    );
    api.insert(
        "/linode/stackscripts",
        json!({"label": "unrelated", "created": "2026-06-01T00:00:00", "images": ["linode/alpine3.19"], "is_public": true}),
    );
    let tester = provider(&api).await;

    let config = json!({
        "filter": [
            {"name": "label", "values": ["tf-test"], "match_by": "substring"},
            {"name": "images", "values": ["linode/debian12"]}
        ],
        "latest": true
    });
    let state = tester.read_data_source("linode_stackscripts", config.clone()).await.unwrap();
    let items = state["stackscripts"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["label"], "tf-test-new");

    let again = tester.read_data_source("linode_stackscripts", config).await.unwrap();
    assert_eq!(state["id"], again["id"]);
}

#[tokio::test]
async fn test_images_ordering() {
    let api = FakeApi::new();
    api.insert("/images", json!({"id": "private/1", "label": "b-image", "size": 2500}));
    api.insert("/images", json!({"id": "private/2", "label": "a-image", "size": 1200}));
    let tester = provider(&api).await;

    let state = tester
        .read_data_source("linode_images", json!({"order_by": "size", "order": "desc"}))
        .await
        .unwrap();
    let labels: Vec<_> = state["images"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["label"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(labels, vec!["b-image", "a-image"]);
}

#[tokio::test]
async fn test_user_by_username() {
    let api = FakeApi::new();
    api.insert("/account/users", json!({"username": "tf-test-bob", "email": "bob@example.com", "restricted": true}));
    let tester = provider(&api).await;

    let state = tester
        .read_data_source("linode_user", json!({"username": "tf-test-bob"}))
        .await
        .unwrap();
    assert_eq!(state["email"], "bob@example.com");
    assert_eq!(state["restricted"], true);
}

#[tokio::test]
async fn test_metadata_lists_lookups() {
    let api = FakeApi::new();
    let tester = provider(&api).await;

    let sources = tester.data_source_types();
    for name in ["linode_domain", "linode_images", "linode_vlans", "linode_lke_cluster"] {
        assert!(sources.contains(&name.to_string()), "{name}");
    }
    assert!(tester.resource_types().contains(&"linode_volume".to_string()));

    let err = tester.read_data_source("linode_nothing", json!({})).await.unwrap_err();
    assert!(matches!(err, linode_provider::ProviderError::UnknownResource(_)));
}
