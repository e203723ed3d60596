//! Coordinator API regression tests.
//!
//! Drives the `/v1` router the daemon serves: the resource lifecycle over
//! HTTP, command delivery through heartbeats, capability publication, and
//! the error-to-status mapping.

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use meridian_cluster::{Coordinator, CoordinatorConfig, build_router};
use meridian_state::StateStore;
use serde_json::{Value, json};
use tower::ServiceExt;

fn test_router() -> Router {
    let store = StateStore::open_in_memory().unwrap();
    let coordinator = Coordinator::new(store, CoordinatorConfig::default()).unwrap();
    build_router(Arc::new(coordinator))
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn register(router: &Router, id: &str) -> Value {
    let (status, body) = send(
        router,
        "POST",
        "/v1/workers/register",
        Some(json!({"worker_id": id, "address": format!("{id}:8980"), "version": "0.1.0"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["data"].clone()
}

#[tokio::test]
async fn resource_lifecycle_over_heartbeats() {
    let router = test_router();
    let ack = register(&router, "w1").await;
    let baseline = ack["command_seq"].as_u64().unwrap();

    let create = json!({
        "name": "tenant-7:orders",
        "requesting_worker": "w1",
        "config": {"backend": "postgres", "metadata": {"retention": "30d"}},
        "principal": "alice"
    });
    let (status, _) = send(&router, "POST", "/v1/resources", Some(create)).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&router, "POST", "/v1/workers/w1/heartbeat", Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    let commands = body["data"]["commands"].as_array().unwrap();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0]["action"]["type"], "assign");
    assert_eq!(commands[0]["action"]["name"], "tenant-7:orders");
    assert_eq!(commands[0]["action"]["config"]["metadata"]["retention"], "30d");
    let seq = commands[0]["seq"].as_u64().unwrap();
    assert!(seq > baseline);

    let update = json!({"config": {"backend": "postgres", "metadata": {"retention": "90d"}}});
    let (status, body) = send(&router, "PUT", "/v1/resources/tenant-7:orders", Some(update)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["version"], 2);

    // Acking the first command leaves only the update.
    let (_, body) = send(
        &router,
        "POST",
        "/v1/workers/w1/heartbeat",
        Some(json!({"acked_through": seq})),
    )
    .await;
    let commands = body["data"]["commands"].as_array().unwrap();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0]["action"]["version"], 2);
    let seq = commands[0]["seq"].as_u64().unwrap();

    let (_, body) = send(&router, "DELETE", "/v1/resources/tenant-7:orders", None).await;
    assert_eq!(body["data"]["deleted"], true);
    let (_, body) = send(
        &router,
        "POST",
        "/v1/workers/w1/heartbeat",
        Some(json!({"acked_through": seq})),
    )
    .await;
    let commands = body["data"]["commands"].as_array().unwrap();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0]["action"]["type"], "revoke");

    let (status, body) = send(&router, "GET", "/v1/resources/tenant-7:orders", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["entity"], "tenant-7:orders");
}

#[tokio::test]
async fn assignments_endpoint_lists_owned_resources() {
    let router = test_router();
    register(&router, "w1").await;
    for name in ["orders", "users"] {
        send(
            &router,
            "POST",
            "/v1/resources",
            Some(json!({"name": name, "requesting_worker": "w1"})),
        )
        .await;
    }

    let (status, body) = send(&router, "GET", "/v1/workers/w1/assignments", None).await;
    assert_eq!(status, StatusCode::OK);
    let mut names: Vec<_> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["name"].as_str().unwrap().to_string())
        .collect();
    names.sort();
    assert_eq!(names, vec!["orders", "users"]);

    let (status, body) = send(&router, "GET", "/v1/workers/ghost/assignments", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "unknown_worker");
}

#[tokio::test]
async fn pending_resource_lands_on_first_worker() {
    let router = test_router();
    let (status, _) = send(
        &router,
        "POST",
        "/v1/resources",
        Some(json!({"name": "orders", "requesting_worker": "admin"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    // Updating a resource nobody owns is refused.
    let (status, body) = send(
        &router,
        "PUT",
        "/v1/resources/orders",
        Some(json!({"config": {"backend": "mysql"}})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "ring_exhausted");
    assert!(body["error"]["retry_after_ms"].as_u64().is_some());

    let ack = register(&router, "w1").await;
    assert_eq!(ack["initial_assignments"][0]["name"], "orders");
    assert_eq!(ack["initial_assignments"][0]["version"], 1);
}

#[tokio::test]
async fn request_validation_errors_are_400() {
    let router = test_router();
    register(&router, "w1").await;

    let (status, body) = send(
        &router,
        "POST",
        "/v1/resources",
        Some(json!({"name": "has space", "requesting_worker": "w1"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_name");

    let (status, body) = send(
        &router,
        "POST",
        "/v1/resources",
        Some(json!({
            "name": "orders",
            "requesting_worker": "w1",
            "requirements": {"required": [{"op": "enabled", "feature": "teleportation"}]}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_capability");

    let (status, _) = send(
        &router,
        "PUT",
        "/v1/resources/missing",
        Some(json!({"config": {"backend": "postgres"}})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn capability_versions_are_immutable() {
    let router = test_router();
    let doc = json!({
        "identifier": "redis",
        "version": "7.2",
        "features": {"ttl": true, "pubsub": true, "max_rps": 100000.0}
    });
    let (status, body) = send(&router, "POST", "/v1/capabilities", Some(doc.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["identifier"], "redis");

    let changed = json!({
        "identifier": "redis",
        "version": "7.2",
        "features": {"ttl": false}
    });
    let (status, body) = send(&router, "POST", "/v1/capabilities", Some(changed)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "immutable_version");
    assert_eq!(body["error"]["entity"], "redis@7.2");

    let (status, body) = send(&router, "GET", "/v1/capabilities", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["features"]["ttl"], true);
}

#[tokio::test]
async fn capability_key_separator_rejected() {
    let router = test_router();
    let doc = json!({"identifier": "redis@7", "version": "2", "features": {}});
    let (status, body) = send(&router, "POST", "/v1/capabilities", Some(doc)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_capability");

    let (_, body) = send(&router, "GET", "/v1/capabilities", None).await;
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn second_worker_splits_partition_table() {
    let router = test_router();
    register(&router, "a").await;
    let ack = register(&router, "b").await;
    assert_eq!(ack["ring_epoch"], 2);

    let (_, body) = send(&router, "GET", "/v1/partitions", None).await;
    assert_eq!(body["data"]["epoch"], 2);
    assert_eq!(body["data"]["members"]["a"], json!([{"start": 0, "end": 127}]));
    assert_eq!(body["data"]["members"]["b"], json!([{"start": 128, "end": 255}]));
    assert_eq!(body["data"]["unassigned"], json!([]));
}
