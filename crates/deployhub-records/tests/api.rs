//! HTTP API tests for the record store.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum_test::TestServer;
use deployhub_core::{EventStream, LocalChannel, PublishChannel, DEFAULT_TOPIC};
use deployhub_records::{create_router, AppState, Deployment, DeploymentStore, StoreConfig};
use serde_json::{json, Value};

struct Harness {
    server: TestServer,
    events: EventStream,
    _dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = DeploymentStore::open(&StoreConfig::new(dir.path())).unwrap();
    let channel = Arc::new(LocalChannel::new(64));
    let events = channel.subscribe(DEFAULT_TOPIC).unwrap();

    let state = AppState::new(store, channel, DEFAULT_TOPIC);
    let server = TestServer::new(create_router(state)).unwrap();

    Harness {
        server,
        events,
        _dir: dir,
    }
}

impl Harness {
    async fn next_event(&mut self) -> Deployment {
        let event = tokio::time::timeout(Duration::from_secs(1), self.events.recv())
            .await
            .expect("no event published")
            .expect("channel closed");
        serde_json::from_slice(event.as_bytes()).unwrap()
    }

    fn assert_no_event(&mut self) {
        assert!(self.events.try_recv().is_none(), "unexpected event");
    }

    async fn create(&self, name: &str, version: &str, status: &str) -> Deployment {
        let response = self
            .server
            .post("/deployments")
            .json(&json!({ "name": name, "version": version, "status": status }))
            .await;
        response.assert_status(StatusCode::CREATED);
        response.json()
    }
}

#[tokio::test]
async fn test_create_persists_and_publishes() {
    let mut h = harness();

    let created = h.create("checkout", "1.4.0", "created").await;
    assert!(created.id >= 1);
    assert_eq!(created.name, "checkout");

    let event = h.next_event().await;
    assert_eq!(event, created);

    let fetched: Deployment = h.server.get(&format!("/deployments/{}", created.id)).await.json();
    assert_eq!(fetched, created);
}

#[tokio::test]
async fn test_response_uses_camel_case_created_at() {
    let h = harness();
    let response = h
        .server
        .post("/deployments")
        .json(&json!({ "name": "api", "version": "1", "status": "created" }))
        .await;
    let body: Value = response.json();
    assert!(body["createdAt"].is_string());
}

#[tokio::test]
async fn test_list_newest_first() {
    let h = harness();
    let first = h.create("a", "1", "created").await;
    let second = h.create("b", "1", "created").await;

    let listed: Vec<Deployment> = h.server.get("/deployments").await.json();
    let ids: Vec<i64> = listed.iter().map(|d| d.id).collect();
    assert_eq!(ids, vec![second.id, first.id]);
}

#[tokio::test]
async fn test_list_empty_is_array() {
    let h = harness();
    let response = h.server.get("/deployments").await;
    response.assert_status_ok();
    response.assert_json(&json!([]));
}

#[tokio::test]
async fn test_create_missing_fields_is_400_without_event() {
    let mut h = harness();

    let response = h
        .server
        .post("/deployments")
        .json(&json!({ "name": "api" }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let response = h.server.post("/deployments").text("not json").await;
    response.assert_status(StatusCode::BAD_REQUEST);

    h.assert_no_event();
}

#[tokio::test]
async fn test_update_replaces_fields_and_publishes() {
    let mut h = harness();
    let created = h.create("api", "1.0", "created").await;
    h.next_event().await;

    let response = h
        .server
        .put(&format!("/deployments/{}", created.id))
        .json(&json!({ "name": "api", "version": "1.1", "status": "live" }))
        .await;
    response.assert_status_ok();
    let updated: Deployment = response.json();

    assert_eq!(updated.id, created.id);
    assert_eq!(updated.created_at, created.created_at);
    assert_eq!(updated.status, "live");
    assert_eq!(h.next_event().await, updated);
}

#[tokio::test]
async fn test_update_absent_is_404() {
    let mut h = harness();
    let response = h
        .server
        .put("/deployments/999")
        .json(&json!({ "name": "api", "version": "1.1", "status": "live" }))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    h.assert_no_event();
}

#[tokio::test]
async fn test_delete_publishes_deleted_record() {
    let mut h = harness();
    let created = h.create("api", "1.0", "live").await;
    h.next_event().await;

    h.server
        .delete(&format!("/deployments/{}", created.id))
        .await
        .assert_status(StatusCode::NO_CONTENT);

    let event = h.next_event().await;
    assert_eq!(event.id, created.id);
    assert_eq!(event.status, "deleted");

    h.server
        .get(&format!("/deployments/{}", created.id))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_absent_is_204_without_event() {
    let mut h = harness();
    h.server
        .delete("/deployments/12345")
        .await
        .assert_status(StatusCode::NO_CONTENT);
    h.assert_no_event();
}

#[tokio::test]
async fn test_non_numeric_id_is_400() {
    let h = harness();
    let response = h.server.get("/deployments/abc").await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"], true);
}

#[tokio::test]
async fn test_health_and_metrics() {
    let h = harness();
    h.create("api", "1", "created").await;

    let body: Value = h.server.get("/health").await.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["deployments"], 1);

    h.server.get("/ready").await.assert_status_ok();

    let text = h.server.get("/metrics").await.text();
    assert!(text.contains("deployhub_records_events_published_total 1\n"));
    assert!(text.contains("deployhub_records_deployments 1\n"));
}
