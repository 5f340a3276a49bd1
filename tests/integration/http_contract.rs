//! Contract tests for the HTTP list API client.
//!
//! Verify against a mock server that [`HttpTaskService`] sends the
//! documented methods, paths, headers and bodies, decodes envelopes and
//! revisions, and maps failures to the right [`RemoteError`] variants.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use reqwest::Url;
use serde_json::json;
use taskdeck::remote::{HttpTaskService, RemoteError, RemoteTaskService};
use taskdeck::store::InMemoryBackend;
use taskdeck::sync::{EngineOptions, SyncEngine, SyncError};
use taskdeck_proto::task::{Importance, TaskId, TaskRecord};
use taskdeck_proto::wire::REVISION_HEADER;
use wiremock::matchers::{body_json, body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const CREATED: i64 = 1_700_000_000;

fn service(uri: &str) -> HttpTaskService {
    service_with_timeout(uri, Duration::from_secs(5))
}

fn service_with_timeout(uri: &str, timeout: Duration) -> HttpTaskService {
    HttpTaskService::new(Url::parse(uri).unwrap(), "secret", "laptop", timeout).unwrap()
}

fn record(id: &str, text: &str) -> TaskRecord {
    TaskRecord::new(text)
        .with_id(id)
        .with_created_at(Utc.timestamp_opt(CREATED, 0).unwrap())
}

fn wire(id: &str, text: &str) -> serde_json::Value {
    json!({
        "id": id,
        "text": text,
        "importance": "basic",
        "done": false,
        "created_at": CREATED,
        "changed_at": CREATED,
        "last_updated_by": "laptop"
    })
}

// ---------------------------------------------------------------------------
// Request format
// ---------------------------------------------------------------------------

#[tokio::test]
async fn list_sends_auth_content_type_and_revision() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/list"))
        .and(header("Authorization", "Bearer secret"))
        .and(header("Content-Type", "application/json"))
        .and(header(REVISION_HEADER, "7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ok",
            "list": [wire("a", "one"), wire("b", "two")],
            "revision": 9
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let listed = service(&mock_server.uri()).list(7).await.unwrap();
    assert_eq!(listed.revision, Some(9));
    assert_eq!(listed.value.len(), 2);
    assert_eq!(listed.value[1].text, "two");
    assert_eq!(listed.value[0].updated_at, None);
}

#[tokio::test]
async fn create_posts_element_envelope() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/list"))
        .and(header(REVISION_HEADER, "3"))
        .and(body_json(json!({
            "element": {
                "id": "a",
                "text": "buy milk",
                "importance": "important",
                "done": false,
                "created_at": CREATED,
                "changed_at": CREATED,
                "last_updated_by": "laptop"
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "element": wire("a", "buy milk"),
            "revision": 4
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let record = record("a", "buy milk").with_importance(Importance::High);
    let created = service(&mock_server.uri()).create(&record, 3).await.unwrap();
    assert_eq!(created.revision, Some(4));
    assert_eq!(created.value.id, TaskId::from("a"));
    assert_eq!(created.value.last_updated_by.as_deref(), Some("laptop"));
}

#[tokio::test]
async fn update_puts_to_element_path() {
    let mock_server = MockServer::start().await;
    let mut edited = record("a b", "edited");
    edited.updated_at = Some(Utc.timestamp_opt(CREATED + 60, 0).unwrap());
    edited.last_updated_by = Some("phone".to_string());

    Mock::given(method("PUT"))
        .and(path("/api/list/a%20b"))
        .and(body_partial_json(json!({
            "element": {
                "id": "a b",
                "changed_at": CREATED + 60,
                "last_updated_by": "phone"
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "element": {
                "id": "a b", "text": "edited", "importance": "basic", "done": false,
                "created_at": CREATED, "changed_at": CREATED + 60, "last_updated_by": "phone"
            },
            "revision": 12
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let svc = service(&format!("{}/api/", mock_server.uri()));
    let updated = svc.update(&edited, 11).await.unwrap();
    assert_eq!(updated.revision, Some(12));
    assert_eq!(updated.value.updated_at, edited.updated_at);
}

#[tokio::test]
async fn delete_reads_revision_when_present() {
    let mock_server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/list/a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "element": wire("a", "one"),
            "revision": 5
        })))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/list/b"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let svc = service(&mock_server.uri());
    assert_eq!(svc.delete(&TaskId::from("a"), 4).await.unwrap().revision, Some(5));
    assert_eq!(svc.delete(&TaskId::from("b"), 5).await.unwrap().revision, None);
}

#[tokio::test]
async fn bulk_replace_patches_list_envelope() {
    let mock_server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/list"))
        .and(body_json(json!({ "list": [wire("a", "one"), wire("b", "two")] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "list": [wire("a", "one")],
            "revision": 20
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let records = [record("a", "one"), record("b", "two")];
    let replaced = service(&mock_server.uri())
        .bulk_replace(&records, 2)
        .await
        .unwrap();
    assert_eq!(replaced.revision, Some(20));
    assert_eq!(replaced.value.len(), 1);
}

// ---------------------------------------------------------------------------
// Failure mapping
// ---------------------------------------------------------------------------

#[tokio::test]
async fn non_success_status_maps_to_http_status() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("unsynchronized data"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;

    let svc = service(&mock_server.uri());
    assert_eq!(
        svc.create(&record("a", "x"), 0).await,
        Err(RemoteError::HttpStatus(400))
    );
    assert_eq!(svc.list(0).await, Err(RemoteError::HttpStatus(401)));
}

#[tokio::test]
async fn garbage_body_maps_to_decode() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&mock_server)
        .await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "revision": 1 })))
        .mount(&mock_server)
        .await;

    let svc = service(&mock_server.uri());
    assert!(matches!(svc.list(0).await, Err(RemoteError::Decode(_))));
    assert!(matches!(
        svc.bulk_replace(&[], 0).await,
        Err(RemoteError::Decode(_))
    ));
}

#[tokio::test]
async fn unreachable_server_maps_to_network() {
    let uri = {
        let mock_server = MockServer::start().await;
        mock_server.uri()
    };
    let result = service(&uri).list(0).await;
    assert!(matches!(result, Err(RemoteError::Network(_))));
}

#[tokio::test]
async fn slow_response_maps_to_network() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "list": [], "revision": 1 }))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&mock_server)
        .await;

    let svc = service_with_timeout(&mock_server.uri(), Duration::from_millis(50));
    assert!(matches!(svc.list(0).await, Err(RemoteError::Network(_))));
}

// ---------------------------------------------------------------------------
// Engine over HTTP
// ---------------------------------------------------------------------------

#[tokio::test]
async fn engine_recovers_from_rejected_create_with_bulk_replace() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "list": [], "revision": 1 })))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/list"))
        .and(header(REVISION_HEADER, "1"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/list"))
        .and(header(REVISION_HEADER, "1"))
        .and(body_json(json!({ "list": [wire("a", "buy milk")] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "list": [wire("a", "buy milk")],
            "revision": 2
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (engine, _events) = SyncEngine::new(
        service(&mock_server.uri()),
        Arc::new(InMemoryBackend::new()),
        EngineOptions {
            device_id: "laptop".to_string(),
            ..EngineOptions::default()
        },
    );
    engine.load().await.unwrap();
    assert_eq!(engine.revision(), 1);

    let err = engine.add(record("a", "buy milk")).await.unwrap_err();
    assert_eq!(err, SyncError::Remote(RemoteError::HttpStatus(503)));
    assert!(engine.is_dirty());

    engine.synchronize().await.unwrap();
    assert!(!engine.is_dirty());
    assert_eq!(engine.revision(), 2);
    assert_eq!(engine.items().len(), 1);
}
