use std::{net::SocketAddr, time::Duration};

use super::*;
use async_trait::async_trait;
use axum::{body, body::Body, http::Request};
use case_registry::{CaseRegistry, Dispatcher};
use storage::{ChangeNotifier, KeyValueStore, MemoryStore, Storage};
use tokio::{net::TcpListener, time::timeout};
use tokio_tungstenite::{connect_async, tungstenite};
use tower::ServiceExt;

async fn test_app() -> Router {
    let registry = CaseRegistry::new(Storage::in_memory());
    registry.initialize().await.expect("init");
    build_router(Arc::new(AppState {
        dispatcher: Dispatcher::new(registry),
    }))
}

async fn post_command(app: &Router, payload: Value) -> (StatusCode, Value) {
    let request = Request::post("/command")
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, serde_json::from_slice(&bytes).expect("json"))
}

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move { axum::serve(listener, app).await });
    addr
}

/// Backend that refuses every write.
struct ReadOnlyStore(MemoryStore);

#[async_trait]
impl KeyValueStore for ReadOnlyStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        self.0.get(key).await
    }

    async fn set(&self, _key: &str, _value: &Value) -> anyhow::Result<()> {
        anyhow::bail!("store is read-only")
    }
}

#[tokio::test]
async fn healthz_reports_ok_when_storage_is_ready() {
    let app = test_app().await;
    let request = Request::get("/healthz")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");
}

#[tokio::test]
async fn command_route_runs_case_lifecycle() {
    let app = test_app().await;

    let (status, reply) = post_command(
        &app,
        serde_json::json!({ "type": "CAPTURE_LINK", "url": "http://a" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply, serde_json::json!({ "ok": true, "added": true }));

    let (_, reply) = post_command(
        &app,
        serde_json::json!({ "type": "MARK_COMPLETED", "url": "http://a" }),
    )
    .await;
    assert_eq!(reply, serde_json::json!({ "ok": false }));

    post_command(
        &app,
        serde_json::json!({ "type": "UPDATE_CASE_TYPE", "url": "http://a", "caseType": "Other" }),
    )
    .await;
    let (_, reply) = post_command(
        &app,
        serde_json::json!({ "type": "MARK_COMPLETED", "url": "http://a" }),
    )
    .await;
    assert_eq!(reply, serde_json::json!({ "ok": true }));

    let request = Request::get("/data").body(Body::empty()).expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let snapshot: CaseSnapshot = serde_json::from_slice(&bytes).expect("snapshot");
    assert!(snapshot.queue.is_empty());
    assert_eq!(snapshot.history.len(), 1);
    assert_eq!(snapshot.history[0].case_type, "Other");
}

#[tokio::test]
async fn unknown_command_gets_negative_ack_not_error() {
    let app = test_app().await;
    let (status, reply) =
        post_command(&app, serde_json::json!({ "type": "SYNC_EVERYTHING" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply, serde_json::json!({ "ok": false }));
}

#[tokio::test]
async fn store_failure_maps_to_internal_error() {
    let storage = Storage::with_backend(
        Arc::new(ReadOnlyStore(MemoryStore::new())),
        ChangeNotifier::default(),
    );
    let app = build_router(Arc::new(AppState {
        dispatcher: Dispatcher::new(CaseRegistry::new(storage)),
    }));

    let (status, reply) = post_command(
        &app,
        serde_json::json!({ "type": "ADD_CASE_TYPE", "name": "New" }),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let err: ApiError = serde_json::from_value(reply).expect("api error");
    assert_eq!(err.code, ErrorCode::StoreUnavailable);
    assert!(err.message.contains("read-only"));
}

#[test]
fn parse_keys_accepts_known_names() {
    let keys = parse_keys(Some("queue, caseTypes")).expect("keys");
    assert_eq!(
        keys,
        BTreeSet::from([CollectionKey::Queue, CollectionKey::CaseTypes])
    );
    assert_eq!(parse_keys(None).expect("all").len(), 3);
}

#[test]
fn parse_keys_rejects_unknown_names() {
    let err = parse_keys(Some("queue,settings")).expect_err("unknown key");
    assert!(err.contains("settings"));
}

#[tokio::test]
async fn events_socket_delivers_only_subscribed_keys() {
    let app = test_app().await;
    let addr = serve(app.clone()).await;
    let (mut socket, _) = connect_async(format!("ws://{addr}/events?keys=queue"))
        .await
        .expect("connect");

    post_command(
        &app,
        serde_json::json!({ "type": "ADD_CASE_TYPE", "name": "Phishing Kit" }),
    )
    .await;
    post_command(
        &app,
        serde_json::json!({ "type": "CAPTURE_LINK", "url": "http://a" }),
    )
    .await;

    let frame = timeout(Duration::from_secs(2), socket.next())
        .await
        .expect("event before timeout")
        .expect("socket open")
        .expect("frame");
    assert_eq!(
        frame,
        tungstenite::Message::Text(r#"{"keys":["queue"]}"#.into())
    );

    let extra = timeout(Duration::from_millis(100), socket.next()).await;
    assert!(extra.is_err(), "unexpected frame: {extra:?}");
}

#[tokio::test]
async fn events_socket_rejects_unknown_keys() {
    let addr = serve(test_app().await).await;
    match connect_async(format!("ws://{addr}/events?keys=queue,settings")).await {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), StatusCode::BAD_REQUEST.as_u16());
        }
        Err(err) => panic!("unexpected handshake error: {err}"),
        Ok(_) => panic!("handshake should be refused"),
    }
}
