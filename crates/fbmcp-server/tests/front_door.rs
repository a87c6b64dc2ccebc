//! End-to-end scenarios through the front door router.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use fbmcp_rpc::{Dispatcher, DispatcherFactory, EventSink, JsonRpcRequest, RpcError};
use fbmcp_server::{McpServer, ServerConfig};
use futures::StreamExt;
use serde_json::{json, Value};
use tower::ServiceExt;

/// Dispatcher that tags responses with its instance number and a
/// per-instance call counter, so tests can observe whether two requests
/// shared a dispatcher.
struct CountingDispatcher {
    instance: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl Dispatcher for CountingDispatcher {
    async fn dispatch(&self, request: JsonRpcRequest) -> Result<Value, RpcError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(json!({
            "method": request.method,
            "instance": self.instance,
            "call": call,
        }))
    }
}

#[derive(Default)]
struct CountingFactory {
    created: AtomicUsize,
}

impl DispatcherFactory for CountingFactory {
    fn create(&self, _events: Arc<dyn EventSink>) -> Arc<dyn Dispatcher> {
        let instance = self.created.fetch_add(1, Ordering::SeqCst);
        Arc::new(CountingDispatcher {
            instance,
            calls: AtomicUsize::new(0),
        })
    }
}

fn make_server(stateless: bool) -> McpServer {
    let config = ServerConfig {
        stateless,
        ..ServerConfig::default()
    };
    McpServer::new(config, Arc::new(CountingFactory::default()))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn rpc_post(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// ── Event-stream round trip ─────────────────────────────────────────

#[tokio::test]
async fn sse_round_trip() {
    let server = make_server(true);

    // Open the stream and read the first frame.
    let response = server
        .router()
        .oneshot(
            Request::get("/sse")
                .header("accept", "text/event-stream")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let mut frames = response.into_body().into_data_stream();
    let first = frames.next().await.unwrap().unwrap();
    let first = String::from_utf8(first.to_vec()).unwrap();
    assert!(first.contains("event: endpoint"), "{first}");

    // The endpoint event carries the submission URL with the session id.
    let endpoint = first
        .lines()
        .find_map(|l| l.strip_prefix("data: "))
        .unwrap()
        .to_string();
    assert!(endpoint.starts_with("/message?sessionId="), "{endpoint}");

    // POST a request to it while the stream stays open.
    let response = server
        .router()
        .oneshot(rpc_post(
            &endpoint,
            json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["jsonrpc"], "2.0");
    assert_eq!(body["id"], 1);
    assert_eq!(body["result"]["method"], "ping");
}

#[tokio::test]
async fn message_without_session_id_is_rejected() {
    let server = make_server(true);
    let response = server
        .router()
        .oneshot(rpc_post(
            "/message",
            json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], -32602);
}

#[tokio::test]
async fn message_with_unknown_session_id_is_rejected() {
    let server = make_server(true);
    let response = server
        .router()
        .oneshot(rpc_post(
            "/message?sessionId=ghost",
            json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"]["code"], -32602);
}

#[tokio::test]
async fn dropping_the_stream_removes_the_session() {
    let server = make_server(true);
    let response = server
        .router()
        .oneshot(
            Request::get("/sse?sessionId=ephemeral")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(server.registry().count().await, 1);

    drop(response);
    // The disconnect guard removes on a spawned task.
    tokio::task::yield_now().await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(server.registry().count().await, 0);
}

// ── Stateless /mcp ──────────────────────────────────────────────────

#[tokio::test]
async fn stateless_requests_never_share_a_dispatcher() {
    let server = make_server(true);
    let first = body_json(
        server
            .router()
            .oneshot(rpc_post(
                "/mcp",
                json!({"jsonrpc": "2.0", "id": 1, "method": "a"}),
            ))
            .await
            .unwrap(),
    )
    .await;
    let second = body_json(
        server
            .router()
            .oneshot(rpc_post(
                "/mcp",
                json!({"jsonrpc": "2.0", "id": 2, "method": "b"}),
            ))
            .await
            .unwrap(),
    )
    .await;

    // Fresh instance per request, each seeing exactly one call.
    assert_ne!(first["result"]["instance"], second["result"]["instance"]);
    assert_eq!(first["result"]["call"], 1);
    assert_eq!(second["result"]["call"], 1);
    assert_eq!(server.registry().count().await, 0);
}

#[tokio::test]
async fn stateless_parse_error_gets_envelope() {
    let server = make_server(true);
    let response = server
        .router()
        .oneshot(
            Request::post("/mcp")
                .header("content-type", "application/json")
                .body(Body::from("{broken"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32700);
    assert_eq!(body["id"], Value::Null);
}

#[tokio::test]
async fn stateless_notification_is_accepted_without_body() {
    let server = make_server(true);
    let response = server
        .router()
        .oneshot(rpc_post(
            "/mcp",
            json!({"jsonrpc": "2.0", "method": "notify"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

// ── Stateful /mcp ───────────────────────────────────────────────────

async fn initialize(server: &McpServer) -> String {
    let response = server
        .router()
        .oneshot(rpc_post(
            "/mcp",
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    response
        .headers()
        .get("mcp-session-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn stateful_handshake_reuses_one_dispatcher() {
    let server = make_server(false);
    let session_id = initialize(&server).await;

    let mut instances = Vec::new();
    for n in 2..5 {
        let response = server
            .router()
            .oneshot(
                Request::post("/mcp")
                    .header("content-type", "application/json")
                    .header("mcp-session-id", &session_id)
                    .body(Body::from(
                        json!({"jsonrpc": "2.0", "id": n, "method": "work"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        instances.push(body["result"]["instance"].clone());
    }
    assert!(instances.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test]
async fn stateful_termination_rejects_further_requests() {
    let server = make_server(false);
    let session_id = initialize(&server).await;

    let response = server
        .router()
        .oneshot(
            Request::delete("/mcp")
                .header("mcp-session-id", &session_id)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = server
        .router()
        .oneshot(
            Request::post("/mcp")
                .header("content-type", "application/json")
                .header("mcp-session-id", &session_id)
                .body(Body::from(
                    json!({"jsonrpc": "2.0", "id": 9, "method": "work"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"]["code"], -32602);
}

#[tokio::test]
async fn stateful_non_initialize_without_header_is_rejected() {
    let server = make_server(false);
    let response = server
        .router()
        .oneshot(rpc_post(
            "/mcp",
            json!({"jsonrpc": "2.0", "id": 1, "method": "work"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], -32602);
}

#[tokio::test]
async fn stateful_get_attaches_notification_stream() {
    let server = make_server(false);
    let session_id = initialize(&server).await;

    let response = server
        .router()
        .oneshot(
            Request::get("/mcp")
                .header("mcp-session-id", &session_id)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
}

#[tokio::test]
async fn stateful_get_without_header_is_rejected() {
    let server = make_server(false);
    let response = server
        .router()
        .oneshot(Request::get("/mcp").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ── Shutdown cascade ────────────────────────────────────────────────

#[tokio::test]
async fn stop_clears_every_session() {
    let server = make_server(false);

    // One event-stream session plus two stateful HTTP sessions.
    let sse = server
        .router()
        .oneshot(
            Request::get("/sse")
                .header("accept", "text/event-stream")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let _ = initialize(&server).await;
    let _ = initialize(&server).await;
    assert_eq!(server.registry().count().await, 3);

    server.stop().await;
    assert_eq!(server.registry().count().await, 0);
    assert!(server.shutdown().is_stopping());
    drop(sse);
}

#[tokio::test]
async fn sessions_listing_shows_proxy_metadata() {
    let server = make_server(true);
    let _stream = server
        .router()
        .oneshot(
            Request::get("/sse?sessionId=s-proxy")
                .header("x-mcp-client-id", "relay-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let response = server
        .router()
        .oneshot(Request::get("/sessions").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body[0]["id"], "s-proxy");
    assert_eq!(body[0]["proxied"], true);
    assert_eq!(body[0]["proxyClientId"], "relay-1");
}

#[tokio::test]
async fn proxy_client_id_routes_message_without_session_id() {
    let server = make_server(true);
    let _stream = server
        .router()
        .oneshot(
            Request::get("/sse")
                .header("x-mcp-client-id", "relay-2")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let response = server
        .router()
        .oneshot(
            Request::post("/message")
                .header("content-type", "application/json")
                .header("x-mcp-client-id", "relay-2")
                .body(Body::from(
                    json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["id"], 1);
}
