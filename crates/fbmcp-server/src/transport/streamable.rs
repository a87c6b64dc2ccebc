//! Bidirectional HTTP adapter at `/mcp`.
//!
//! Stateless mode builds a throwaway dispatcher per POST and never touches
//! the registry. Stateful mode pins a dispatcher/transport pair to a
//! session created on `initialize` and correlated by the `mcp-session-id`
//! header; GET attaches a notification stream and DELETE terminates.

use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Json, Response};
use fbmcp_rpc::{
    dispatch_request, parse_request, EventSink, JsonRpcResponse, NoopEventSink, RpcError,
    METHOD_NOT_FOUND,
};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::server::AppState;
use crate::session::{Session, SessionTransport};
use crate::transport::{
    error_response, error_response_with_id, header_str, session_meta_from_headers,
    SESSION_ID_HEADER,
};

/// Notification buffer for an attached GET stream.
const EVENT_BUFFER: usize = 64;

/// Transport handle for one stateful `/mcp` session.
///
/// POST responses travel on their own request bodies; this handle only
/// carries server-to-client notifications, and only while a GET stream is
/// attached. Events sent with no stream attached are dropped.
pub struct StreamableTransport {
    stream: parking_lot::Mutex<Option<mpsc::Sender<Event>>>,
    closed: CancellationToken,
}

impl StreamableTransport {
    fn new() -> Self {
        Self {
            stream: parking_lot::Mutex::new(None),
            closed: CancellationToken::new(),
        }
    }

    fn push(&self, event: &Value) -> bool {
        if self.closed.is_cancelled() {
            return false;
        }
        let frame = match Event::default().json_data(event) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "failed to encode notification");
                return false;
            }
        };
        let mut guard = self.stream.lock();
        let Some(tx) = guard.as_ref() else {
            return false;
        };
        match tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("notification buffer full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Client dropped the GET stream; detach until it returns.
                *guard = None;
                false
            }
        }
    }
}

#[async_trait]
impl SessionTransport for StreamableTransport {
    fn send_event(&self, event: &Value) -> bool {
        self.push(event)
    }

    fn attach_stream(&self, tx: mpsc::Sender<Event>) -> bool {
        if self.closed.is_cancelled() {
            return false;
        }
        // Replacing an existing stream drops its sender, ending the old GET.
        *self.stream.lock() = Some(tx);
        true
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.closed.cancel();
        let _ = self.stream.lock().take();
        Ok(())
    }
}

impl EventSink for StreamableTransport {
    fn send(&self, event: &Value) -> bool {
        self.push(event)
    }
}

/// POST `/mcp`: initialize or a subsequent call, per the configured mode.
pub(crate) async fn mcp_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if state.config.stateless {
        return stateless_post(&state, &body).await;
    }

    match header_str(&headers, SESSION_ID_HEADER) {
        Some(session_id) => match state.registry.get(session_id).await {
            Some(session) => {
                let session_id = session_id.to_string();
                dispatch_to_session(&session, &body, Some(session_id)).await
            }
            None => error_response(
                StatusCode::NOT_FOUND,
                &RpcError::invalid_params(format!("unknown session id: {session_id}")),
            ),
        },
        None => stateful_initialize(&state, &headers, &body).await,
    }
}

/// One-shot exchange: fresh dispatcher, no session, no correlation.
async fn stateless_post(state: &AppState, body: &str) -> Response {
    let request = match parse_request(body) {
        Ok(request) => request,
        Err(err) => return error_response_with_id(StatusCode::BAD_REQUEST, &err, id_hint(body)),
    };

    // The pair lives exactly as long as this exchange.
    let dispatcher = state.factory.create(Arc::new(NoopEventSink));
    match dispatch_request(dispatcher.as_ref(), request).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// First contact in stateful mode: only `initialize` may create a session.
async fn stateful_initialize(state: &AppState, headers: &HeaderMap, body: &str) -> Response {
    let request = match parse_request(body) {
        Ok(request) => request,
        Err(err) => return error_response_with_id(StatusCode::BAD_REQUEST, &err, id_hint(body)),
    };
    if !request.is_initialize() {
        return error_response_with_id(
            StatusCode::BAD_REQUEST,
            &RpcError::invalid_params("missing mcp-session-id header"),
            request.id.clone().unwrap_or(Value::Null),
        );
    }

    let session_id = uuid::Uuid::now_v7().to_string();
    let transport = Arc::new(StreamableTransport::new());
    let dispatcher = state.factory.create(transport.clone());
    let session = state
        .registry
        .create(
            session_id.clone(),
            transport,
            dispatcher,
            session_meta_from_headers(headers),
        )
        .await;
    info!(session_id = %session_id, "stateful session initialized");

    dispatch_to_session(&session, body, Some(session_id)).await
}

/// Run one parsed exchange against a pinned session, echoing its id.
async fn dispatch_to_session(
    session: &Arc<Session>,
    body: &str,
    session_id: Option<String>,
) -> Response {
    let request = match parse_request(body) {
        Ok(request) => request,
        Err(err) => return error_response_with_id(StatusCode::BAD_REQUEST, &err, id_hint(body)),
    };

    let response = match dispatch_request(session.dispatcher().as_ref(), request).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    };
    match session_id {
        Some(id) => ([(SESSION_ID_HEADER, id)], response).into_response(),
        None => response,
    }
}

/// GET `/mcp`: attach the server-to-client notification stream.
pub(crate) async fn mcp_get(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if state.config.stateless {
        return method_not_allowed("GET /mcp requires stateful mode");
    }
    let Some(session_id) = header_str(&headers, SESSION_ID_HEADER) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            &RpcError::invalid_params("missing mcp-session-id header"),
        );
    };
    let Some(session) = state.registry.get(session_id).await else {
        return error_response(
            StatusCode::NOT_FOUND,
            &RpcError::invalid_params(format!("unknown session id: {session_id}")),
        );
    };

    let (tx, rx) = mpsc::channel::<Event>(EVENT_BUFFER);
    if !session.transport().attach_stream(tx) {
        return error_response(
            StatusCode::BAD_REQUEST,
            &RpcError::invalid_params("session does not support a notification stream"),
        );
    }

    let stream = ReceiverStream::new(rx).map(Ok::<Event, Infallible>);
    (
        [(SESSION_ID_HEADER, session_id.to_string())],
        Sse::new(stream),
    )
        .into_response()
}

/// DELETE `/mcp`: explicit session termination.
pub(crate) async fn mcp_delete(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if state.config.stateless {
        return method_not_allowed("DELETE /mcp requires stateful mode");
    }
    let Some(session_id) = header_str(&headers, SESSION_ID_HEADER) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            &RpcError::invalid_params("missing mcp-session-id header"),
        );
    };

    // Removal takes effect immediately; the transport close itself runs
    // after the registry's grace delay so this response flushes first.
    if state.registry.remove(session_id).await {
        info!(session_id = %session_id, "session terminated by client");
        StatusCode::OK.into_response()
    } else {
        error_response(
            StatusCode::NOT_FOUND,
            &RpcError::invalid_params(format!("unknown session id: {session_id}")),
        )
    }
}

fn method_not_allowed(message: &str) -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(JsonRpcResponse::error_without_id(METHOD_NOT_FOUND, message)),
    )
        .into_response()
}

/// Best-effort request id from an unparseable body.
fn id_hint(body: &str) -> Value {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("id").cloned())
        .unwrap_or(Value::Null)
}
