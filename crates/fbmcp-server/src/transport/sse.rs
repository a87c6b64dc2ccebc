//! Event-stream adapter: a long-lived SSE channel per client plus a
//! `/message` endpoint for inbound submissions correlated by session id.
//!
//! The stream opens with an `endpoint` event telling the client where to
//! POST. Responses to `/message` travel on that POST's own body; the
//! stream itself carries only server-to-client push.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Json, Response};
use fbmcp_rpc::{dispatch_request, parse_request, EventSink, RpcError};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::server::AppState;
use crate::session::{Session, SessionTransport};
use crate::transport::{
    error_response, error_response_with_id, header_str, session_meta_from_headers,
    PROXY_CLIENT_ID_HEADER, SESSION_ID_HEADER,
};

/// Outbound event buffer per stream. A client that stops reading loses
/// pushes beyond this rather than backpressuring the dispatcher.
const EVENT_BUFFER: usize = 64;

/// Transport handle for one open event stream.
pub struct SseTransport {
    events: mpsc::Sender<Event>,
    closed: CancellationToken,
}

impl SseTransport {
    fn push(&self, event: &Value) -> bool {
        if self.closed.is_cancelled() {
            return false;
        }
        let frame = match Event::default().json_data(event) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "failed to encode stream event");
                return false;
            }
        };
        match self.events.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("stream event buffer full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

#[async_trait]
impl SessionTransport for SseTransport {
    fn send_event(&self, event: &Value) -> bool {
        self.push(event)
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.closed.cancel();
        Ok(())
    }
}

impl EventSink for SseTransport {
    fn send(&self, event: &Value) -> bool {
        self.push(event)
    }
}

#[derive(Default, Deserialize)]
pub(crate) struct SseQuery {
    #[serde(rename = "sessionId")]
    pub(crate) session_id: Option<String>,
}

/// GET `/sse` (or `/` with a streaming `Accept`): open the event stream.
pub(crate) async fn sse_open(
    State(state): State<AppState>,
    Query(query): Query<SseQuery>,
    headers: HeaderMap,
) -> Response {
    let session_id = query
        .session_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
    let meta = session_meta_from_headers(&headers);

    let (tx, rx) = mpsc::channel::<Event>(EVENT_BUFFER);
    let closed = CancellationToken::new();
    let transport = Arc::new(SseTransport {
        events: tx,
        closed: closed.clone(),
    });
    let dispatcher = state.factory.create(transport.clone());
    let _session = state
        .registry
        .create(session_id.clone(), transport, dispatcher, meta)
        .await;
    info!(session_id = %session_id, "event stream opened");

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("/message?sessionId={session_id}"));
    let stream = futures::stream::once(async move { Ok::<Event, Infallible>(endpoint) })
        .chain(ReceiverStream::new(rx).map(Ok))
        .take_until(closed.cancelled_owned());
    let stream = Guarded {
        inner: stream,
        _guard: DisconnectGuard {
            registry: Arc::clone(&state.registry),
            session_id,
        },
    };

    // Proxy-friendly headers: disable caching and reverse-proxy buffering
    // so events reach the client as they are produced.
    let mut response = Sse::new(stream).into_response();
    let _ = response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    let _ = response
        .headers_mut()
        .insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

pin_project_lite::pin_project! {
    /// Stream wrapper whose drop marks client disconnect.
    struct Guarded<S> {
        #[pin]
        inner: S,
        _guard: DisconnectGuard,
    }
}

impl<S: Stream> Stream for Guarded<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}

/// Removes the session when the response stream is dropped, so a client
/// disconnect frees the session immediately instead of waiting for the
/// sweep. Removal is idempotent, so racing an explicit removal is benign.
struct DisconnectGuard {
    registry: Arc<crate::session::registry::SessionRegistry>,
    session_id: String,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        let registry = Arc::clone(&self.registry);
        let session_id = std::mem::take(&mut self.session_id);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            drop(handle.spawn(async move {
                if registry.remove(&session_id).await {
                    debug!(session_id = %session_id, "event stream client disconnected");
                }
            }));
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// POST `/message`: submit one inbound message for an open stream.
pub(crate) async fn post_message(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let session = match resolve_session(&state, query.session_id.as_deref(), &headers).await {
        Ok(session) => session,
        Err(response) => return response,
    };

    let request = match parse_request(&body) {
        Ok(request) => request,
        Err(err) => {
            let id = request_id_hint(&body);
            return error_response_with_id(StatusCode::BAD_REQUEST, &err, id);
        }
    };

    match dispatch_request(session.dispatcher().as_ref(), request).await {
        Some(response) => Json(response).into_response(),
        // Notification: accepted, nothing to return.
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// Resolve the target session from the query parameter or session header,
/// falling back to the proxy client-id header for relayed submissions.
async fn resolve_session(
    state: &AppState,
    session_id: Option<&str>,
    headers: &HeaderMap,
) -> Result<Arc<Session>, Response> {
    let session_id = session_id
        .filter(|id| !id.is_empty())
        .or_else(|| header_str(headers, SESSION_ID_HEADER));
    if let Some(id) = session_id.filter(|id| !id.is_empty()) {
        return match state.registry.get(id).await {
            Some(session) => Ok(session),
            None => Err(error_response(
                StatusCode::NOT_FOUND,
                &RpcError::invalid_params(format!("unknown session id: {id}")),
            )),
        };
    }
    if let Some(client_id) = header_str(headers, PROXY_CLIENT_ID_HEADER) {
        return match state.registry.get_by_proxy_client_id(client_id).await {
            Some(session) => Ok(session),
            None => Err(error_response(
                StatusCode::NOT_FOUND,
                &RpcError::invalid_params(format!("unknown proxy client id: {client_id}")),
            )),
        };
    }
    Err(error_response(
        StatusCode::BAD_REQUEST,
        &RpcError::invalid_params("missing sessionId query parameter"),
    ))
}

/// Best-effort extraction of the request id from a body that failed
/// validation, so the error envelope can still echo it.
fn request_id_hint(body: &str) -> Value {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("id").cloned())
        .unwrap_or(Value::Null)
}
