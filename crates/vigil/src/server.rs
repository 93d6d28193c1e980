//! Query API and WebSocket count feed.
//!
//! The tracker publishes serialized payloads into a broadcast channel via
//! [`BroadcastPublisher`]; each WebSocket session subscribes to that channel
//! and relays payloads verbatim. The REST routes answer the tracker's query
//! API directly.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

use vigil_core::publish::{count_payload, Publisher};
use vigil_core::tracker::Tracker;

// ==============================================================================
// Broadcast Publisher
// ==============================================================================

/// Fan-out registry backed by a `tokio` broadcast channel.
///
/// Send errors only mean no subscriber is connected, so they are ignored;
/// lagged subscribers are handled per-session in the WebSocket loop.
pub struct BroadcastPublisher {
    feed: broadcast::Sender<Vec<u8>>,
}

impl BroadcastPublisher {
    pub fn new(feed: broadcast::Sender<Vec<u8>>) -> Self {
        Self { feed }
    }
}

impl Publisher for BroadcastPublisher {
    fn publish(&self, payload: &[u8]) {
        let _ = self.feed.send(payload.to_vec());
    }
}

// ==============================================================================
// Application State
// ==============================================================================

pub struct AppState {
    pub tracker: Arc<Tracker>,
    pub feed: broadcast::Sender<Vec<u8>>,
}

type SharedState = Arc<AppState>;

// ==============================================================================
// Router
// ==============================================================================

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET]);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/count", get(get_count))
        .route("/api/v1/tx/{txid}", get(get_status))
        .route("/api/v1/spend/{txid}/{vout}", get(get_spend))
        .route("/ws", get(ws_upgrade))
        .layer(cors)
        .with_state(Arc::new(state))
}

// ==============================================================================
// Handlers
// ==============================================================================

async fn health(State(state): State<SharedState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "synced": state.tracker.is_done().await,
    }))
}

async fn get_count(State(state): State<SharedState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "count": state.tracker.count().await }))
}

async fn get_status(
    State(state): State<SharedState>,
    Path(txid_str): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let txid: bitcoin::Txid = txid_str
        .parse()
        .map_err(|e| AppError::BadRequest(format!("invalid txid: {e}")))?;

    let status = state.tracker.status(&txid).await;
    Ok(Json(serde_json::json!({
        "txid": txid.to_string(),
        "status": status,
    })))
}

async fn get_spend(
    State(state): State<SharedState>,
    Path((txid_str, vout)): Path<(String, u32)>,
) -> Result<Json<serde_json::Value>, AppError> {
    let txid: bitcoin::Txid = txid_str
        .parse()
        .map_err(|e| AppError::BadRequest(format!("invalid txid: {e}")))?;

    match state
        .tracker
        .lookup_spend(&bitcoin::OutPoint::new(txid, vout))
        .await
    {
        Some(spend) => Ok(Json(serde_json::json!({
            "spender": spend.spender.to_string(),
            "input_index": spend.input_index,
        }))),
        None => Err(AppError::NotFound(
            "outpoint is not spent by a tracked transaction".to_owned(),
        )),
    }
}

// -- WebSocket ----------------------------------------------------------------

async fn ws_upgrade(State(state): State<SharedState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(socket: WebSocket, state: SharedState) {
    let (mut sink, mut source) = socket.split();

    // Greet with the current count so clients can render immediately.
    let hello = count_payload(state.tracker.count().await);
    if send_payload(&mut sink, hello).await.is_err() {
        return;
    }

    let mut feed = state.feed.subscribe();
    loop {
        tokio::select! {
            published = feed.recv() => match published {
                Ok(payload) => {
                    if send_payload(&mut sink, payload).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "websocket session lagged; resending count");
                    let payload = count_payload(state.tracker.count().await);
                    if send_payload(&mut sink, payload).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = source.next() => match incoming {
                // Clients only listen; anything besides close is ignored.
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn send_payload(
    sink: &mut SplitSink<WebSocket, Message>,
    payload: Vec<u8>,
) -> Result<(), axum::Error> {
    let text = String::from_utf8_lossy(&payload).into_owned();
    sink.send(Message::Text(text.into())).await
}

// ==============================================================================
// Error Type
// ==============================================================================

enum AppError {
    BadRequest(String),
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
