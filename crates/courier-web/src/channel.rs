//! The web [`Channel`] implementation.
//!
//! Serves three routes: the embedded chat page at `/`, the transcript of
//! the `main` session at `GET /api/history`, and the WebSocket upgrade at
//! `GET /ws`. Each socket is bound to a session id; binding a session that
//! already has a socket closes the previous one with a normal-closure
//! reason.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response as HttpResponse},
    routing::get,
    Json, Router,
};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use courier_channels::channel::{Channel, MessageStream, MESSAGE_BUFFER};
use courier_channels::types::{Message, Response};
use courier_channels::ChannelError;
use courier_core::config::WebConfig;
use courier_sessions::SessionStore;

static INDEX_HTML: &str = include_str!("static/index.html");

/// Grace period for the HTTP server on stop.
const SHUTDOWN_GRACE_SECS: u64 = 5;

/// Session id used when a client names none.
const DEFAULT_SESSION: &str = "main";

/// Per-client outbound frame buffer.
const CLIENT_BUFFER: usize = 32;

pub struct WebChannel {
    config: WebConfig,
    stream: Arc<MessageStream>,
    clients: Arc<DashMap<String, WebClient>>,
    sessions: Arc<SessionStore>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// One bound WebSocket peer.
struct WebClient {
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
}

struct AppState {
    stream: Arc<MessageStream>,
    clients: Arc<DashMap<String, WebClient>>,
    sessions: Arc<SessionStore>,
    shutdown: CancellationToken,
}

impl WebChannel {
    pub fn new(config: WebConfig, sessions_root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            stream: Arc::new(MessageStream::new(MESSAGE_BUFFER)),
            clients: Arc::new(DashMap::new()),
            sessions: Arc::new(SessionStore::new(sessions_root)),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Channel for WebChannel {
    fn name(&self) -> &str {
        "web"
    }

    async fn start(&self) -> Result<(), ChannelError> {
        {
            let task = self.task.lock().unwrap();
            if task.is_some() {
                return Ok(());
            }
        }

        let state = Arc::new(AppState {
            stream: Arc::clone(&self.stream),
            clients: Arc::clone(&self.clients),
            sessions: Arc::clone(&self.sessions),
            shutdown: self.cancel.clone(),
        });
        let router = Router::new()
            .route("/", get(ui_handler))
            .route("/api/history", get(history_handler))
            .route("/ws", get(ws_handler))
            .layer(tower_http::trace::TraceLayer::new_for_http())
            .with_state(state);

        let addr = format!("{}:{}", self.config.bind, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| ChannelError::ConnectionFailed(format!("bind {addr}: {e}")))?;
        info!(addr = %addr, "web channel listening");

        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            let shutdown = async move { cancel.cancelled().await };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!(error = %e, "web server error");
            }
        });
        *self.task.lock().unwrap() = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        // Close every peer first, then halt the server within the grace
        // period.
        for entry in self.clients.iter() {
            entry.value().cancel.cancel();
        }
        self.cancel.cancel();

        let handle = self.task.lock().unwrap().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(
                std::time::Duration::from_secs(SHUTDOWN_GRACE_SECS),
                handle,
            )
            .await
            .is_err()
            {
                warn!("web server did not stop within grace period");
            }
        }
        self.clients.clear();
        self.stream.close();
        Ok(())
    }

    async fn send(&self, resp: &Response) -> Result<(), ChannelError> {
        let session = if resp.reply_to.is_empty() {
            DEFAULT_SESSION
        } else {
            &resp.reply_to
        };
        // Clone the sender out so no map guard is held across the await.
        let Some(tx) = self.clients.get(session).map(|client| client.tx.clone()) else {
            // The browser may simply be gone; dropping is the back-pressure
            // policy, not an error.
            warn!(session = %session, "no web client bound, dropping reply");
            return Ok(());
        };

        let frame = serde_json::json!({ "type": "response", "text": resp.text }).to_string();
        tx.send(frame)
            .await
            .map_err(|_| ChannelError::SendFailed("client task gone".to_string()))
    }

    fn messages(&self) -> Option<mpsc::Receiver<Message>> {
        self.stream.take()
    }
}

// ── HTTP handlers ─────────────────────────────────────────────────────────

async fn ui_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// `GET /api/history` — the `main` session transcript as persisted on disk.
/// The latest turn may still be in flight; that snapshot semantics is fine
/// for a chat history view.
async fn history_handler(State(state): State<Arc<AppState>>) -> HttpResponse {
    match state.sessions.history(DEFAULT_SESSION) {
        Ok(messages) => Json(serde_json::json!({ "messages": messages })).into_response(),
        Err(e) => {
            error!(error = %e, "history read failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
) -> HttpResponse {
    let session = params
        .get("session")
        .map(String::as_str)
        .unwrap_or(DEFAULT_SESSION)
        .to_string();
    if !valid_session_id(&session) {
        return (StatusCode::BAD_REQUEST, "invalid session id").into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, session, state))
}

/// Inbound WebSocket frame.
#[derive(Deserialize)]
struct InboundFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

async fn handle_socket(socket: WebSocket, mut session: String, state: Arc<AppState>) {
    info!(session = %session, "web client connected");
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(CLIENT_BUFFER);
    let replaced = CancellationToken::new();

    bind_client(&state, &session, &out_tx, &replaced);

    loop {
        tokio::select! {
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Some(error) = handle_frame(&state, &mut session, &out_tx, &replaced, &text) {
                            let frame = serde_json::json!({ "type": "error", "error": error }).to_string();
                            if ws_tx.send(WsMessage::Text(frame.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = ws_tx.send(WsMessage::Pong(data)).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(error = %e, "web socket read error");
                        break;
                    }
                    _ => {}
                }
            }
            outgoing = out_rx.recv() => {
                match outgoing {
                    Some(frame) => {
                        if ws_tx.send(WsMessage::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = replaced.cancelled() => {
                let _ = ws_tx
                    .send(WsMessage::Close(Some(CloseFrame {
                        code: close_code::NORMAL,
                        reason: "session bound by another client".into(),
                    })))
                    .await;
                break;
            }
            _ = state.shutdown.cancelled() => {
                let _ = ws_tx
                    .send(WsMessage::Close(Some(CloseFrame {
                        code: close_code::NORMAL,
                        reason: "server shutting down".into(),
                    })))
                    .await;
                break;
            }
        }
    }

    // Unbind only if the slot is still ours — a replacement owns it now.
    state
        .clients
        .remove_if(&session, |_, client| client.tx.same_channel(&out_tx));
    info!(session = %session, "web client disconnected");
}

/// Process one text frame. Returns an error string for the client when the
/// frame is rejected.
fn handle_frame(
    state: &Arc<AppState>,
    session: &mut String,
    out_tx: &mpsc::Sender<String>,
    replaced: &CancellationToken,
    raw: &str,
) -> Option<String> {
    let frame: InboundFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(_) => return Some("malformed frame".to_string()),
    };
    if frame.kind != "message" {
        return Some(format!("unsupported frame type: {}", frame.kind));
    }

    let text = frame.text.trim().to_string();
    if text.is_empty() {
        return Some("empty message".to_string());
    }

    if let Some(requested) = frame.session_id.as_deref() {
        if !valid_session_id(requested) {
            return Some("invalid session id".to_string());
        }
        if requested != session {
            *session = requested.to_string();
            bind_client(state, session, out_tx, replaced);
        }
    }

    let id = frame
        .id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| format!("web-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]));

    state.stream.push(
        "web",
        Message {
            id,
            channel_id: format!("web:{session}"),
            user_id: "web".to_string(),
            username: String::new(),
            text,
            reply_to: Some(session.clone()),
            metadata: HashMap::new(),
        },
    );
    None
}

/// Bind this connection's sender under `session`, closing whichever socket
/// held the binding before.
fn bind_client(
    state: &Arc<AppState>,
    session: &str,
    out_tx: &mpsc::Sender<String>,
    replaced: &CancellationToken,
) {
    let prior = state.clients.insert(
        session.to_string(),
        WebClient {
            tx: out_tx.clone(),
            cancel: replaced.clone(),
        },
    );
    if let Some(prior) = prior {
        if !prior.tx.same_channel(out_tx) {
            debug!(session = %session, "closing replaced web client");
            prior.cancel.cancel();
        }
    }
}

/// Alphanumeric plus `-` and `_`, at most 128 chars.
fn valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
