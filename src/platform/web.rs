//! Live web chat over websockets.
//!
//! Every connection is a session with a fresh uuid. Frames in both
//! directions are JSON `{"event": ..., "data": ...}`. The hub keeps the
//! outbound queue of each live session so the dispatcher can address a
//! session by id.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

use super::{IncomingMessage, SocketLayer};
use crate::dispatch::{MessageDispatcher, RecipientId, WEB_TAG};

/// Sent once on connect, carrying the session id.
pub const SESSION_EVENT: &str = "session";

/// A chat message typed by the web visitor.
pub const USER_EVENT: &str = "chat_user";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocketFrame {
    pub event: String,
    pub data: String,
}

impl SocketFrame {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }
}

/// Registry of live web chat sessions.
#[derive(Clone, Default)]
pub struct WebHub {
    sessions: Arc<RwLock<HashMap<String, mpsc::UnboundedSender<SocketFrame>>>>,
}

impl WebHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session and return its id with the queue of frames bound for it.
    pub async fn register(&self) -> (String, mpsc::UnboundedReceiver<SocketFrame>) {
        let session_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions.write().await.insert(session_id.clone(), tx);
        (session_id, rx)
    }

    pub async fn unregister(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }

    #[allow(dead_code)]
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl SocketLayer for WebHub {
    async fn emit_to_session(&self, session_id: &str, event: &str, payload: &str) -> Result<()> {
        let sessions = self.sessions.read().await;
        let Some(tx) = sessions.get(session_id) else {
            // Same as emitting to an empty room: nobody to deliver to.
            debug!("No live web session {}, dropping '{}' event", session_id, event);
            return Ok(());
        };

        if tx.send(SocketFrame::new(event, payload)).is_err() {
            debug!("Web session {} is closing, dropping '{}' event", session_id, event);
        }
        Ok(())
    }
}

#[derive(Clone)]
struct WebState {
    hub: WebHub,
    dispatcher: Arc<MessageDispatcher>,
}

pub fn router(hub: WebHub, dispatcher: Arc<MessageDispatcher>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(WebState { hub, dispatcher })
}

/// Serve the web chat until the listener fails.
pub async fn serve(listen: SocketAddr, router: Router) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind web chat listener on {}", listen))?;
    info!("Web chat listening on ws://{}/ws", listen);
    axum::serve(listener, router)
        .await
        .context("Web chat server failed")?;
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WebState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WebState) {
    let (session_id, mut outbound) = state.hub.register().await;
    info!("Web session {} connected", session_id);

    let (mut sink, mut stream) = socket.split();
    let hello = SocketFrame::new(SESSION_EVENT, session_id.clone());
    let writer = tokio::spawn(async move {
        if send_frame(&mut sink, &hello).await.is_err() {
            return;
        }
        while let Some(frame) = outbound.recv().await {
            if let Err(e) = send_frame(&mut sink, &frame).await {
                debug!("Web socket write failed: {}", e);
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => {
                if let Err(e) = handle_client_text(&state.dispatcher, &session_id, text.as_str()).await
                {
                    error!("Failed to relay web message from {}: {:#}", session_id, e);
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.hub.unregister(&session_id).await;
    writer.abort();
    info!("Web session {} disconnected", session_id);
}

async fn send_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    frame: &SocketFrame,
) -> Result<()> {
    let json = serde_json::to_string(frame)?;
    sink.send(Message::Text(json.into())).await?;
    Ok(())
}

/// Relay a visitor's chat line to the staff chat, tagged so staff can reply.
async fn handle_client_text(
    dispatcher: &MessageDispatcher,
    session_id: &str,
    text: &str,
) -> Result<()> {
    let frame: SocketFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Malformed frame from web session {}: {}", session_id, e);
            return Ok(());
        }
    };

    if frame.event != USER_EVENT {
        debug!("Ignoring '{}' event from web session {}", frame.event, session_id);
        return Ok(());
    }
    if frame.data.trim().is_empty() {
        return Ok(());
    }

    let incoming = IncomingMessage {
        platform: "web".to_string(),
        user_id: session_id.to_string(),
        chat_id: RecipientId::Text(format!("{}{}", WEB_TAG, session_id)),
        user_name: "Web visitor".to_string(),
        text: frame.data,
    };
    dispatcher.forward_to_staff(&incoming).await
}
