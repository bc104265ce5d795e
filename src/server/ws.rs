//! HTTP and WebSocket routes

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use super::actor::{Join, SessionHandle};
use super::hub::Hub;
use crate::error::PartyError;
use crate::protocol::ServerMessage;
use crate::session::Role;

#[derive(Debug, Deserialize)]
pub struct DisplayQuery {
    pub session: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ControllerQuery {
    pub session: String,
    pub role: String,
    pub token: Option<String>,
}

pub fn router(hub: Arc<Hub>) -> Router {
    Router::new()
        .route("/ws/display", get(display_ws))
        .route("/ws/controller", get(controller_ws))
        .route("/health", get(health))
        .with_state(hub)
}

/// Bind and serve until the listener fails
pub async fn serve(addr: SocketAddr, hub: Arc<Hub>) -> Result<(), PartyError> {
    let listener = TcpListener::bind(addr).await?;
    info!("Session server listening on {}", listener.local_addr()?);
    axum::serve(listener, router(hub)).await?;
    Ok(())
}

async fn health(State(hub): State<Arc<Hub>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": crate::VERSION,
        "sessions": hub.len(),
        "mode": hub.config().session.mode.as_str(),
    }))
}

async fn display_ws(
    ws: WebSocketUpgrade,
    Query(query): Query<DisplayQuery>,
    State(hub): State<Arc<Hub>>,
) -> impl IntoResponse {
    // the session is picked only once the handshake has completed
    ws.on_upgrade(move |socket| async move {
        let session = hub.for_display(query.session.as_deref());
        let greeting = ServerMessage::Session {
            session_id: session.id().to_string(),
            join_url: hub.join_url(session.id()),
        };
        run_socket(socket, session, Join::Display, Some(greeting)).await
    })
}

async fn controller_ws(
    ws: WebSocketUpgrade,
    Query(query): Query<ControllerQuery>,
    State(hub): State<Arc<Hub>>,
) -> Response {
    let session = match hub.get(&query.session) {
        Ok(session) => session,
        Err(err) => return (StatusCode::NOT_FOUND, err.to_string()).into_response(),
    };
    let role = match query.role.parse::<Role>() {
        Ok(role) => role,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };
    let join = Join::Controller {
        role,
        token: query.token,
    };
    ws.on_upgrade(move |socket| run_socket(socket, session, join, None))
        .into_response()
}

async fn run_socket(
    mut socket: WebSocket,
    session: SessionHandle,
    join: Join,
    greeting: Option<ServerMessage>,
) {
    let connection = Uuid::new_v4();
    let (outbox, mut frames) = mpsc::unbounded_channel::<String>();
    if let Some(json) = greeting.and_then(|g| g.to_json().ok()) {
        let _ = outbox.send(json);
    }
    let kind = match &join {
        Join::Display => "display",
        Join::Controller { .. } => "controller",
    };
    if session.attach(connection, join, outbox).is_err() {
        warn!(session = %session.id(), "session closed before attach");
        return;
    }
    info!(session = %session.id(), %connection, kind, "WebSocket client connected");

    loop {
        tokio::select! {
            frame = frames.recv() => {
                match frame {
                    Some(json) => {
                        if socket.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    // the session dropped this socket
                    None => {
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if session.text(connection, text).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    session.detach(connection);
    info!(session = %session.id(), %connection, kind, "WebSocket client disconnected");
}
