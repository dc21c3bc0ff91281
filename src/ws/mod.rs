/// Resolve the connection's session id or answer with an error
macro_rules! require_session {
    ($conn:expr) => {
        match $conn.session.clone() {
            Some(id) => id,
            None => {
                return Some(ServerMessage::error(
                    "NO_SESSION",
                    "Join a room with a running game first",
                ))
            }
        }
    };
}

/// Resolve the connection's room code or answer with an error
macro_rules! require_room {
    ($conn:expr) => {
        match $conn.room.clone() {
            Some(code) => code,
            None => return Some(ServerMessage::error("NO_ROOM", "Join a room first")),
        }
    };
}

pub mod game;
pub mod handlers;
pub mod lobby;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{
    sink::SinkExt,
    stream::{SplitSink, StreamExt},
};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::GameError;
use crate::protocol::{ClientMessage, ServerMessage, PROTOCOL_VERSION};
use crate::state::AppState;
use crate::store::{keys, ChangeEvent, Watch};
use crate::types::{PlayerId, RoomCode, SessionId};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub player_id: Option<String>,
}

/// Per-connection context: who is talking and what they are following
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub player_id: PlayerId,
    pub room: Option<RoomCode>,
    pub session: Option<SessionId>,
}

impl Connection {
    pub fn new(player_id: impl Into<PlayerId>) -> Self {
        Self {
            player_id: player_id.into(),
            room: None,
            session: None,
        }
    }
}

/// Player ids end up in document keys
fn valid_player_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let player_id = match params.player_id {
        Some(id) if valid_player_id(&id) => id,
        Some(id) => {
            tracing::warn!(player_id = %id, "Rejected malformed player id, issuing a new one");
            ulid::Ulid::new().to_string()
        }
        None => ulid::Ulid::new().to_string(),
    };
    tracing::info!(player_id = %player_id, "WebSocket connection request");

    ws.on_upgrade(move |socket| handle_socket(socket, player_id, state))
}

async fn next_event(watch: &mut Option<Watch>) -> Option<ChangeEvent> {
    match watch {
        Some(w) => w.next().await,
        None => std::future::pending().await,
    }
}

async fn send(sender: &mut SplitSink<WebSocket, Message>, msg: &ServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::error!("Failed to serialize message: {}", e);
            true
        }
    }
}

/// Latest room state for this connection. Follows the room's session and
/// drops the room if it is gone or the player is no longer in it.
pub async fn room_update(state: &AppState, conn: &mut Connection) -> Option<ServerMessage> {
    let code = conn.room.clone()?;
    match state.get_room(&code).await {
        Ok(room) if room.player(&conn.player_id).is_some() => {
            conn.session = room.session_id.clone();
            Some(ServerMessage::Room { room })
        }
        Ok(_) | Err(GameError::RoomNotFound(_)) => {
            conn.room = None;
            conn.session = None;
            Some(ServerMessage::RoomGone { code })
        }
        Err(e) => Some(e.into()),
    }
}

/// Latest session snapshot as seen by this connection's player
pub async fn session_update(state: &AppState, conn: &Connection) -> Option<ServerMessage> {
    let session_id = conn.session.as_deref()?;
    match state.session_view(session_id, Some(&conn.player_id)).await {
        Ok(snapshot) => Some(ServerMessage::Session {
            snapshot: Box::new(snapshot),
        }),
        Err(e) => Some(e.into()),
    }
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, player_id: PlayerId, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut conn = Connection::new(player_id);

    let welcome = ServerMessage::Welcome {
        protocol: PROTOCOL_VERSION.to_string(),
        player_id: conn.player_id.clone(),
        server_now: state.clock.now().to_rfc3339(),
    };
    if !send(&mut sender, &welcome).await {
        tracing::error!("Failed to send welcome message");
        return;
    }

    let mut room_watch: Option<Watch> = None;
    let mut session_watch: Option<Watch> = None;

    'conn: loop {
        let before = conn.clone();
        let mut outgoing: Vec<ServerMessage> = Vec::new();
        let mut from_client = false;

        tokio::select! {
            event = next_event(&mut room_watch) => match event {
                Some(_) => {
                    if let Some(w) = room_watch.as_mut() {
                        w.drain_ready();
                    }
                    outgoing.extend(room_update(&state, &mut conn).await);
                }
                None => room_watch = None,
            },

            event = next_event(&mut session_watch) => match event {
                Some(_) => {
                    // One batch touches many documents; send one snapshot
                    if let Some(w) = session_watch.as_mut() {
                        w.drain_ready();
                    }
                    outgoing.extend(session_update(&state, &conn).await);
                }
                None => session_watch = None,
            },

            ws_msg = receiver.next() => match ws_msg {
                Some(Ok(Message::Text(text))) => {
                    tracing::debug!(player_id = %conn.player_id, "Received message: {}", text);
                    from_client = true;

                    match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(msg) => {
                            outgoing.extend(handlers::handle_message(msg, &mut conn, &state).await);
                        }
                        Err(e) => {
                            tracing::warn!("Failed to parse client message: {}", e);
                            outgoing.push(ServerMessage::error(
                                "PARSE_ERROR",
                                format!("Invalid message format: {}", e),
                            ));
                        }
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    tracing::info!(player_id = %conn.player_id, "WebSocket closed");
                    break;
                }
                Some(Ok(Message::Ping(data))) => {
                    if sender.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::error!("WebSocket error: {}", e);
                    break;
                }
                None => break,
            },
        }

        if conn.room != before.room {
            room_watch = conn
                .room
                .as_deref()
                .map(|code| state.store.watch(&keys::room(code)));
        }
        if conn.session != before.session {
            session_watch = conn
                .session
                .as_deref()
                .map(|id| state.store.watch(&keys::session(id)));
            // Handlers answer with a snapshot themselves
            if !from_client {
                outgoing.extend(session_update(&state, &conn).await);
            }
        }

        for msg in &outgoing {
            if !send(&mut sender, msg).await {
                tracing::error!("Failed to send message");
                break 'conn;
            }
        }
    }

    tracing::info!(player_id = %conn.player_id, "WebSocket connection closed");
}
