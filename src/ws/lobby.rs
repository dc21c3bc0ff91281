//! Room and lobby message handlers

use super::Connection;
use crate::protocol::ServerMessage;
use crate::state::AppState;
use std::sync::Arc;

pub async fn handle_create_room(
    state: &Arc<AppState>,
    conn: &mut Connection,
    display_name: Option<String>,
) -> Option<ServerMessage> {
    match state
        .create_room(&conn.player_id, display_name.as_deref())
        .await
    {
        Ok(room) => {
            conn.room = Some(room.code.clone());
            conn.session = None;
            Some(ServerMessage::Room { room })
        }
        Err(e) => Some(e.into()),
    }
}

pub async fn handle_join_room(
    state: &Arc<AppState>,
    conn: &mut Connection,
    code: String,
    display_name: Option<String>,
) -> Option<ServerMessage> {
    let code = code.trim().to_string();
    tracing::info!(player_id = %conn.player_id, code = %code, "Join request");

    match state
        .join_room(&code, &conn.player_id, display_name.as_deref())
        .await
    {
        Ok(room) => {
            conn.room = Some(room.code.clone());
            // Rejoining a running game picks the session back up
            conn.session = room.session_id.clone();
            Some(ServerMessage::Room { room })
        }
        Err(e) => Some(e.into()),
    }
}

pub async fn handle_leave_room(state: &Arc<AppState>, conn: &mut Connection) -> Option<ServerMessage> {
    let code = require_room!(conn);
    match state.leave_room(&code, &conn.player_id).await {
        Ok(_) => {
            conn.room = None;
            conn.session = None;
            Some(ServerMessage::RoomGone { code })
        }
        Err(e) => Some(e.into()),
    }
}

pub async fn handle_set_ready(
    state: &Arc<AppState>,
    conn: &mut Connection,
    ready: bool,
) -> Option<ServerMessage> {
    let code = require_room!(conn);
    match state.set_ready(&code, &conn.player_id, ready).await {
        Ok(room) => Some(ServerMessage::Room { room }),
        Err(e) => Some(e.into()),
    }
}

pub async fn handle_kick_player(
    state: &Arc<AppState>,
    conn: &mut Connection,
    target: String,
) -> Option<ServerMessage> {
    let code = require_room!(conn);
    match state.kick_player(&code, &conn.player_id, &target).await {
        Ok(room) => Some(ServerMessage::Room { room }),
        Err(e) => Some(e.into()),
    }
}

pub async fn handle_transfer_host(
    state: &Arc<AppState>,
    conn: &mut Connection,
    new_host: String,
) -> Option<ServerMessage> {
    let code = require_room!(conn);
    match state.transfer_host(&code, &conn.player_id, &new_host).await {
        Ok(room) => Some(ServerMessage::Room { room }),
        Err(e) => Some(e.into()),
    }
}

pub async fn handle_start_game(state: &Arc<AppState>, conn: &mut Connection) -> Option<ServerMessage> {
    let code = require_room!(conn);
    let session = match state.start_game(&code, &conn.player_id).await {
        Ok(session) => session,
        Err(e) => return Some(e.into()),
    };
    conn.session = Some(session.id.clone());

    match state.session_view(&session.id, Some(&conn.player_id)).await {
        Ok(snapshot) => Some(ServerMessage::Session {
            snapshot: Box::new(snapshot),
        }),
        Err(e) => Some(e.into()),
    }
}

pub async fn handle_reset_room(state: &Arc<AppState>, conn: &mut Connection) -> Option<ServerMessage> {
    let code = require_room!(conn);
    match state.reset_room(&code, &conn.player_id).await {
        Ok(room) => {
            conn.session = None;
            Some(ServerMessage::Room { room })
        }
        Err(e) => Some(e.into()),
    }
}
