//! In-game message handlers
//!
//! Every handler acts on the session the connection follows, as the
//! connection's player. Clients never name another player's slot except as a
//! vote target.

use super::Connection;
use crate::protocol::ServerMessage;
use crate::state::AppState;
use crate::types::RoundToken;
use std::sync::Arc;

async fn snapshot(state: &AppState, conn: &Connection, session_id: &str) -> Option<ServerMessage> {
    match state.session_view(session_id, Some(&conn.player_id)).await {
        Ok(snapshot) => Some(ServerMessage::Session {
            snapshot: Box::new(snapshot),
        }),
        Err(e) => Some(e.into()),
    }
}

pub async fn handle_watch_session(
    state: &Arc<AppState>,
    conn: &mut Connection,
    session_id: String,
) -> Option<ServerMessage> {
    let session = match state.get_session(&session_id).await {
        Ok(s) => s,
        Err(e) => return Some(e.into()),
    };

    // Players get their room back too; anyone else just spectates
    if session.has_player(&conn.player_id) {
        if let Ok(room) = state.get_room(&session.room_code).await {
            if room.player(&conn.player_id).is_some() {
                conn.room = Some(room.code);
            }
        }
    }
    conn.session = Some(session.id.clone());
    snapshot(state, conn, &session.id).await
}

pub async fn handle_submit_hint(
    state: &Arc<AppState>,
    conn: &mut Connection,
    slot_index: u8,
    text: String,
) -> Option<ServerMessage> {
    let session_id = require_session!(conn);
    match state
        .submit_hint(&session_id, &conn.player_id, slot_index, &text)
        .await
    {
        Ok(slot) => Some(ServerMessage::HintAccepted {
            slot_index,
            hint_version: slot.hint_version,
            submitted: true,
        }),
        Err(e) => Some(e.into()),
    }
}

pub async fn handle_retract_hint(
    state: &Arc<AppState>,
    conn: &mut Connection,
    slot_index: u8,
) -> Option<ServerMessage> {
    let session_id = require_session!(conn);
    match state
        .retract_hint(&session_id, &conn.player_id, slot_index)
        .await
    {
        Ok(slot) => Some(ServerMessage::HintAccepted {
            slot_index,
            hint_version: slot.hint_version,
            submitted: false,
        }),
        Err(e) => Some(e.into()),
    }
}

pub async fn handle_open_voting(state: &Arc<AppState>, conn: &mut Connection) -> Option<ServerMessage> {
    let session_id = require_session!(conn);
    if let Err(e) = state.open_voting(&session_id).await {
        return Some(e.into());
    }
    snapshot(state, conn, &session_id).await
}

pub async fn handle_cast_vote(
    state: &Arc<AppState>,
    conn: &mut Connection,
    target_player_id: String,
    target_slot_index: u8,
) -> Option<ServerMessage> {
    let session_id = require_session!(conn);
    match state
        .cast_vote(
            &session_id,
            &conn.player_id,
            &target_player_id,
            target_slot_index,
        )
        .await
    {
        Ok(receipt) => match receipt.resolution {
            // The completing vote answers with the outcome
            Some(resolution) => Some(resolution.into()),
            None => Some((&receipt).into()),
        },
        Err(e) => Some(e.into()),
    }
}

pub async fn handle_resolve_round(
    state: &Arc<AppState>,
    conn: &mut Connection,
    token: Option<RoundToken>,
) -> Option<ServerMessage> {
    let session_id = require_session!(conn);
    let result = match token {
        Some(token) => state.resolve_round(&session_id, token).await,
        None => state.resolve_current_round(&session_id).await,
    };
    match result {
        Ok(outcome) => Some(outcome.into()),
        Err(e) => Some(e.into()),
    }
}

pub async fn handle_advance_reveal(
    state: &Arc<AppState>,
    conn: &mut Connection,
    token: RoundToken,
) -> Option<ServerMessage> {
    let session_id = require_session!(conn);
    if let Err(e) = state.advance_after_reveal(&session_id, token).await {
        return Some(e.into());
    }
    snapshot(state, conn, &session_id).await
}

pub async fn handle_mark_ready(state: &Arc<AppState>, conn: &mut Connection) -> Option<ServerMessage> {
    let session_id = require_session!(conn);
    match state.mark_ready(&session_id, &conn.player_id).await {
        Ok(receipt) => Some((&receipt).into()),
        Err(e) => Some(e.into()),
    }
}

pub async fn handle_sync(state: &Arc<AppState>, conn: &mut Connection) -> Option<ServerMessage> {
    if let Some(session_id) = conn.session.clone() {
        return snapshot(state, conn, &session_id).await;
    }
    super::room_update(state, conn).await
}
