//! WebSocket message dispatch
//!
//! Host-only and phase rules are enforced by the game service; this module
//! only routes messages to the lobby or in-game handlers.

use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;
use std::sync::Arc;

use super::{game, lobby, Connection};

/// Handle client messages and return optional response
pub async fn handle_message(
    msg: ClientMessage,
    conn: &mut Connection,
    state: &Arc<AppState>,
) -> Option<ServerMessage> {
    match msg {
        // Lobby
        ClientMessage::CreateRoom { display_name } => {
            lobby::handle_create_room(state, conn, display_name).await
        }

        ClientMessage::JoinRoom { code, display_name } => {
            lobby::handle_join_room(state, conn, code, display_name).await
        }

        ClientMessage::LeaveRoom => lobby::handle_leave_room(state, conn).await,

        ClientMessage::SetReady { ready } => lobby::handle_set_ready(state, conn, ready).await,

        ClientMessage::KickPlayer { player_id } => {
            lobby::handle_kick_player(state, conn, player_id).await
        }

        ClientMessage::TransferHost { player_id } => {
            lobby::handle_transfer_host(state, conn, player_id).await
        }

        ClientMessage::StartGame => lobby::handle_start_game(state, conn).await,

        ClientMessage::ResetRoom => lobby::handle_reset_room(state, conn).await,

        // Game
        ClientMessage::WatchSession { session_id } => {
            game::handle_watch_session(state, conn, session_id).await
        }

        ClientMessage::SubmitHint { slot_index, text } => {
            game::handle_submit_hint(state, conn, slot_index, text).await
        }

        ClientMessage::RetractHint { slot_index } => {
            game::handle_retract_hint(state, conn, slot_index).await
        }

        ClientMessage::OpenVoting => game::handle_open_voting(state, conn).await,

        ClientMessage::CastVote {
            target_player_id,
            target_slot_index,
        } => game::handle_cast_vote(state, conn, target_player_id, target_slot_index).await,

        ClientMessage::ResolveRound { token } => {
            game::handle_resolve_round(state, conn, token).await
        }

        ClientMessage::AdvanceReveal { token } => {
            game::handle_advance_reveal(state, conn, token).await
        }

        ClientMessage::MarkReady => game::handle_mark_ready(state, conn).await,

        ClientMessage::Sync => game::handle_sync(state, conn).await,
    }
}
