use crate::error::GameError;
use crate::state::{ReadyReceipt, ResolveOutcome, SessionSnapshot, VoteReceipt};
use crate::types::*;
use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ClientMessage {
    // Lobby
    CreateRoom {
        display_name: Option<String>,
    },
    JoinRoom {
        code: RoomCode,
        display_name: Option<String>,
    },
    LeaveRoom,
    SetReady {
        ready: bool,
    },
    /// Host only
    KickPlayer {
        player_id: PlayerId,
    },
    /// Host only
    TransferHost {
        player_id: PlayerId,
    },
    /// Host only
    StartGame,
    /// Host only, after the game finished
    ResetRoom,

    // Game
    /// Re-attach to a running session after a reconnect
    WatchSession {
        session_id: SessionId,
    },
    SubmitHint {
        slot_index: u8,
        text: String,
    },
    RetractHint {
        slot_index: u8,
    },
    OpenVoting,
    CastVote {
        target_player_id: PlayerId,
        target_slot_index: u8,
    },
    /// Resolve the round identified by `token` (the current one if omitted)
    ResolveRound {
        token: Option<RoundToken>,
    },
    AdvanceReveal {
        token: RoundToken,
    },
    MarkReady,
    /// Ask for a fresh snapshot of the room and session
    Sync,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        protocol: String,
        player_id: PlayerId,
        server_now: String,
    },
    Room {
        room: Room,
    },
    /// The room this connection followed no longer exists or was left
    RoomGone {
        code: RoomCode,
    },
    /// Viewer-specific session state, pushed on every change
    Session {
        snapshot: Box<SessionSnapshot>,
    },
    HintAccepted {
        slot_index: u8,
        hint_version: u32,
        submitted: bool,
    },
    VoteAck {
        target: SlotKey,
        votes_cast: usize,
        expected: usize,
    },
    RoundResolved {
        outcome: RoundOutcome,
        already_resolved: bool,
    },
    ReadyAck {
        ready_count: usize,
        player_count: usize,
    },
    Error {
        code: String,
        msg: String,
    },
}

impl From<GameError> for ServerMessage {
    fn from(e: GameError) -> Self {
        ServerMessage::Error {
            code: e.code().to_string(),
            msg: e.to_string(),
        }
    }
}

impl From<ResolveOutcome> for ServerMessage {
    fn from(r: ResolveOutcome) -> Self {
        ServerMessage::RoundResolved {
            outcome: r.outcome,
            already_resolved: r.already_resolved,
        }
    }
}

impl From<&VoteReceipt> for ServerMessage {
    fn from(r: &VoteReceipt) -> Self {
        ServerMessage::VoteAck {
            target: r.vote.target.clone(),
            votes_cast: r.votes_cast,
            expected: r.expected,
        }
    }
}

impl From<&ReadyReceipt> for ServerMessage {
    fn from(r: &ReadyReceipt) -> Self {
        ServerMessage::ReadyAck {
            ready_count: r.ready_count,
            player_count: r.player_count,
        }
    }
}

impl ServerMessage {
    pub fn error(code: &str, msg: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.to_string(),
            msg: msg.into(),
        }
    }
}
