use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque ID types for readability
pub type PlayerId = String;
pub type SessionId = String;
pub type RoomCode = String;
pub type QuestionId = String;

/// Levels per game. Level `n` hands every player `n` secret numbers.
pub const TOTAL_LEVELS: u8 = 3;
/// Shared life pool at the start of a game
pub const MAX_HEARTS: u8 = 3;
/// Secret numbers are drawn from this closed interval
pub const NUMBER_MIN: u8 = 1;
pub const NUMBER_MAX: u8 = 100;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Waiting,
    Writing,
    Voting,
    Reveal,
    LevelComplete,
    Finished,
}

impl Phase {
    /// Legal edges of the session state machine
    pub fn can_transition_to(self, to: Phase) -> bool {
        use Phase::*;

        matches!(
            (self, to),
            (Waiting, Writing)
                | (Writing, Voting)
                | (Voting, Reveal)
                | (Reveal, Voting)
                | (Reveal, LevelComplete)
                | (Reveal, Finished)
                | (LevelComplete, Writing)
                | (LevelComplete, Finished)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == Phase::Finished
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Playing,
    Won,
    Lost,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Waiting,
    Playing,
    Finished,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomPlayer {
    pub id: PlayerId,
    pub display_name: String,
    pub ready: bool,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Room {
    pub code: RoomCode,
    pub host_id: PlayerId,
    /// Ordered by join time; the first entry inherits the host role
    pub players: Vec<RoomPlayer>,
    pub status: RoomStatus,
    pub session_id: Option<SessionId>,
    pub created_at: DateTime<Utc>,
}

impl Room {
    pub fn player(&self, id: &str) -> Option<&RoomPlayer> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn is_host(&self, id: &str) -> bool {
        self.host_id == id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Question {
    pub id: QuestionId,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionPlayer {
    pub id: PlayerId,
    pub display_name: String,
}

impl From<&RoomPlayer> for SessionPlayer {
    fn from(p: &RoomPlayer) -> Self {
        Self {
            id: p.id.clone(),
            display_name: p.display_name.clone(),
        }
    }
}

/// Identifies one voting round. Callers present the token they observed so
/// duplicate or late resolution attempts can be recognised.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoundToken {
    pub level: u8,
    pub round: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: SessionId,
    pub room_code: RoomCode,
    pub players: Vec<SessionPlayer>,
    /// 0 until the first level is initialised
    pub level: u8,
    pub total_levels: u8,
    pub hearts: u8,
    pub round: u32,
    pub total_rounds: u32,
    pub question: Option<Question>,
    pub phase: Phase,
    pub phase_deadline: Option<DateTime<Utc>>,
    /// Strictly ascending, reset at every level
    pub revealed_numbers: Vec<u8>,
    pub status: GameStatus,
    pub last_resolution: Option<RoundOutcome>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn token(&self) -> RoundToken {
        RoundToken {
            level: self.level,
            round: self.round,
        }
    }

    pub fn has_player(&self, id: &str) -> bool {
        self.players.iter().any(|p| p.id == id)
    }

    pub fn is_final_level(&self) -> bool {
        self.level >= self.total_levels
    }

    pub fn all_revealed(&self) -> bool {
        self.total_rounds > 0 && self.revealed_numbers.len() as u32 >= self.total_rounds
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    pub player_id: PlayerId,
    pub slot_index: u8,
}

impl SlotKey {
    pub fn new(player_id: impl Into<PlayerId>, slot_index: u8) -> Self {
        Self {
            player_id: player_id.into(),
            slot_index,
        }
    }
}

impl std::fmt::Display for SlotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.player_id, self.slot_index)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnswerSlot {
    pub player_id: PlayerId,
    pub display_name: String,
    pub slot_index: u8,
    /// Level fence; slots from another level are ignored
    pub level: u8,
    pub number: u8,
    pub hint: String,
    pub submitted_at: Option<DateTime<Utc>>,
    /// Bumped on every hint write so readers can tell edits apart
    pub hint_version: u32,
    pub is_revealed: bool,
    /// Set only when the slot is revealed
    pub is_correct: Option<bool>,
}

impl AnswerSlot {
    pub fn key(&self) -> SlotKey {
        SlotKey::new(self.player_id.clone(), self.slot_index)
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vote {
    pub voter_id: PlayerId,
    pub target: SlotKey,
    pub level: u8,
    pub round: u32,
    pub cast_at: DateTime<Utc>,
}

impl Vote {
    pub fn token(&self) -> RoundToken {
        RoundToken {
            level: self.level,
            round: self.round,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReadyMark {
    pub player_id: PlayerId,
    pub level: u8,
    pub marked_at: DateTime<Utc>,
}

/// Result of resolving one voting round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundOutcome {
    pub token: RoundToken,
    pub selected: SlotKey,
    pub selected_number: u8,
    pub is_correct: bool,
    pub hearts_lost: u8,
    pub new_hearts: u8,
    /// Every number revealed by this resolution, ascending
    pub revealed: Vec<u8>,
    /// The last remaining number, revealed without a vote
    pub auto_revealed: Option<u8>,
    pub level_cleared: bool,
    pub status: GameStatus,
}
