use crate::questions::QuestionError;
use crate::store::StoreError;
use crate::types::{Phase, RoundToken};

pub type GameResult<T> = Result<T, GameError>;

/// Errors returned by game operations. None of them leave a session half
/// updated: every mutation is a single atomic commit.
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("cannot deal {needed} unique numbers from a pool of {capacity}")]
    Capacity { needed: usize, capacity: usize },

    #[error("{0} not found")]
    MissingTarget(String),

    #[error("session {0} not found")]
    SessionNotFound(String),

    #[error("room {0} not found")]
    RoomNotFound(String),

    #[error("room {0} is full")]
    RoomFull(String),

    #[error("room {0} is not accepting players")]
    RoomClosed(String),

    #[error("only the host can {0}")]
    NotHost(&'static str),

    #[error("player {0} is not part of this game")]
    NotAPlayer(String),

    #[error("not all players are ready")]
    NotReady,

    #[error("need at least {0} players")]
    NotEnoughPlayers(usize),

    #[error("cannot {op} during the {phase:?} phase")]
    InvalidPhase { op: &'static str, phase: Phase },

    #[error("invalid phase transition from {from:?} to {to:?}")]
    InvalidTransition { from: Phase, to: Phase },

    #[error("round {presented:?} is stale, current round is {current:?}")]
    StaleRound {
        presented: RoundToken,
        current: RoundToken,
    },

    #[error("no votes have been cast this round")]
    NoVotes,

    #[error("round still open: {votes_cast} of {expected} votes and the deadline has not passed")]
    RoundOpen { votes_cast: usize, expected: usize },

    #[error("{0} hint(s) still missing")]
    HintsPending(usize),

    #[error("slot {0} is already revealed")]
    AlreadyRevealed(String),

    #[error("game is finished")]
    GameFinished,

    #[error("{0}")]
    Validation(String),

    #[error("concurrent update on {0}, refresh and retry")]
    Conflict(String),

    #[error(transparent)]
    Question(#[from] QuestionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GameError {
    /// Protocol error code sent to clients
    pub fn code(&self) -> &'static str {
        match self {
            GameError::Capacity { .. } => "CAPACITY_EXCEEDED",
            GameError::MissingTarget(_) => "MISSING_TARGET",
            GameError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            GameError::RoomNotFound(_) => "ROOM_NOT_FOUND",
            GameError::RoomFull(_) => "ROOM_FULL",
            GameError::RoomClosed(_) => "ROOM_CLOSED",
            GameError::NotHost(_) => "NOT_HOST",
            GameError::NotAPlayer(_) => "NOT_A_PLAYER",
            GameError::NotReady => "NOT_READY",
            GameError::NotEnoughPlayers(_) => "NOT_ENOUGH_PLAYERS",
            GameError::InvalidPhase { .. } => "INVALID_PHASE",
            GameError::InvalidTransition { .. } => "INVALID_TRANSITION",
            GameError::StaleRound { .. } => "STALE_ROUND",
            GameError::NoVotes => "NO_VOTES",
            GameError::RoundOpen { .. } => "ROUND_OPEN",
            GameError::HintsPending(_) => "HINTS_PENDING",
            GameError::AlreadyRevealed(_) => "ALREADY_REVEALED",
            GameError::GameFinished => "GAME_FINISHED",
            GameError::Validation(_) => "VALIDATION_FAILED",
            GameError::Conflict(_) => "CONFLICT",
            GameError::Question(_) => "QUESTION_UNAVAILABLE",
            GameError::Store(StoreError::Conflict(_)) => "CONFLICT",
            GameError::Store(_) => "STORE_FAILURE",
        }
    }

    pub(crate) fn is_conflict(&self) -> bool {
        matches!(self, GameError::Store(StoreError::Conflict(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(GameError::NoVotes.code(), "NO_VOTES");
        assert_eq!(
            GameError::RoundOpen {
                votes_cast: 1,
                expected: 3
            }
            .code(),
            "ROUND_OPEN"
        );
        assert_eq!(
            GameError::Store(StoreError::Conflict("sessions/x".into())).code(),
            "CONFLICT"
        );
        assert_eq!(
            GameError::Store(StoreError::NotFound("sessions/x".into())).code(),
            "STORE_FAILURE"
        );
        assert!(GameError::Store(StoreError::Conflict("k".into())).is_conflict());
        assert!(!GameError::Conflict("k".into()).is_conflict());
    }
}
