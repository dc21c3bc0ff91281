mod hint;
mod level;
mod lobby;
mod progression;
mod ready;
mod reveal;
mod view;
mod vote;

pub use level::allocate_numbers;
pub use progression::DeadlineAction;
pub use ready::{gate_open, ReadyReceipt};
pub use reveal::{plan_reveal, ResolveOutcome, RevealPlan, SlotReveal};
pub use view::{SessionSnapshot, SlotView};
pub use vote::{pick_winner, tally, VoteReceipt};

use crate::clock::{Clock, SystemClock};
use crate::config::GameRules;
use crate::error::{GameError, GameResult};
use crate::questions::{QuestionPool, QuestionSource};
use crate::store::{keys, DocumentStore, MemoryStore, Versioned};
use crate::types::*;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;

/// Game service shared by every connection and background task.
///
/// All state lives in the document store; this type holds no game data of
/// its own, so any number of clones may race on the same session and rely on
/// the store's conditional commits for serialisation.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub questions: Arc<dyn QuestionSource>,
    pub clock: Arc<dyn Clock>,
    pub rules: GameRules,
}

impl AppState {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        questions: Arc<dyn QuestionSource>,
        clock: Arc<dyn Clock>,
        rules: GameRules,
    ) -> Self {
        Self {
            store,
            questions,
            clock,
            rules,
        }
    }

    /// In-memory store, built-in questions and the system clock
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryStore::new()),
            Arc::new(QuestionPool::builtin()),
            Arc::new(SystemClock),
            GameRules::default(),
        )
    }

    pub(crate) async fn load<T: DeserializeOwned>(&self, key: &str) -> GameResult<Option<(T, u64)>> {
        match self.store.get(key).await? {
            Some(versioned) => Ok(Some((versioned.decode(key)?, versioned.version))),
            None => Ok(None),
        }
    }

    pub(crate) async fn load_all<T: DeserializeOwned>(
        &self,
        prefix: &str,
    ) -> GameResult<Vec<(String, T, u64)>> {
        self.store
            .list(prefix)
            .await?
            .into_iter()
            .map(|(key, versioned): (String, Versioned)| {
                let record = versioned.decode(&key)?;
                Ok((key, record, versioned.version))
            })
            .collect()
    }

    pub async fn get_session(&self, session_id: &str) -> GameResult<Session> {
        Ok(self.load_session(session_id).await?.0)
    }

    pub(crate) async fn load_session(&self, session_id: &str) -> GameResult<(Session, u64)> {
        self.load(&keys::session(session_id))
            .await?
            .ok_or_else(|| GameError::SessionNotFound(session_id.to_string()))
    }

    /// Slots of the session's current level, sorted by player then index
    pub(crate) async fn level_slots(&self, session: &Session) -> GameResult<Vec<(AnswerSlot, u64)>> {
        let mut slots: Vec<(AnswerSlot, u64)> = self
            .load_all::<AnswerSlot>(&keys::slots(&session.id))
            .await?
            .into_iter()
            .filter(|(_, slot, _)| slot.level == session.level)
            .map(|(_, slot, version)| (slot, version))
            .collect();
        slots.sort_by(|(a, _), (b, _)| a.key().cmp(&b.key()));
        Ok(slots)
    }

    pub async fn get_slots(&self, session_id: &str) -> GameResult<Vec<AnswerSlot>> {
        let session = self.get_session(session_id).await?;
        Ok(self
            .level_slots(&session)
            .await?
            .into_iter()
            .map(|(slot, _)| slot)
            .collect())
    }

    /// Votes for the session's current round. Votes carrying another round
    /// token are leftovers from a race and are ignored.
    pub(crate) async fn live_votes(&self, session: &Session) -> GameResult<Vec<Vote>> {
        let token = session.token();
        Ok(self
            .load_all::<Vote>(&keys::votes(&session.id))
            .await?
            .into_iter()
            .map(|(_, vote, _)| vote)
            .filter(|vote| vote.token() == token)
            .collect())
    }

    /// Reject mutations on finished sessions and phases that don't allow `op`
    pub(crate) fn require_phase(
        session: &Session,
        op: &'static str,
        allowed: &[Phase],
    ) -> GameResult<()> {
        if session.phase.is_terminal() {
            return Err(GameError::GameFinished);
        }
        if !allowed.contains(&session.phase) {
            return Err(GameError::InvalidPhase {
                op,
                phase: session.phase,
            });
        }
        Ok(())
    }

    /// Move `session` to `to`, refusing edges outside the phase graph
    pub(crate) fn transition(session: &mut Session, to: Phase) -> GameResult<()> {
        if !session.phase.can_transition_to(to) {
            return Err(GameError::InvalidTransition {
                from: session.phase,
                to,
            });
        }
        session.phase = to;
        Ok(())
    }

    /// Run an optimistic read-modify-write, re-reading fresh state when a
    /// concurrent writer wins the race.
    pub(crate) async fn retry_on_conflict<T, F, Fut>(&self, what: &str, mut attempt: F) -> GameResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GameResult<T>>,
    {
        let mut tries = 0;
        loop {
            match attempt().await {
                Err(e) if e.is_conflict() => {
                    tries += 1;
                    if tries > self.rules.cas_retries {
                        tracing::warn!(what, tries, "Giving up after repeated write conflicts");
                        return Err(GameError::Conflict(what.to_string()));
                    }
                    tracing::debug!(what, tries, "Write conflict, retrying with fresh state");
                }
                other => return other,
            }
        }
    }

    /// Export the store contents (admin backup)
    pub async fn export_state(&self) -> GameResult<crate::store::StoreSnapshot> {
        Ok(self.store.export().await?)
    }

    /// Replace the store contents from a backup
    pub async fn import_state(&self, snapshot: crate::store::StoreSnapshot) -> GameResult<()> {
        Ok(self.store.import(snapshot).await?)
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::WriteBatch;

    pub fn state_with_clock() -> (Arc<AppState>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let state = AppState::new(
            Arc::new(MemoryStore::new()),
            Arc::new(QuestionPool::builtin()),
            clock.clone(),
            GameRules::default(),
        );
        (Arc::new(state), clock)
    }

    /// Room with `n` players (host "p1"), all ready, game started
    pub async fn started_game(state: &AppState, n: usize) -> Session {
        let room = state.create_room("p1", Some("Player 1")).await.unwrap();
        for i in 2..=n {
            let id = format!("p{}", i);
            state
                .join_room(&room.code, &id, Some(&format!("Player {}", i)))
                .await
                .unwrap();
            state.set_ready(&room.code, &id, true).await.unwrap();
        }
        state.start_game(&room.code, "p1").await.unwrap()
    }

    /// Overwrite the dealt numbers of the current level. `numbers[i]` are
    /// the numbers of player `p{i+1}`.
    pub async fn rig_numbers(state: &AppState, session_id: &str, numbers: &[&[u8]]) {
        let session = state.get_session(session_id).await.unwrap();
        let slots = state.level_slots(&session).await.unwrap();
        let mut batch = WriteBatch::new();
        for (slot, _) in slots {
            let player_no: usize = slot.player_id[1..].parse().unwrap();
            let mut slot = slot;
            slot.number = numbers[player_no - 1][slot.slot_index as usize];
            batch
                .put_record(
                    keys::slot(session_id, &slot.player_id, slot.slot_index),
                    &slot,
                )
                .unwrap();
        }
        state.store.commit(batch).await.unwrap();
    }

    /// Submit a hint for every slot and open voting
    pub async fn to_voting(state: &AppState, session_id: &str) -> Session {
        for slot in state.get_slots(session_id).await.unwrap() {
            state
                .submit_hint(session_id, &slot.player_id, slot.slot_index, "a hint")
                .await
                .unwrap();
        }
        state.open_voting(session_id).await.unwrap()
    }

    /// Let the reveal pause run out, then leave the reveal phase
    pub async fn advance_after_pause(
        state: &AppState,
        clock: &ManualClock,
        session_id: &str,
        token: RoundToken,
    ) -> Session {
        clock.advance(state.rules.reveal_pause());
        state.advance_after_reveal(session_id, token).await.unwrap()
    }

    /// Run out the voting deadline
    pub fn expire_voting(state: &AppState, clock: &ManualClock) {
        clock.advance(state.rules.voting_deadline() + chrono::TimeDelta::seconds(1));
    }

    /// Every player votes for the slot holding `number`
    pub async fn all_vote_for(state: &AppState, session_id: &str, number: u8) -> VoteReceipt {
        let session = state.get_session(session_id).await.unwrap();
        let target = state
            .get_slots(session_id)
            .await
            .unwrap()
            .into_iter()
            .find(|s| s.number == number)
            .unwrap();
        let mut last = None;
        for player in &session.players {
            last = Some(
                state
                    .cast_vote(session_id, &player.id, &target.player_id, target.slot_index)
                    .await
                    .unwrap(),
            );
        }
        last.unwrap()
    }
}
