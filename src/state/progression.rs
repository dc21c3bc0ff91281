use super::AppState;
use crate::error::{GameError, GameResult};
use crate::store::{keys, WriteBatch};
use crate::types::*;

/// What the deadline sweep did to one session
#[derive(Debug, Clone, PartialEq)]
pub enum DeadlineAction {
    Resolved(RoundToken),
    Advanced(Phase),
}

impl AppState {
    /// Close the writing phase once every slot of the level carries a
    /// submitted hint.
    pub async fn open_voting(&self, session_id: &str) -> GameResult<Session> {
        let what = keys::session(session_id);
        let session = self
            .retry_on_conflict(&what, move || async move {
                let (session, version) = self.load_session(session_id).await?;
                Self::require_phase(&session, "open voting", &[Phase::Writing])?;

                let slots = self.level_slots(&session).await?;
                let pending = slots.iter().filter(|(slot, _)| !slot.is_submitted()).count();
                if slots.is_empty() || pending > 0 {
                    return Err(GameError::HintsPending(pending));
                }

                let now = self.clock.now();
                let mut next = session.clone();
                Self::transition(&mut next, Phase::Voting)?;
                next.phase_deadline = Some(now + self.rules.voting_deadline());
                next.updated_at = now;

                let mut batch = WriteBatch::new();
                batch
                    .expect_version(keys::session(session_id), version)
                    .put_record(keys::session(session_id), &next)?;
                self.store.commit(batch).await?;
                Ok(next)
            })
            .await?;

        tracing::info!(session_id, level = session.level, "Voting opened");
        Ok(session)
    }

    /// Leave the reveal pause for the round identified by `token`.
    ///
    /// Finished games end, cleared levels wait at the ready gate, anything
    /// else goes back to voting with the next round. Calls for another round,
    /// outside the reveal phase or before the pause has run out return the
    /// session unchanged.
    pub async fn advance_after_reveal(&self, session_id: &str, token: RoundToken) -> GameResult<Session> {
        let what = keys::session(session_id);
        self.retry_on_conflict(&what, move || async move {
            let (session, version) = self.load_session(session_id).await?;
            if session.phase != Phase::Reveal || session.token() != token {
                return Ok(session);
            }

            let now = self.clock.now();
            if session.phase_deadline.is_some_and(|deadline| deadline > now) {
                return Ok(session);
            }
            let mut next = session.clone();
            let mut batch = WriteBatch::new();
            batch.expect_version(keys::session(session_id), version);

            if session.status != GameStatus::Playing {
                Self::transition(&mut next, Phase::Finished)?;
                next.phase_deadline = None;
                self.finish_room_in(&mut batch, &session.room_code).await?;
            } else if session.all_revealed() {
                Self::transition(&mut next, Phase::LevelComplete)?;
                next.phase_deadline = None;
            } else {
                Self::transition(&mut next, Phase::Voting)?;
                next.round += 1;
                next.phase_deadline = Some(now + self.rules.voting_deadline());
            }
            next.updated_at = now;
            batch.put_record(keys::session(session_id), &next)?;
            self.store.commit(batch).await?;

            tracing::info!(
                session_id,
                from = ?session.phase,
                to = ?next.phase,
                round = next.round,
                status = ?next.status,
                "Session advanced"
            );
            Ok(next)
        })
        .await
    }

    /// End a session that cleared its final level (ready gate or operator)
    pub(crate) async fn finish_won(&self, session: &Session, version: u64) -> GameResult<Session> {
        let now = self.clock.now();
        let mut next = session.clone();
        Self::transition(&mut next, Phase::Finished)?;
        next.status = GameStatus::Won;
        next.phase_deadline = None;
        next.updated_at = now;

        let mut batch = WriteBatch::new();
        batch
            .expect_version(keys::session(&session.id), version)
            .put_record(keys::session(&session.id), &next)?;
        self.finish_room_in(&mut batch, &session.room_code).await?;
        self.store.commit(batch).await?;

        tracing::info!(session_id = %session.id, hearts = next.hearts, "Game won");
        Ok(next)
    }

    /// Act on every session whose deadline has passed: resolve voting rounds
    /// that have at least one vote and move on from reveal pauses.
    ///
    /// Voting without any vote and writing deadlines are left alone.
    pub async fn run_deadlines(&self) -> GameResult<Vec<(SessionId, DeadlineAction)>> {
        let now = self.clock.now();
        let mut actions = Vec::new();

        // Slots, votes and ready marks live below the session roots
        let mut due: Vec<Session> = Vec::new();
        for (key, versioned) in self.store.list(keys::sessions()).await? {
            if !keys::is_session_root(&key) {
                continue;
            }
            let session: Session = versioned.decode(&key)?;
            if session.phase_deadline.is_some_and(|deadline| deadline <= now) {
                due.push(session);
            }
        }

        for session in due {
            let token = session.token();
            match session.phase {
                Phase::Voting => {
                    if self.live_votes(&session).await?.is_empty() {
                        continue;
                    }
                    match self.resolve_round(&session.id, token).await {
                        Ok(_) => actions.push((session.id.clone(), DeadlineAction::Resolved(token))),
                        Err(e) => {
                            tracing::warn!(session_id = %session.id, "Deadline resolution failed: {}", e)
                        }
                    }
                }
                Phase::Reveal => match self.advance_after_reveal(&session.id, token).await {
                    Ok(next) => actions.push((session.id.clone(), DeadlineAction::Advanced(next.phase))),
                    Err(e) => {
                        tracing::warn!(session_id = %session.id, "Reveal advance failed: {}", e)
                    }
                },
                _ => {}
            }
        }

        Ok(actions)
    }
}
