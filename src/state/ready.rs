use super::{allocate_numbers, AppState};
use crate::error::{GameError, GameResult};
use crate::store::{keys, WriteBatch};
use crate::types::*;
use serde::Serialize;
use std::collections::BTreeSet;

/// The gate opens once every distinct player of the level is ready. An
/// empty level never opens it.
pub fn gate_open(ready: usize, distinct_players: usize) -> bool {
    distinct_players > 0 && ready == distinct_players
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadyReceipt {
    pub ready_count: usize,
    pub player_count: usize,
    /// Session after the gate opened, if this mark opened it
    pub advanced: Option<Session>,
}

impl AppState {
    /// Ready marks for the session's current level, by distinct player
    async fn level_ready_marks(&self, session: &Session) -> GameResult<BTreeSet<PlayerId>> {
        Ok(self
            .load_all::<ReadyMark>(&keys::ready_marks(&session.id))
            .await?
            .into_iter()
            .filter(|(_, mark, _)| mark.level == session.level)
            .map(|(_, mark, _)| mark.player_id)
            .collect())
    }

    /// Acknowledge the level-complete screen. The last player to do so
    /// starts the next level (or ends a game whose final level is done).
    pub async fn mark_ready(&self, session_id: &str, player_id: &str) -> GameResult<ReadyReceipt> {
        let session = self.get_session(session_id).await?;
        Self::require_phase(&session, "mark ready", &[Phase::LevelComplete])?;

        let level_players: BTreeSet<PlayerId> = self
            .level_slots(&session)
            .await?
            .into_iter()
            .map(|(slot, _)| slot.player_id)
            .collect();
        if !level_players.contains(player_id) {
            return Err(GameError::NotAPlayer(player_id.to_string()));
        }

        let mark = ReadyMark {
            player_id: player_id.to_string(),
            level: session.level,
            marked_at: self.clock.now(),
        };
        let mut batch = WriteBatch::new();
        batch
            .expect_exists(keys::session(session_id))
            .put_record(keys::ready(session_id, player_id), &mark)?;
        self.store.commit(batch).await?;

        let ready_count = self
            .level_ready_marks(&session)
            .await?
            .intersection(&level_players)
            .count();
        let player_count = level_players.len();
        tracing::debug!(session_id, player_id, ready_count, player_count, "Player ready");

        if !gate_open(ready_count, player_count) {
            return Ok(ReadyReceipt {
                ready_count,
                player_count,
                advanced: None,
            });
        }

        let what = keys::session(session_id);
        let level = session.level;
        let advanced = self
            .retry_on_conflict(&what, move || async move {
                let (session, version) = self.load_session(session_id).await?;
                if session.phase != Phase::LevelComplete || session.level != level {
                    // Someone else opened the gate
                    return Ok(None);
                }
                if session.is_final_level() {
                    return self.finish_won(&session, version).await.map(Some);
                }

                let next_level = session.level + 1;
                let numbers = {
                    let mut rng = rand::rng();
                    allocate_numbers(&mut rng, session.players.len(), next_level)?
                };
                let question = self.questions.pick_random().await?;
                self.commit_level(
                    &session,
                    version,
                    &session.players,
                    next_level,
                    session.hearts,
                    &question,
                    &numbers,
                )
                .await
                .map(Some)
            })
            .await
            .inspect_err(|e| {
                tracing::error!(session_id, level, "Failed to start the next level: {}", e)
            })?;

        Ok(ReadyReceipt {
            ready_count,
            player_count,
            advanced,
        })
    }
}
