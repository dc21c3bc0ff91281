//! Round resolution: the reveal sweep and heart accounting.
//!
//! [`plan_reveal`] is the pure algorithm. [`AppState::resolve_round`] wraps it
//! in a single conditional commit keyed on the session version, which makes
//! concurrent resolutions of one round collapse into exactly one.

use super::{pick_winner, tally, AppState};
use crate::error::{GameError, GameResult};
use crate::store::{keys, WriteBatch};
use crate::types::*;
use serde::Serialize;
use serde_json::{json, Map};

/// One slot flipped by a resolution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotReveal {
    pub key: SlotKey,
    pub number: u8,
    pub is_correct: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RevealPlan {
    pub outcome: RoundOutcome,
    /// Ascending by number
    pub reveals: Vec<SlotReveal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolveOutcome {
    pub outcome: RoundOutcome,
    /// True when the round had been resolved before this call
    pub already_resolved: bool,
}

/// Work out what resolving `selected` does to the current level.
///
/// Every unrevealed number up to and including the selected one is revealed.
/// The guess is correct only if it was the smallest unrevealed number;
/// otherwise one heart is lost per skipped number. If exactly one number is
/// left afterwards it is revealed as well.
pub fn plan_reveal(
    slots: &[AnswerSlot],
    selected: &SlotKey,
    hearts: u8,
    level: u8,
    total_levels: u8,
    token: RoundToken,
) -> GameResult<RevealPlan> {
    let target = slots
        .iter()
        .find(|s| &s.key() == selected)
        .ok_or_else(|| GameError::MissingTarget(format!("slot {}", selected)))?;
    if target.is_revealed {
        return Err(GameError::AlreadyRevealed(selected.to_string()));
    }

    let mut unrevealed: Vec<&AnswerSlot> = slots.iter().filter(|s| !s.is_revealed).collect();
    unrevealed.sort_by_key(|s| s.number);

    let selected_number = target.number;
    let is_correct = unrevealed
        .first()
        .map(|lowest| lowest.number == selected_number)
        .unwrap_or(false);

    let skipped = unrevealed.iter().filter(|s| s.number < selected_number).count();
    let hearts_lost = u8::try_from(skipped).unwrap_or(u8::MAX);
    let new_hearts = hearts.saturating_sub(hearts_lost);

    let (swept, remaining): (Vec<&AnswerSlot>, Vec<&AnswerSlot>) = unrevealed
        .into_iter()
        .partition(|s| s.number <= selected_number);

    let mut reveals: Vec<SlotReveal> = swept
        .iter()
        .map(|s| SlotReveal {
            key: s.key(),
            number: s.number,
            is_correct: s.number == selected_number,
        })
        .collect();

    let auto_revealed = match remaining.as_slice() {
        [last] => {
            reveals.push(SlotReveal {
                key: last.key(),
                number: last.number,
                is_correct: true,
            });
            Some(last.number)
        }
        _ => None,
    };

    let level_cleared = remaining.len() <= 1;
    let status = if new_hearts == 0 {
        GameStatus::Lost
    } else if level_cleared && level >= total_levels {
        GameStatus::Won
    } else {
        GameStatus::Playing
    };

    let outcome = RoundOutcome {
        token,
        selected: selected.clone(),
        selected_number,
        is_correct,
        hearts_lost,
        new_hearts,
        revealed: reveals.iter().map(|r| r.number).collect(),
        auto_revealed,
        level_cleared,
        status,
    };

    Ok(RevealPlan { outcome, reveals })
}

impl AppState {
    /// Resolve the voting round identified by `token`.
    ///
    /// Presenting the token of the round that was already resolved returns
    /// the stored outcome without touching anything; any other stale token is
    /// refused. A round only resolves once every player has voted, or once
    /// its deadline has passed with at least one vote.
    pub async fn resolve_round(&self, session_id: &str, token: RoundToken) -> GameResult<ResolveOutcome> {
        let what = keys::session(session_id);
        let resolved = self
            .retry_on_conflict(&what, move || async move {
                let (session, version) = self.load_session(session_id).await?;

                if let Some(previous) = &session.last_resolution {
                    if previous.token == token {
                        return Ok(ResolveOutcome {
                            outcome: previous.clone(),
                            already_resolved: true,
                        });
                    }
                }
                if session.token() != token {
                    return Err(GameError::StaleRound {
                        presented: token,
                        current: session.token(),
                    });
                }
                Self::require_phase(&session, "resolve the round", &[Phase::Voting])?;

                let votes = self.live_votes(&session).await?;
                if votes.is_empty() {
                    return Err(GameError::NoVotes);
                }
                let all_voted = votes.len() >= session.players.len();
                let expired = session
                    .phase_deadline
                    .is_some_and(|deadline| deadline <= self.clock.now());
                if !all_voted && !expired {
                    return Err(GameError::RoundOpen {
                        votes_cast: votes.len(),
                        expected: session.players.len(),
                    });
                }

                let selected = {
                    let mut rng = rand::rng();
                    pick_winner(&tally(&votes), &mut rng)
                }
                .ok_or(GameError::NoVotes)?;

                let slots = self.level_slots(&session).await?;
                let plain: Vec<AnswerSlot> = slots.iter().map(|(slot, _)| slot.clone()).collect();
                let plan = plan_reveal(
                    &plain,
                    &selected,
                    session.hearts,
                    session.level,
                    session.total_levels,
                    token,
                )?;

                let mut batch = WriteBatch::new();
                batch.expect_version(keys::session(session_id), version);

                for reveal in &plan.reveals {
                    let slot_key = keys::slot(session_id, &reveal.key.player_id, reveal.key.slot_index);
                    if let Some((_, slot_version)) = slots.iter().find(|(s, _)| s.key() == reveal.key) {
                        batch.expect_version(slot_key.clone(), *slot_version);
                    }
                    let mut fields = Map::new();
                    fields.insert("is_revealed".to_string(), json!(true));
                    fields.insert("is_correct".to_string(), json!(reveal.is_correct));
                    batch.merge(slot_key, fields);
                }

                for (vote_key, _) in self.store.list(&keys::votes(session_id)).await? {
                    batch.delete(vote_key);
                }

                let now = self.clock.now();
                let mut next = session.clone();
                Self::transition(&mut next, Phase::Reveal)?;
                next.hearts = plan.outcome.new_hearts;
                next.revealed_numbers.extend(plan.outcome.revealed.iter().copied());
                next.status = plan.outcome.status;
                next.phase_deadline = Some(now + self.rules.reveal_pause());
                next.last_resolution = Some(plan.outcome.clone());
                next.updated_at = now;
                batch.put_record(keys::session(session_id), &next)?;

                self.store.commit(batch).await?;
                Ok(ResolveOutcome {
                    outcome: plan.outcome,
                    already_resolved: false,
                })
            })
            .await?;

        if !resolved.already_resolved {
            let o = &resolved.outcome;
            tracing::info!(
                session_id,
                level = o.token.level,
                round = o.token.round,
                selected = o.selected_number,
                correct = o.is_correct,
                hearts_lost = o.hearts_lost,
                hearts = o.new_hearts,
                revealed = ?o.revealed,
                "Round resolved"
            );
        }
        Ok(resolved)
    }

    /// Resolve whatever round the session is currently on
    pub async fn resolve_current_round(&self, session_id: &str) -> GameResult<ResolveOutcome> {
        let session = self.get_session(session_id).await?;
        self.resolve_round(session_id, session.token()).await
    }
}
