use super::{AppState, ResolveOutcome};
use crate::error::{GameError, GameResult};
use crate::store::{keys, WriteBatch};
use crate::types::*;
use rand::seq::IndexedRandom;
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;

/// Count votes per target slot
pub fn tally(votes: &[Vote]) -> BTreeMap<SlotKey, u32> {
    let mut counts: BTreeMap<SlotKey, u32> = BTreeMap::new();
    for vote in votes {
        *counts.entry(vote.target.clone()).or_insert(0) += 1;
    }
    counts
}

/// Target with the most votes. Ties are broken uniformly at random, never by
/// key order.
pub fn pick_winner<R: Rng + ?Sized>(tally: &BTreeMap<SlotKey, u32>, rng: &mut R) -> Option<SlotKey> {
    let max = tally.values().copied().max()?;
    let tied: Vec<&SlotKey> = tally
        .iter()
        .filter(|(_, count)| **count == max)
        .map(|(key, _)| key)
        .collect();
    tied.choose(rng).map(|key| (*key).clone())
}

#[derive(Debug, Clone, Serialize)]
pub struct VoteReceipt {
    pub vote: Vote,
    pub votes_cast: usize,
    pub expected: usize,
    /// Present when this vote completed the round and resolved it
    pub resolution: Option<ResolveOutcome>,
}

impl AppState {
    /// Cast or replace `voter_id`'s vote for the current round.
    ///
    /// The vote is committed against the session version, so a vote racing
    /// a resolution is retried against fresh state and then refused because
    /// the phase has moved on. The last missing vote resolves the round.
    pub async fn cast_vote(
        &self,
        session_id: &str,
        voter_id: &str,
        target_player_id: &str,
        target_slot_index: u8,
    ) -> GameResult<VoteReceipt> {
        let key = keys::vote(session_id, voter_id);
        let vote_key = &key;
        let (vote, votes_cast, expected) = self
            .retry_on_conflict(&key, move || async move {
                let (session, version) = self.load_session(session_id).await?;
                Self::require_phase(&session, "vote", &[Phase::Voting])?;
                if !session.has_player(voter_id) {
                    return Err(GameError::NotAPlayer(voter_id.to_string()));
                }

                let target_key = keys::slot(session_id, target_player_id, target_slot_index);
                let (slot, _) = self
                    .load::<AnswerSlot>(&target_key)
                    .await?
                    .filter(|(slot, _)| slot.level == session.level)
                    .ok_or_else(|| GameError::MissingTarget(format!("slot {}", target_key)))?;
                if slot.is_revealed {
                    return Err(GameError::AlreadyRevealed(slot.key().to_string()));
                }

                let vote = Vote {
                    voter_id: voter_id.to_string(),
                    target: slot.key(),
                    level: session.level,
                    round: session.round,
                    cast_at: self.clock.now(),
                };

                let mut batch = WriteBatch::new();
                batch
                    .expect_version(keys::session(session_id), version)
                    .put_record(vote_key.clone(), &vote)?;
                self.store.commit(batch).await?;

                let votes_cast = self.live_votes(&session).await?.len();
                Ok((vote, votes_cast, session.players.len()))
            })
            .await?;

        tracing::debug!(
            session_id,
            voter_id,
            target = %vote.target,
            votes_cast,
            expected,
            "Vote cast"
        );

        let resolution = if votes_cast >= expected {
            match self.resolve_round(session_id, vote.token()).await {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    // Another caller got there first or the round moved on
                    tracing::debug!(session_id, "All-voted resolution skipped: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(VoteReceipt {
            vote,
            votes_cast,
            expected,
            resolution,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn vote(voter: &str, target: &str) -> Vote {
        Vote {
            voter_id: voter.to_string(),
            target: SlotKey::new(target, 0),
            level: 1,
            round: 1,
            cast_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_tally_counts_targets() {
        let votes = vec![vote("a", "p1"), vote("b", "p1"), vote("c", "p2")];
        let counts = tally(&votes);
        assert_eq!(counts.get(&SlotKey::new("p1", 0)), Some(&2));
        assert_eq!(counts.get(&SlotKey::new("p2", 0)), Some(&1));
    }

    #[test]
    fn test_pick_winner_clear_majority() {
        let votes = vec![vote("a", "p3"), vote("b", "p3"), vote("c", "p1")];
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..50 {
            assert_eq!(
                pick_winner(&tally(&votes), &mut rng),
                Some(SlotKey::new("p3", 0))
            );
        }
        assert_eq!(pick_winner(&BTreeMap::new(), &mut rng), None);
    }

    #[test]
    fn test_tie_break_is_fair() {
        let votes = vec![
            vote("a", "p1"),
            vote("b", "p1"),
            vote("c", "p2"),
            vote("d", "p2"),
            vote("e", "p3"),
        ];
        let counts = tally(&votes);

        let trials = 10_000;
        let mut p1_wins = 0;
        for seed in 0..trials {
            let mut rng = StdRng::seed_from_u64(seed);
            match pick_winner(&counts, &mut rng) {
                Some(key) if key.player_id == "p1" => p1_wins += 1,
                Some(key) => assert_eq!(key.player_id, "p2", "p3 is never tied at max"),
                None => panic!("tally is not empty"),
            }
        }

        let share = p1_wins as f64 / trials as f64;
        assert!((0.45..=0.55).contains(&share), "p1 share was {}", share);
    }

    #[tokio::test]
    async fn test_cast_vote_requires_voting_phase() {
        let (state, _clock) = state_with_clock();
        let session = started_game(&state, 2).await;

        let err = state.cast_vote(&session.id, "p1", "p2", 0).await.unwrap_err();
        assert!(matches!(err, GameError::InvalidPhase { .. }));
    }

    #[tokio::test]
    async fn test_cast_vote_validates_target_and_voter() {
        let (state, _clock) = state_with_clock();
        let session = started_game(&state, 3).await;
        to_voting(&state, &session.id).await;

        let err = state.cast_vote(&session.id, "p1", "p2", 1).await.unwrap_err();
        assert!(matches!(err, GameError::MissingTarget(_)));

        let err = state
            .cast_vote(&session.id, "lurker", "p2", 0)
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::NotAPlayer(_)));
    }

    #[tokio::test]
    async fn test_vote_can_be_changed_before_resolution() {
        let (state, _clock) = state_with_clock();
        let session = started_game(&state, 3).await;
        to_voting(&state, &session.id).await;

        let first = state.cast_vote(&session.id, "p1", "p2", 0).await.unwrap();
        assert_eq!(first.votes_cast, 1);
        assert_eq!(first.expected, 3);

        let second = state.cast_vote(&session.id, "p1", "p3", 0).await.unwrap();
        assert_eq!(second.votes_cast, 1, "replacing a vote does not add one");
        assert_eq!(second.vote.target, SlotKey::new("p3", 0));
        assert!(second.resolution.is_none());
    }

    #[tokio::test]
    async fn test_last_vote_resolves_round() {
        let (state, _clock) = state_with_clock();
        let session = started_game(&state, 3).await;
        rig_numbers(&state, &session.id, &[&[3], &[50], &[88]]).await;
        to_voting(&state, &session.id).await;

        state.cast_vote(&session.id, "p1", "p1", 0).await.unwrap();
        state.cast_vote(&session.id, "p2", "p1", 0).await.unwrap();
        let receipt = state.cast_vote(&session.id, "p3", "p1", 0).await.unwrap();

        let resolution = receipt.resolution.expect("round should resolve");
        assert!(!resolution.already_resolved);
        assert!(resolution.outcome.is_correct);

        let err = state.cast_vote(&session.id, "p1", "p2", 0).await.unwrap_err();
        assert!(matches!(err, GameError::InvalidPhase { .. }));
    }
}
