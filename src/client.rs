//! Client-side safeguards for auto-triggered actions.
//!
//! Every connected client watches the same session and may try to trigger the
//! same transition. The server already collapses duplicates, but a well
//! behaved client should not fire at all when it is merely catching up on
//! state it inherited. [`ClientGuard`] decides when a client should act.

use crate::clock::{time_left, Clock};
use crate::state::{SessionSnapshot, SlotView};
use crate::types::{Phase, RoundToken};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What a client saw in one session update
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub phase: Phase,
    pub token: RoundToken,
    pub votes_cast: usize,
    pub expected_votes: usize,
    pub deadline: Option<DateTime<Utc>>,
}

impl From<&SessionSnapshot> for Observation {
    fn from(view: &SessionSnapshot) -> Self {
        Self {
            phase: view.session.phase,
            token: view.session.token(),
            votes_cast: view.votes_cast,
            expected_votes: view.expected_votes,
            deadline: view.session.phase_deadline,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "token", rename_all = "snake_case")]
pub enum AutoAction {
    ResolveRound(RoundToken),
    AdvanceReveal(RoundToken),
}

pub struct ClientGuard {
    clock: Arc<dyn Clock>,
    grace: TimeDelta,
    mounted_at: DateTime<Utc>,
    last: Option<Observation>,
    /// Highest vote count seen for the current round
    seen_votes: Option<(RoundToken, usize)>,
    fired_resolve: Option<RoundToken>,
    fired_advance: Option<RoundToken>,
}

impl ClientGuard {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_grace(clock, TimeDelta::seconds(3))
    }

    pub fn with_grace(clock: Arc<dyn Clock>, grace: TimeDelta) -> Self {
        let mounted_at = clock.now();
        Self {
            clock,
            grace,
            mounted_at,
            last: None,
            seen_votes: None,
            fired_resolve: None,
            fired_advance: None,
        }
    }

    /// Start a new grace window, e.g. after a reconnect
    pub fn remount(&mut self) {
        self.mounted_at = self.clock.now();
        self.seen_votes = None;
    }

    fn in_grace(&self, now: DateTime<Utc>) -> bool {
        now < self.mounted_at + self.grace
    }

    /// Feed a fresh observation, returning the action to take, if any
    pub fn observe(&mut self, obs: Observation) -> Option<AutoAction> {
        let previous = match self.seen_votes {
            Some((token, count)) if token == obs.token => Some(count),
            _ => None,
        };
        let increased = previous.is_some_and(|count| obs.votes_cast > count);
        let high = previous.unwrap_or(0).max(obs.votes_cast);
        self.seen_votes = Some((obs.token, high));
        self.last = Some(obs);
        self.evaluate(increased)
    }

    /// Re-check timers against the last observation
    pub fn poll(&mut self) -> Option<AutoAction> {
        self.evaluate(false)
    }

    fn evaluate(&mut self, votes_increased: bool) -> Option<AutoAction> {
        let now = self.clock.now();
        if self.in_grace(now) {
            return None;
        }
        let obs = self.last.as_ref()?;
        let expired = obs.deadline.is_some_and(|deadline| deadline <= now);

        match obs.phase {
            Phase::Voting => {
                if self.fired_resolve == Some(obs.token) {
                    return None;
                }
                let all_voted = obs.expected_votes > 0 && obs.votes_cast >= obs.expected_votes;
                let fire = (all_voted && votes_increased) || (expired && obs.votes_cast > 0);
                if fire {
                    self.fired_resolve = Some(obs.token);
                    return Some(AutoAction::ResolveRound(obs.token));
                }
                None
            }
            Phase::Reveal => {
                if expired && self.fired_advance != Some(obs.token) {
                    self.fired_advance = Some(obs.token);
                    return Some(AutoAction::AdvanceReveal(obs.token));
                }
                None
            }
            _ => None,
        }
    }

    /// Time left on the current phase, derived from the stored deadline
    pub fn time_left(&self) -> Option<TimeDelta> {
        let deadline = self.last.as_ref()?.deadline?;
        Some(time_left(deadline, self.clock.now()))
    }
}

/// Whether a slot's hint is safe to copy into an edit box. Drafts and
/// versions older than one the client already wrote are skipped.
pub fn hints_consistent(slot: &SlotView, known_version: Option<u32>) -> bool {
    let has_text = slot.hint.as_deref().is_some_and(|h| !h.is_empty());
    has_text && slot.submitted && known_version.map_or(true, |v| slot.hint_version >= v)
}
