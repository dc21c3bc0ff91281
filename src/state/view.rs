use super::AppState;
use crate::error::GameResult;
use crate::store::keys;
use crate::types::*;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A slot as one particular viewer may see it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotView {
    pub player_id: PlayerId,
    pub display_name: String,
    pub slot_index: u8,
    /// Hidden unless revealed or owned by the viewer
    pub number: Option<u8>,
    /// Drafts are only visible to their author
    pub hint: Option<String>,
    pub submitted: bool,
    pub hint_version: u32,
    pub is_revealed: bool,
    pub is_correct: Option<bool>,
}

impl SlotView {
    fn for_viewer(slot: &AnswerSlot, viewer: Option<&str>) -> Self {
        let owned = viewer == Some(slot.player_id.as_str());
        Self {
            player_id: slot.player_id.clone(),
            display_name: slot.display_name.clone(),
            slot_index: slot.slot_index,
            number: (slot.is_revealed || owned).then_some(slot.number),
            hint: (slot.is_submitted() || owned)
                .then(|| slot.hint.clone())
                .filter(|h| !h.is_empty()),
            submitted: slot.is_submitted(),
            hint_version: slot.hint_version,
            is_revealed: slot.is_revealed,
            is_correct: slot.is_correct,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session: Session,
    pub slots: Vec<SlotView>,
    pub votes_cast: usize,
    pub expected_votes: usize,
    /// The viewer's own vote this round
    pub my_vote: Option<SlotKey>,
    /// Players who acknowledged the level-complete screen
    pub ready: Vec<PlayerId>,
    /// Lets clients correct for clock skew when counting down deadlines
    pub server_now: DateTime<Utc>,
}

impl AppState {
    pub async fn session_view(&self, session_id: &str, viewer: Option<&str>) -> GameResult<SessionSnapshot> {
        let session = self.get_session(session_id).await?;

        let slots = self
            .level_slots(&session)
            .await?
            .iter()
            .map(|(slot, _)| SlotView::for_viewer(slot, viewer))
            .collect();

        let votes = self.live_votes(&session).await?;
        let my_vote = viewer.and_then(|v| {
            votes
                .iter()
                .find(|vote| vote.voter_id == v)
                .map(|vote| vote.target.clone())
        });

        let ready = self
            .load_all::<ReadyMark>(&keys::ready_marks(session_id))
            .await?
            .into_iter()
            .filter(|(_, mark, _)| mark.level == session.level)
            .map(|(_, mark, _)| mark.player_id)
            .collect();

        Ok(SessionSnapshot {
            votes_cast: votes.len(),
            expected_votes: session.players.len(),
            my_vote,
            ready,
            server_now: self.clock.now(),
            slots,
            session,
        })
    }
}
