use super::AppState;
use crate::error::{GameError, GameResult};
use crate::store::{keys, WriteBatch};
use crate::types::*;
use serde_json::{json, Map, Value};

fn hint_fields(hint: Option<&str>, submitted_at: Value, hint_version: u32) -> Map<String, Value> {
    let mut fields = Map::new();
    if let Some(hint) = hint {
        fields.insert("hint".to_string(), json!(hint));
    }
    fields.insert("submitted_at".to_string(), submitted_at);
    fields.insert("hint_version".to_string(), json!(hint_version));
    fields
}

impl AppState {
    /// Load the caller's slot for a hint edit, checking phase and ownership
    async fn editable_slot(
        &self,
        session_id: &str,
        player_id: &str,
        slot_index: u8,
        op: &'static str,
    ) -> GameResult<(AnswerSlot, u64)> {
        let session = self.get_session(session_id).await?;
        Self::require_phase(&session, op, &[Phase::Writing, Phase::Voting])?;
        if !session.has_player(player_id) {
            return Err(GameError::NotAPlayer(player_id.to_string()));
        }

        let key = keys::slot(session_id, player_id, slot_index);
        let (slot, version) = self
            .load::<AnswerSlot>(&key)
            .await?
            .filter(|(slot, _)| slot.level == session.level)
            .ok_or_else(|| GameError::MissingTarget(format!("slot {}", key)))?;
        if slot.is_revealed {
            return Err(GameError::AlreadyRevealed(slot.key().to_string()));
        }
        Ok((slot, version))
    }

    /// Write or overwrite the hint on one of the caller's slots.
    ///
    /// Text, submission time and hint version land in a single merge so a
    /// reader never sees a new hint with an old version.
    pub async fn submit_hint(
        &self,
        session_id: &str,
        player_id: &str,
        slot_index: u8,
        text: &str,
    ) -> GameResult<AnswerSlot> {
        let text = text.trim();
        if text.is_empty() {
            return Err(GameError::Validation("hint cannot be empty".to_string()));
        }
        let max = self.rules.max_hint_chars;
        if text.chars().count() > max {
            return Err(GameError::Validation(format!(
                "hint is longer than {} characters",
                max
            )));
        }

        let key = keys::slot(session_id, player_id, slot_index);
        let slot_key = &key;
        let slot = self
            .retry_on_conflict(&key, move || async move {
                let (mut slot, version) = self
                    .editable_slot(session_id, player_id, slot_index, "submit hints")
                    .await?;

                let now = self.clock.now();
                slot.hint = text.to_string();
                slot.submitted_at = Some(now);
                slot.hint_version += 1;

                let mut batch = WriteBatch::new();
                batch.expect_version(slot_key.clone(), version).merge(
                    slot_key.clone(),
                    hint_fields(Some(text), json!(now), slot.hint_version),
                );
                self.store.commit(batch).await?;
                Ok(slot)
            })
            .await?;

        tracing::debug!(
            session_id,
            player_id,
            slot_index,
            hint_version = slot.hint_version,
            "Hint submitted"
        );
        Ok(slot)
    }

    /// Take a hint back to editing. The text is kept as a draft.
    pub async fn retract_hint(
        &self,
        session_id: &str,
        player_id: &str,
        slot_index: u8,
    ) -> GameResult<AnswerSlot> {
        let key = keys::slot(session_id, player_id, slot_index);
        let slot_key = &key;
        self.retry_on_conflict(&key, move || async move {
            let (mut slot, version) = self
                .editable_slot(session_id, player_id, slot_index, "retract hints")
                .await?;
            if !slot.is_submitted() {
                return Ok(slot);
            }

            slot.submitted_at = None;
            slot.hint_version += 1;

            let mut batch = WriteBatch::new();
            batch
                .expect_version(slot_key.clone(), version)
                .merge(slot_key.clone(), hint_fields(None, Value::Null, slot.hint_version));
            self.store.commit(batch).await?;
            Ok(slot)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::*;

    #[tokio::test]
    async fn test_submit_hint_is_atomic() {
        let (state, _clock) = state_with_clock();
        let session = started_game(&state, 2).await;

        let slot = state
            .submit_hint(&session.id, "p1", 0, "  lukewarm tea  ")
            .await
            .unwrap();
        assert_eq!(slot.hint, "lukewarm tea");
        assert_eq!(slot.hint_version, 1);
        assert!(slot.is_submitted());

        let slot = state
            .submit_hint(&session.id, "p1", 0, "hot tea")
            .await
            .unwrap();
        assert_eq!(slot.hint_version, 2);

        let stored = state
            .get_slots(&session.id)
            .await
            .unwrap()
            .into_iter()
            .find(|s| s.player_id == "p1")
            .unwrap();
        assert_eq!(stored.hint, "hot tea");
        assert_eq!(stored.hint_version, 2);
        assert_eq!(stored.submitted_at, slot.submitted_at);
    }

    #[tokio::test]
    async fn test_hint_validation() {
        let (state, _clock) = state_with_clock();
        let session = started_game(&state, 2).await;

        let err = state.submit_hint(&session.id, "p1", 0, "   ").await.unwrap_err();
        assert!(matches!(err, GameError::Validation(_)));

        let long = "x".repeat(state.rules.max_hint_chars + 1);
        let err = state.submit_hint(&session.id, "p1", 0, &long).await.unwrap_err();
        assert!(matches!(err, GameError::Validation(_)));

        // Level 1 has a single slot per player
        let err = state.submit_hint(&session.id, "p1", 1, "hint").await.unwrap_err();
        assert!(matches!(err, GameError::MissingTarget(_)));

        let err = state
            .submit_hint(&session.id, "stranger", 0, "hint")
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::NotAPlayer(_)));
    }

    #[tokio::test]
    async fn test_retract_hint() {
        let (state, _clock) = state_with_clock();
        let session = started_game(&state, 2).await;

        state.submit_hint(&session.id, "p2", 0, "draft").await.unwrap();
        let slot = state.retract_hint(&session.id, "p2", 0).await.unwrap();
        assert!(!slot.is_submitted());
        assert_eq!(slot.hint, "draft");
        assert_eq!(slot.hint_version, 2);

        // Nothing to retract twice
        let again = state.retract_hint(&session.id, "p2", 0).await.unwrap();
        assert_eq!(again.hint_version, 2);
    }

    #[tokio::test]
    async fn test_hints_editable_while_voting() {
        let (state, _clock) = state_with_clock();
        let session = started_game(&state, 2).await;
        to_voting(&state, &session.id).await;

        let slot = state
            .submit_hint(&session.id, "p1", 0, "changed my mind")
            .await
            .unwrap();
        assert_eq!(slot.hint_version, 2);
    }
}
