use super::AppState;
use crate::error::{GameError, GameResult};
use crate::store::{keys, WriteBatch};
use crate::types::*;
use rand::Rng;

/// Deal `level` distinct numbers to each of `players` players, drawn without
/// replacement from [NUMBER_MIN, NUMBER_MAX]. Fails before drawing anything
/// when the pool is too small.
pub fn allocate_numbers<R: Rng + ?Sized>(
    rng: &mut R,
    players: usize,
    level: u8,
) -> GameResult<Vec<Vec<u8>>> {
    if players == 0 {
        return Err(GameError::Validation("a level needs at least one player".to_string()));
    }
    if level == 0 || level > TOTAL_LEVELS {
        return Err(GameError::Validation(format!("level {} is out of range", level)));
    }

    let capacity = usize::from(NUMBER_MAX - NUMBER_MIN) + 1;
    let per_player = usize::from(level);
    let needed = players * per_player;
    if needed > capacity {
        return Err(GameError::Capacity { needed, capacity });
    }

    let drawn: Vec<u8> = rand::seq::index::sample(rng, capacity, needed)
        .into_iter()
        .map(|i| NUMBER_MIN + i as u8)
        .collect();

    Ok(drawn.chunks(per_player).map(|c| c.to_vec()).collect())
}

impl AppState {
    /// Initialise `level` for `players`, carrying `hearts` forward.
    ///
    /// Picks the question and deals the numbers up front, then replaces all
    /// slots, votes and ready marks of the session in one commit. Nothing is
    /// written if either step fails.
    pub async fn start_level(
        &self,
        session_id: &str,
        players: &[SessionPlayer],
        level: u8,
        hearts: u8,
    ) -> GameResult<Session> {
        if hearts == 0 || hearts > MAX_HEARTS {
            return Err(GameError::Validation(format!("hearts {} out of range", hearts)));
        }

        let numbers = {
            let mut rng = rand::rng();
            allocate_numbers(&mut rng, players.len(), level)?
        };
        let question = self.questions.pick_random().await?;

        let what = keys::session(session_id);
        let numbers = &numbers;
        let question = &question;
        self.retry_on_conflict(&what, move || async move {
            let (session, version) = self.load_session(session_id).await?;
            self.commit_level(&session, version, players, level, hearts, question, numbers)
                .await
        })
        .await
    }

    /// Single attempt at replacing the level. The session must be exactly one
    /// level behind `level` and in a phase that may move to writing.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn commit_level(
        &self,
        session: &Session,
        version: u64,
        players: &[SessionPlayer],
        level: u8,
        hearts: u8,
        question: &Question,
        numbers: &[Vec<u8>],
    ) -> GameResult<Session> {
        if session.phase.is_terminal() {
            return Err(GameError::GameFinished);
        }
        if level != session.level + 1 {
            return Err(GameError::Validation(format!(
                "cannot start level {} from level {}",
                level, session.level
            )));
        }

        let mut next = session.clone();
        Self::transition(&mut next, Phase::Writing)?;

        let now = self.clock.now();
        let mut batch = WriteBatch::new();
        batch.expect_version(keys::session(&session.id), version);

        for prefix in [
            keys::slots(&session.id),
            keys::votes(&session.id),
            keys::ready_marks(&session.id),
        ] {
            for (key, _) in self.store.list(&prefix).await? {
                batch.delete(key);
            }
        }

        for (player, dealt) in players.iter().zip(numbers) {
            for (index, number) in dealt.iter().enumerate() {
                let slot = AnswerSlot {
                    player_id: player.id.clone(),
                    display_name: player.display_name.clone(),
                    slot_index: index as u8,
                    level,
                    number: *number,
                    hint: String::new(),
                    submitted_at: None,
                    hint_version: 0,
                    is_revealed: false,
                    is_correct: None,
                };
                batch.put_record(keys::slot(&session.id, &player.id, slot.slot_index), &slot)?;
            }
        }

        next.players = players.to_vec();
        next.level = level;
        next.hearts = hearts;
        next.round = 1;
        next.total_rounds = (players.len() * usize::from(level)) as u32;
        next.question = Some(question.clone());
        next.phase_deadline = Some(now + self.rules.level_deadline());
        next.revealed_numbers.clear();
        next.status = GameStatus::Playing;
        next.last_resolution = None;
        next.updated_at = now;
        batch.put_record(keys::session(&session.id), &next)?;

        self.store.commit(batch).await?;

        tracing::info!(
            session_id = %session.id,
            level,
            hearts,
            players = players.len(),
            question = %question.id,
            "Level started"
        );
        Ok(next)
    }
}
