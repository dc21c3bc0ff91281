use super::AppState;
use crate::error::{GameError, GameResult};
use crate::store::{keys, WriteBatch};
use crate::types::*;
use rand::Rng;

const ROOM_CODE_ATTEMPTS: usize = 20;

/// Random 6-digit room code, zero padded
fn generate_room_code() -> RoomCode {
    let n: u32 = rand::rng().random_range(0..1_000_000);
    format!("{:06}", n)
}

fn display_name_or_petname(name: Option<&str>) -> String {
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(n) => n.chars().take(32).collect(),
        None => petname::petname(2, " ").unwrap_or_else(|| "Player".to_string()),
    }
}

impl AppState {
    pub async fn get_room(&self, code: &str) -> GameResult<Room> {
        Ok(self.load_room(code).await?.0)
    }

    pub(crate) async fn load_room(&self, code: &str) -> GameResult<(Room, u64)> {
        self.load(&keys::room(code))
            .await?
            .ok_or_else(|| GameError::RoomNotFound(code.to_string()))
    }

    /// Read-modify-write a room under its version, retrying on conflict
    async fn update_room<F>(&self, code: &str, mut mutate: F) -> GameResult<Option<Room>>
    where
        F: FnMut(&mut Room) -> GameResult<RoomChange>,
    {
        let key = keys::room(code);
        let mut tries = 0;
        loop {
            let (mut room, version) = self.load_room(code).await?;
            let change = mutate(&mut room)?;

            let mut batch = WriteBatch::new();
            batch.expect_version(key.clone(), version);
            match change {
                RoomChange::Unchanged => return Ok(Some(room)),
                RoomChange::Updated => {
                    batch.put_record(key.clone(), &room)?;
                }
                RoomChange::Deleted => {
                    batch.delete(key.clone());
                }
            }

            match self.store.commit(batch).await {
                Ok(()) => {
                    return Ok(match change {
                        RoomChange::Deleted => None,
                        _ => Some(room),
                    })
                }
                Err(crate::store::StoreError::Conflict(_)) if tries < self.rules.cas_retries => {
                    tries += 1;
                }
                Err(crate::store::StoreError::Conflict(_)) => {
                    return Err(GameError::Conflict(key));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Create a room hosted by `host_id` under a fresh 6-digit code
    pub async fn create_room(&self, host_id: &str, display_name: Option<&str>) -> GameResult<Room> {
        let now = self.clock.now();
        let host = RoomPlayer {
            id: host_id.to_string(),
            display_name: display_name_or_petname(display_name),
            ready: false,
            joined_at: now,
        };

        for _ in 0..ROOM_CODE_ATTEMPTS {
            let room = Room {
                code: generate_room_code(),
                host_id: host_id.to_string(),
                players: vec![host.clone()],
                status: RoomStatus::Waiting,
                session_id: None,
                created_at: now,
            };

            let key = keys::room(&room.code);
            let mut batch = WriteBatch::new();
            batch.expect_absent(key.clone()).put_record(key, &room)?;
            match self.store.commit(batch).await {
                Ok(()) => {
                    tracing::info!(code = %room.code, host = %host_id, "Room created");
                    return Ok(room);
                }
                Err(crate::store::StoreError::Conflict(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(GameError::Conflict("room code space".to_string()))
    }

    /// Join a waiting room. Joining twice just refreshes the display name.
    pub async fn join_room(
        &self,
        code: &str,
        player_id: &str,
        display_name: Option<&str>,
    ) -> GameResult<Room> {
        let now = self.clock.now();
        let max_players = self.rules.max_players;
        let room = self
            .update_room(code, |room| {
                if let Some(existing) = room.players.iter_mut().find(|p| p.id == player_id) {
                    if let Some(name) = display_name.map(str::trim).filter(|n| !n.is_empty()) {
                        existing.display_name = name.chars().take(32).collect();
                        return Ok(RoomChange::Updated);
                    }
                    return Ok(RoomChange::Unchanged);
                }
                if room.status != RoomStatus::Waiting {
                    return Err(GameError::RoomClosed(room.code.clone()));
                }
                if room.players.len() >= max_players {
                    return Err(GameError::RoomFull(room.code.clone()));
                }
                room.players.push(RoomPlayer {
                    id: player_id.to_string(),
                    display_name: display_name_or_petname(display_name),
                    ready: false,
                    joined_at: now,
                });
                Ok(RoomChange::Updated)
            })
            .await?
            .ok_or_else(|| GameError::RoomNotFound(code.to_string()))?;

        tracing::info!(code, player_id, players = room.players.len(), "Player joined room");
        Ok(room)
    }

    pub async fn set_ready(&self, code: &str, player_id: &str, ready: bool) -> GameResult<Room> {
        self.update_room(code, |room| {
            if room.status != RoomStatus::Waiting {
                return Err(GameError::RoomClosed(room.code.clone()));
            }
            let player = room
                .players
                .iter_mut()
                .find(|p| p.id == player_id)
                .ok_or_else(|| GameError::NotAPlayer(player_id.to_string()))?;
            if player.ready == ready {
                return Ok(RoomChange::Unchanged);
            }
            player.ready = ready;
            Ok(RoomChange::Updated)
        })
        .await?
        .ok_or_else(|| GameError::RoomNotFound(code.to_string()))
    }

    /// Leave a room. The host role passes to the earliest remaining joiner;
    /// the last player out deletes the room. Returns the room if it survives.
    pub async fn leave_room(&self, code: &str, player_id: &str) -> GameResult<Option<Room>> {
        let room = self
            .update_room(code, |room| {
                let before = room.players.len();
                room.players.retain(|p| p.id != player_id);
                if room.players.len() == before {
                    return Ok(RoomChange::Unchanged);
                }
                if room.players.is_empty() {
                    return Ok(RoomChange::Deleted);
                }
                if room.host_id == player_id {
                    // players stay in join order
                    room.host_id = room.players[0].id.clone();
                }
                Ok(RoomChange::Updated)
            })
            .await?;

        match &room {
            Some(r) => tracing::info!(code, player_id, host = %r.host_id, "Player left room"),
            None => tracing::info!(code, "Last player left, room removed"),
        }
        Ok(room)
    }

    pub async fn kick_player(&self, code: &str, host_id: &str, target_id: &str) -> GameResult<Room> {
        let room = self
            .update_room(code, |room| {
                if !room.is_host(host_id) {
                    return Err(GameError::NotHost("kick players"));
                }
                if target_id == host_id {
                    return Err(GameError::Validation("the host cannot kick themselves".to_string()));
                }
                if room.status == RoomStatus::Playing {
                    return Err(GameError::RoomClosed(room.code.clone()));
                }
                let before = room.players.len();
                room.players.retain(|p| p.id != target_id);
                if room.players.len() == before {
                    return Err(GameError::NotAPlayer(target_id.to_string()));
                }
                Ok(RoomChange::Updated)
            })
            .await?
            .ok_or_else(|| GameError::RoomNotFound(code.to_string()))?;

        tracing::info!(code, target_id, "Player kicked");
        Ok(room)
    }

    pub async fn transfer_host(&self, code: &str, host_id: &str, new_host_id: &str) -> GameResult<Room> {
        self.update_room(code, |room| {
            if !room.is_host(host_id) {
                return Err(GameError::NotHost("transfer the host role"));
            }
            if room.player(new_host_id).is_none() {
                return Err(GameError::NotAPlayer(new_host_id.to_string()));
            }
            room.host_id = new_host_id.to_string();
            Ok(RoomChange::Updated)
        })
        .await?
        .ok_or_else(|| GameError::RoomNotFound(code.to_string()))
    }

    /// Start a game from the lobby: create the session and deal level 1.
    ///
    /// The room is flipped to `playing` in the same commit that creates the
    /// session, so two hosts clicking start can't create two sessions. If
    /// level 1 cannot be dealt, the room goes back to waiting.
    pub async fn start_game(&self, code: &str, host_id: &str) -> GameResult<Session> {
        let (room, room_version) = self.load_room(code).await?;
        if !room.is_host(host_id) {
            return Err(GameError::NotHost("start the game"));
        }
        if room.status != RoomStatus::Waiting {
            return Err(GameError::RoomClosed(room.code.clone()));
        }
        if room.players.len() < self.rules.min_players {
            return Err(GameError::NotEnoughPlayers(self.rules.min_players));
        }
        if room.players.iter().any(|p| p.id != room.host_id && !p.ready) {
            return Err(GameError::NotReady);
        }

        let now = self.clock.now();
        let players: Vec<SessionPlayer> = room.players.iter().map(SessionPlayer::from).collect();
        let session = Session {
            id: ulid::Ulid::new().to_string(),
            room_code: room.code.clone(),
            players: players.clone(),
            level: 0,
            total_levels: TOTAL_LEVELS,
            hearts: MAX_HEARTS,
            round: 0,
            total_rounds: 0,
            question: None,
            phase: Phase::Waiting,
            phase_deadline: None,
            revealed_numbers: Vec::new(),
            status: GameStatus::Playing,
            last_resolution: None,
            created_at: now,
            updated_at: now,
        };

        let mut playing = room.clone();
        playing.status = RoomStatus::Playing;
        playing.session_id = Some(session.id.clone());

        let mut batch = WriteBatch::new();
        batch
            .expect_version(keys::room(code), room_version)
            .expect_absent(keys::session(&session.id))
            .put_record(keys::session(&session.id), &session)?
            .put_record(keys::room(code), &playing)?;
        self.store.commit(batch).await.map_err(|e| match e {
            crate::store::StoreError::Conflict(_) => GameError::Conflict(keys::room(code)),
            other => other.into(),
        })?;

        tracing::info!(code, session_id = %session.id, players = players.len(), "Game started");

        match self.start_level(&session.id, &players, 1, MAX_HEARTS).await {
            Ok(session) => Ok(session),
            Err(e) => {
                tracing::error!(code, session_id = %session.id, "Failed to deal level 1: {}", e);
                let rollback = self
                    .update_room(code, |room| {
                        room.status = RoomStatus::Waiting;
                        room.session_id = None;
                        Ok(RoomChange::Updated)
                    })
                    .await;
                if let Err(rollback_err) = rollback {
                    tracing::error!(code, "Failed to reopen room: {}", rollback_err);
                }
                if let Err(cleanup_err) = self.store.delete(&keys::session(&session.id)).await {
                    tracing::error!(session_id = %session.id, "Failed to drop session: {}", cleanup_err);
                }
                Err(e)
            }
        }
    }

    /// Mark the room's game as over so the lobby shows the result screen.
    /// Included in the commit that finishes the session.
    pub(crate) async fn finish_room_in(
        &self,
        batch: &mut WriteBatch,
        code: &str,
    ) -> GameResult<()> {
        if let Some((mut room, version)) = self.load::<Room>(&keys::room(code)).await? {
            room.status = RoomStatus::Finished;
            batch.expect_version(keys::room(code), version);
            batch.put_record(keys::room(code), &room)?;
        }
        Ok(())
    }

    /// Back to the lobby after a finished game (host only)
    pub async fn reset_room(&self, code: &str, host_id: &str) -> GameResult<Room> {
        self.update_room(code, |room| {
            if !room.is_host(host_id) {
                return Err(GameError::NotHost("reset the room"));
            }
            if room.status != RoomStatus::Finished {
                return Err(GameError::RoomClosed(room.code.clone()));
            }
            room.status = RoomStatus::Waiting;
            room.session_id = None;
            for p in room.players.iter_mut() {
                p.ready = false;
            }
            Ok(RoomChange::Updated)
        })
        .await?
        .ok_or_else(|| GameError::RoomNotFound(code.to_string()))
    }
}

#[derive(Clone, Copy)]
enum RoomChange {
    Unchanged,
    Updated,
    Deleted,
}
