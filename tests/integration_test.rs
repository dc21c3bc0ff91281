use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    middleware,
    routing::{get, post},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::TimeDelta;
use ito::api;
use ito::auth::{self, AuthConfig};
use ito::client::{AutoAction, ClientGuard, Observation};
use ito::clock::ManualClock;
use ito::config::GameRules;
use ito::protocol::{ClientMessage, ServerMessage};
use ito::questions::QuestionPool;
use ito::state::{AppState, SessionSnapshot};
use ito::store::MemoryStore;
use ito::types::{AnswerSlot, GameStatus, Phase, RoomStatus, RoundOutcome};
use ito::ws::handlers::handle_message;
use ito::ws::Connection;
use std::sync::Arc;
use tower::ServiceExt;

fn manual_state() -> (Arc<AppState>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let state = Arc::new(AppState::new(
        Arc::new(MemoryStore::new()),
        Arc::new(QuestionPool::builtin()),
        clock.clone(),
        GameRules::default(),
    ));
    (state, clock)
}

async fn send(state: &Arc<AppState>, conn: &mut Connection, msg: ClientMessage) -> ServerMessage {
    handle_message(msg, conn, state)
        .await
        .expect("every client message gets a reply")
}

fn expect_snapshot(msg: ServerMessage) -> SessionSnapshot {
    match msg {
        ServerMessage::Session { snapshot } => *snapshot,
        other => panic!("Expected Session message, got {:?}", other),
    }
}

fn expect_resolved(msg: ServerMessage) -> (RoundOutcome, bool) {
    match msg {
        ServerMessage::RoundResolved {
            outcome,
            already_resolved,
        } => (outcome, already_resolved),
        other => panic!("Expected RoundResolved message, got {:?}", other),
    }
}

/// Host and guest in a started game, both following the session
async fn started_pair(state: &Arc<AppState>) -> (Connection, Connection, String) {
    let mut host = Connection::new("host");
    let mut guest = Connection::new("guest");

    let code = match send(
        state,
        &mut host,
        ClientMessage::CreateRoom {
            display_name: Some("Alice".into()),
        },
    )
    .await
    {
        ServerMessage::Room { room } => {
            assert_eq!(room.code.len(), 6);
            assert!(room.is_host("host"));
            room.code
        }
        other => panic!("Expected Room message, got {:?}", other),
    };

    match send(
        state,
        &mut guest,
        ClientMessage::JoinRoom {
            code: code.clone(),
            display_name: Some("Bob".into()),
        },
    )
    .await
    {
        ServerMessage::Room { room } => assert_eq!(room.players.len(), 2),
        other => panic!("Expected Room message, got {:?}", other),
    }

    // Guest not ready yet
    match send(state, &mut host, ClientMessage::StartGame).await {
        ServerMessage::Error { code, .. } => assert_eq!(code, "NOT_READY"),
        other => panic!("Expected NOT_READY, got {:?}", other),
    }

    send(state, &mut guest, ClientMessage::SetReady { ready: true }).await;
    let snapshot = expect_snapshot(send(state, &mut host, ClientMessage::StartGame).await);
    assert_eq!(snapshot.session.phase, Phase::Writing);
    assert_eq!(snapshot.session.level, 1);
    assert_eq!(snapshot.session.hearts, 3);
    let session_id = snapshot.session.id.clone();

    let snapshot = expect_snapshot(
        send(
            state,
            &mut guest,
            ClientMessage::WatchSession {
                session_id: session_id.clone(),
            },
        )
        .await,
    );
    assert_eq!(guest.room.as_deref(), Some(code.as_str()));
    assert_eq!(snapshot.slots.len(), 2);

    (host, guest, session_id)
}

fn owner<'a>(slot: &AnswerSlot, host: &'a mut Connection, guest: &'a mut Connection) -> &'a mut Connection {
    if slot.player_id == host.player_id {
        host
    } else {
        guest
    }
}

/// Every player writes a hint for each of their slots, then the host opens voting
async fn write_hints(state: &Arc<AppState>, host: &mut Connection, guest: &mut Connection, session_id: &str) {
    for slot in state.get_slots(session_id).await.unwrap() {
        let conn = owner(&slot, host, guest);
        match send(
            state,
            conn,
            ClientMessage::SubmitHint {
                slot_index: slot.slot_index,
                text: format!("hint {}", slot.number),
            },
        )
        .await
        {
            ServerMessage::HintAccepted { submitted, .. } => assert!(submitted),
            other => panic!("Expected HintAccepted, got {:?}", other),
        }
    }

    let snapshot = expect_snapshot(send(state, host, ClientMessage::OpenVoting).await);
    assert_eq!(snapshot.session.phase, Phase::Voting);
    assert!(snapshot.session.phase_deadline.is_some());
}

/// Both players vote for the lowest (or highest) unrevealed number
async fn vote_round(
    state: &Arc<AppState>,
    host: &mut Connection,
    guest: &mut Connection,
    session_id: &str,
    pick_highest: bool,
) -> RoundOutcome {
    let mut open: Vec<AnswerSlot> = state
        .get_slots(session_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|s| !s.is_revealed)
        .collect();
    open.sort_by_key(|s| s.number);
    let target = if pick_highest {
        open.last().unwrap().clone()
    } else {
        open.first().unwrap().clone()
    };

    let vote = |t: &AnswerSlot| ClientMessage::CastVote {
        target_player_id: t.player_id.clone(),
        target_slot_index: t.slot_index,
    };

    match send(state, host, vote(&target)).await {
        ServerMessage::VoteAck {
            votes_cast,
            expected,
            ..
        } => {
            assert_eq!(votes_cast, 1);
            assert_eq!(expected, 2);
        }
        other => panic!("Expected VoteAck, got {:?}", other),
    }

    // The completing vote resolves the round
    let (outcome, already_resolved) = expect_resolved(send(state, guest, vote(&target)).await);
    assert!(!already_resolved);
    assert_eq!(outcome.selected_number, target.number);
    outcome
}

#[tokio::test]
async fn test_full_game_won() {
    let (state, clock) = manual_state();
    let (mut host, mut guest, session_id) = started_pair(&state).await;

    for level in 1..=3u8 {
        write_hints(&state, &mut host, &mut guest, &session_id).await;

        loop {
            let outcome = vote_round(&state, &mut host, &mut guest, &session_id, false).await;
            assert!(outcome.is_correct);
            assert_eq!(outcome.hearts_lost, 0);

            let session = state.get_session(&session_id).await.unwrap();
            assert_eq!(session.phase, Phase::Reveal);

            clock.advance(state.rules.reveal_pause());
            let snapshot = expect_snapshot(
                send(
                    &state,
                    &mut host,
                    ClientMessage::AdvanceReveal {
                        token: outcome.token,
                    },
                )
                .await,
            );

            if outcome.level_cleared {
                assert!(snapshot.slots.iter().all(|s| s.is_revealed && s.number.is_some()));
                break;
            }
            assert_eq!(snapshot.session.phase, Phase::Voting);
            assert_eq!(snapshot.session.round, outcome.token.round + 1);
        }

        let session = state.get_session(&session_id).await.unwrap();
        if level < 3 {
            assert_eq!(session.phase, Phase::LevelComplete);

            match send(&state, &mut host, ClientMessage::MarkReady).await {
                ServerMessage::ReadyAck {
                    ready_count,
                    player_count,
                } => assert_eq!((ready_count, player_count), (1, 2)),
                other => panic!("Expected ReadyAck, got {:?}", other),
            }
            send(&state, &mut guest, ClientMessage::MarkReady).await;

            let session = state.get_session(&session_id).await.unwrap();
            assert_eq!(session.phase, Phase::Writing);
            assert_eq!(session.level, level + 1);
            assert_eq!(state.get_slots(&session_id).await.unwrap().len(), 2 * usize::from(level + 1));
        } else {
            assert_eq!(session.phase, Phase::Finished);
            assert_eq!(session.status, GameStatus::Won);
            assert_eq!(session.hearts, 3);
        }
    }

    let room = state.get_room(&session_id_room(&state, &session_id).await).await.unwrap();
    assert_eq!(room.status, RoomStatus::Finished);

    // Guest cannot reset, host can
    match send(&state, &mut guest, ClientMessage::ResetRoom).await {
        ServerMessage::Error { code, .. } => assert_eq!(code, "NOT_HOST"),
        other => panic!("Expected NOT_HOST, got {:?}", other),
    }
    match send(&state, &mut host, ClientMessage::ResetRoom).await {
        ServerMessage::Room { room } => {
            assert_eq!(room.status, RoomStatus::Waiting);
            assert_eq!(room.session_id, None);
        }
        other => panic!("Expected Room message, got {:?}", other),
    }
}

async fn session_id_room(state: &AppState, session_id: &str) -> String {
    state.get_session(session_id).await.unwrap().room_code
}

#[tokio::test]
async fn test_numbers_are_private_until_revealed() {
    let state = Arc::new(AppState::in_memory());
    let (_host, mut guest, session_id) = started_pair(&state).await;

    let snapshot = expect_snapshot(send(&state, &mut guest, ClientMessage::Sync).await);
    for slot in &snapshot.slots {
        if slot.player_id == "guest" {
            assert!(slot.number.is_some());
        } else {
            assert_eq!(slot.number, None);
            assert_eq!(slot.hint, None);
        }
    }

    // A spectator sees no numbers at all
    let mut spectator = Connection::new("spectator");
    let snapshot = expect_snapshot(
        send(
            &state,
            &mut spectator,
            ClientMessage::WatchSession {
                session_id: session_id.clone(),
            },
        )
        .await,
    );
    assert!(snapshot.slots.iter().all(|s| s.number.is_none()));
    assert_eq!(spectator.room, None);

    match send(
        &state,
        &mut spectator,
        ClientMessage::SubmitHint {
            slot_index: 0,
            text: "let me in".into(),
        },
    )
    .await
    {
        ServerMessage::Error { code, .. } => assert_eq!(code, "NOT_A_PLAYER"),
        other => panic!("Expected NOT_A_PLAYER, got {:?}", other),
    }
}

#[tokio::test]
async fn test_wrong_guess_costs_hearts_and_duplicates_collapse() {
    let (state, clock) = manual_state();
    let (mut host, mut guest, session_id) = started_pair(&state).await;
    write_hints(&state, &mut host, &mut guest, &session_id).await;

    // Voting for the higher number skips the lower one
    let outcome = vote_round(&state, &mut host, &mut guest, &session_id, true).await;
    assert!(!outcome.is_correct);
    assert_eq!(outcome.hearts_lost, 1);
    assert_eq!(outcome.new_hearts, 2);
    assert!(outcome.level_cleared);

    // Another client triggering the same round gets the recorded outcome
    let (again, already_resolved) = expect_resolved(
        send(
            &state,
            &mut guest,
            ClientMessage::ResolveRound {
                token: Some(outcome.token),
            },
        )
        .await,
    );
    assert!(already_resolved);
    assert_eq!(again, outcome);

    // The reveal stays on screen until the pause has run out
    let early = expect_snapshot(
        send(
            &state,
            &mut guest,
            ClientMessage::AdvanceReveal {
                token: outcome.token,
            },
        )
        .await,
    );
    assert_eq!(early.session.phase, Phase::Reveal);
    assert_eq!(early.session.round, outcome.token.round);

    clock.advance(state.rules.reveal_pause());
    let first = expect_snapshot(
        send(
            &state,
            &mut host,
            ClientMessage::AdvanceReveal {
                token: outcome.token,
            },
        )
        .await,
    );
    let second = expect_snapshot(
        send(
            &state,
            &mut guest,
            ClientMessage::AdvanceReveal {
                token: outcome.token,
            },
        )
        .await,
    );
    assert_eq!(first.session.phase, Phase::LevelComplete);
    assert_eq!(second.session.phase, Phase::LevelComplete);
    assert_eq!(second.session.hearts, 2);

    // Late votes are rejected once the round has moved on
    match send(
        &state,
        &mut host,
        ClientMessage::CastVote {
            target_player_id: "guest".into(),
            target_slot_index: 0,
        },
    )
    .await
    {
        ServerMessage::Error { code, .. } => assert_eq!(code, "INVALID_PHASE"),
        other => panic!("Expected INVALID_PHASE, got {:?}", other),
    }
}

#[tokio::test]
async fn test_client_guards_fire_once_after_deadline() {
    let (state, clock) = manual_state();
    let (mut host, mut guest, session_id) = started_pair(&state).await;
    write_hints(&state, &mut host, &mut guest, &session_id).await;

    let target = state.get_slots(&session_id).await.unwrap().remove(0);
    send(
        &state,
        &mut host,
        ClientMessage::CastVote {
            target_player_id: target.player_id.clone(),
            target_slot_index: target.slot_index,
        },
    )
    .await;

    let mut guard_a = ClientGuard::new(clock.clone());
    let mut guard_b = ClientGuard::new(clock.clone());
    let view = state.session_view(&session_id, Some("host")).await.unwrap();
    assert_eq!(view.votes_cast, 1);

    // Inherited state inside the grace window never fires
    assert_eq!(guard_a.observe(Observation::from(&view)), None);
    assert_eq!(guard_b.observe(Observation::from(&view)), None);

    clock.advance(TimeDelta::seconds(10));
    assert_eq!(guard_a.poll(), None);

    clock.advance(TimeDelta::seconds(GameRules::default().voting_seconds.into()));
    let token = view.session.token();
    assert_eq!(guard_a.poll(), Some(AutoAction::ResolveRound(token)));
    assert_eq!(guard_a.poll(), None);
    assert_eq!(guard_b.poll(), Some(AutoAction::ResolveRound(token)));

    let first = state.resolve_round(&session_id, token).await.unwrap();
    let second = state.resolve_round(&session_id, token).await.unwrap();
    assert!(!first.already_resolved);
    assert!(second.already_resolved);
    assert_eq!(first.outcome, second.outcome);
}

fn admin_router(state: Arc<AppState>, auth_config: AuthConfig) -> Router {
    let admin = Router::new()
        .route("/api/state/export", get(api::export_state))
        .route("/api/state/import", post(api::import_state))
        .layer(middleware::from_fn_with_state(
            Arc::new(auth_config),
            auth::admin_auth_middleware,
        ));
    Router::new()
        .route("/api/health", get(api::health))
        .merge(admin)
        .with_state(state)
}

#[tokio::test]
async fn test_admin_export_requires_auth_and_round_trips() {
    let state = Arc::new(AppState::in_memory());
    let (_host, _guest, session_id) = started_pair(&state).await;
    let app = admin_router(
        state.clone(),
        AuthConfig {
            username: Some("admin".into()),
            password: Some("secret".into()),
        },
    );

    let response = app
        .clone()
        .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(Request::get("/api/state/export").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));

    let credentials = format!("Basic {}", STANDARD.encode("admin:secret"));
    let response = app
        .clone()
        .oneshot(
            Request::get("/api/state/export")
                .header(header::AUTHORIZATION, &credentials)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let exported = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    // Import into a fresh server
    let fresh = Arc::new(AppState::in_memory());
    let app = admin_router(
        fresh.clone(),
        AuthConfig {
            username: Some("admin".into()),
            password: Some("secret".into()),
        },
    );
    let response = app
        .oneshot(
            Request::post("/api/state/import")
                .header(header::AUTHORIZATION, &credentials)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(exported))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let original = state.get_session(&session_id).await.unwrap();
    let restored = fresh.get_session(&session_id).await.unwrap();
    assert_eq!(restored.id, original.id);
    assert_eq!(restored.level, original.level);
    assert_eq!(
        fresh.get_slots(&session_id).await.unwrap(),
        state.get_slots(&session_id).await.unwrap()
    );
}
