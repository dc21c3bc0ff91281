use crate::state::{AppState, DeadlineAction};
use crate::store::StoreSnapshot;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// How often phase deadlines are checked
pub const DEADLINE_TICK: Duration = Duration::from_millis(500);

/// Spawn a background task that resolves expired voting rounds (if anyone
/// voted) and ends reveal pauses.
pub fn spawn_deadline_watcher(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(DEADLINE_TICK);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;

            match state.run_deadlines().await {
                Ok(actions) => {
                    for (session_id, action) in actions {
                        match action {
                            DeadlineAction::Resolved(token) => tracing::info!(
                                session_id = %session_id,
                                level = token.level,
                                round = token.round,
                                "Voting deadline expired, round resolved"
                            ),
                            DeadlineAction::Advanced(phase) => tracing::debug!(
                                session_id = %session_id,
                                to = ?phase,
                                "Reveal pause over"
                            ),
                        }
                    }
                }
                Err(e) => tracing::warn!("Deadline sweep failed: {}", e),
            }
        }
    })
}

/// Write a store snapshot to `path`
pub async fn save_snapshot(state: &AppState, path: &Path) -> Result<(), crate::store::StoreError> {
    let snapshot = state.store.export().await?;
    let documents = snapshot.documents.len();
    snapshot.save_to_file(path).await?;
    tracing::debug!(path = %path.display(), documents, "Snapshot written");
    Ok(())
}

/// Restore the store from `path` if the file exists
pub async fn load_snapshot(state: &AppState, path: &Path) -> Result<bool, crate::store::StoreError> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(false);
    }
    let snapshot = StoreSnapshot::load_from_file(path).await?;
    let documents = snapshot.documents.len();
    state.store.import(snapshot).await?;
    tracing::info!(path = %path.display(), documents, "Snapshot restored");
    Ok(true)
}

/// Spawn a background task that persists the store every `interval`
pub fn spawn_snapshot_writer(
    state: Arc<AppState>,
    path: PathBuf,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(e) = save_snapshot(&state, &path).await {
                tracing::error!(path = %path.display(), "Failed to write snapshot: {}", e);
            }
        }
    })
}
