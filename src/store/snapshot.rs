//! Store snapshots for backup and restart.
//!
//! A snapshot is the full document map plus the version counter. It is
//! validated before import so a hand-edited or truncated file cannot put
//! illegal phase or status values into play.

use super::{StoreError, StoreResult, Versioned};
use crate::types::{AnswerSlot, ReadyMark, Room, Session, Vote};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Version 1: initial layout (rooms, sessions, slots, votes, ready marks)
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub schema_version: u32,
    /// Export timestamp (ISO8601)
    pub exported_at: String,
    pub next_version: u64,
    pub documents: BTreeMap<String, Versioned>,
}

impl StoreSnapshot {
    pub fn new(documents: BTreeMap<String, Versioned>, next_version: u64) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            exported_at: chrono::Utc::now().to_rfc3339(),
            next_version,
            documents,
        }
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.schema_version > SNAPSHOT_SCHEMA_VERSION {
            return Err(corrupt(
                "<snapshot>",
                format!(
                    "schema version {} is newer than supported version {}",
                    self.schema_version, SNAPSHOT_SCHEMA_VERSION
                ),
            ));
        }

        let mut rooms: BTreeMap<&str, Room> = BTreeMap::new();
        let mut sessions: BTreeMap<&str, Session> = BTreeMap::new();
        let mut children: Vec<(&str, &str)> = Vec::new();

        for (key, versioned) in &self.documents {
            if versioned.version >= self.next_version {
                return Err(corrupt(key, "version is ahead of the snapshot counter"));
            }

            let parts: Vec<&str> = key.split('/').collect();
            match parts.as_slice() {
                ["rooms", code] => {
                    rooms.insert(*code, versioned.decode(key)?);
                }
                ["sessions", id] => {
                    sessions.insert(*id, versioned.decode(key)?);
                }
                ["sessions", id, "slots", _, _] => {
                    versioned.decode::<AnswerSlot>(key)?;
                    children.push((key.as_str(), *id));
                }
                ["sessions", id, "votes", _] => {
                    versioned.decode::<Vote>(key)?;
                    children.push((key.as_str(), *id));
                }
                ["sessions", id, "ready", _] => {
                    versioned.decode::<ReadyMark>(key)?;
                    children.push((key.as_str(), *id));
                }
                _ => return Err(corrupt(key, "unknown document key")),
            }
        }

        for (key, session_id) in children {
            if !sessions.contains_key(session_id) {
                return Err(corrupt(key, "belongs to a session that does not exist"));
            }
        }

        for (code, room) in &rooms {
            if let Some(session_id) = &room.session_id {
                if !sessions.contains_key(session_id.as_str()) {
                    return Err(corrupt(
                        &format!("rooms/{}", code),
                        format!("references missing session {}", session_id),
                    ));
                }
            }
        }

        Ok(())
    }

    pub async fn save_to_file(&self, path: &Path) -> StoreResult<()> {
        let json = serde_json::to_vec_pretty(self)?;
        // Write next to the target and rename so readers never see a partial file
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    pub async fn load_from_file(path: &Path) -> StoreResult<Self> {
        let bytes = tokio::fs::read(path).await?;
        let snapshot: StoreSnapshot = serde_json::from_slice(&bytes)?;
        snapshot.validate()?;
        Ok(snapshot)
    }
}

fn corrupt(key: &str, reason: impl Into<String>) -> StoreError {
    StoreError::Corrupt {
        key: key.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DocumentStore, MemoryStore};
    use serde_json::json;

    fn vote_doc() -> serde_json::Value {
        json!({
            "voter_id": "p1",
            "target": { "player_id": "p2", "slot_index": 0 },
            "level": 1,
            "round": 1,
            "cast_at": "2026-01-01T00:00:00Z"
        })
    }

    #[test]
    fn test_rejects_newer_schema() {
        let mut snapshot = StoreSnapshot::new(BTreeMap::new(), 1);
        snapshot.schema_version = SNAPSHOT_SCHEMA_VERSION + 1;
        assert!(snapshot.validate().is_err());
    }

    #[test]
    fn test_rejects_orphan_children() {
        let mut docs = BTreeMap::new();
        docs.insert(
            "sessions/s1/votes/p1".to_string(),
            Versioned {
                version: 1,
                doc: vote_doc(),
            },
        );
        let snapshot = StoreSnapshot::new(docs, 2);
        let err = snapshot.validate().unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_rejects_unknown_keys() {
        let mut docs = BTreeMap::new();
        docs.insert(
            "leaderboard/top".to_string(),
            Versioned {
                version: 1,
                doc: json!({}),
            },
        );
        assert!(StoreSnapshot::new(docs, 2).validate().is_err());
    }

    #[tokio::test]
    async fn test_file_roundtrip_restores_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = MemoryStore::new();
        store
            .put(
                "rooms/123456",
                json!({
                    "code": "123456",
                    "host_id": "p1",
                    "players": [],
                    "status": "waiting",
                    "session_id": null,
                    "created_at": "2026-01-01T00:00:00Z"
                }),
            )
            .await
            .unwrap();
        store.export().await.unwrap().save_to_file(&path).await.unwrap();

        let restored = MemoryStore::new();
        let snapshot = StoreSnapshot::load_from_file(&path).await.unwrap();
        restored.import(snapshot).await.unwrap();

        let room = restored.get("rooms/123456").await.unwrap().unwrap();
        assert_eq!(room.doc["code"], "123456");

        // Fresh writes after import must not reuse restored versions
        let v = restored.put("rooms/654321", json!({})).await.unwrap();
        assert!(v > room.version);
    }
}
