//! Keyed document storage with change notification.
//!
//! The game core only talks to storage through [`DocumentStore`]: get, put,
//! partial merge, delete, prefix listing, atomic conditional batches and a
//! watch stream. [`MemoryStore`] is the in-process implementation.

mod memory;
mod snapshot;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

pub use memory::MemoryStore;
pub use snapshot::{StoreSnapshot, SNAPSHOT_SCHEMA_VERSION};

pub type Document = Value;
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("write conflict on {0}")]
    Conflict(String),

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("corrupt document {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Versioned {
    pub version: u64,
    pub doc: Document,
}

impl Versioned {
    /// Decode into a typed record. Unknown enum values and missing fields
    /// surface as data-integrity errors.
    pub fn decode<T: DeserializeOwned>(&self, key: &str) -> StoreResult<T> {
        serde_json::from_value(self.doc.clone()).map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    Version(String, u64),
    Exists(String),
    Absent(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    Put(String, Document),
    Merge(String, Map<String, Value>),
    Delete(String),
}

/// A set of writes applied all-or-nothing, guarded by preconditions
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub preconditions: Vec<Precondition>,
    pub writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect_version(&mut self, key: impl Into<String>, version: u64) -> &mut Self {
        self.preconditions
            .push(Precondition::Version(key.into(), version));
        self
    }

    pub fn expect_exists(&mut self, key: impl Into<String>) -> &mut Self {
        self.preconditions.push(Precondition::Exists(key.into()));
        self
    }

    pub fn expect_absent(&mut self, key: impl Into<String>) -> &mut Self {
        self.preconditions.push(Precondition::Absent(key.into()));
        self
    }

    pub fn put(&mut self, key: impl Into<String>, doc: Document) -> &mut Self {
        self.writes.push(Write::Put(key.into(), doc));
        self
    }

    /// Serialize a typed record and put it
    pub fn put_record<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        record: &T,
    ) -> StoreResult<&mut Self> {
        let doc = serde_json::to_value(record)?;
        Ok(self.put(key, doc))
    }

    pub fn merge(&mut self, key: impl Into<String>, fields: Map<String, Value>) -> &mut Self {
        self.writes.push(Write::Merge(key.into(), fields));
        self
    }

    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.writes.push(Write::Delete(key.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub key: String,
    pub version: u64,
    pub doc: Option<Document>,
}

/// True when `key` is `scope` itself or lives below it
pub fn in_scope(key: &str, scope: &str) -> bool {
    match key.strip_prefix(scope) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || scope.ends_with('/'),
        None => false,
    }
}

/// Change events for one key or subtree
pub struct Watch {
    scope: String,
    rx: broadcast::Receiver<ChangeEvent>,
}

impl Watch {
    pub fn new(scope: impl Into<String>, rx: broadcast::Receiver<ChangeEvent>) -> Self {
        Self {
            scope: scope.into(),
            rx,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Wait for the next event in scope. Returns `None` once the store is gone.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if in_scope(&event.key, &self.scope) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(scope = %self.scope, skipped, "Watcher lagged behind");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Discard in-scope events that are already queued, returning how many
    /// were dropped. Used to coalesce bursts from a single batch.
    pub fn drain_ready(&mut self) -> usize {
        let mut drained = 0;
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    if in_scope(&event.key, &self.scope) {
                        drained += 1;
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return drained,
            }
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<Versioned>>;

    /// Create or overwrite a document, returning its new version
    async fn put(&self, key: &str, doc: Document) -> StoreResult<u64>;

    /// Update top-level fields of an existing document
    async fn merge(&self, key: &str, fields: Map<String, Value>) -> StoreResult<u64>;

    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// All documents whose key starts with `prefix`, in key order
    async fn list(&self, prefix: &str) -> StoreResult<Vec<(String, Versioned)>>;

    /// Apply a batch atomically. Fails with [`StoreError::Conflict`] without
    /// writing anything if a precondition does not hold.
    async fn commit(&self, batch: WriteBatch) -> StoreResult<()>;

    fn watch(&self, scope: &str) -> Watch;

    async fn export(&self) -> StoreResult<StoreSnapshot>;

    async fn import(&self, snapshot: StoreSnapshot) -> StoreResult<()>;
}

/// Document key layout
pub mod keys {
    pub fn room(code: &str) -> String {
        format!("rooms/{}", code)
    }

    pub fn rooms() -> &'static str {
        "rooms/"
    }

    pub fn session(id: &str) -> String {
        format!("sessions/{}", id)
    }

    pub fn sessions() -> &'static str {
        "sessions/"
    }

    pub fn slots(session_id: &str) -> String {
        format!("sessions/{}/slots/", session_id)
    }

    pub fn slot(session_id: &str, player_id: &str, slot_index: u8) -> String {
        format!("sessions/{}/slots/{}/{}", session_id, player_id, slot_index)
    }

    pub fn votes(session_id: &str) -> String {
        format!("sessions/{}/votes/", session_id)
    }

    pub fn vote(session_id: &str, voter_id: &str) -> String {
        format!("sessions/{}/votes/{}", session_id, voter_id)
    }

    pub fn ready_marks(session_id: &str) -> String {
        format!("sessions/{}/ready/", session_id)
    }

    pub fn ready(session_id: &str, player_id: &str) -> String {
        format!("sessions/{}/ready/{}", session_id, player_id)
    }

    /// Top-level session documents only (not their children)
    pub fn is_session_root(key: &str) -> bool {
        key.strip_prefix(sessions())
            .map(|rest| !rest.is_empty() && !rest.contains('/'))
            .unwrap_or(false)
    }
}
