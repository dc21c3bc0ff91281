use super::*;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

struct Inner {
    docs: BTreeMap<String, Versioned>,
    /// Next version to hand out. Global so recreated keys never reuse one.
    next_version: u64,
}

/// In-process document store
pub struct MemoryStore {
    inner: RwLock<Inner>,
    events: broadcast::Sender<ChangeEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(1024);
        Self {
            inner: RwLock::new(Inner {
                docs: BTreeMap::new(),
                next_version: 1,
            }),
            events: tx,
        }
    }

    fn publish(&self, event: ChangeEvent) {
        // No watchers is fine
        let _ = self.events.send(event);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn check(docs: &BTreeMap<String, Versioned>, pre: &Precondition) -> StoreResult<()> {
    let ok = match pre {
        Precondition::Version(key, version) => {
            docs.get(key).map(|v| v.version == *version).unwrap_or(false)
        }
        Precondition::Exists(key) => docs.contains_key(key),
        Precondition::Absent(key) => !docs.contains_key(key),
    };
    if ok {
        Ok(())
    } else {
        let key = match pre {
            Precondition::Version(k, _) | Precondition::Exists(k) | Precondition::Absent(k) => k,
        };
        Err(StoreError::Conflict(key.clone()))
    }
}

fn merge_fields(key: &str, doc: &mut Document, fields: Map<String, Value>) -> StoreResult<()> {
    match doc.as_object_mut() {
        Some(obj) => {
            obj.extend(fields);
            Ok(())
        }
        None => Err(StoreError::Corrupt {
            key: key.to_string(),
            reason: "merge target is not an object".to_string(),
        }),
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Versioned>> {
        Ok(self.inner.read().await.docs.get(key).cloned())
    }

    async fn put(&self, key: &str, doc: Document) -> StoreResult<u64> {
        let mut batch = WriteBatch::new();
        batch.put(key, doc);
        self.commit(batch).await?;
        self.version_of(key).await
    }

    async fn merge(&self, key: &str, fields: Map<String, Value>) -> StoreResult<u64> {
        let mut batch = WriteBatch::new();
        batch.merge(key, fields);
        self.commit(batch).await?;
        self.version_of(key).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.commit(batch).await
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<(String, Versioned)>> {
        let inner = self.inner.read().await;
        Ok(inner
            .docs
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut inner = self.inner.write().await;

        for pre in &batch.preconditions {
            check(&inner.docs, pre)?;
        }

        // Stage every touched key so a failing write leaves the store untouched
        let mut staged: BTreeMap<String, Option<Versioned>> = BTreeMap::new();
        let mut order: Vec<String> = Vec::new();
        let mut version = inner.next_version;

        for write in batch.writes {
            let key = match &write {
                Write::Put(k, _) | Write::Merge(k, _) | Write::Delete(k) => k.clone(),
            };
            if !staged.contains_key(&key) {
                staged.insert(key.clone(), inner.docs.get(&key).cloned());
                order.push(key.clone());
            }
            let slot = staged.entry(key.clone()).or_insert(None);
            match write {
                Write::Put(_, doc) => {
                    *slot = Some(Versioned { version, doc });
                    version += 1;
                }
                Write::Merge(_, fields) => {
                    let current = slot
                        .as_mut()
                        .ok_or_else(|| StoreError::NotFound(key.clone()))?;
                    merge_fields(&key, &mut current.doc, fields)?;
                    current.version = version;
                    version += 1;
                }
                Write::Delete(_) => {
                    *slot = None;
                }
            }
        }

        inner.next_version = version;
        for key in order {
            let before = inner.docs.contains_key(&key);
            let after = staged.remove(&key).flatten();
            let event = match after {
                Some(v) => {
                    let kind = if before {
                        ChangeKind::Modified
                    } else {
                        ChangeKind::Added
                    };
                    let event = ChangeEvent {
                        kind,
                        key: key.clone(),
                        version: v.version,
                        doc: Some(v.doc.clone()),
                    };
                    inner.docs.insert(key, v);
                    Some(event)
                }
                None => inner.docs.remove(&key).map(|old| ChangeEvent {
                    kind: ChangeKind::Removed,
                    key,
                    version: old.version,
                    doc: None,
                }),
            };
            if let Some(event) = event {
                self.publish(event);
            }
        }

        Ok(())
    }

    fn watch(&self, scope: &str) -> Watch {
        Watch::new(scope, self.events.subscribe())
    }

    async fn export(&self) -> StoreResult<StoreSnapshot> {
        let inner = self.inner.read().await;
        Ok(StoreSnapshot::new(inner.docs.clone(), inner.next_version))
    }

    async fn import(&self, snapshot: StoreSnapshot) -> StoreResult<()> {
        snapshot.validate()?;

        let mut inner = self.inner.write().await;
        let old = std::mem::take(&mut inner.docs);
        for (key, v) in old {
            if !snapshot.documents.contains_key(&key) {
                self.publish(ChangeEvent {
                    kind: ChangeKind::Removed,
                    key,
                    version: v.version,
                    doc: None,
                });
            }
        }
        inner.next_version = snapshot.next_version.max(inner.next_version);
        for (key, v) in snapshot.documents {
            self.publish(ChangeEvent {
                kind: ChangeKind::Modified,
                key: key.clone(),
                version: v.version,
                doc: Some(v.doc.clone()),
            });
            inner.docs.insert(key, v);
        }

        tracing::info!(documents = inner.docs.len(), "Store snapshot imported");
        Ok(())
    }
}

impl MemoryStore {
    async fn version_of(&self, key: &str) -> StoreResult<u64> {
        self.inner
            .read()
            .await
            .docs
            .get(key)
            .map(|v| v.version)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }
}
