//! Shared location store boundary
//!
//! Documents are loosely typed JSON keyed by location id. Writes are
//! merge-writes: nested objects merge field by field, anything else is
//! replaced. Fields named in `server_timestamps` are stamped by the store's
//! own clock at commit time.
//!
//! `MemoryStore` is the in-process implementation used by the CLI and tests.
//! It can be seeded from and persisted to a JSON snapshot file.

use crate::domain::types::LocationId;
use crate::error::{Error, StoreError};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// A merge-write against one document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentWrite {
    pub fields: Map<String, Value>,
    /// Dotted field paths the store fills with its commit time
    pub server_timestamps: Vec<String>,
}

impl DocumentWrite {
    pub fn merge(fields: Map<String, Value>) -> Self {
        Self { fields, server_timestamps: Vec::new() }
    }

    pub fn with_server_timestamp(mut self, path: impl Into<String>) -> Self {
        self.server_timestamps.push(path.into());
        self
    }
}

/// One document as seen by a subscriber
#[derive(Debug, Clone, PartialEq)]
pub struct StoredLocation {
    pub id: LocationId,
    pub data: Value,
}

/// Full location set, ordered by name
pub type LocationSnapshot = Arc<Vec<StoredLocation>>;

/// Transaction body: sees the current document (if any) and returns the
/// write to commit, or `None` to commit nothing. An error aborts.
pub type TransactionFn<'a> =
    &'a mut (dyn FnMut(Option<&Value>) -> Result<Option<DocumentWrite>, Error> + Send);

#[async_trait]
pub trait LocationStore: Send + Sync {
    /// Serializable read-modify-write on one document. Returns the document
    /// as committed, or `None` when the body chose not to write.
    async fn transact(&self, id: &LocationId, body: TransactionFn<'_>) -> Result<Option<Value>, Error>;

    async fn get(&self, id: &LocationId) -> Result<Option<Value>, StoreError>;

    /// Live view of the whole set; a new snapshot is published after every commit
    fn subscribe(&self) -> watch::Receiver<LocationSnapshot>;
}

/// Firestore-style native timestamp
pub fn store_timestamp(at: DateTime<Utc>) -> Value {
    serde_json::json!({
        "seconds": at.timestamp(),
        "nanoseconds": at.timestamp_subsec_nanos(),
    })
}

/// Deep-merge `patch` into `target`
fn merge_into(target: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, value) in patch {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => merge_into(existing, incoming),
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

fn set_path(target: &mut Map<String, Value>, path: &str, value: Value) {
    let mut parts = path.split('.').peekable();
    let mut current = target;
    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            current.insert(part.to_string(), value);
            return;
        }
        let slot = current.entry(part.to_string()).or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(next) = slot else {
            return;
        };
        current = next;
    }
}

/// Apply a write to a document, creating it when absent
pub fn apply_write(existing: Option<&Value>, write: &DocumentWrite, now: DateTime<Utc>) -> Value {
    let mut doc = match existing {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };
    merge_into(&mut doc, &write.fields);
    for path in &write.server_timestamps {
        set_path(&mut doc, path, store_timestamp(now));
    }
    Value::Object(doc)
}

fn sort_key(data: &Value) -> String {
    data.get("name").and_then(Value::as_str).unwrap_or_default().to_lowercase()
}

#[derive(Default, Debug)]
struct MemoryInner {
    docs: BTreeMap<LocationId, Value>,
    /// One-shot failure for the next write
    fail_next: Option<StoreError>,
}

/// In-memory store. Thread-safe; the lock is never held across an await.
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    snapshots: watch::Sender<LocationSnapshot>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (snapshots, _) = watch::channel(Arc::new(Vec::new()));
        Self { inner: Mutex::new(MemoryInner::default()), snapshots }
    }

    /// Seed documents, bypassing merge semantics
    pub fn with_documents(documents: impl IntoIterator<Item = (LocationId, Value)>) -> Self {
        let store = Self::new();
        {
            let mut inner = store.inner.lock();
            inner.docs.extend(documents);
            store.publish(&inner);
        }
        store
    }

    /// Load a snapshot file: a JSON object of id -> document. A missing
    /// file is an empty store.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "store_file_missing_starting_empty");
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read store file: {}", path.display()))?;
        let docs: BTreeMap<String, Value> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse store file: {}", path.display()))?;
        if let Some((id, _)) = docs.iter().find(|(_, doc)| !doc.is_object()) {
            return Err(StoreError::Malformed { id: id.clone(), reason: "document is not an object".to_string() })
                .with_context(|| format!("Failed to load store file: {}", path.display()));
        }
        info!(path = %path.display(), documents = docs.len(), "store_loaded");
        Ok(Self::with_documents(docs.into_iter().map(|(id, doc)| (LocationId::new(id), doc))))
    }

    /// Write every document to a snapshot file
    pub fn persist(&self, path: &Path) -> anyhow::Result<()> {
        let docs: BTreeMap<String, Value> = {
            let inner = self.inner.lock();
            inner.docs.iter().map(|(id, doc)| (id.to_string(), doc.clone())).collect()
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(&docs)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write store file: {}", path.display()))?;
        debug!(path = %path.display(), documents = docs.len(), "store_persisted");
        Ok(())
    }

    /// Make the next write fail with `error`
    pub fn fail_next_write(&self, error: StoreError) {
        self.inner.lock().fail_next = Some(error);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn publish(&self, inner: &MemoryInner) {
        let mut locations: Vec<StoredLocation> = inner
            .docs
            .iter()
            .map(|(id, data)| StoredLocation { id: id.clone(), data: data.clone() })
            .collect();
        locations.sort_by(|a, b| sort_key(&a.data).cmp(&sort_key(&b.data)).then_with(|| a.id.cmp(&b.id)));
        self.snapshots.send_replace(Arc::new(locations));
    }

    fn take_failure(inner: &mut MemoryInner) -> Result<(), StoreError> {
        match inner.fail_next.take() {
            Some(error) => {
                warn!(error = %error, "store_write_failed");
                Err(error)
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl LocationStore for MemoryStore {
    async fn transact(&self, id: &LocationId, body: TransactionFn<'_>) -> Result<Option<Value>, Error> {
        let mut inner = self.inner.lock();
        Self::take_failure(&mut inner)?;

        let Some(write) = body(inner.docs.get(id))? else {
            return Ok(None);
        };
        let committed = apply_write(inner.docs.get(id), &write, Utc::now());
        inner.docs.insert(id.clone(), committed.clone());
        debug!(location_id = %id, fields = write.fields.len(), "store_transaction_committed");
        self.publish(&inner);
        Ok(Some(committed))
    }

    async fn get(&self, id: &LocationId) -> Result<Option<Value>, StoreError> {
        Ok(self.inner.lock().docs.get(id).cloned())
    }

    fn subscribe(&self) -> watch::Receiver<LocationSnapshot> {
        self.snapshots.subscribe()
    }
}
