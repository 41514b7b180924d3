use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// A raw document read from the store: an untyped field map. Records are
/// validated into the shapes in `models` at the aggregation boundary and
/// never propagate past it.
pub type Record = Map<String, Value>;

pub mod collections {
    pub const STUDENTS: &str = "students";
    pub const ASSIGNMENTS: &str = "assignments";
    pub const SUBMISSIONS: &str = "submissions";
    pub const STUDY_TIME: &str = "study_time";
    pub const FAMILIES: &str = "families";
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record store unreachable: {0}")]
    Unavailable(String),
    #[error("query against `{collection}` failed: {message}")]
    Query { collection: String, message: String },
    #[error("aggregation cancelled before commit")]
    Cancelled,
}

/// Equality predicate on a named field.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Filter {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        record.get(&self.field) == Some(&self.value)
    }
}

fn matches_all(filters: &[Filter], record: &Record) -> bool {
    filters.iter().all(|f| f.matches(record))
}

/// Invoked with the full current matching record set on every change.
pub type ChangeListener = Arc<dyn Fn(Vec<Record>) + Send + Sync>;

/// Releases a store-side listener. Disposal is idempotent; dropping the
/// handle also disposes so a leaked handle cannot leak a listener.
pub struct Unsubscribe {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Unsubscribe {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Unsubscribe {
            release: Some(Box::new(release)),
        }
    }

    pub fn dispose(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Minimal contract the aggregation engines need from the remote document
/// store: filtered reads and change subscriptions.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn query(&self, collection: &str, filters: &[Filter]) -> Result<Vec<Record>, StoreError>;

    async fn subscribe(
        &self,
        collection: &str,
        filters: &[Filter],
        listener: ChangeListener,
    ) -> Result<Unsubscribe, StoreError>;
}

struct Listener {
    id: u64,
    collection: String,
    filters: Vec<Filter>,
    notify: ChangeListener,
}

#[derive(Default)]
struct MemoryInner {
    data: Mutex<HashMap<String, Vec<Record>>>,
    listeners: Mutex<Vec<Listener>>,
    next_listener: AtomicU64,
}

/// In-memory store backed by a JSON snapshot file: an object mapping each
/// collection name to an array of records. Used by the CLI and the tests;
/// the production portal talks to the remote document store through the
/// same `RecordStore` contract.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    // A poisoned lock means a panic mid-mutation; the store reports itself
    // unreachable rather than serving a possibly half-written state.
    fn lock_data(&self) -> Result<MutexGuard<'_, HashMap<String, Vec<Record>>>, StoreError> {
        self.inner
            .data
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }

    fn lock_listeners(&self) -> Result<MutexGuard<'_, Vec<Listener>>, StoreError> {
        self.inner
            .listeners
            .lock()
            .map_err(|_| StoreError::Unavailable("listener lock poisoned".to_string()))
    }

    /// Loads a snapshot file. A missing file yields an empty store so that
    /// `seed` can bootstrap a fresh snapshot.
    pub fn from_snapshot(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(MemoryStore::new());
        }
        let raw = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&raw)?;
        let store = MemoryStore::new();
        if let Value::Object(map) = value {
            let mut data = store.lock_data()?;
            for (collection, records) in map {
                let rows = match records {
                    Value::Array(items) => items
                        .into_iter()
                        .filter_map(|item| match item {
                            Value::Object(record) => Some(record),
                            _ => None,
                        })
                        .collect(),
                    _ => Vec::new(),
                };
                data.insert(collection, rows);
            }
        }
        Ok(store)
    }

    pub fn save_snapshot(&self, path: &Path) -> anyhow::Result<()> {
        let data = self.lock_data()?;
        let mut root = Map::new();
        for (collection, records) in data.iter() {
            let rows = records.iter().cloned().map(Value::Object).collect();
            root.insert(collection.clone(), Value::Array(rows));
        }
        let raw = serde_json::to_string_pretty(&Value::Object(root))?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    pub fn insert(&self, collection: &str, record: Record) -> Result<(), StoreError> {
        {
            let mut data = self.lock_data()?;
            data.entry(collection.to_string()).or_default().push(record.clone());
        }
        self.notify(collection, &[&record])
    }

    /// Merges `fields` into the record whose `id` matches. Returns false
    /// when no such record exists.
    pub fn update_fields(
        &self,
        collection: &str,
        id: &str,
        fields: Record,
    ) -> Result<bool, StoreError> {
        let states = {
            let mut data = self.lock_data()?;
            let records = match data.get_mut(collection) {
                Some(records) => records,
                None => return Ok(false),
            };
            let target = records
                .iter_mut()
                .find(|r| r.get("id").and_then(Value::as_str) == Some(id));
            match target {
                Some(record) => {
                    let before = record.clone();
                    for (key, value) in fields {
                        record.insert(key, value);
                    }
                    Some((before, record.clone()))
                }
                None => None,
            }
        };
        match states {
            Some((before, after)) => {
                self.notify(collection, &[&before, &after])?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn remove(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let removed = {
            let mut data = self.lock_data()?;
            let records = match data.get_mut(collection) {
                Some(records) => records,
                None => return Ok(false),
            };
            let mut removed = None;
            records.retain(|r| {
                if r.get("id").and_then(Value::as_str) == Some(id) {
                    removed = Some(r.clone());
                    false
                } else {
                    true
                }
            });
            removed
        };
        match removed {
            Some(record) => {
                self.notify(collection, &[&record])?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Pushes the current matching set to every listener on `collection`
    /// whose filters match any of the changed record states. Updates pass
    /// both the pre- and post-update state, so a record leaving a filtered
    /// listener's matching set still fires that listener. Snapshots are
    /// computed before invoking callbacks so no lock is held across
    /// listener code.
    fn notify(&self, collection: &str, changed: &[&Record]) -> Result<(), StoreError> {
        let pending: Vec<(ChangeListener, Vec<Record>)> = {
            let listeners = self.lock_listeners()?;
            let data = self.lock_data()?;
            let records = data.get(collection).cloned().unwrap_or_default();
            listeners
                .iter()
                .filter(|l| {
                    l.collection == collection
                        && changed.iter().any(|state| matches_all(&l.filters, state))
                })
                .map(|l| {
                    let snapshot = records
                        .iter()
                        .filter(|r| matches_all(&l.filters, r))
                        .cloned()
                        .collect();
                    (Arc::clone(&l.notify), snapshot)
                })
                .collect()
        };
        for (listener, snapshot) in pending {
            debug!(collection, records = snapshot.len(), "change pushed to listener");
            listener(snapshot);
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn query(&self, collection: &str, filters: &[Filter]) -> Result<Vec<Record>, StoreError> {
        let data = self.lock_data()?;
        let records = data.get(collection).cloned().unwrap_or_default();
        Ok(records
            .into_iter()
            .filter(|r| matches_all(filters, r))
            .collect())
    }

    async fn subscribe(
        &self,
        collection: &str,
        filters: &[Filter],
        listener: ChangeListener,
    ) -> Result<Unsubscribe, StoreError> {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        {
            let mut listeners = self.lock_listeners()?;
            listeners.push(Listener {
                id,
                collection: collection.to_string(),
                filters: filters.to_vec(),
                notify: listener,
            });
        }
        let inner = Arc::clone(&self.inner);
        Ok(Unsubscribe::new(move || {
            if let Ok(mut listeners) = inner.listeners.lock() {
                listeners.retain(|l| l.id != id);
            }
        }))
    }
}

/// Convenience for building records from `json!` literals in seed/import
/// paths and tests.
pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert(
                collections::ASSIGNMENTS,
                record(json!({"id": "a1", "classId": "c1", "status": "active"})),
            )
            .unwrap();
        store
            .insert(
                collections::ASSIGNMENTS,
                record(json!({"id": "a2", "classId": "c1", "status": "archived"})),
            )
            .unwrap();
        store
            .insert(
                collections::ASSIGNMENTS,
                record(json!({"id": "a3", "classId": "c2", "status": "active"})),
            )
            .unwrap();
        store
    }

    #[tokio::test]
    async fn query_applies_all_filters() {
        let store = seeded();
        let rows = store
            .query(
                collections::ASSIGNMENTS,
                &[Filter::eq("classId", "c1"), Filter::eq("status", "active")],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("id"), Some(&json!("a1")));
    }

    #[tokio::test]
    async fn query_unknown_collection_is_empty() {
        let store = seeded();
        let rows = store.query("nope", &[]).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn subscribe_pushes_matching_snapshots() {
        let store = seeded();
        let seen: Arc<Mutex<Vec<Vec<Record>>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let _sub = store
            .subscribe(
                collections::ASSIGNMENTS,
                &[Filter::eq("classId", "c1")],
                Arc::new(move |snapshot| sink.lock().unwrap().push(snapshot)),
            )
            .await
            .unwrap();

        store
            .insert(
                collections::ASSIGNMENTS,
                record(json!({"id": "a4", "classId": "c1", "status": "active"})),
            )
            .unwrap();
        // A change outside the filter must not fire the listener.
        store
            .insert(
                collections::ASSIGNMENTS,
                record(json!({"id": "a5", "classId": "c2", "status": "active"})),
            )
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].len(), 3);
    }

    #[tokio::test]
    async fn dispose_stops_callbacks_and_is_idempotent() {
        let store = seeded();
        let seen: Arc<Mutex<usize>> = Arc::default();
        let sink = Arc::clone(&seen);
        let mut sub = store
            .subscribe(
                collections::ASSIGNMENTS,
                &[],
                Arc::new(move |_| *sink.lock().unwrap() += 1),
            )
            .await
            .unwrap();

        store
            .insert(collections::ASSIGNMENTS, record(json!({"id": "a6"})))
            .unwrap();
        sub.dispose();
        sub.dispose();
        store
            .insert(collections::ASSIGNMENTS, record(json!({"id": "a7"})))
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn update_fields_merges_and_notifies() {
        let store = seeded();
        let seen: Arc<Mutex<Vec<Vec<Record>>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let _sub = store
            .subscribe(
                collections::ASSIGNMENTS,
                &[],
                Arc::new(move |snapshot| sink.lock().unwrap().push(snapshot)),
            )
            .await
            .unwrap();

        assert!(store
            .update_fields(
                collections::ASSIGNMENTS,
                "a2",
                record(json!({"status": "active"})),
            )
            .unwrap());
        assert!(!store
            .update_fields(
                collections::ASSIGNMENTS,
                "missing",
                record(json!({"status": "active"})),
            )
            .unwrap());

        let rows = store
            .query(collections::ASSIGNMENTS, &[Filter::eq("status", "active")])
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_leaving_the_matching_set_still_notifies() {
        let store = seeded();
        let seen: Arc<Mutex<Vec<Vec<Record>>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let _sub = store
            .subscribe(
                collections::ASSIGNMENTS,
                &[Filter::eq("classId", "c1")],
                Arc::new(move |snapshot| sink.lock().unwrap().push(snapshot)),
            )
            .await
            .unwrap();

        // Moving a1 out of c1 changes the matching set, so the listener
        // must see the shrunken snapshot.
        assert!(store
            .update_fields(
                collections::ASSIGNMENTS,
                "a1",
                record(json!({"classId": "c2"})),
            )
            .unwrap());

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].len(), 1);
        assert_eq!(seen[0][0].get("id"), Some(&json!("a2")));
    }

    #[tokio::test]
    async fn remove_deletes_and_notifies() {
        let store = seeded();
        let seen: Arc<Mutex<usize>> = Arc::default();
        let sink = Arc::clone(&seen);
        let _sub = store
            .subscribe(
                collections::ASSIGNMENTS,
                &[],
                Arc::new(move |_| *sink.lock().unwrap() += 1),
            )
            .await
            .unwrap();

        assert!(store.remove(collections::ASSIGNMENTS, "a1").unwrap());
        assert!(!store.remove(collections::ASSIGNMENTS, "a1").unwrap());
        let rows = store.query(collections::ASSIGNMENTS, &[]).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn snapshot_round_trips_through_file() {
        let store = seeded();
        let path = std::env::temp_dir().join(format!("kp-snapshot-{}.json", uuid::Uuid::new_v4()));
        store.save_snapshot(&path).unwrap();
        let reloaded = MemoryStore::from_snapshot(&path).unwrap();
        let data = reloaded.inner.data.lock().unwrap();
        assert_eq!(data.get(collections::ASSIGNMENTS).map(Vec::len), Some(3));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_snapshot_is_an_empty_store() {
        let path = std::env::temp_dir().join("kp-snapshot-does-not-exist.json");
        let store = MemoryStore::from_snapshot(&path).unwrap();
        assert!(store.inner.data.lock().unwrap().is_empty());
    }
}
