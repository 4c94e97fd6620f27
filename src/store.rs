//! Task store: concurrent-safe mapping from task ID to task record
//!
//! The store is injected into the fetcher as a trait object so a persistent
//! backing implementation can be swapped in without touching the worker or the
//! API layer, and so tests can observe records directly.

use crate::types::{TaskId, TaskRecord};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Concurrent key-value store for task records
///
/// Implementations serialize concurrent access internally; callers never hold
/// a lock. Each task is written by exactly one worker, so there is no
/// cross-task ordering requirement, but get/put/delete on different tasks may
/// happen simultaneously from workers and progress streams.
pub trait TaskStore: Send + Sync {
    /// Current record for `id`, or a synthetic `waiting` record if absent
    fn get(&self, id: TaskId) -> TaskRecord;

    /// Unconditionally overwrite the record for `id`
    fn put(&self, id: TaskId, record: TaskRecord);

    /// Remove the record for `id` if present (no error if absent)
    fn delete(&self, id: TaskId);

    /// Number of records currently held
    fn len(&self) -> usize;

    /// Whether the store holds no records
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory task store backed by a `RwLock<HashMap>`
///
/// The default store. Records live only for the process lifetime, which
/// matches the transient nature of the artifacts they describe.
#[derive(Default)]
pub struct MemoryTaskStore {
    records: RwLock<HashMap<TaskId, TaskRecord>>,
}

impl MemoryTaskStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskStore for MemoryTaskStore {
    fn get(&self, id: TaskId) -> TaskRecord {
        self.records
            .read()
            .get(&id)
            .cloned()
            .unwrap_or_else(TaskRecord::waiting)
    }

    fn put(&self, id: TaskId, record: TaskRecord) {
        self.records.write().insert(id, record);
    }

    fn delete(&self, id: TaskId) {
        self.records.write().remove(&id);
    }

    fn len(&self) -> usize {
        self.records.read().len()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskStatus;
    use std::sync::Arc;

    #[test]
    fn unknown_id_yields_waiting() {
        let store = MemoryTaskStore::new();
        let record = store.get(TaskId::new());
        assert_eq!(record.status, TaskStatus::Waiting);
        assert_eq!(record.percent, 0.0);
    }

    #[test]
    fn put_overwrites_unconditionally() {
        let store = MemoryTaskStore::new();
        let id = TaskId::new();

        store.put(id, TaskRecord::starting());
        assert_eq!(store.get(id).status, TaskStatus::Starting);

        store.put(id, TaskRecord::finished("/api/get-file/x".to_string()));
        let record = store.get(id);
        assert_eq!(record.status, TaskStatus::Finished);
        assert_eq!(record.percent, 100.0);
    }

    #[test]
    fn delete_is_idempotent() {
        let store = MemoryTaskStore::new();
        let id = TaskId::new();

        store.put(id, TaskRecord::starting());
        store.delete(id);
        store.delete(id); // absent — must not panic or error
        assert_eq!(store.get(id).status, TaskStatus::Waiting);
        assert!(store.is_empty());
    }

    #[test]
    fn concurrent_writers_and_readers() {
        let store = Arc::new(MemoryTaskStore::new());
        let ids: Vec<TaskId> = (0..8).map(|_| TaskId::new()).collect();

        let mut handles = Vec::new();
        for &id in &ids {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                for pct in 0..100 {
                    let mut record = TaskRecord::starting();
                    record.status = TaskStatus::Downloading;
                    record.percent = pct as f32;
                    store.put(id, record);
                    let seen = store.get(id);
                    assert_eq!(seen.status, TaskStatus::Downloading);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), ids.len());
    }
}
