//! In-memory queue store for tests and dry runs.

use super::*;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct MemoryQueueStore {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    rows: BTreeMap<JobId, JobRecord>,
    next_id: i64,
    /// `None`: no injected failures, `Some(None)`: every update conflicts,
    /// `Some(Some(n))`: the next `n` updates conflict
    update_conflicts: Option<Option<u32>>,
    fail_fetch: bool,
    update_calls: u32,
    fetch_calls: u32,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pending job
    pub fn enqueue(&self, sender: &str, recipient: &str, text: &str) -> JobId {
        self.insert(JobRecord {
            sender: Some(sender.to_string()),
            recipient: Some(recipient.to_string()),
            text: Some(text.to_string()),
            ..Default::default()
        })
    }

    /// Add an arbitrary row; its id is assigned by the store
    pub fn insert(&self, mut record: JobRecord) -> JobId {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = JobId(state.next_id);
        record.id = id;
        state.rows.insert(id, record);
        id
    }

    pub fn get(&self, id: JobId) -> Option<JobRecord> {
        self.state.lock().unwrap().rows.get(&id).cloned()
    }

    /// Every update fails with `StoreError::Conflict`
    pub fn always_conflict(&self) {
        self.state.lock().unwrap().update_conflicts = Some(None);
    }

    /// The next `n` updates fail with `StoreError::Conflict`
    pub fn conflict_times(&self, n: u32) {
        self.state.lock().unwrap().update_conflicts = Some(Some(n));
    }

    /// Make `fetch` fail until cleared
    pub fn fail_fetch(&self, fail: bool) {
        self.state.lock().unwrap().fail_fetch = fail;
    }

    pub fn update_calls(&self) -> u32 {
        self.state.lock().unwrap().update_calls
    }

    pub fn fetch_calls(&self) -> u32 {
        self.state.lock().unwrap().fetch_calls
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn fetch(&self, filter: JobFilter) -> StoreResult<Vec<JobRecord>> {
        let mut state = self.state.lock().unwrap();
        state.fetch_calls += 1;
        if state.fail_fetch {
            return Err(StoreError::Database("fetch failure injected".into()));
        }

        Ok(state
            .rows
            .values()
            .filter(|r| filter.matches(r.status))
            .cloned()
            .collect())
    }

    async fn update(&self, id: JobId, fields: &[FieldValue]) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        state.update_calls += 1;

        match state.update_conflicts {
            Some(None) => return Err(StoreError::Conflict("database is locked".into())),
            Some(Some(n)) if n > 0 => {
                state.update_conflicts = Some(Some(n - 1));
                return Err(StoreError::Conflict("database is locked".into()));
            }
            _ => {}
        }

        let row = state.rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        for field in fields {
            match field {
                FieldValue::Status(s) => row.status = Some(*s),
                FieldValue::SentAt(at) => row.sent_at = Some(at.format(SENT_AT_FORMAT).to_string()),
                FieldValue::ErrorText(text) => row.error_text = Some(text.clone()),
            }
        }
        Ok(())
    }

    async fn status_counts(&self) -> StoreResult<StatusCounts> {
        let state = self.state.lock().unwrap();
        let mut counts = StatusCounts::default();
        for row in state.rows.values() {
            match row.status {
                None => counts.pending += 1,
                Some(JobStatus::Sent) => counts.sent += 1,
                Some(JobStatus::Failed) => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_is_a_fresh_snapshot() {
        let store = MemoryQueueStore::new();
        let id = store.enqueue("A", "B", "hi");
        assert_eq!(store.fetch(JobFilter::Pending).await.unwrap().len(), 1);

        store
            .update(id, &[FieldValue::Status(JobStatus::Sent)])
            .await
            .unwrap();
        store.enqueue("C", "D", "again");

        let pending = store.fetch(JobFilter::Pending).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].sender.as_deref(), Some("C"));
    }

    #[tokio::test]
    async fn test_injected_conflicts() {
        let store = MemoryQueueStore::new();
        let id = store.enqueue("A", "B", "hi");
        store.conflict_times(2);

        let fields = [FieldValue::Status(JobStatus::Failed)];
        assert!(store.update(id, &fields).await.unwrap_err().is_conflict());
        assert!(store.update(id, &fields).await.unwrap_err().is_conflict());
        store.update(id, &fields).await.unwrap();

        assert_eq!(store.update_calls(), 3);
        assert_eq!(store.get(id).unwrap().status, Some(JobStatus::Failed));
    }

    #[tokio::test]
    async fn test_counts() {
        let store = MemoryQueueStore::new();
        let id = store.enqueue("A", "B", "1");
        store.enqueue("A", "B", "2");
        store
            .update(id, &[FieldValue::Status(JobStatus::Sent)])
            .await
            .unwrap();

        let counts = store.status_counts().await.unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.sent, 1);
        assert_eq!(counts.failed, 0);
    }
}
