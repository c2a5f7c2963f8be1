//! Background status writer.
//!
//! The dispatcher hands terminal statuses to this task over a bounded channel
//! and moves on to the next job. Updates that hit store contention are
//! retried on the persistence-conflict schedule. `flush` is a barrier: it
//! resolves once everything submitted before it has been applied or given up.

use super::{QueueStore, StatusUpdate, StoreError, StoreResult};
use crate::retry::{retry_with_backoff, RetrySchedule};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("status writer has stopped")]
pub struct WriterClosed;

enum WriterCommand {
    Apply(StatusUpdate),
    Flush(oneshot::Sender<()>),
}

pub struct StatusWriter {
    tx: mpsc::Sender<WriterCommand>,
    handle: JoinHandle<()>,
}

impl StatusWriter {
    /// Spawn the writer task on the current runtime
    pub fn spawn(store: Arc<dyn QueueStore>, schedule: RetrySchedule, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run_writer(store, schedule, rx));
        Self { tx, handle }
    }

    /// Queue an update. Waits only when the channel is full.
    pub async fn submit(&self, update: StatusUpdate) -> Result<(), WriterClosed> {
        self.tx
            .send(WriterCommand::Apply(update))
            .await
            .map_err(|_| WriterClosed)
    }

    /// Wait until every update submitted so far has been handled
    pub async fn flush(&self) -> Result<(), WriterClosed> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(WriterCommand::Flush(ack))
            .await
            .map_err(|_| WriterClosed)?;
        done.await.map_err(|_| WriterClosed)
    }

    /// Stop accepting updates, drain the queue and wait for the task
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.handle.await {
            error!(error = %e, "status writer task failed");
        }
    }
}

async fn run_writer(
    store: Arc<dyn QueueStore>,
    schedule: RetrySchedule,
    mut rx: mpsc::Receiver<WriterCommand>,
) {
    debug!("status writer started");

    while let Some(command) = rx.recv().await {
        match command {
            WriterCommand::Apply(update) => {
                let id = update.id();
                match apply_update(store.as_ref(), &schedule, &update).await {
                    Ok(()) => debug!(job_id = %id, "status persisted"),
                    // Row stays pending and is picked up again next cycle
                    Err(e) => error!(job_id = %id, error = %e, "failed to persist status"),
                }
            }
            WriterCommand::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }

    info!("status writer drained");
}

/// Write one status update, retrying while the store reports contention
pub async fn apply_update(
    store: &dyn QueueStore,
    schedule: &RetrySchedule,
    update: &StatusUpdate,
) -> StoreResult<()> {
    let id = update.id();
    let fields = update.fields();
    let fields = fields.as_slice();

    retry_with_backoff(
        schedule,
        move || store.update(id, fields),
        StoreError::is_conflict,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{JobStatus, MemoryQueueStore};
    use std::time::Duration;

    const SCHEDULE: RetrySchedule = RetrySchedule::fixed(10, Duration::from_millis(500));

    fn failed(id: crate::queue::JobId) -> StatusUpdate {
        StatusUpdate::Failed {
            id,
            error_text: "Connection error: boom".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_cap_is_ten_retries() {
        let store = MemoryQueueStore::new();
        let id = store.enqueue("A", "B", "hi");
        store.always_conflict();

        let result = apply_update(&store, &SCHEDULE, &failed(id)).await;

        assert!(result.unwrap_err().is_conflict());
        assert_eq!(store.update_calls(), 11);
        assert_eq!(store.get(id).unwrap().status, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_then_success() {
        let store = MemoryQueueStore::new();
        let id = store.enqueue("A", "B", "hi");
        store.conflict_times(3);

        apply_update(&store, &SCHEDULE, &failed(id)).await.unwrap();

        assert_eq!(store.update_calls(), 4);
        assert_eq!(store.get(id).unwrap().status, Some(JobStatus::Failed));
    }

    #[tokio::test]
    async fn test_missing_row_is_not_retried() {
        let store = MemoryQueueStore::new();

        let result = apply_update(&store, &SCHEDULE, &failed(crate::queue::JobId(42))).await;

        assert!(matches!(result, Err(StoreError::NotFound(_))));
        assert_eq!(store.update_calls(), 1);
    }

    #[tokio::test]
    async fn test_flush_waits_for_submitted_updates() {
        let store = MemoryQueueStore::new();
        let ids: Vec<_> = (0..5).map(|i| store.enqueue("A", "B", &i.to_string())).collect();
        let writer = StatusWriter::spawn(Arc::new(store.clone()), SCHEDULE, 2);

        for id in &ids {
            writer.submit(failed(*id)).await.unwrap();
        }
        writer.flush().await.unwrap();

        for id in &ids {
            assert_eq!(store.get(*id).unwrap().status, Some(JobStatus::Failed));
        }
        writer.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let store = MemoryQueueStore::new();
        let id = store.enqueue("A", "B", "hi");
        let writer = StatusWriter::spawn(Arc::new(store.clone()), SCHEDULE, 8);

        writer.submit(failed(id)).await.unwrap();
        writer.shutdown().await;

        assert_eq!(store.get(id).unwrap().status, Some(JobStatus::Failed));
    }
}
