//! Polling dispatch loop.
//!
//! Each cycle fetches every pending job, delivers them one at a time and
//! hands the resulting status to the background writer. The writer is
//! flushed before the cycle ends, so the next fetch never sees a job whose
//! status is still in flight.

use crate::delivery::{Deliverer, Outcome};
use crate::queue::{
    Job, JobFilter, QueueStore, StatusUpdate, StatusWriter, StoreError, WriterClosed,
};
use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Sleep between cycles
    pub poll_interval: Duration,
    /// Bound of the status writer channel
    pub update_queue_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            update_queue_capacity: 64,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] StoreError),

    #[error(transparent)]
    Writer(#[from] WriterClosed),
}

/// Counts for one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub sent: usize,
    pub failed: usize,
    pub malformed: usize,
    /// Jobs left pending because shutdown was requested mid-cycle
    pub skipped: usize,
}

pub struct Dispatcher {
    store: Arc<dyn QueueStore>,
    deliverer: Deliverer,
    writer: StatusWriter,
    config: DispatchConfig,
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// Build a dispatcher and spawn its status writer.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(
        store: Arc<dyn QueueStore>,
        deliverer: Deliverer,
        config: DispatchConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let writer = StatusWriter::spawn(
            Arc::clone(&store),
            deliverer.policy().conflict,
            config.update_queue_capacity,
        );

        Self {
            store,
            deliverer,
            writer,
            config,
            shutdown,
        }
    }

    /// Run cycles until the shutdown token is cancelled
    pub async fn run(self) -> Result<(), DispatchError> {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "dispatcher started"
        );

        let result = loop {
            if self.shutdown.is_cancelled() {
                break Ok(());
            }

            match self.run_cycle().await {
                Ok(report) => log_report(&report),
                // Store might recover; try again next cycle
                Err(DispatchError::Fetch(e)) => {
                    error!(error = %e, "could not fetch pending jobs, skipping cycle")
                }
                Err(e @ DispatchError::Writer(_)) => break Err(e),
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break Ok(()),
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        };

        info!("dispatcher stopping, draining status writer");
        self.writer.shutdown().await;
        result
    }

    /// Run a single cycle, then drain the writer
    pub async fn run_once(self) -> Result<CycleReport, DispatchError> {
        let result = self.run_cycle().await;
        if let Ok(report) = &result {
            log_report(report);
        }
        self.writer.shutdown().await;
        result
    }

    /// Deliver every currently pending job once
    pub async fn run_cycle(&self) -> Result<CycleReport, DispatchError> {
        let records = self.store.fetch(JobFilter::Pending).await?;
        let mut report = CycleReport {
            fetched: records.len(),
            ..Default::default()
        };
        debug!(pending = records.len(), "fetched pending jobs");

        for (index, record) in records.iter().enumerate() {
            if self.shutdown.is_cancelled() {
                report.skipped = records.len() - index;
                break;
            }

            let job = match record.to_job() {
                Ok(job) => job,
                Err(e) => {
                    warn!(job_id = %record.id, error = %e, "malformed record");
                    report.malformed += 1;
                    self.writer
                        .submit(StatusUpdate::Failed {
                            id: record.id,
                            error_text: e.to_string(),
                        })
                        .await?;
                    continue;
                }
            };

            let Some(outcome) = self.deliver(&job).await else {
                report.skipped = records.len() - index;
                break;
            };
            if outcome.is_success() {
                report.sent += 1;
            } else {
                report.failed += 1;
            }
            self.writer
                .submit(outcome.to_update(job.id, Local::now().naive_local()))
                .await?;
        }

        self.writer.flush().await?;
        Ok(report)
    }

    /// `None` if shutdown interrupted delivery
    async fn deliver(&self, job: &Job) -> Option<Outcome> {
        let outcome = tokio::select! {
            outcome = self.deliverer.attempt(&job.sender, &job.recipient, &job.text) => outcome,
            _ = self.shutdown.cancelled() => {
                info!(job_id = %job.id, "shutdown during delivery, job stays pending");
                return None;
            }
        };

        debug!(
            job_id = %job.id,
            success = outcome.is_success(),
            depth = outcome.depth,
            "job finished"
        );
        Some(outcome)
    }
}

fn log_report(report: &CycleReport) {
    if report.fetched == 0 {
        debug!("no pending jobs");
        return;
    }
    info!(
        fetched = report.fetched,
        sent = report.sent,
        failed = report.failed,
        malformed = report.malformed,
        skipped = report.skipped,
        "cycle complete"
    );
}
