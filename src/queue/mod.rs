//! Job queue storage.
//!
//! A job is one row of the `messages` table: who sends, who receives, what
//! text, and the delivery status once the dispatcher has handled it. Rows are
//! created by whoever fills the queue; this crate only reads pending rows and
//! writes terminal statuses back.

pub mod memory;
pub mod sqlite;
pub mod writer;

use crate::platform::AccountId;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::fmt;

pub use memory::MemoryQueueStore;
pub use sqlite::SqliteQueueStore;
pub use writer::{StatusWriter, WriterClosed};

/// Format used for `date_sent`
pub const SENT_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Row identifier in the queue store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub i64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Terminal delivery status. Pending is the absence of a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Sent,
    Failed,
}

impl JobStatus {
    pub const fn code(self) -> i64 {
        match self {
            JobStatus::Sent => 1,
            JobStatus::Failed => 2,
        }
    }

    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(JobStatus::Sent),
            2 => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// Raw row as stored. Any column may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobRecord {
    pub id: JobId,
    pub sender: Option<String>,
    pub recipient: Option<String>,
    pub text: Option<String>,
    pub status: Option<JobStatus>,
    pub sent_at: Option<String>,
    pub error_text: Option<String>,
}

/// A record with every field delivery needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    pub sender: AccountId,
    pub recipient: AccountId,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed record {id}: missing {field}")]
pub struct MalformedRecord {
    pub id: JobId,
    pub field: &'static str,
}

impl JobRecord {
    /// Extract the delivery fields, failing on the first one that is missing or blank
    pub fn to_job(&self) -> Result<Job, MalformedRecord> {
        fn required<'a>(
            id: JobId,
            value: &'a Option<String>,
            field: &'static str,
        ) -> Result<&'a str, MalformedRecord> {
            match value.as_deref().map(str::trim) {
                Some(v) if !v.is_empty() => Ok(v),
                _ => Err(MalformedRecord { id, field }),
            }
        }

        let sender = required(self.id, &self.sender, "sender")?;
        let recipient = required(self.id, &self.recipient, "recipient")?;
        let text = self
            .text
            .as_ref()
            .filter(|t| !t.is_empty())
            .ok_or(MalformedRecord {
                id: self.id,
                field: "message_text",
            })?;

        Ok(Job {
            id: self.id,
            sender: AccountId::new(sender),
            recipient: AccountId::new(recipient),
            text: text.clone(),
        })
    }
}

/// Which rows `fetch` returns, keyed on the status column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobFilter {
    /// Status absent
    Pending,
    /// Status equal to the given value
    Status(JobStatus),
    /// Status present and different from the given value
    NotStatus(JobStatus),
}

impl JobFilter {
    pub fn matches(&self, status: Option<JobStatus>) -> bool {
        match self {
            JobFilter::Pending => status.is_none(),
            JobFilter::Status(s) => status == Some(*s),
            JobFilter::NotStatus(s) => status.is_some() && status != Some(*s),
        }
    }
}

/// One named column value for `update`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Status(JobStatus),
    SentAt(NaiveDateTime),
    ErrorText(String),
}

/// Terminal status for one job, as produced by the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    Sent { id: JobId, at: NaiveDateTime },
    Failed { id: JobId, error_text: String },
}

impl StatusUpdate {
    pub fn id(&self) -> JobId {
        match self {
            StatusUpdate::Sent { id, .. } | StatusUpdate::Failed { id, .. } => *id,
        }
    }

    pub fn fields(&self) -> Vec<FieldValue> {
        match self {
            StatusUpdate::Sent { at, .. } => {
                vec![FieldValue::Status(JobStatus::Sent), FieldValue::SentAt(*at)]
            }
            StatusUpdate::Failed { error_text, .. } => vec![
                FieldValue::Status(JobStatus::Failed),
                FieldValue::ErrorText(error_text.clone()),
            ],
        }
    }
}

/// Row counts per status, for operators
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub sent: u64,
    pub failed: u64,
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Another writer holds the store; retrying later may succeed
    #[error("store is locked: {0}")]
    Conflict(String),

    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Persistent job table
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Fresh snapshot of the rows matching `filter`, in id order
    async fn fetch(&self, filter: JobFilter) -> StoreResult<Vec<JobRecord>>;

    /// Replace the named fields of one row and persist the change
    async fn update(&self, id: JobId, fields: &[FieldValue]) -> StoreResult<()>;

    async fn status_counts(&self) -> StoreResult<StatusCounts>;
}
