use crate::platform::PlatformError;
use crate::queue::{JobId, StatusUpdate};
use chrono::NaiveDateTime;

/// Result of one delivery attempt, recovery hops included
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub status: OutcomeStatus,
    /// Set only on failure
    pub error_text: Option<String>,
    /// Recovery hops taken before the terminal result
    pub depth: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Success,
    Error,
}

impl Outcome {
    pub fn sent(depth: u32) -> Self {
        Self {
            status: OutcomeStatus::Success,
            error_text: None,
            depth,
        }
    }

    pub fn failed(error_text: impl Into<String>, depth: u32) -> Self {
        Self {
            status: OutcomeStatus::Error,
            error_text: Some(error_text.into()),
            depth,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    /// Status row change for this outcome
    pub fn to_update(&self, id: JobId, now: NaiveDateTime) -> StatusUpdate {
        match self.status {
            OutcomeStatus::Success => StatusUpdate::Sent { id, at: now },
            OutcomeStatus::Error => StatusUpdate::Failed {
                id,
                error_text: self.error_text.clone().unwrap_or_default(),
            },
        }
    }
}

/// Failure classes, grouped by how they are recovered from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Recipient not resolvable; registering it as a contact may fix it
    UnknownPeer,
    /// Platform asked us to wait
    CoolDown,
    /// Session storage contended by another session
    PersistenceConflict,
    /// Request shape rejected by the platform
    Rpc,
    InvalidChat,
    /// Credentials or transport
    Connection,
    Unclassified,
}

impl FailureClass {
    pub fn of(err: &PlatformError) -> Self {
        match err {
            PlatformError::UnknownPeer(_) => FailureClass::UnknownPeer,
            PlatformError::CoolDown { .. } => FailureClass::CoolDown,
            PlatformError::PersistenceConflict(_) => FailureClass::PersistenceConflict,
            PlatformError::Rpc(_) | PlatformError::ContactAddMissing(_) => FailureClass::Rpc,
            PlatformError::InvalidChat(_) => FailureClass::InvalidChat,
            PlatformError::InvalidCredentials(_) | PlatformError::Connection(_) => {
                FailureClass::Connection
            }
            PlatformError::Other(_) => FailureClass::Unclassified,
        }
    }
}
