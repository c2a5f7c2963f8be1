//! Per-failure-class retry policy.
//!
//! Each recoverable class has its own cap. Terminal classes never retry.

use super::outcome::FailureClass;
use crate::platform::PlatformError;
use crate::retry::RetrySchedule;
use std::time::Duration;

/// Caps and backoff for the recoverable failure classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Contact registrations per attempt before an unknown peer is terminal
    pub max_unknown_peer_retries: u32,
    /// Cool-downs honoured per attempt
    pub max_cool_down_retries: u32,
    /// A single cool-down longer than this is terminal
    pub max_cool_down: Duration,
    /// Session-store contention
    pub conflict: RetrySchedule,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_unknown_peer_retries: 1,
            max_cool_down_retries: 5,
            max_cool_down: Duration::from_secs(3600),
            conflict: RetrySchedule::fixed(10, Duration::from_millis(500)),
        }
    }
}

/// Retries already spent in one attempt, per class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryCounters {
    pub unknown_peer: u32,
    pub cool_down: u32,
    pub conflict: u32,
}

impl RetryCounters {
    /// Total recovery hops
    pub fn depth(&self) -> u32 {
        self.unknown_peer + self.cool_down + self.conflict
    }

    pub fn record(&mut self, class: FailureClass) {
        match class {
            FailureClass::UnknownPeer => self.unknown_peer += 1,
            FailureClass::CoolDown => self.cool_down += 1,
            FailureClass::PersistenceConflict => self.conflict += 1,
            _ => {}
        }
    }
}

/// What to do about a failed send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Import the recipient as a contact, then send again
    RegisterContact,
    /// Honour a platform cool-down, then send again
    Wait(Duration),
    /// Back off, then send again
    Retry(Duration),
    /// Terminal; the reason is the class's cap or the class itself
    GiveUp(GiveUpReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    Terminal,
    RetriesExhausted,
    CoolDownTooLong,
}

impl RetryPolicy {
    pub fn recovery_for(&self, err: &PlatformError, counters: &RetryCounters) -> Recovery {
        match (FailureClass::of(err), err) {
            (FailureClass::UnknownPeer, _) => {
                if counters.unknown_peer < self.max_unknown_peer_retries {
                    Recovery::RegisterContact
                } else {
                    Recovery::GiveUp(GiveUpReason::RetriesExhausted)
                }
            }
            (FailureClass::CoolDown, PlatformError::CoolDown { seconds }) => {
                let wait = Duration::from_secs(*seconds);
                if wait > self.max_cool_down {
                    Recovery::GiveUp(GiveUpReason::CoolDownTooLong)
                } else if counters.cool_down < self.max_cool_down_retries {
                    Recovery::Wait(wait)
                } else {
                    Recovery::GiveUp(GiveUpReason::RetriesExhausted)
                }
            }
            (FailureClass::PersistenceConflict, _) => {
                if self.conflict.allows(counters.conflict) {
                    Recovery::Retry(self.conflict.backoff.delay(counters.conflict))
                } else {
                    Recovery::GiveUp(GiveUpReason::RetriesExhausted)
                }
            }
            _ => Recovery::GiveUp(GiveUpReason::Terminal),
        }
    }
}
