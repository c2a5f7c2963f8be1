//! One delivery attempt: open a session for the sender, send, recover.
//!
//! Recovery is an explicit loop. Every pass opens a fresh scoped connection
//! and releases it before any wait, so no session is held across a
//! cool-down and two sessions for the same account never overlap.

use super::outcome::{FailureClass, Outcome};
use super::policy::{GiveUpReason, Recovery, RetryCounters, RetryPolicy};
use crate::platform::{AccountConnector, AccountId, PlatformError, ScopedConnection};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Error text recorded when the recipient cannot be imported as a contact
pub const CONTACT_ADD_FAILED: &str = "ContactAddMissing: Could not add a recipient to contacts";

enum Step {
    Done(Outcome),
    RetryAfter(Duration),
}

/// Delivers single messages through an `AccountConnector`
#[derive(Clone)]
pub struct Deliverer {
    connector: Arc<dyn AccountConnector>,
    policy: RetryPolicy,
}

impl Deliverer {
    pub fn new(connector: Arc<dyn AccountConnector>, policy: RetryPolicy) -> Self {
        Self { connector, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Deliver `text` from `sender` to `recipient`.
    ///
    /// Never fails: every platform error ends up either recovered from or
    /// folded into a failed `Outcome`.
    pub async fn attempt(&self, sender: &AccountId, recipient: &AccountId, text: &str) -> Outcome {
        let mut counters = RetryCounters::default();

        loop {
            let step = match ScopedConnection::open(self.connector.as_ref(), sender).await {
                Ok(mut conn) => {
                    let step = match conn.send_text(recipient, text).await {
                        Ok(()) => {
                            info!(
                                sender = %sender,
                                recipient = %recipient,
                                depth = counters.depth(),
                                "message delivered"
                            );
                            debug!(sender = %sender, recipient = %recipient, text, "delivered text");
                            Step::Done(Outcome::sent(counters.depth()))
                        }
                        Err(e) => {
                            self.recover(e, &mut counters, Some(&mut conn), sender, recipient)
                                .await
                        }
                    };
                    conn.release().await;
                    step
                }
                Err(e) => self.recover(e, &mut counters, None, sender, recipient).await,
            };

            match step {
                Step::Done(outcome) => return outcome,
                Step::RetryAfter(delay) if delay.is_zero() => {}
                Step::RetryAfter(delay) => sleep(delay).await,
            }
        }
    }

    async fn recover(
        &self,
        err: PlatformError,
        counters: &mut RetryCounters,
        conn: Option<&mut ScopedConnection>,
        sender: &AccountId,
        recipient: &AccountId,
    ) -> Step {
        let recovery = self.policy.recovery_for(&err, counters);
        if recovery != Recovery::RegisterContact {
            return self.settle(err, recovery, counters, sender, recipient);
        }

        info!(sender = %sender, recipient = %recipient, "recipient not found, registering contact");
        let registered = match conn {
            Some(conn) => conn.register_contact(recipient).await,
            None => Err(PlatformError::Connection("no open connection".into())),
        };

        match registered {
            Ok(()) => {
                counters.record(FailureClass::UnknownPeer);
                info!(
                    sender = %sender,
                    recipient = %recipient,
                    depth = counters.depth(),
                    "recipient added to contacts, resending"
                );
                Step::RetryAfter(Duration::ZERO)
            }
            // The platform refused the import itself
            Err(e) if matches!(
                FailureClass::of(&e),
                FailureClass::Rpc | FailureClass::UnknownPeer | FailureClass::InvalidChat
            ) =>
            {
                error!(
                    sender = %sender,
                    recipient = %recipient,
                    error = %e,
                    "could not add recipient to contacts"
                );
                Step::Done(Outcome::failed(CONTACT_ADD_FAILED, counters.depth()))
            }
            // Locks, cool-downs and transport failures recover like a failed send
            Err(e) => {
                let recovery = self.policy.recovery_for(&e, counters);
                self.settle(e, recovery, counters, sender, recipient)
            }
        }
    }

    fn settle(
        &self,
        err: PlatformError,
        recovery: Recovery,
        counters: &mut RetryCounters,
        sender: &AccountId,
        recipient: &AccountId,
    ) -> Step {
        let class = FailureClass::of(&err);

        match recovery {
            // Only reachable from `recover`, which registers before settling
            Recovery::RegisterContact => {
                Step::Done(Outcome::failed(CONTACT_ADD_FAILED, counters.depth()))
            }
            Recovery::Wait(wait) => {
                counters.record(class);
                warn!(
                    sender = %sender,
                    recipient = %recipient,
                    wait_secs = wait.as_secs(),
                    depth = counters.depth(),
                    "platform cool-down, waiting before resend"
                );
                Step::RetryAfter(wait)
            }
            Recovery::Retry(backoff) => {
                counters.record(class);
                warn!(
                    sender = %sender,
                    recipient = %recipient,
                    depth = counters.depth(),
                    error = %err,
                    "session store locked, resending"
                );
                Step::RetryAfter(backoff)
            }
            Recovery::GiveUp(reason) => {
                let error_text = self.terminal_text(&err, class, reason, counters, sender);
                error!(
                    sender = %sender,
                    recipient = %recipient,
                    depth = counters.depth(),
                    error = %error_text,
                    "delivery failed"
                );
                Step::Done(Outcome::failed(error_text, counters.depth()))
            }
        }
    }

    fn terminal_text(
        &self,
        err: &PlatformError,
        class: FailureClass,
        reason: GiveUpReason,
        counters: &RetryCounters,
        sender: &AccountId,
    ) -> String {
        match (class, reason) {
            (FailureClass::PersistenceConflict, _) => format!(
                "Connection Error: {} (probable duplicate session for {})",
                err, sender
            ),
            (FailureClass::UnknownPeer, _) if counters.unknown_peer == 0 => {
                format!("{} (contact registration disabled)", err)
            }
            (FailureClass::UnknownPeer, _) => {
                format!("{} (recipient still unknown after adding to contacts)", err)
            }
            (FailureClass::CoolDown, GiveUpReason::CoolDownTooLong) => format!(
                "{} (exceeds the maximum cool-down of {})",
                err,
                humantime::format_duration(self.policy.max_cool_down)
            ),
            (FailureClass::CoolDown, _) => format!(
                "{} (gave up after {} cool-downs)",
                err, self.policy.max_cool_down_retries
            ),
            (FailureClass::Rpc, _) | (FailureClass::InvalidChat, _) => err.to_string(),
            (FailureClass::Connection, _) | (FailureClass::Unclassified, _) => {
                format!("Connection error: {}", err)
            }
        }
    }
}
