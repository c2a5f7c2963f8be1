//! Courier - queued account-to-account message dispatcher
//!
//! Polls a job table for pending messages, delivers each one through an
//! account-bound session with the messaging platform, and records the
//! outcome back on the job.
//!
//! - `queue`: job records, the store abstraction and the status writer
//! - `platform`: connection traits, credential lookup and connectors
//! - `delivery`: one attempt with classified recovery
//! - `dispatch`: the polling loop

pub mod delivery;
pub mod dispatch;
pub mod platform;
pub mod queue;
pub mod retry;
