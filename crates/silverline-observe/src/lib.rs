//! Per-call audit trail for the Silverline call-flow engine.
//!
//! Every decision the orchestrator takes about a call (phase changes,
//! identity outcomes, escalations, replays of duplicate webhooks) is appended
//! to the `call_event_log` table with a sequence number local to that call.
//! The log is append-only; it is how an operator reconstructs why a caller
//! ended up where they did, and how tests check that the recorded phases form
//! a legal path.
//!
//! # Event types
//!
//! | Event | Emitted when |
//! |-------|--------------|
//! | `PHASE_CHANGED` | the session moves between lifecycle phases |
//! | `IDENTITY_RESOLVED` | the voice identity resolver returns a decision |
//! | `ENROLLMENT_COMPLETED` | a voiceprint is committed for a subscriber |
//! | `TURN_ANSWERED` | a support question received a generated answer |
//! | `ESCALATED` | the call is handed to a human agent |
//! | `WEBHOOK_REPLAYED` | a duplicate delivery was answered from the ledger |
//! | `CALL_COMPLETED` | the carrier reported the call finished |
//!
//! Payloads never carry phone numbers or voiceprints.

mod error;
mod event;
mod store;

pub use error::ObserveError;
pub use event::{CallEvent, EventPayload};
pub use store::{emit_event, phase_path, query_events, EventFilter};

#[cfg(test)]
mod tests;
