//! Event payload and record types for the call event log.

use serde::{Deserialize, Serialize};
use silverline_types::{AnswerConfidence, CallPhase, ResolverAction};

/// Structured event payloads.
///
/// Payloads are serialised to JSON and stored in the `payload_json` column
/// of the `call_event_log` table. Each variant corresponds to an
/// `event_type` string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    /// The session moved from one lifecycle phase to another.
    PhaseChanged {
        from: CallPhase,
        to: CallPhase,
        /// Webhook stage that caused the move.
        stage: String,
    },

    /// The identity resolver reached a decision.
    IdentityResolved {
        action: ResolverAction,
        /// Voiceprint similarity when a comparison happened.
        similarity: Option<f64>,
        attempt_id: i64,
    },

    /// A voiceprint was committed.
    EnrollmentCompleted {
        subscriber_id: i64,
        /// Whether a pending family signup was consumed.
        from_pending_signup: bool,
    },

    /// A support question was answered.
    TurnAnswered {
        confidence: AnswerConfidence,
        knowledge_entries: usize,
        escalate: bool,
    },

    /// The call was handed to a human.
    Escalated {
        /// Short machine-readable reason, e.g. `sentiment` or `identity_store`.
        reason: String,
    },

    /// A duplicate webhook delivery was answered from the ledger.
    WebhookReplayed { stage: String },

    /// The carrier reported the call finished.
    CallCompleted { duration_seconds: Option<i64> },
}

impl EventPayload {
    /// Returns the canonical event type string for this payload.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PhaseChanged { .. } => "PHASE_CHANGED",
            Self::IdentityResolved { .. } => "IDENTITY_RESOLVED",
            Self::EnrollmentCompleted { .. } => "ENROLLMENT_COMPLETED",
            Self::TurnAnswered { .. } => "TURN_ANSWERED",
            Self::Escalated { .. } => "ESCALATED",
            Self::WebhookReplayed { .. } => "WEBHOOK_REPLAYED",
            Self::CallCompleted { .. } => "CALL_COMPLETED",
        }
    }
}

/// A single row from the `call_event_log` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEvent {
    /// Auto-incremented row ID.
    pub id: i64,
    /// Carrier call id the event belongs to.
    pub call_sid: String,
    /// The specific event type (e.g., `PHASE_CHANGED`).
    pub event_type: String,
    /// Sequence number, starting at 1 for each call.
    pub seq: i64,
    /// The structured event payload as a JSON string.
    pub payload_json: String,
    /// Timestamp of when the event occurred.
    pub occurred_at: String,
}

impl CallEvent {
    /// Decodes the stored payload.
    pub fn payload(&self) -> Result<EventPayload, serde_json::Error> {
        serde_json::from_str(&self.payload_json)
    }
}
