//! Call session persistence for the Silverline call-flow engine.
//!
//! A call session is the durable record of one phone call, keyed by the
//! carrier's call id. This crate owns its lifecycle columns plus the
//! append-only conversation log hanging off it: transcripts, generated
//! responses, and sentiment records. It also keeps the webhook delivery
//! ledger used to answer carrier retries without repeating side effects.
//!
//! All functions take a borrowed `rusqlite::Connection`; callers run them
//! inside `spawn_blocking` with a pooled connection.

use rusqlite::Row;
use silverline_types::{CallPhase, ParseLabelError};
use thiserror::Error;

mod conversation;
mod delivery;
mod session;

pub use conversation::{
    append_transcript, list_responses, list_sentiments, list_transcripts, record_response,
    record_sentiment, AiResponse, NewResponse, NewSentiment, SentimentRecord, Transcript,
};
pub use delivery::{claim_delivery, delivery_key, store_delivery_response, DeliveryClaim};
pub use session::{
    complete_session, get_session, link_identity, load_or_create_session, transition_phase,
    CallSession, IdentityLink,
};

/// Errors that can occur during call session operations.
#[derive(Debug, Error)]
pub enum CallStoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("event log error: {0}")]
    EventLog(#[from] silverline_observe::ObserveError),
    #[error("call session not found: {0}")]
    NotFound(String),
    #[error("illegal phase transition {from} -> {to}")]
    InvalidTransition { from: CallPhase, to: CallPhase },
    #[error("call {call_sid} is no longer in phase {expected}")]
    StalePhase {
        call_sid: String,
        expected: CallPhase,
    },
}

/// Reads a labelled enum column, surfacing unknown labels as conversion errors.
pub(crate) fn label_column<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = ParseLabelError>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: ParseLabelError| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use rusqlite::Connection;

    pub fn test_db() -> Connection {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        silverline_db::run_migrations(&conn).expect("migrations should succeed");
        conn
    }
}
