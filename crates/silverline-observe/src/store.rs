//! Persistence operations for the call event log.
//!
//! All writes go through [`emit_event`], which serialises the payload,
//! assigns the next per-call sequence number, and inserts in a single
//! statement.

use rusqlite::{params, Connection};
use silverline_types::CallPhase;

use crate::error::ObserveError;
use crate::event::{CallEvent, EventPayload};

/// Appends an event to the log for `call_sid`.
///
/// # Errors
///
/// Returns `ObserveError::Database` on SQL failure or
/// `ObserveError::Serialization` if the payload cannot be serialised.
pub fn emit_event(
    conn: &Connection,
    call_sid: &str,
    payload: &EventPayload,
) -> Result<CallEvent, ObserveError> {
    let payload_json = serde_json::to_string(payload)?;
    let event_type = payload.event_type();

    // Sequence assignment and insert happen in one statement so two writers
    // cannot observe the same MAX(seq).
    let (id, seq, occurred_at) = conn.query_row(
        "INSERT INTO call_event_log (call_sid, event_type, seq, payload_json, occurred_at)
         VALUES (
            ?1, ?2,
            (SELECT COALESCE(MAX(seq), 0) + 1 FROM call_event_log WHERE call_sid = ?1),
            ?3,
            datetime('now')
         )
         RETURNING id, seq, occurred_at",
        params![call_sid, event_type, payload_json],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
            ))
        },
    )?;

    Ok(CallEvent {
        id,
        call_sid: call_sid.to_string(),
        event_type: event_type.to_string(),
        seq,
        payload_json,
        occurred_at,
    })
}

/// Filter criteria for querying one call's events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Only events of this type.
    pub event_type: Option<String>,
    /// Only events with a sequence number greater than this.
    pub after_seq: Option<i64>,
    /// Maximum number of events to return (default: 100).
    pub limit: Option<i64>,
}

/// Returns events for `call_sid` in sequence order.
///
/// # Errors
///
/// Returns `ObserveError::Database` on SQL failure.
pub fn query_events(
    conn: &Connection,
    call_sid: &str,
    filter: &EventFilter,
) -> Result<Vec<CallEvent>, ObserveError> {
    let mut stmt = conn.prepare(
        "SELECT id, call_sid, event_type, seq, payload_json, occurred_at
         FROM call_event_log
         WHERE call_sid = ?1
           AND (?2 IS NULL OR event_type = ?2)
           AND seq > COALESCE(?3, 0)
         ORDER BY seq ASC
         LIMIT ?4",
    )?;

    let rows = stmt.query_map(
        params![
            call_sid,
            filter.event_type,
            filter.after_seq,
            filter.limit.unwrap_or(100)
        ],
        |row| {
            Ok(CallEvent {
                id: row.get(0)?,
                call_sid: row.get(1)?,
                event_type: row.get(2)?,
                seq: row.get(3)?,
                payload_json: row.get(4)?,
                occurred_at: row.get(5)?,
            })
        },
    )?;

    let mut events = Vec::new();
    for row in rows {
        events.push(row?);
    }
    Ok(events)
}

/// Reconstructs the phase walk for a call from its `PHASE_CHANGED` events.
///
/// The walk starts at `INCOMING`; each recorded change contributes its
/// destination phase.
///
/// # Errors
///
/// Returns `ObserveError` if the log cannot be read or a payload is corrupt.
pub fn phase_path(conn: &Connection, call_sid: &str) -> Result<Vec<CallPhase>, ObserveError> {
    let events = query_events(
        conn,
        call_sid,
        &EventFilter {
            event_type: Some("PHASE_CHANGED".to_string()),
            limit: Some(i64::MAX),
            ..EventFilter::default()
        },
    )?;

    let mut path = vec![CallPhase::Incoming];
    for event in events {
        if let EventPayload::PhaseChanged { to, .. } = event.payload()? {
            path.push(to);
        }
    }
    Ok(path)
}
