//! Call session lifecycle.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use silverline_observe::{emit_event, EventPayload};
use silverline_types::{CallPhase, SessionStatus};

use crate::{label_column, CallStoreError};

/// One phone call from ring to termination.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallSession {
    /// Internal database ID.
    pub id: i64,
    /// Carrier call id (unique).
    pub call_sid: String,
    /// Caller's phone number.
    pub phone_number: String,
    /// Subscriber linked once identity is established.
    pub subscriber_id: Option<i64>,
    /// Current lifecycle phase.
    pub phase: CallPhase,
    /// Whether the carrier still considers the call live.
    pub status: SessionStatus,
    /// Outcome of the most recent authentication attempt.
    pub authentication_success: Option<bool>,
    /// Similarity reported by the most recent authentication attempt.
    pub auth_confidence: Option<f64>,
    /// Most recent voice authentication attempt.
    pub voice_auth_attempt_id: Option<i64>,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub duration_seconds: Option<i64>,
}

const SESSION_COLUMNS: &str = "id, call_sid, phone_number, subscriber_id, phase, status,
    authentication_success, auth_confidence, voice_auth_attempt_id,
    started_at, ended_at, duration_seconds";

fn map_row_to_session(row: &Row) -> rusqlite::Result<CallSession> {
    Ok(CallSession {
        id: row.get(0)?,
        call_sid: row.get(1)?,
        phone_number: row.get(2)?,
        subscriber_id: row.get(3)?,
        phase: label_column(row, 4)?,
        status: label_column(row, 5)?,
        authentication_success: row.get(6)?,
        auth_confidence: row.get(7)?,
        voice_auth_attempt_id: row.get(8)?,
        started_at: row.get(9)?,
        ended_at: row.get(10)?,
        duration_seconds: row.get(11)?,
    })
}

/// Retrieves a session by carrier call id.
pub fn get_session(
    conn: &Connection,
    call_sid: &str,
) -> Result<Option<CallSession>, CallStoreError> {
    let session = conn
        .query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM call_sessions WHERE call_sid = ?1"),
            [call_sid],
            map_row_to_session,
        )
        .optional()?;
    Ok(session)
}

/// Loads the session for `call_sid`, creating it in `INCOMING` if this is the
/// first webhook seen for the call.
///
/// Returns the session and whether it was created by this call.
pub fn load_or_create_session(
    conn: &Connection,
    call_sid: &str,
    phone_number: &str,
) -> Result<(CallSession, bool), CallStoreError> {
    let inserted = conn.execute(
        "INSERT INTO call_sessions (call_sid, phone_number, phase)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(call_sid) DO NOTHING",
        params![call_sid, phone_number, CallPhase::Incoming.as_str()],
    )?;

    let session = get_session(conn, call_sid)?
        .ok_or_else(|| CallStoreError::NotFound(call_sid.to_string()))?;

    if inserted > 0 {
        tracing::debug!(call_sid, "created call session");
    }

    Ok((session, inserted > 0))
}

/// Moves a session from `from` to `to` and records the change in the event log.
///
/// The update is a compare-and-set on the phase column: if another request
/// already moved the session, nothing is written and `StalePhase` is
/// returned. The phase update and its log entry commit together.
///
/// # Errors
///
/// Returns `InvalidTransition` if the transition table forbids the move.
pub fn transition_phase(
    conn: &Connection,
    call_sid: &str,
    from: CallPhase,
    to: CallPhase,
    stage: &str,
) -> Result<(), CallStoreError> {
    if !from.can_transition_to(to) {
        return Err(CallStoreError::InvalidTransition { from, to });
    }

    let tx = conn.unchecked_transaction()?;
    let changed = tx.execute(
        "UPDATE call_sessions SET phase = ?1, updated_at = datetime('now')
         WHERE call_sid = ?2 AND phase = ?3",
        params![to.as_str(), call_sid, from.as_str()],
    )?;

    if changed == 0 {
        return Err(CallStoreError::StalePhase {
            call_sid: call_sid.to_string(),
            expected: from,
        });
    }

    emit_event(
        &tx,
        call_sid,
        &EventPayload::PhaseChanged {
            from,
            to,
            stage: stage.to_string(),
        },
    )?;
    tx.commit()?;

    tracing::info!(call_sid, stage, from = %from, to = %to, "call phase changed");
    Ok(())
}

/// Identity outcome to attach to a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdentityLink {
    pub subscriber_id: Option<i64>,
    pub attempt_id: i64,
    pub confidence: f64,
    pub success: bool,
}

/// Records the latest authentication attempt on the session.
///
/// A failed attempt never clears a subscriber already linked by an earlier
/// step of the same call.
pub fn link_identity(
    conn: &Connection,
    session_id: i64,
    link: &IdentityLink,
) -> Result<(), CallStoreError> {
    let changed = conn.execute(
        "UPDATE call_sessions SET
            subscriber_id = COALESCE(?1, subscriber_id),
            voice_auth_attempt_id = ?2,
            auth_confidence = ?3,
            authentication_success = ?4,
            updated_at = datetime('now')
         WHERE id = ?5",
        params![
            link.subscriber_id,
            link.attempt_id,
            link.confidence,
            link.success,
            session_id
        ],
    )?;
    if changed == 0 {
        return Err(CallStoreError::NotFound(session_id.to_string()));
    }
    Ok(())
}

/// Marks the call finished as reported by the carrier.
///
/// Completion is recorded once; later status callbacks leave the first end
/// time and duration untouched. Returns `false` if the call was unknown.
pub fn complete_session(
    conn: &Connection,
    call_sid: &str,
    duration_seconds: Option<i64>,
) -> Result<bool, CallStoreError> {
    let changed = conn.execute(
        "UPDATE call_sessions SET
            status = ?1,
            ended_at = COALESCE(ended_at, datetime('now')),
            duration_seconds = COALESCE(duration_seconds, ?2),
            updated_at = datetime('now')
         WHERE call_sid = ?3",
        params![SessionStatus::Completed.as_str(), duration_seconds, call_sid],
    )?;
    Ok(changed > 0)
}
