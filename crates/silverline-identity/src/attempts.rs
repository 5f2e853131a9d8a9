//! Voice authentication attempts. One immutable row per identity decision.

use rusqlite::{params, Connection, Row};
use serde::Serialize;
use silverline_types::AuthAction;

use crate::{label_column, AudioQuality, IdentityError};

/// A stored attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceAuthAttempt {
    pub id: i64,
    pub session_id: Option<i64>,
    pub subscriber_id: Option<i64>,
    pub phone_number: String,
    pub confidence: f64,
    pub audio_quality: String,
    pub auth_successful: bool,
    pub action: AuthAction,
    pub created_at: String,
}

/// Fields for a new attempt row.
#[derive(Debug, Clone, Copy)]
pub struct NewAttempt<'a> {
    pub session_id: Option<i64>,
    pub subscriber_id: Option<i64>,
    pub phone_number: &'a str,
    pub confidence: f64,
    pub audio_quality: AudioQuality,
    pub auth_successful: bool,
    pub action: AuthAction,
}

/// Writes an attempt and returns its id.
pub fn record_attempt(conn: &Connection, attempt: &NewAttempt<'_>) -> Result<i64, IdentityError> {
    let id = conn.query_row(
        "INSERT INTO voice_auth_attempts
            (session_id, subscriber_id, phone_number, confidence, audio_quality,
             auth_successful, action_taken)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         RETURNING id",
        params![
            attempt.session_id,
            attempt.subscriber_id,
            attempt.phone_number,
            attempt.confidence,
            attempt.audio_quality.as_str(),
            attempt.auth_successful,
            attempt.action.as_str(),
        ],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Lists the attempts made for a phone number, oldest first.
pub fn list_attempts(
    conn: &Connection,
    phone: &str,
) -> Result<Vec<VoiceAuthAttempt>, IdentityError> {
    let mut stmt = conn.prepare(
        "SELECT id, session_id, subscriber_id, phone_number, confidence, audio_quality,
                auth_successful, action_taken, created_at
         FROM voice_auth_attempts WHERE phone_number = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map([phone], map_row_to_attempt)?;
    let mut attempts = Vec::new();
    for row in rows {
        attempts.push(row?);
    }
    Ok(attempts)
}

fn map_row_to_attempt(row: &Row) -> rusqlite::Result<VoiceAuthAttempt> {
    Ok(VoiceAuthAttempt {
        id: row.get(0)?,
        session_id: row.get(1)?,
        subscriber_id: row.get(2)?,
        phone_number: row.get(3)?,
        confidence: row.get(4)?,
        audio_quality: row.get(5)?,
        auth_successful: row.get(6)?,
        action: label_column(row, 7)?,
        created_at: row.get(8)?,
    })
}
