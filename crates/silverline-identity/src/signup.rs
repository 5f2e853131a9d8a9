//! Family pre-registrations.
//!
//! A sponsor registers a senior ahead of time; the senior's first call then
//! consumes the signup through enrollment. A signup is usable only while its
//! status is open and `expires_at` is in the future.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use silverline_types::{SignupStatus, SubscriptionTier};
use uuid::Uuid;

use crate::{label_column, IdentityError};

/// A stored pre-registration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingSignup {
    pub id: i64,
    pub signup_token: String,
    pub senior_name: String,
    pub senior_phone: String,
    pub senior_email: Option<String>,
    pub family_name: String,
    pub family_email: String,
    pub family_phone: Option<String>,
    pub relationship: Option<String>,
    pub tier: SubscriptionTier,
    pub status: SignupStatus,
    pub expires_at: String,
    pub completed_at: Option<String>,
    pub created_at: String,
}

/// Validated input for a new pre-registration. Phones must already be normalized.
#[derive(Debug, Clone, Default)]
pub struct NewSignup {
    pub senior_name: String,
    pub senior_phone: String,
    pub senior_email: Option<String>,
    pub address_street: Option<String>,
    pub address_city: Option<String>,
    pub address_state: Option<String>,
    pub address_zip: Option<String>,
    pub family_name: String,
    pub family_email: String,
    pub family_phone: Option<String>,
    pub relationship: Option<String>,
    pub tier: Option<SubscriptionTier>,
}

const SIGNUP_COLUMNS: &str = "id, signup_token, senior_name, senior_phone, senior_email, \
     family_name, family_email, family_phone, relationship, selected_tier, status, \
     expires_at, completed_at, created_at";

pub(crate) fn map_row_to_signup(row: &Row) -> rusqlite::Result<PendingSignup> {
    Ok(PendingSignup {
        id: row.get(0)?,
        signup_token: row.get(1)?,
        senior_name: row.get(2)?,
        senior_phone: row.get(3)?,
        senior_email: row.get(4)?,
        family_name: row.get(5)?,
        family_email: row.get(6)?,
        family_phone: row.get(7)?,
        relationship: row.get(8)?,
        tier: label_column(row, 9)?,
        status: label_column(row, 10)?,
        expires_at: row.get(11)?,
        completed_at: row.get(12)?,
        created_at: row.get(13)?,
    })
}

/// Creates a pre-registration that expires after `ttl_days`.
///
/// The duplicate check and the insert share one transaction: a number that
/// already has a subscriber (any status) or an open, unexpired signup is
/// rejected with [`IdentityError::DuplicateIdentity`] and nothing is written.
pub fn create_pending_signup(
    conn: &mut Connection,
    signup: &NewSignup,
    ttl_days: u32,
) -> Result<PendingSignup, IdentityError> {
    let tx = conn.transaction()?;

    let subscriber_status: Option<String> = tx
        .query_row(
            "SELECT subscription_status FROM subscribers WHERE phone_number = ?1",
            [&signup.senior_phone],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(status) = subscriber_status {
        return Err(IdentityError::DuplicateIdentity {
            existing: format!("subscriber:{status}"),
        });
    }

    let open_status: Option<String> = tx
        .query_row(
            "SELECT status FROM pending_signups
             WHERE senior_phone = ?1
               AND status IN ('collecting_info', 'awaiting_voice_enrollment')
               AND expires_at > datetime('now')
             ORDER BY id DESC LIMIT 1",
            [&signup.senior_phone],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(status) = open_status {
        return Err(IdentityError::DuplicateIdentity {
            existing: format!("pending_signup:{status}"),
        });
    }

    let token = Uuid::new_v4().to_string();
    let tier = signup.tier.unwrap_or(SubscriptionTier::Basic);
    let sql = format!(
        "INSERT INTO pending_signups
            (signup_token, senior_name, senior_phone, senior_email,
             address_street, address_city, address_state, address_zip,
             family_name, family_email, family_phone, relationship,
             selected_tier, status, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                 'awaiting_voice_enrollment', datetime('now', ?14))
         RETURNING {SIGNUP_COLUMNS}"
    );
    let stored = tx.query_row(
        &sql,
        params![
            token,
            signup.senior_name,
            signup.senior_phone,
            signup.senior_email,
            signup.address_street,
            signup.address_city,
            signup.address_state,
            signup.address_zip,
            signup.family_name,
            signup.family_email,
            signup.family_phone,
            signup.relationship,
            tier.as_str(),
            format!("+{ttl_days} days"),
        ],
        map_row_to_signup,
    )?;

    tx.commit()?;
    tracing::info!(
        signup_id = stored.id,
        phone = %silverline_types::redact_phone(&stored.senior_phone),
        "pending signup created"
    );
    Ok(stored)
}

/// Returns the newest open, unexpired signup for `phone`.
pub fn find_open_signup(
    conn: &Connection,
    phone: &str,
) -> Result<Option<PendingSignup>, IdentityError> {
    let sql = format!(
        "SELECT {SIGNUP_COLUMNS} FROM pending_signups
         WHERE senior_phone = ?1
           AND status IN ('collecting_info', 'awaiting_voice_enrollment')
           AND expires_at > datetime('now')
         ORDER BY id DESC LIMIT 1"
    );
    Ok(conn.query_row(&sql, [phone], map_row_to_signup).optional()?)
}

/// Marks every open signup past its expiry as `expired`. Returns the count.
pub fn expire_pending_signups(conn: &Connection) -> Result<usize, IdentityError> {
    let changed = conn.execute(
        "UPDATE pending_signups SET status = 'expired'
         WHERE status IN ('collecting_info', 'awaiting_voice_enrollment')
           AND expires_at <= datetime('now')",
        [],
    )?;
    Ok(changed)
}
