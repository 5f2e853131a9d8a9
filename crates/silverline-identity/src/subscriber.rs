//! Subscriber records.
//!
//! Subscribers are never deleted; deactivation flips the status column.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use silverline_types::{SubscriberStatus, SubscriptionTier};

use crate::{label_column, IdentityError, Voiceprint};

/// A paying senior. Phone number is unique across subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subscriber {
    pub id: i64,
    pub name: String,
    pub phone_number: String,
    pub email: Option<String>,
    pub tier: SubscriptionTier,
    pub status: SubscriberStatus,
    #[serde(skip)]
    pub voiceprint: Option<Voiceprint>,
    pub enrollment_phrase: Option<String>,
    pub voice_enrollment_completed: bool,
    pub monthly_call_limit: Option<i64>,
    pub family_contact_email: Option<String>,
    pub enrolled_by: Option<String>,
    pub created_at: String,
}

impl Subscriber {
    /// Whether this subscriber can authenticate by voice.
    pub fn is_enrolled(&self) -> bool {
        self.voice_enrollment_completed && self.voiceprint.is_some()
    }
}

/// Fields for a directly created subscriber.
#[derive(Debug, Clone)]
pub struct NewSubscriber<'a> {
    pub name: &'a str,
    pub phone_number: &'a str,
    pub email: Option<&'a str>,
    pub tier: SubscriptionTier,
    pub monthly_call_limit: Option<i64>,
}

const SUBSCRIBER_COLUMNS: &str = "id, name, phone_number, email, subscription_tier, \
     subscription_status, voice_print_hash, enrollment_phrase, voice_enrollment_completed, \
     monthly_call_limit, family_contact_email, enrolled_by, created_at";

pub(crate) fn map_row_to_subscriber(row: &Row) -> rusqlite::Result<Subscriber> {
    let voiceprint: Option<String> = row.get(6)?;
    Ok(Subscriber {
        id: row.get(0)?,
        name: row.get(1)?,
        phone_number: row.get(2)?,
        email: row.get(3)?,
        tier: label_column(row, 4)?,
        status: label_column(row, 5)?,
        voiceprint: voiceprint.map(Voiceprint::new),
        enrollment_phrase: row.get(7)?,
        voice_enrollment_completed: row.get(8)?,
        monthly_call_limit: row.get(9)?,
        family_contact_email: row.get(10)?,
        enrolled_by: row.get(11)?,
        created_at: row.get(12)?,
    })
}

/// Inserts a subscriber that has not yet enrolled a voice.
pub fn insert_subscriber(
    conn: &Connection,
    subscriber: &NewSubscriber<'_>,
) -> Result<Subscriber, IdentityError> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT subscription_status FROM subscribers WHERE phone_number = ?1",
            [subscriber.phone_number],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(status) = existing {
        return Err(IdentityError::DuplicateIdentity {
            existing: format!("subscriber:{status}"),
        });
    }

    let sql = format!(
        "INSERT INTO subscribers (name, phone_number, email, subscription_tier, monthly_call_limit)
         VALUES (?1, ?2, ?3, ?4, ?5)
         RETURNING {SUBSCRIBER_COLUMNS}"
    );
    let stored = conn.query_row(
        &sql,
        params![
            subscriber.name,
            subscriber.phone_number,
            subscriber.email,
            subscriber.tier.as_str(),
            subscriber.monthly_call_limit,
        ],
        map_row_to_subscriber,
    )?;
    Ok(stored)
}

/// Fetches a subscriber by id.
pub fn get_subscriber(conn: &Connection, id: i64) -> Result<Subscriber, IdentityError> {
    let sql = format!("SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE id = ?1");
    conn.query_row(&sql, [id], map_row_to_subscriber)
        .optional()?
        .ok_or_else(|| IdentityError::NotFound(format!("subscriber {id}")))
}

/// Looks up a subscriber by phone regardless of status.
pub fn find_subscriber_by_phone(
    conn: &Connection,
    phone: &str,
) -> Result<Option<Subscriber>, IdentityError> {
    let sql = format!("SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE phone_number = ?1");
    Ok(conn.query_row(&sql, [phone], map_row_to_subscriber).optional()?)
}

/// Looks up an active subscriber by phone.
pub fn find_active_subscriber(
    conn: &Connection,
    phone: &str,
) -> Result<Option<Subscriber>, IdentityError> {
    let sql = format!(
        "SELECT {SUBSCRIBER_COLUMNS} FROM subscribers
         WHERE phone_number = ?1 AND subscription_status = 'active'"
    );
    Ok(conn.query_row(&sql, [phone], map_row_to_subscriber).optional()?)
}
