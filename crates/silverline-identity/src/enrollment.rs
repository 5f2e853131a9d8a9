//! Voice enrollment.
//!
//! Enrollment binds a voiceprint to a subscriber. For a family
//! pre-registration this also creates the subscriber and consumes the
//! signup. All writes share one transaction.

use rusqlite::{params, Connection, OptionalExtension};
use silverline_types::{redact_phone, AuthAction};

use crate::attempts::{record_attempt, NewAttempt};
use crate::resolver::enrollment_phrase;
use crate::signup::find_open_signup;
use crate::subscriber::map_row_to_subscriber;
use crate::{IdentityError, Subscriber, VoiceFeatures};

/// Result of a committed enrollment.
#[derive(Debug, Clone)]
pub struct EnrollmentOutcome {
    pub subscriber: Subscriber,
    /// Id of the pending signup consumed by this enrollment, if any.
    pub consumed_signup: Option<i64>,
    pub attempt_id: i64,
}

const RETURNING_SUBSCRIBER: &str = "RETURNING id, name, phone_number, email, subscription_tier, \
     subscription_status, voice_print_hash, enrollment_phrase, voice_enrollment_completed, \
     monthly_call_limit, family_contact_email, enrolled_by, created_at";

/// Completes voice enrollment for `phone`.
///
/// Lookup follows the resolver: an enrolled active subscriber is
/// re-enrolled, otherwise an open pending signup is consumed, otherwise an
/// unenrolled active subscriber is enrolled.
///
/// # Errors
///
/// - [`IdentityError::MissingVoiceprint`] if the sample produced no voiceprint.
/// - [`IdentityError::NoEnrollmentContext`] if there is nothing to enroll.
/// - [`IdentityError::SignupNotOpen`] if the signup was consumed concurrently.
///
/// On any error nothing is written.
pub fn complete_enrollment(
    conn: &mut Connection,
    session_id: Option<i64>,
    phone: &str,
    features: &VoiceFeatures,
) -> Result<EnrollmentOutcome, IdentityError> {
    let voiceprint = features
        .voiceprint
        .as_ref()
        .ok_or(IdentityError::MissingVoiceprint)?;

    let tx = conn.transaction()?;

    let existing: Option<(i64, String, bool)> = tx
        .query_row(
            "SELECT id, name, voice_enrollment_completed FROM subscribers
             WHERE phone_number = ?1 AND subscription_status = 'active'",
            [phone],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let signup = match existing {
        Some((_, _, true)) => None,
        _ => find_open_signup(&tx, phone)?,
    };

    let (subscriber, consumed_signup) = match (signup, existing) {
        (Some(signup), _) => {
            let phrase = enrollment_phrase(&signup.senior_name, phone);
            let sql = format!(
                "INSERT INTO subscribers
                    (name, phone_number, email, address_street, address_city, address_state,
                     address_zip, subscription_tier, voice_print_hash, enrollment_phrase,
                     voice_enrollment_completed, family_contact_email, enrolled_by)
                 SELECT senior_name, senior_phone, senior_email, address_street, address_city,
                        address_state, address_zip, selected_tier, ?2, ?3, 1, family_email,
                        'family_signup'
                 FROM pending_signups WHERE id = ?1
                 ON CONFLICT(phone_number) DO UPDATE SET
                    voice_print_hash = excluded.voice_print_hash,
                    enrollment_phrase = excluded.enrollment_phrase,
                    voice_enrollment_completed = 1,
                    subscription_status = 'active',
                    updated_at = datetime('now')
                 {RETURNING_SUBSCRIBER}"
            );
            let subscriber = tx.query_row(
                &sql,
                params![signup.id, voiceprint.as_str(), phrase],
                map_row_to_subscriber,
            )?;

            let flipped = tx.execute(
                "UPDATE pending_signups
                 SET status = 'completed', completed_at = datetime('now')
                 WHERE id = ?1 AND status IN ('collecting_info', 'awaiting_voice_enrollment')",
                [signup.id],
            )?;
            if flipped != 1 {
                return Err(IdentityError::SignupNotOpen(signup.id));
            }
            (subscriber, Some(signup.id))
        }
        (None, Some((id, name, _))) => {
            let phrase = enrollment_phrase(&name, phone);
            let sql = format!(
                "UPDATE subscribers
                 SET voice_print_hash = ?2, enrollment_phrase = ?3,
                     voice_enrollment_completed = 1, updated_at = datetime('now')
                 WHERE id = ?1
                 {RETURNING_SUBSCRIBER}"
            );
            let subscriber = tx.query_row(
                &sql,
                params![id, voiceprint.as_str(), phrase],
                map_row_to_subscriber,
            )?;
            (subscriber, None)
        }
        (None, None) => return Err(IdentityError::NoEnrollmentContext),
    };

    let attempt_id = record_attempt(
        &tx,
        &NewAttempt {
            session_id,
            subscriber_id: Some(subscriber.id),
            phone_number: phone,
            confidence: features.confidence,
            audio_quality: features.audio_quality,
            auth_successful: true,
            action: AuthAction::EnrollmentCompleted,
        },
    )?;

    tx.commit()?;
    tracing::info!(
        phone = %redact_phone(phone),
        subscriber_id = subscriber.id,
        consumed_signup = ?consumed_signup,
        "voice enrollment completed"
    );

    Ok(EnrollmentOutcome {
        subscriber,
        consumed_signup,
        attempt_id,
    })
}
