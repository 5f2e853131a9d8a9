//! Caller identity for the Silverline call-flow engine.
//!
//! Decides who is on the phone. A caller is identified by phone number plus
//! an optional voice sample, and lands in exactly one of four situations:
//! an enrolled subscriber (authenticate by voice), a family pre-registration
//! awaiting first enrollment, a subscriber who never finished enrollment, or
//! somebody unknown. The [`VoiceIdentityResolver`] walks those situations in
//! that order and records every decision as a voice authentication attempt.
//!
//! Voice comparison sits behind [`VoiceprintComparator`]. The shipped
//! [`DigestComparator`] only checks fingerprint equality; a real biometric
//! engine plugs in without touching the resolver.

use thiserror::Error;

mod attempts;
mod enrollment;
mod phone;
mod resolver;
mod signup;
mod subscriber;
mod voiceprint;

pub use attempts::{list_attempts, record_attempt, NewAttempt, VoiceAuthAttempt};
pub use enrollment::{complete_enrollment, EnrollmentOutcome};
pub use phone::normalize_phone;
pub use resolver::{enrollment_phrase, IdentityDecision, VoiceIdentityResolver};
pub use signup::{
    create_pending_signup, expire_pending_signups, find_open_signup, NewSignup, PendingSignup,
};
pub use subscriber::{
    find_active_subscriber, find_subscriber_by_phone, get_subscriber, insert_subscriber,
    NewSubscriber, Subscriber,
};
pub use voiceprint::{
    AudioQuality, DigestComparator, DigestFeatureExtractor, FeatureExtractor, VoiceFeatures,
    Voiceprint, VoiceprintComparator,
};

/// Errors produced by identity operations.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Underlying SQLite failure.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The phone number already belongs to a subscriber or an open signup.
    #[error("phone number already registered ({existing})")]
    DuplicateIdentity {
        /// Describes the existing record, e.g. `subscriber:active`.
        existing: String,
    },

    /// Enrollment was requested for a number with neither a subscriber nor
    /// an open pending signup.
    #[error("no subscriber or open signup to enroll")]
    NoEnrollmentContext,

    /// Enrollment needs a voiceprint and the sample produced none.
    #[error("voice sample produced no voiceprint")]
    MissingVoiceprint,

    /// The pending signup was consumed by someone else mid-enrollment.
    #[error("pending signup {0} is no longer open")]
    SignupNotOpen(i64),

    /// A record looked up by id does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Maps a labelled column to its enum, surfacing unknown labels as
/// conversion errors.
pub(crate) fn label_column<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = silverline_types::ParseLabelError>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: silverline_types::ParseLabelError| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
