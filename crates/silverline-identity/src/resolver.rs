//! The voice identity resolver.
//!
//! Decision order, first match wins:
//!
//! 1. active subscriber with completed enrollment: compare voiceprints,
//!    `proceed_with_support` at or above the threshold, otherwise
//!    `request_re_enrollment`
//! 2. open pending signup: `complete_enrollment`
//! 3. active subscriber without enrollment: `complete_voice_enrollment`
//! 4. anyone else: `start_signup_flow`
//!
//! Suspended and inactive subscribers fall through to step 4 and are handed
//! to the signup agent.

use std::sync::Arc;

use rusqlite::Connection;
use silverline_types::{redact_phone, AuthAction, ResolverAction, VOICE_MATCH_THRESHOLD};

use crate::attempts::{record_attempt, NewAttempt};
use crate::signup::find_open_signup;
use crate::subscriber::find_active_subscriber;
use crate::{
    DigestComparator, IdentityError, PendingSignup, Subscriber, VoiceFeatures,
    VoiceprintComparator,
};

/// Outcome of one resolver run.
#[derive(Debug, Clone)]
pub struct IdentityDecision {
    pub action: ResolverAction,
    pub subscriber: Option<Subscriber>,
    pub pending_signup: Option<PendingSignup>,
    /// Comparator score, present only when a stored voiceprint was compared.
    pub similarity: Option<f64>,
    /// Id of the attempt row written for this decision.
    pub attempt_id: i64,
    /// Phrase the caller is asked to repeat for (re-)enrollment.
    pub enrollment_phrase: Option<String>,
}

impl IdentityDecision {
    /// Name to greet the caller with, when known.
    pub fn caller_name(&self) -> Option<&str> {
        self.subscriber
            .as_ref()
            .map(|s| s.name.as_str())
            .or_else(|| self.pending_signup.as_ref().map(|p| p.senior_name.as_str()))
    }
}

/// Resolves callers against the subscriber and pending-signup tables.
#[derive(Clone)]
pub struct VoiceIdentityResolver {
    comparator: Arc<dyn VoiceprintComparator>,
    threshold: f64,
}

impl Default for VoiceIdentityResolver {
    fn default() -> Self {
        Self::new(Arc::new(DigestComparator))
    }
}

impl VoiceIdentityResolver {
    /// Creates a resolver using the standard 0.75 match threshold.
    pub fn new(comparator: Arc<dyn VoiceprintComparator>) -> Self {
        Self {
            comparator,
            threshold: VOICE_MATCH_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Decides what to do with a caller and records the attempt.
    ///
    /// The lookups and the attempt insert run on the same connection; a
    /// storage error aborts the decision and the caller must not be treated
    /// as authenticated.
    pub fn resolve(
        &self,
        conn: &Connection,
        session_id: Option<i64>,
        phone: &str,
        features: &VoiceFeatures,
    ) -> Result<IdentityDecision, IdentityError> {
        let subscriber = find_active_subscriber(conn, phone)?;

        let mut decision = match subscriber {
            Some(subscriber) if subscriber.is_enrolled() => {
                let similarity = self
                    .comparator
                    .compare(features.voiceprint.as_ref(), subscriber.voiceprint.as_ref());
                let action = if similarity >= self.threshold {
                    ResolverAction::ProceedWithSupport
                } else {
                    ResolverAction::RequestReEnrollment
                };
                let phrase = (action == ResolverAction::RequestReEnrollment)
                    .then(|| enrollment_phrase(&subscriber.name, phone));
                IdentityDecision {
                    action,
                    subscriber: Some(subscriber),
                    pending_signup: None,
                    similarity: Some(similarity),
                    attempt_id: 0,
                    enrollment_phrase: phrase,
                }
            }
            subscriber => match find_open_signup(conn, phone)? {
                Some(signup) => IdentityDecision {
                    action: ResolverAction::CompleteEnrollment,
                    enrollment_phrase: Some(enrollment_phrase(&signup.senior_name, phone)),
                    subscriber: None,
                    pending_signup: Some(signup),
                    similarity: None,
                    attempt_id: 0,
                },
                None => match subscriber {
                    Some(subscriber) => IdentityDecision {
                        action: ResolverAction::CompleteVoiceEnrollment,
                        enrollment_phrase: Some(enrollment_phrase(&subscriber.name, phone)),
                        subscriber: Some(subscriber),
                        pending_signup: None,
                        similarity: None,
                        attempt_id: 0,
                    },
                    None => IdentityDecision {
                        action: ResolverAction::StartSignupFlow,
                        subscriber: None,
                        pending_signup: None,
                        similarity: None,
                        attempt_id: 0,
                        enrollment_phrase: None,
                    },
                },
            },
        };

        let action = AuthAction::from(decision.action);
        decision.attempt_id = record_attempt(
            conn,
            &NewAttempt {
                session_id,
                subscriber_id: decision.subscriber.as_ref().map(|s| s.id),
                phone_number: phone,
                confidence: decision.similarity.unwrap_or(features.confidence),
                audio_quality: features.audio_quality,
                auth_successful: action == AuthAction::Proceed,
                action,
            },
        )?;

        tracing::info!(
            phone = %redact_phone(phone),
            action = %decision.action,
            similarity = ?decision.similarity,
            attempt_id = decision.attempt_id,
            "identity resolved"
        );
        Ok(decision)
    }
}

const PHRASE_TEMPLATES: [&str; 3] = [
    "My name is {name} and my phone number is {phone}",
    "Hello, this is {name} calling for technical support",
    "This is {name} and I am calling from {phone}",
];

/// Builds the phrase a caller repeats during enrollment.
///
/// The template is picked from the phone digits, so the same caller always
/// hears the same phrase.
pub fn enrollment_phrase(name: &str, phone: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    let index = digits
        .bytes()
        .fold(0usize, |acc, b| acc.wrapping_add(usize::from(b - b'0')))
        % PHRASE_TEMPLATES.len();
    let spoken_phone = digits
        .chars()
        .map(String::from)
        .collect::<Vec<_>>()
        .join(" ");
    PHRASE_TEMPLATES[index]
        .replace("{name}", name)
        .replace("{phone}", &spoken_phone)
}
