//! Shared types and constants for the Silverline call-flow engine.
//!
//! This crate provides the vocabulary used across all Silverline crates:
//! the call lifecycle phases and their transition table, the identity
//! resolver's decision set, the labels persisted in the database, and the
//! rate-limit policy.
//!
//! No crate in the workspace depends on anything *except* `silverline-types`
//! for cross-cutting type definitions. Every enum here has a stable string
//! label used as its database and wire representation.

use thiserror::Error;

mod phase;
mod policy;

pub use phase::{is_valid_path, CallPhase};
pub use policy::{BucketConfig, RateLimitConfig};

/// Error returned when a stored or transmitted label does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} label: {label}")]
pub struct ParseLabelError {
    /// The type being parsed.
    pub kind: &'static str,
    /// The offending label.
    pub label: String,
}

/// Declares an enum whose variants map one-to-one onto string labels.
///
/// Generates `as_str`, `Display`, `FromStr`, and serde impls that use the
/// label as the serialized form.
macro_rules! labelled_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident => $label:literal,
            )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ::serde::Serialize, ::serde::Deserialize)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $label)]
                $variant,
            )+
        }

        impl $name {
            /// Returns the canonical string label for this variant.
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $label,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::ParseLabelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($label => Ok(Self::$variant),)+
                    _ => Err($crate::ParseLabelError {
                        kind: stringify!($name),
                        label: s.to_string(),
                    }),
                }
            }
        }
    };
}

pub(crate) use labelled_enum;

labelled_enum! {
    /// Outcome of the voice identity resolver for one caller.
    ///
    /// Exactly one action is chosen per decision; the orchestrator maps each
    /// action onto a single next phase.
    pub enum ResolverAction {
        /// Known, enrolled subscriber whose voice matched.
        ProceedWithSupport => "proceed_with_support",
        /// Known, enrolled subscriber whose voice did not match.
        RequestReEnrollment => "request_re_enrollment",
        /// A family pre-registration exists for this number.
        CompleteEnrollment => "complete_enrollment",
        /// Subscriber exists but never finished voice enrollment.
        CompleteVoiceEnrollment => "complete_voice_enrollment",
        /// Nobody is known under this number.
        StartSignupFlow => "start_signup_flow",
    }
}

labelled_enum! {
    /// Action recorded on a voice authentication attempt row.
    pub enum AuthAction {
        /// Caller was authenticated and may proceed to support.
        Proceed => "proceed",
        /// Voice did not match; caller asked to re-enroll.
        RequestReEnrollment => "request_re_enrollment",
        /// Caller routed to first-time enrollment.
        EnrollmentRequired => "enrollment_required",
        /// Voice enrollment finished and committed.
        EnrollmentCompleted => "enrollment_completed",
        /// Unknown caller offered signup.
        Signup => "signup",
    }
}

impl From<ResolverAction> for AuthAction {
    fn from(action: ResolverAction) -> Self {
        match action {
            ResolverAction::ProceedWithSupport => Self::Proceed,
            ResolverAction::RequestReEnrollment => Self::RequestReEnrollment,
            ResolverAction::CompleteEnrollment | ResolverAction::CompleteVoiceEnrollment => {
                Self::EnrollmentRequired
            }
            ResolverAction::StartSignupFlow => Self::Signup,
        }
    }
}

labelled_enum! {
    /// Who spoke a transcript line.
    pub enum Speaker {
        /// The person on the phone.
        Caller => "caller",
        /// Text spoken by the system.
        System => "system",
    }
}

labelled_enum! {
    /// Kind of a persisted generated response.
    pub enum ResponseKind {
        /// Answer produced by the language model.
        SupportResponse => "support_response",
        /// Canned answer used when generation failed.
        Fallback => "fallback",
    }
}

labelled_enum! {
    /// Confidence tag attached to a generated answer.
    pub enum AnswerConfidence {
        /// At least one knowledge entry grounded the answer.
        High => "high",
        /// Model answered without knowledge entries.
        Medium => "medium",
        /// Canned fallback answer.
        Low => "low",
    }
}

labelled_enum! {
    /// Where a generated answer came from.
    pub enum AnswerSource {
        /// Language model prompted with knowledge context.
        ModelWithKnowledge => "model_with_kb",
        /// Fixed apology text.
        Fallback => "fallback",
    }
}

labelled_enum! {
    /// Polarity label derived from a sentiment score.
    pub enum SentimentLabel {
        Positive => "positive",
        Negative => "negative",
        Neutral => "neutral",
    }
}

impl SentimentLabel {
    /// Labels a score using the ±0.2 bands.
    pub fn from_score(score: f64) -> Self {
        if score > 0.2 {
            Self::Positive
        } else if score < -0.2 {
            Self::Negative
        } else {
            Self::Neutral
        }
    }
}

labelled_enum! {
    /// Which path produced a sentiment report.
    pub enum SentimentSource {
        Model => "model",
        Heuristic => "heuristic",
    }
}

labelled_enum! {
    /// Service tier purchased for a subscriber.
    pub enum SubscriptionTier {
        Basic => "basic",
        Premium => "premium",
        Family => "family",
    }
}

labelled_enum! {
    /// Account status of a subscriber. Subscribers are deactivated, never deleted.
    pub enum SubscriberStatus {
        Active => "active",
        Inactive => "inactive",
        Suspended => "suspended",
    }
}

labelled_enum! {
    /// Lifecycle of a family pre-registration.
    pub enum SignupStatus {
        /// Sponsor is still filling in details.
        CollectingInfo => "collecting_info",
        /// Waiting for the senior's first enrollment call.
        AwaitingVoiceEnrollment => "awaiting_voice_enrollment",
        /// Consumed by a successful enrollment.
        Completed => "completed",
        /// Passed its expiry without being consumed.
        Expired => "expired",
    }
}

impl SignupStatus {
    /// Whether a signup in this status can still be consumed by enrollment.
    pub fn is_open(self) -> bool {
        matches!(self, Self::CollectingInfo | Self::AwaitingVoiceEnrollment)
    }
}

labelled_enum! {
    /// Whether the carrier still considers the call live.
    pub enum SessionStatus {
        Active => "active",
        Completed => "completed",
    }
}

/// Similarity at or above which a presented voiceprint authenticates.
pub const VOICE_MATCH_THRESHOLD: f64 = 0.75;

/// Masks a phone number for logging, keeping only the last four digits.
///
/// ```
/// assert_eq!(silverline_types::redact_phone("+15551234567"), "***4567");
/// assert_eq!(silverline_types::redact_phone("12"), "***");
/// ```
pub fn redact_phone(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < 4 {
        return "***".to_string();
    }
    let tail: String = digits[digits.len() - 4..].iter().collect();
    format!("***{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn resolver_action_labels_parse_back() {
        for action in [
            ResolverAction::ProceedWithSupport,
            ResolverAction::RequestReEnrollment,
            ResolverAction::CompleteEnrollment,
            ResolverAction::CompleteVoiceEnrollment,
            ResolverAction::StartSignupFlow,
        ] {
            assert_eq!(ResolverAction::from_str(action.as_str()), Ok(action));
        }
    }

    #[test]
    fn unknown_label_is_rejected() {
        let err = SubscriptionTier::from_str("platinum").unwrap_err();
        assert_eq!(err.kind, "SubscriptionTier");
        assert_eq!(err.label, "platinum");
    }

    #[test]
    fn serde_uses_labels() {
        let json = serde_json::to_string(&AuthAction::EnrollmentCompleted).unwrap();
        assert_eq!(json, "\"enrollment_completed\"");
        let parsed: SignupStatus = serde_json::from_str("\"awaiting_voice_enrollment\"").unwrap();
        assert_eq!(parsed, SignupStatus::AwaitingVoiceEnrollment);
    }

    #[test]
    fn enrollment_decisions_share_attempt_action() {
        assert_eq!(
            AuthAction::from(ResolverAction::CompleteEnrollment),
            AuthAction::EnrollmentRequired
        );
        assert_eq!(
            AuthAction::from(ResolverAction::CompleteVoiceEnrollment),
            AuthAction::EnrollmentRequired
        );
        assert_eq!(
            AuthAction::from(ResolverAction::StartSignupFlow),
            AuthAction::Signup
        );
    }

    #[test]
    fn sentiment_label_bands() {
        assert_eq!(SentimentLabel::from_score(0.21), SentimentLabel::Positive);
        assert_eq!(SentimentLabel::from_score(0.2), SentimentLabel::Neutral);
        assert_eq!(SentimentLabel::from_score(-0.2), SentimentLabel::Neutral);
        assert_eq!(SentimentLabel::from_score(-0.6), SentimentLabel::Negative);
    }

    #[test]
    fn only_open_signups_are_consumable() {
        assert!(SignupStatus::CollectingInfo.is_open());
        assert!(SignupStatus::AwaitingVoiceEnrollment.is_open());
        assert!(!SignupStatus::Completed.is_open());
        assert!(!SignupStatus::Expired.is_open());
    }

    #[test]
    fn redact_phone_keeps_last_four() {
        assert_eq!(redact_phone("+1 (555) 010-9999"), "***9999");
        assert_eq!(redact_phone(""), "***");
    }
}
