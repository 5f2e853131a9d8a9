//! Maps orchestrator decisions onto call-control markup.
//!
//! Rendering is a pure function of the [`NextAction`] and the [`CallScript`]:
//! all wording, record limits and dial targets live here, so the same
//! decision always produces the same document.

use silverline_voice::UNCLEAR_AUDIO_TEXT;

use crate::config::CarrierConfig;
use crate::twiml::{RecordSpec, TwimlBuilder};

/// Webhook paths the carrier posts recordings to.
pub mod routes {
    pub const INCOMING_CALL: &str = "/webhooks/twilio/incoming-call";
    pub const VOICE_AUTH: &str = "/webhooks/twilio/voice-auth";
    pub const COMPLETE_ENROLLMENT: &str = "/webhooks/twilio/complete-enrollment";
    pub const SUPPORT_REQUEST: &str = "/webhooks/twilio/support-request";
    pub const FOLLOW_UP: &str = "/webhooks/twilio/follow-up";
    pub const SIGNUP_RESPONSE: &str = "/webhooks/twilio/signup-response";
    pub const CALL_STATUS: &str = "/webhooks/twilio/call-status";
}

const IDENTIFY_RECORDING: RecordSpec = RecordSpec {
    max_length: 15,
    timeout: 10,
    play_beep: false,
    finish_on_key: Some('#'),
};

const QUESTION_RECORDING: RecordSpec = RecordSpec {
    max_length: 30,
    timeout: 10,
    play_beep: false,
    finish_on_key: Some('#'),
};

const PHRASE_RECORDING: RecordSpec = RecordSpec {
    max_length: 15,
    timeout: 10,
    play_beep: true,
    finish_on_key: None,
};

const SHORT_REPLY_RECORDING: RecordSpec = RecordSpec {
    max_length: 10,
    timeout: 8,
    play_beep: false,
    finish_on_key: None,
};

/// Why the call is handed to a person.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferReason {
    /// Distress, urgency or a failed answer during support.
    Escalation,
    /// New caller asked to sign up.
    SignupAccepted,
    /// Enrollment could not be committed.
    EnrollmentFailed,
    /// A support turn could not be processed.
    SupportFailed,
    /// Any other failure.
    Unavailable,
}

/// How the call ends without a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoodbyeReason {
    /// Caller said they were done.
    Finished,
    /// No follow-up recording arrived.
    NoReply,
    /// New caller declined to sign up.
    SignupDeclined,
}

/// The single next step chosen for a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextAction {
    /// Greet a new call and record the caller for identification.
    Welcome,
    /// Voice matched an enrolled subscriber.
    Authenticated { caller_name: String },
    /// First-time enrollment: ask the caller to repeat `phrase`.
    Enroll {
        caller_name: Option<String>,
        /// The number was pre-registered by family.
        family_signup: bool,
        phrase: String,
    },
    /// Voice did not match: ask for the phrase again.
    ReEnroll { caller_name: String, phrase: String },
    /// Enrollment committed.
    Enrolled { caller_name: String },
    /// Unknown caller: offer the service.
    OfferSignup,
    /// Speak a support answer and ask whether more help is needed.
    Answer { text: String },
    /// Record another question. `unclear` when the last recording was unusable.
    AskAgain { unclear: bool },
    /// Hand the caller to a person.
    Transfer { reason: TransferReason },
    /// End the call.
    Goodbye { reason: GoodbyeReason },
}

impl NextAction {
    /// Generic hand-off used when a stage fails.
    pub fn fallback() -> Self {
        Self::Transfer {
            reason: TransferReason::Unavailable,
        }
    }

    /// Whether this action ends the automated part of the call.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Transfer { .. } | Self::Goodbye { .. })
    }
}

/// Voice and dial targets used when rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallScript {
    pub voice: String,
    pub language: String,
    pub human_agent_number: String,
    pub signup_agent_number: String,
}

impl CallScript {
    pub fn from_config(carrier: &CarrierConfig) -> Self {
        Self {
            voice: carrier.voice.clone(),
            language: carrier.language.clone(),
            human_agent_number: carrier.human_agent_number.clone(),
            signup_agent_number: carrier
                .signup_agent_number
                .clone()
                .unwrap_or_else(|| carrier.human_agent_number.clone()),
        }
    }

    fn say(&self, builder: TwimlBuilder, text: &str) -> TwimlBuilder {
        builder.say(text, &self.voice, &self.language)
    }

    /// Prompt, then record a question, then hand off if the caller stays silent.
    fn ask_question(&self, prompt: &str) -> String {
        let builder = self.say(TwimlBuilder::new(), prompt);
        let builder = builder.record(routes::SUPPORT_REQUEST, QUESTION_RECORDING);
        self.say(
            builder,
            "I didn't hear your question. Let me connect you with an agent.",
        )
        .dial(&self.human_agent_number)
        .build()
    }

    fn transfer(&self, message: &str, number: &str) -> String {
        self.say(TwimlBuilder::new(), message).dial(number).build()
    }

    fn goodbye(&self, message: &str) -> String {
        self.say(TwimlBuilder::new(), message)
            .pause(1)
            .hangup()
            .build()
    }

    /// Renders `action` as a complete TwiML document.
    pub fn render(&self, action: &NextAction) -> String {
        match action {
            NextAction::Welcome => {
                let builder = self.say(
                    TwimlBuilder::new(),
                    "Hello! Welcome to technical support. Please tell me your name and how I can help you today.",
                );
                let builder = builder.record(routes::VOICE_AUTH, IDENTIFY_RECORDING);
                self.say(
                    builder,
                    "I didn't hear anything. Let me connect you with an agent.",
                )
                .dial(&self.human_agent_number)
                .build()
            }
            NextAction::Authenticated { caller_name } => self.ask_question(&format!(
                "Hi {caller_name}! I recognize your voice. How can I help you today?"
            )),
            NextAction::Enroll {
                caller_name,
                family_signup,
                phrase,
            } => {
                let intro = match (family_signup, caller_name) {
                    (true, _) | (false, None) => "Hello! I see your family signed you up for our service. Let's finish setting up your voice recognition.".to_string(),
                    (false, Some(name)) => format!(
                        "Hello {name}! Let's set up your voice recognition so I can recognize you next time."
                    ),
                };
                let builder = self.say(
                    TwimlBuilder::new(),
                    &format!(
                        "{intro} Please repeat this phrase slowly and clearly: \"{phrase}\""
                    ),
                );
                let builder = builder.record(routes::COMPLETE_ENROLLMENT, PHRASE_RECORDING);
                self.say(
                    builder,
                    "Let me connect you with an agent to complete the setup.",
                )
                .dial(&self.human_agent_number)
                .build()
            }
            NextAction::ReEnroll {
                caller_name,
                phrase,
            } => {
                let builder = self.say(
                    TwimlBuilder::new(),
                    &format!(
                        "Hi {caller_name}! I'm having trouble recognizing your voice. Let's quickly update your voice recognition."
                    ),
                );
                let builder = self.say(
                    builder,
                    &format!("Please say this phrase clearly: \"{phrase}\""),
                );
                let builder = builder.record(routes::COMPLETE_ENROLLMENT, PHRASE_RECORDING);
                self.say(
                    builder,
                    "Let me connect you with an agent to complete the setup.",
                )
                .dial(&self.human_agent_number)
                .build()
            }
            NextAction::Enrolled { caller_name } => self.ask_question(&format!(
                "Perfect! I've learned your voice, {caller_name}. You're all set up! How can I help you today?"
            )),
            NextAction::OfferSignup => {
                let builder = self.say(
                    TwimlBuilder::new(),
                    "Hello! I don't have you in our system yet. Would you like to sign up for our technical support service?",
                );
                let builder = builder.record(routes::SIGNUP_RESPONSE, SHORT_REPLY_RECORDING);
                self.say(
                    builder,
                    "Let me connect you with someone who can help you sign up.",
                )
                .dial(&self.signup_agent_number)
                .build()
            }
            NextAction::Answer { text } => {
                let builder = self.say(TwimlBuilder::new(), text);
                let builder = self.say(
                    builder,
                    "Does this help, or do you have another question? Say \"more help\" or \"I'm all set\".",
                );
                let builder = builder.record(routes::FOLLOW_UP, SHORT_REPLY_RECORDING);
                self.say(builder, "Thank you for calling! Have a wonderful day.")
                    .hangup()
                    .build()
            }
            NextAction::AskAgain { unclear: true } => self.ask_question(UNCLEAR_AUDIO_TEXT),
            NextAction::AskAgain { unclear: false } => {
                self.ask_question("Of course! What else can I help you with?")
            }
            NextAction::Transfer { reason } => match reason {
                TransferReason::Escalation => self.transfer(
                    "Let me connect you with a specialist who can better help you with this issue.",
                    &self.human_agent_number,
                ),
                TransferReason::SignupAccepted => self.transfer(
                    "Wonderful! Let me connect you with someone who can help you get started with our service. They'll make it really easy for you.",
                    &self.signup_agent_number,
                ),
                TransferReason::EnrollmentFailed => self.transfer(
                    "There was an issue with the enrollment. Let me connect you with an agent.",
                    &self.human_agent_number,
                ),
                TransferReason::SupportFailed => self.transfer(
                    "I'm having trouble processing your request. Let me connect you with an agent.",
                    &self.human_agent_number,
                ),
                TransferReason::Unavailable => self.transfer(
                    "Let me connect you with one of our helpful agents.",
                    &self.human_agent_number,
                ),
            },
            NextAction::Goodbye { reason } => match reason {
                GoodbyeReason::Finished => self.goodbye(
                    "Perfect! Thank you for calling. Remember, you can call us anytime you need help. Have a wonderful day!",
                ),
                GoodbyeReason::NoReply => self.goodbye("Thank you for calling! Have a great day!"),
                GoodbyeReason::SignupDeclined => self.goodbye(
                    "No problem at all! If you need technical help in the future, please call us back. Have a great day!",
                ),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script() -> CallScript {
        CallScript {
            voice: "Polly.Joanna-Neural".to_string(),
            language: "en-US".to_string(),
            human_agent_number: "+18005550199".to_string(),
            signup_agent_number: "+18005550100".to_string(),
        }
    }

    #[test]
    fn welcome_records_for_voice_auth() {
        let xml = script().render(&NextAction::Welcome);
        assert!(xml.contains("action=\"/webhooks/twilio/voice-auth\""));
        assert!(xml.contains("maxLength=\"15\""));
        assert!(xml.contains("<Dial>+18005550199</Dial>"));
    }

    #[test]
    fn signup_offer_does_not_start_support() {
        let xml = script().render(&NextAction::OfferSignup);
        assert!(xml.contains("sign up"));
        assert!(xml.contains(routes::SIGNUP_RESPONSE));
        assert!(!xml.contains(routes::SUPPORT_REQUEST));
        assert!(xml.contains("<Dial>+18005550100</Dial>"));
    }

    #[test]
    fn authenticated_greets_by_name() {
        let xml = script().render(&NextAction::Authenticated {
            caller_name: "Margaret".to_string(),
        });
        assert!(xml.contains("Hi Margaret! I recognize your voice."));
        assert!(xml.contains(routes::SUPPORT_REQUEST));
    }

    #[test]
    fn enrollment_asks_for_phrase_with_beep() {
        let xml = script().render(&NextAction::Enroll {
            caller_name: Some("Walter".to_string()),
            family_signup: false,
            phrase: "Hello, this is Walter calling for technical support".to_string(),
        });
        assert!(xml.contains("Hello Walter!"));
        assert!(xml.contains("&quot;Hello, this is Walter calling for technical support&quot;"));
        assert!(xml.contains("playBeep=\"true\""));
        assert!(xml.contains(routes::COMPLETE_ENROLLMENT));
    }

    #[test]
    fn answer_offers_follow_up_then_hangs_up() {
        let xml = script().render(&NextAction::Answer {
            text: "Restart the router.".to_string(),
        });
        assert!(xml.contains("Restart the router."));
        assert!(xml.contains(routes::FOLLOW_UP));
        assert!(xml.trim_end().ends_with("<Hangup/>\n</Response>"));
    }

    #[test]
    fn transfers_dial_the_right_agent() {
        let escalation = script().render(&NextAction::Transfer {
            reason: TransferReason::Escalation,
        });
        assert!(escalation.contains("specialist"));
        assert!(escalation.contains("<Dial>+18005550199</Dial>"));

        let signup = script().render(&NextAction::Transfer {
            reason: TransferReason::SignupAccepted,
        });
        assert!(signup.contains("<Dial>+18005550100</Dial>"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let action = NextAction::ReEnroll {
            caller_name: "Ada".to_string(),
            phrase: "This is Ada and I am calling from 5 5 5".to_string(),
        };
        assert_eq!(script().render(&action), script().render(&action));
    }

    #[test]
    fn signup_agent_defaults_to_human_agent() {
        let carrier = CarrierConfig::default();
        let script = CallScript::from_config(&carrier);
        assert_eq!(script.signup_agent_number, carrier.human_agent_number);
    }
}
