//! The call session orchestrator.
//!
//! Each carrier webhook is one [`Stage`]. A stage loads the session, checks
//! that the call is in a phase where the stage makes sense, runs the
//! collaborators it needs, persists every side effect, moves the phase, and
//! returns exactly one [`NextAction`]. Any error inside a stage turns into a
//! transfer to a human: the session is walked into `FALLBACK` and then
//! `TERMINATED`, and the caller hears an apology instead of silence.
//!
//! Webhooks for one call are expected to arrive one at a time. When two
//! requests race anyway, the compare-and-set on the phase column rejects the
//! loser, which then degrades to the fallback transfer.

use rusqlite::Connection;
use silverline_assist::{
    AnswerGenerator, GeneratedAnswer, LimitValidator, MessageKind, SentimentAnalyzer,
    SentimentReport,
};
use silverline_calls::{
    append_transcript, complete_session, get_session, link_identity, load_or_create_session,
    record_response, record_sentiment, transition_phase, CallSession, CallStoreError,
    IdentityLink, NewResponse, NewSentiment,
};
use silverline_identity::{
    complete_enrollment, normalize_phone, FeatureExtractor, IdentityDecision, IdentityError,
    VoiceFeatures, VoiceIdentityResolver,
};
use silverline_observe::{emit_event, EventPayload, ObserveError};
use silverline_types::{redact_phone, CallPhase, ResolverAction, ResponseKind, Speaker};
use silverline_voice::{RecordingTranscript, TranscriptionService};
use std::sync::Arc;
use thiserror::Error;

use crate::render::{GoodbyeReason, NextAction, TransferReason};

const FOLLOW_UP_KEYWORDS: &[&str] = &["more", "help", "question", "another"];
const SIGNUP_KEYWORDS: &[&str] = &["sign", "yes", "family"];

/// One kind of carrier webhook that drives the call forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    IncomingCall,
    VoiceAuth,
    CompleteEnrollment,
    SupportRequest,
    FollowUp,
    SignupResponse,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IncomingCall => "incoming_call",
            Self::VoiceAuth => "voice_auth",
            Self::CompleteEnrollment => "complete_enrollment",
            Self::SupportRequest => "support_request",
            Self::FollowUp => "follow_up",
            Self::SignupResponse => "signup_response",
        }
    }

    fn failure_reason(self) -> TransferReason {
        match self {
            Self::CompleteEnrollment => TransferReason::EnrollmentFailed,
            Self::SupportRequest => TransferReason::SupportFailed,
            _ => TransferReason::Unavailable,
        }
    }
}

/// Fields the orchestrator reads from a carrier webhook.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CarrierEvent {
    pub call_sid: String,
    pub from: String,
    pub recording_url: Option<String>,
    pub recording_sid: Option<String>,
    pub call_status: Option<String>,
    pub call_duration: Option<i64>,
}

impl CarrierEvent {
    /// Distinguishes deliveries of the same stage within one call.
    pub fn delivery_token(&self) -> &str {
        self.recording_sid
            .as_deref()
            .or(self.recording_url.as_deref())
            .filter(|t| !t.is_empty())
            .unwrap_or("-")
    }
}

#[derive(Debug, Error)]
enum FlowError {
    #[error(transparent)]
    Store(#[from] CallStoreError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    EventLog(#[from] ObserveError),

    #[error("database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("{stage} is not valid while the call is in {phase}")]
    UnexpectedPhase { stage: &'static str, phase: CallPhase },

    #[error("call has no authenticated subscriber")]
    NotAuthenticated,
}

/// Services a stage may call. Each has a degraded stand-in, so a missing
/// API key never stops the server from answering calls.
#[derive(Clone)]
pub struct Collaborators {
    pub resolver: VoiceIdentityResolver,
    pub extractor: Arc<dyn FeatureExtractor>,
    pub transcription: Arc<TranscriptionService>,
    pub answers: Arc<AnswerGenerator>,
    pub sentiment: Arc<SentimentAnalyzer>,
    pub limits: Arc<LimitValidator>,
}

/// Drives calls through their phases.
#[derive(Clone)]
pub struct CallOrchestrator {
    pool: silverline_db::DbPool,
    services: Collaborators,
}

impl CallOrchestrator {
    pub fn new(pool: silverline_db::DbPool, services: Collaborators) -> Self {
        Self { pool, services }
    }

    pub fn services(&self) -> &Collaborators {
        &self.services
    }

    /// Runs `stage` for `event`. Never fails: errors become a transfer.
    pub async fn handle(&self, stage: Stage, event: &CarrierEvent) -> NextAction {
        let result = match stage {
            Stage::IncomingCall => self.incoming_call(event).await,
            Stage::VoiceAuth => self.voice_auth(event).await,
            Stage::CompleteEnrollment => self.complete_enrollment(event).await,
            Stage::SupportRequest => self.support_request(event).await,
            Stage::FollowUp => self.follow_up(event).await,
            Stage::SignupResponse => self.signup_response(event).await,
        };

        match result {
            Ok(action) => action,
            Err(e) => {
                tracing::error!(
                    call_sid = %event.call_sid,
                    stage = stage.as_str(),
                    error = %e,
                    "stage failed, transferring caller"
                );
                let call_sid = event.call_sid.clone();
                let outcome = self
                    .db(move |conn| escalate(conn, &call_sid, stage, "stage_failure"))
                    .await;
                if let Err(e) = outcome {
                    tracing::error!(call_sid = %event.call_sid, error = %e, "could not record fallback");
                }
                NextAction::Transfer {
                    reason: stage.failure_reason(),
                }
            }
        }
    }

    /// Records carrier completion. Phase is left as is.
    pub async fn call_status(&self, event: &CarrierEvent) {
        if event.call_status.as_deref() != Some("completed") {
            tracing::debug!(call_sid = %event.call_sid, status = ?event.call_status, "call status update");
            return;
        }
        let call_sid = event.call_sid.clone();
        let duration = event.call_duration;
        let result = self
            .db(move |conn| {
                if complete_session(conn, &call_sid, duration)? {
                    emit_event(
                        conn,
                        &call_sid,
                        &EventPayload::CallCompleted {
                            duration_seconds: duration,
                        },
                    )?;
                    return Ok(true);
                }
                Ok(false)
            })
            .await;
        match result {
            Ok(true) => tracing::info!(call_sid = %event.call_sid, duration = ?duration, "call completed"),
            Ok(false) => tracing::warn!(call_sid = %event.call_sid, "status callback for unknown call"),
            Err(e) => tracing::warn!(call_sid = %event.call_sid, error = %e, "failed to record call completion"),
        }
    }

    async fn db<T, F>(&self, f: F) -> Result<T, FlowError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, FlowError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await?
    }

    /// Loads the session and checks its phase is one of `allowed`.
    async fn session_in(
        &self,
        stage: Stage,
        event: &CarrierEvent,
        allowed: &'static [CallPhase],
    ) -> Result<CallSession, FlowError> {
        let call_sid = event.call_sid.clone();
        let phone = caller_phone(&event.from);
        self.db(move |conn| {
            let (session, _) = load_or_create_session(conn, &call_sid, &phone)?;
            if allowed.contains(&session.phase) {
                Ok(session)
            } else {
                Err(FlowError::UnexpectedPhase {
                    stage: stage.as_str(),
                    phase: session.phase,
                })
            }
        })
        .await
    }

    async fn transcribe(&self, event: &CarrierEvent) -> RecordingTranscript {
        self.services
            .transcription
            .transcribe_recording(event.recording_url.as_deref())
            .await
    }

    async fn incoming_call(&self, event: &CarrierEvent) -> Result<NextAction, FlowError> {
        let call_sid = event.call_sid.clone();
        let phone = caller_phone(&event.from);
        tracing::info!(call_sid = %call_sid, from = %redact_phone(&phone), "incoming call");

        self.db(move |conn| {
            let (session, _) = load_or_create_session(conn, &call_sid, &phone)?;
            match session.phase {
                CallPhase::Incoming => {
                    transition_phase(
                        conn,
                        &call_sid,
                        CallPhase::Incoming,
                        CallPhase::AuthCheck,
                        Stage::IncomingCall.as_str(),
                    )?;
                    Ok(NextAction::Welcome)
                }
                // Carrier redelivered the greeting request.
                CallPhase::AuthCheck => Ok(NextAction::Welcome),
                phase => Err(FlowError::UnexpectedPhase {
                    stage: Stage::IncomingCall.as_str(),
                    phase,
                }),
            }
        })
        .await
    }

    async fn voice_auth(&self, event: &CarrierEvent) -> Result<NextAction, FlowError> {
        let session = self
            .session_in(
                Stage::VoiceAuth,
                event,
                &[CallPhase::Incoming, CallPhase::AuthCheck],
            )
            .await?;

        let transcript = self.transcribe(event).await;
        let features = self
            .services
            .extractor
            .extract(transcript.audio.as_deref(), &transcript.transcription.text);

        let resolver = self.services.resolver.clone();
        let decision = self
            .db(move |conn| {
                if session.phase == CallPhase::Incoming {
                    transition_phase(
                        conn,
                        &session.call_sid,
                        CallPhase::Incoming,
                        CallPhase::AuthCheck,
                        Stage::VoiceAuth.as_str(),
                    )?;
                }
                store_caller_transcript(conn, session.id, &transcript)?;

                let decision =
                    resolver.resolve(conn, Some(session.id), &session.phone_number, &features)?;
                link_identity(
                    conn,
                    session.id,
                    &IdentityLink {
                        subscriber_id: decision.subscriber.as_ref().map(|s| s.id),
                        attempt_id: decision.attempt_id,
                        confidence: decision.similarity.unwrap_or(features.confidence),
                        success: decision.action == ResolverAction::ProceedWithSupport,
                    },
                )?;
                emit_event(
                    conn,
                    &session.call_sid,
                    &EventPayload::IdentityResolved {
                        action: decision.action,
                        similarity: decision.similarity,
                        attempt_id: decision.attempt_id,
                    },
                )?;
                transition_phase(
                    conn,
                    &session.call_sid,
                    CallPhase::AuthCheck,
                    phase_after(decision.action),
                    Stage::VoiceAuth.as_str(),
                )?;
                Ok(decision)
            })
            .await?;

        Ok(action_for(&decision))
    }

    async fn complete_enrollment(&self, event: &CarrierEvent) -> Result<NextAction, FlowError> {
        let session = self
            .session_in(
                Stage::CompleteEnrollment,
                event,
                &[CallPhase::Enrolling, CallPhase::ReEnroll],
            )
            .await?;

        let transcript = self.transcribe(event).await;
        let features = self
            .services
            .extractor
            .extract(transcript.audio.as_deref(), &transcript.transcription.text);

        self.db(move |conn| {
            let stage = Stage::CompleteEnrollment.as_str();
            if session.phase == CallPhase::ReEnroll {
                transition_phase(
                    conn,
                    &session.call_sid,
                    CallPhase::ReEnroll,
                    CallPhase::Enrolling,
                    stage,
                )?;
            }
            store_caller_transcript(conn, session.id, &transcript)?;

            let outcome = complete_enrollment(conn, Some(session.id), &session.phone_number, &features)?;
            link_identity(
                conn,
                session.id,
                &IdentityLink {
                    subscriber_id: Some(outcome.subscriber.id),
                    attempt_id: outcome.attempt_id,
                    confidence: features.confidence,
                    success: true,
                },
            )?;
            emit_event(
                conn,
                &session.call_sid,
                &EventPayload::EnrollmentCompleted {
                    subscriber_id: outcome.subscriber.id,
                    from_pending_signup: outcome.consumed_signup.is_some(),
                },
            )?;
            transition_phase(
                conn,
                &session.call_sid,
                CallPhase::Enrolling,
                CallPhase::Authenticated,
                stage,
            )?;
            Ok(NextAction::Enrolled {
                caller_name: outcome.subscriber.name,
            })
        })
        .await
    }

    async fn support_request(&self, event: &CarrierEvent) -> Result<NextAction, FlowError> {
        let session = self
            .session_in(
                Stage::SupportRequest,
                event,
                &[CallPhase::Authenticated, CallPhase::SupportTurn],
            )
            .await?;
        if session.subscriber_id.is_none() {
            return Err(FlowError::NotAuthenticated);
        }

        let call_sid = session.call_sid.clone();
        let from = session.phase;
        self.db(move |conn| {
            transition_phase(
                conn,
                &call_sid,
                from,
                CallPhase::SupportTurn,
                Stage::SupportRequest.as_str(),
            )?;
            Ok(())
        })
        .await?;

        let transcript = self.transcribe(event).await;
        if transcript.degraded {
            let session_id = session.id;
            self.db(move |conn| store_caller_transcript(conn, session_id, &transcript))
                .await?;
            return Ok(NextAction::AskAgain { unclear: true });
        }

        let question = transcript.transcription.text.clone();
        let oversize = self
            .services
            .limits
            .validate(&question, MessageKind::Transcription)
            .await
            .err();

        let (answer, sentiment) = match &oversize {
            Some(e) => {
                tracing::warn!(call_sid = %session.call_sid, error = %e, "transcript over limit");
                (None, None)
            }
            None => {
                let answer = self.services.answers.answer(&question).await;
                let sentiment = self.services.sentiment.analyze(&question).await;
                (Some(answer), Some(sentiment))
            }
        };

        let escalation = match (&answer, &sentiment) {
            (Some(_), Some(s)) if s.escalation_recommended => Some("sentiment"),
            (Some(a), _) if a.is_fallback() => Some("fallback_answer"),
            (Some(_), _) => None,
            _ => Some("oversize_transcript"),
        };

        self.db(move |conn| {
            let stored = append_transcript(
                conn,
                session.id,
                Speaker::Caller,
                &question,
                Some(transcript.transcription.confidence),
            )?;
            if let Some(answer) = &answer {
                store_turn(conn, &session, stored.id, answer, sentiment.as_ref(), escalation.is_some())?;
            }

            match (escalation, answer) {
                (Some(reason), _) => {
                    escalate(conn, &session.call_sid, Stage::SupportRequest, reason)?;
                    Ok(NextAction::Transfer {
                        reason: TransferReason::Escalation,
                    })
                }
                (None, Some(answer)) => {
                    append_transcript(conn, session.id, Speaker::System, &answer.text, None)?;
                    Ok(NextAction::Answer { text: answer.text })
                }
                (None, None) => Ok(NextAction::fallback()),
            }
        })
        .await
    }

    async fn follow_up(&self, event: &CarrierEvent) -> Result<NextAction, FlowError> {
        let session = self
            .session_in(Stage::FollowUp, event, &[CallPhase::SupportTurn])
            .await?;

        if event.recording_url.as_deref().map_or(true, str::is_empty) {
            return self
                .finish(session, GoodbyeReason::NoReply, Stage::FollowUp)
                .await;
        }

        let transcript = self.transcribe(event).await;
        if transcript.degraded {
            return Ok(NextAction::AskAgain { unclear: true });
        }
        let wants_more = mentions_any(&transcript.transcription.text, FOLLOW_UP_KEYWORDS);

        let session_id = session.id;
        self.db(move |conn| store_caller_transcript(conn, session_id, &transcript))
            .await?;

        if wants_more {
            Ok(NextAction::AskAgain { unclear: false })
        } else {
            self.finish(session, GoodbyeReason::Finished, Stage::FollowUp)
                .await
        }
    }

    async fn signup_response(&self, event: &CarrierEvent) -> Result<NextAction, FlowError> {
        let session = self
            .session_in(Stage::SignupResponse, event, &[CallPhase::Signup])
            .await?;

        let transcript = self.transcribe(event).await;
        // An unintelligible reply goes to the signup agent rather than ending the call.
        let accepted = transcript.degraded
            || mentions_any(&transcript.transcription.text, SIGNUP_KEYWORDS);

        let session_id = session.id;
        self.db(move |conn| store_caller_transcript(conn, session_id, &transcript))
            .await?;

        if accepted {
            let call_sid = session.call_sid.clone();
            self.db(move |conn| escalate(conn, &call_sid, Stage::SignupResponse, "signup_requested"))
                .await?;
            Ok(NextAction::Transfer {
                reason: TransferReason::SignupAccepted,
            })
        } else {
            self.finish(session, GoodbyeReason::SignupDeclined, Stage::SignupResponse)
                .await
        }
    }

    async fn finish(
        &self,
        session: CallSession,
        reason: GoodbyeReason,
        stage: Stage,
    ) -> Result<NextAction, FlowError> {
        self.db(move |conn| {
            transition_phase(
                conn,
                &session.call_sid,
                session.phase,
                CallPhase::Terminated,
                stage.as_str(),
            )?;
            Ok(NextAction::Goodbye { reason })
        })
        .await
    }
}

/// Carrier numbers arrive in E.164; anything else is kept verbatim.
fn caller_phone(from: &str) -> String {
    normalize_phone(from).unwrap_or_else(|| from.trim().to_string())
}

fn mentions_any(text: &str, keywords: &[&str]) -> bool {
    let lower = text.to_lowercase();
    keywords.iter().any(|k| lower.contains(k))
}

fn phase_after(action: ResolverAction) -> CallPhase {
    match action {
        ResolverAction::ProceedWithSupport => CallPhase::Authenticated,
        ResolverAction::RequestReEnrollment => CallPhase::ReEnroll,
        ResolverAction::CompleteEnrollment | ResolverAction::CompleteVoiceEnrollment => {
            CallPhase::Enrolling
        }
        ResolverAction::StartSignupFlow => CallPhase::Signup,
    }
}

fn action_for(decision: &IdentityDecision) -> NextAction {
    let name = decision.caller_name().map(str::to_string);
    let phrase = decision.enrollment_phrase.clone().unwrap_or_default();
    match decision.action {
        ResolverAction::ProceedWithSupport => NextAction::Authenticated {
            caller_name: name.unwrap_or_default(),
        },
        ResolverAction::RequestReEnrollment => NextAction::ReEnroll {
            caller_name: name.unwrap_or_default(),
            phrase,
        },
        ResolverAction::CompleteEnrollment => NextAction::Enroll {
            caller_name: name,
            family_signup: true,
            phrase,
        },
        ResolverAction::CompleteVoiceEnrollment => NextAction::Enroll {
            caller_name: name,
            family_signup: false,
            phrase,
        },
        ResolverAction::StartSignupFlow => NextAction::OfferSignup,
    }
}

fn store_caller_transcript(
    conn: &Connection,
    session_id: i64,
    transcript: &RecordingTranscript,
) -> Result<(), FlowError> {
    append_transcript(
        conn,
        session_id,
        Speaker::Caller,
        &transcript.transcription.text,
        Some(transcript.transcription.confidence),
    )?;
    Ok(())
}

fn store_turn(
    conn: &Connection,
    session: &CallSession,
    transcript_id: i64,
    answer: &GeneratedAnswer,
    sentiment: Option<&SentimentReport>,
    escalate: bool,
) -> Result<(), FlowError> {
    let kind = if answer.is_fallback() {
        ResponseKind::Fallback
    } else {
        ResponseKind::SupportResponse
    };
    record_response(
        conn,
        session.id,
        &NewResponse {
            kind,
            text: &answer.text,
            knowledge_entry_id: answer.primary_entry_id(),
            confidence: answer.confidence,
            source: answer.source,
            success: !answer.is_fallback(),
        },
    )?;
    if let Some(report) = sentiment {
        record_sentiment(
            conn,
            session.id,
            &NewSentiment {
                transcript_id,
                label: report.label,
                score: report.score,
                urgency: report.urgency,
                emotion: &report.emotion,
                escalation_recommended: report.escalation_recommended,
                source: report.source,
            },
        )?;
    }
    emit_event(
        conn,
        &session.call_sid,
        &EventPayload::TurnAnswered {
            confidence: answer.confidence,
            knowledge_entries: answer.entries.len(),
            escalate,
        },
    )?;
    Ok(())
}

/// Walks the call into `FALLBACK` and then `TERMINATED`, and logs why.
fn escalate(
    conn: &Connection,
    call_sid: &str,
    stage: Stage,
    reason: &str,
) -> Result<(), FlowError> {
    let Some(session) = get_session(conn, call_sid)? else {
        return Ok(());
    };
    let mut phase = session.phase;
    if phase.can_transition_to(CallPhase::Fallback) {
        transition_phase(conn, call_sid, phase, CallPhase::Fallback, stage.as_str())?;
        phase = CallPhase::Fallback;
    }
    if phase == CallPhase::Fallback {
        transition_phase(
            conn,
            call_sid,
            CallPhase::Fallback,
            CallPhase::Terminated,
            stage.as_str(),
        )?;
    }
    emit_event(
        conn,
        call_sid,
        &EventPayload::Escalated {
            reason: reason.to_string(),
        },
    )?;
    tracing::info!(call_sid, stage = stage.as_str(), reason, "call escalated to a human agent");
    Ok(())
}
