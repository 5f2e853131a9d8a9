//! Carrier webhook handlers.
//!
//! Every stage webhook answers with call-control XML, even when the stage
//! failed. Deliveries go through the ledger first: a repeat of an answered
//! delivery gets the stored XML back and nothing else happens.

use crate::api::ApiError;
use crate::orchestrator::{CarrierEvent, Stage};
use crate::AppState;
use axum::{
    extract::{Extension, Form},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use silverline_calls::{claim_delivery, delivery_key, store_delivery_response, DeliveryClaim};
use silverline_observe::{emit_event, EventPayload};
use std::sync::Arc;

/// Form fields the carrier posts. Anything else is ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct WebhookForm {
    pub call_sid: String,
    pub from: String,
    pub recording_url: Option<String>,
    pub recording_sid: Option<String>,
    pub call_status: Option<String>,
    pub call_duration: Option<String>,
}

impl From<WebhookForm> for CarrierEvent {
    fn from(form: WebhookForm) -> Self {
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        CarrierEvent {
            call_sid: form.call_sid.trim().to_string(),
            from: form.from,
            recording_url: non_empty(form.recording_url),
            recording_sid: non_empty(form.recording_sid),
            call_status: non_empty(form.call_status),
            call_duration: form.call_duration.and_then(|d| d.trim().parse().ok()),
        }
    }
}

fn xml(body: String) -> Response {
    ([(header::CONTENT_TYPE, "application/xml")], body).into_response()
}

async fn run_stage(state: Arc<AppState>, stage: Stage, form: WebhookForm) -> Response {
    let event = CarrierEvent::from(form);
    if event.call_sid.is_empty() {
        return ApiError::BadRequest("missing CallSid".to_string()).into_response();
    }

    let key = delivery_key(&event.call_sid, stage.as_str(), event.delivery_token());
    let pool = state.pool.clone();
    let (claim_key, call_sid) = (key.clone(), event.call_sid.clone());
    let claim = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let claim =
            claim_delivery(&conn, &claim_key, &call_sid, stage.as_str()).map_err(|e| e.to_string())?;
        if matches!(claim, DeliveryClaim::Replay(_)) {
            let replayed = EventPayload::WebhookReplayed {
                stage: stage.as_str().to_string(),
            };
            if let Err(e) = emit_event(&conn, &call_sid, &replayed) {
                tracing::warn!(call_sid = %call_sid, error = %e, "failed to log replay");
            }
        }
        Ok::<_, String>(claim)
    })
    .await;

    match claim {
        Ok(Ok(DeliveryClaim::Replay(body))) => {
            tracing::info!(call_sid = %event.call_sid, stage = stage.as_str(), "replaying stored response");
            return xml(body);
        }
        Ok(Ok(DeliveryClaim::Unfinished)) => {
            tracing::warn!(
                call_sid = %event.call_sid,
                stage = stage.as_str(),
                "earlier delivery left no response, processing again"
            );
        }
        Ok(Ok(DeliveryClaim::Fresh)) => {}
        Ok(Err(e)) => {
            tracing::error!(call_sid = %event.call_sid, stage = stage.as_str(), error = %e, "delivery ledger unavailable");
        }
        Err(e) => {
            tracing::error!(call_sid = %event.call_sid, stage = stage.as_str(), error = %e, "delivery ledger task failed");
        }
    }

    let action = state.orchestrator.handle(stage, &event).await;
    let body = state.script.render(&action);

    let pool = state.pool.clone();
    let stored = body.clone();
    let saved = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| e.to_string())?;
        store_delivery_response(&conn, &key, &stored).map_err(|e| e.to_string())
    })
    .await;
    match saved {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!(call_sid = %event.call_sid, stage = stage.as_str(), error = %e, "failed to store response");
        }
        Err(e) => {
            tracing::warn!(call_sid = %event.call_sid, stage = stage.as_str(), error = %e, "store response task failed");
        }
    }

    xml(body)
}

/// Handler for `POST /webhooks/twilio/incoming-call`.
pub async fn incoming_call_handler(
    Extension(state): Extension<Arc<AppState>>,
    Form(form): Form<WebhookForm>,
) -> Response {
    run_stage(state, Stage::IncomingCall, form).await
}

/// Handler for `POST /webhooks/twilio/voice-auth`.
pub async fn voice_auth_handler(
    Extension(state): Extension<Arc<AppState>>,
    Form(form): Form<WebhookForm>,
) -> Response {
    run_stage(state, Stage::VoiceAuth, form).await
}

/// Handler for `POST /webhooks/twilio/complete-enrollment`.
pub async fn complete_enrollment_handler(
    Extension(state): Extension<Arc<AppState>>,
    Form(form): Form<WebhookForm>,
) -> Response {
    run_stage(state, Stage::CompleteEnrollment, form).await
}

/// Handler for `POST /webhooks/twilio/support-request`.
pub async fn support_request_handler(
    Extension(state): Extension<Arc<AppState>>,
    Form(form): Form<WebhookForm>,
) -> Response {
    run_stage(state, Stage::SupportRequest, form).await
}

/// Handler for `POST /webhooks/twilio/follow-up`.
pub async fn follow_up_handler(
    Extension(state): Extension<Arc<AppState>>,
    Form(form): Form<WebhookForm>,
) -> Response {
    run_stage(state, Stage::FollowUp, form).await
}

/// Handler for `POST /webhooks/twilio/signup-response`.
pub async fn signup_response_handler(
    Extension(state): Extension<Arc<AppState>>,
    Form(form): Form<WebhookForm>,
) -> Response {
    run_stage(state, Stage::SignupResponse, form).await
}

/// Handler for `POST /webhooks/twilio/call-status`. Answers with a bare 200.
pub async fn call_status_handler(
    Extension(state): Extension<Arc<AppState>>,
    Form(form): Form<WebhookForm>,
) -> StatusCode {
    let event = CarrierEvent::from(form);
    if !event.call_sid.is_empty() {
        state.orchestrator.call_status(&event).await;
    }
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_fields_map_to_event() {
        let form: WebhookForm = parse_form(
            "CallSid=CA9&From=%2B15551234567&RecordingUrl=&CallStatus=completed&CallDuration=42&Digits=1",
        );
        let event = CarrierEvent::from(form);
        assert_eq!(event.call_sid, "CA9");
        assert_eq!(event.from, "+15551234567");
        assert_eq!(event.recording_url, None);
        assert_eq!(event.call_status.as_deref(), Some("completed"));
        assert_eq!(event.call_duration, Some(42));
    }

    fn parse_form(body: &str) -> WebhookForm {
        let pairs: Vec<(String, String)> = form_urlencoded::parse(body.as_bytes()).into_owned().collect();
        let map: serde_json::Map<String, serde_json::Value> = pairs
            .into_iter()
            .map(|(k, v)| (k, serde_json::Value::String(v)))
            .collect();
        serde_json::from_value(serde_json::Value::Object(map)).unwrap()
    }
}
