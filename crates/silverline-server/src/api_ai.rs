//! `/api/ai/*`: the answer generator, sentiment analyzer and message limits,
//! reachable outside a call for operators and integration checks.

use crate::api::ApiError;
use crate::AppState;
use axum::extract::{Extension, Json};
use serde::{Deserialize, Serialize};
use silverline_assist::{LimitError, MessageKind, MessageLimits};
use silverline_types::{AnswerConfidence, AnswerSource, SentimentLabel, SentimentSource};
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GenerateRequest {
    #[serde(alias = "query")]
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub response: String,
    pub confidence: AnswerConfidence,
    pub source: AnswerSource,
    pub knowledge_base_results: usize,
    pub search_terms: Vec<String>,
    pub response_length: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SentimentRequest {
    #[serde(alias = "text")]
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SentimentResponse {
    pub sentiment: SentimentLabel,
    pub score: f64,
    pub urgency: u8,
    pub emotion: String,
    pub escalation_recommended: bool,
    pub source: SentimentSource,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ValidateRequest {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    pub length: usize,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub maximum: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AiFeatures {
    pub ai_responses: bool,
    pub sentiment_analysis: bool,
    pub message_validation: bool,
    pub knowledge_base: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AiHealthResponse {
    pub status: &'static str,
    pub model: &'static str,
    pub features: AiFeatures,
    pub message_limits: MessageLimits,
}

fn required(value: &str, field: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{field} is required")));
    }
    Ok(())
}

fn too_long(err: LimitError) -> ApiError {
    match err {
        LimitError::Store(msg) => ApiError::InternalServerError(msg),
        other => ApiError::TooLong(other),
    }
}

/// `POST /api/ai/generate`: one support answer for `message`.
pub async fn generate_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    required(&body.message, "message")?;
    let services = state.orchestrator.services();
    services
        .limits
        .validate(&body.message, MessageKind::AiRequest)
        .await
        .map_err(too_long)?;

    let answer = services.answers.answer(&body.message).await;
    tracing::info!(
        length = body.message.len(),
        confidence = %answer.confidence,
        fallback = answer.is_fallback(),
        "answer requested over api"
    );
    Ok(Json(GenerateResponse {
        response_length: answer.text.chars().count(),
        knowledge_base_results: answer.entries.len(),
        confidence: answer.confidence,
        source: answer.source,
        search_terms: answer.search_terms,
        response: answer.text,
    }))
}

/// `POST /api/ai/sentiment`: scores `message`, with the keyword fallback
/// when the model is unavailable.
pub async fn sentiment_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<SentimentRequest>,
) -> Result<Json<SentimentResponse>, ApiError> {
    required(&body.message, "message")?;
    let report = state
        .orchestrator
        .services()
        .sentiment
        .analyze(&body.message)
        .await;
    Ok(Json(SentimentResponse {
        sentiment: report.label,
        score: report.score,
        urgency: report.urgency,
        emotion: report.emotion,
        escalation_recommended: report.escalation_recommended,
        source: report.source,
    }))
}

/// `POST /api/ai/validate`: checks `message` against the limit for `type`.
/// Unknown types are checked against the general message limit.
pub async fn validate_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<ValidateRequest>,
) -> Result<Json<ValidateResponse>, ApiError> {
    required(&body.message, "message")?;
    let kind = body
        .kind
        .as_deref()
        .and_then(MessageKind::from_label)
        .unwrap_or(MessageKind::Message);

    let limits = &state.orchestrator.services().limits;
    limits
        .validate(&body.message, kind)
        .await
        .map_err(too_long)?;

    Ok(Json(ValidateResponse {
        valid: true,
        length: body.message.chars().count(),
        kind: kind.as_str(),
        maximum: limits.limits().await.max_for(kind),
    }))
}

/// `GET /api/ai/limits`: the limits currently in force.
pub async fn limits_handler(Extension(state): Extension<Arc<AppState>>) -> Json<MessageLimits> {
    Json(state.orchestrator.services().limits.limits().await)
}

/// `GET /api/ai/health`. Degraded means answers come from the fallback.
pub async fn ai_health_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<AiHealthResponse> {
    let services = state.orchestrator.services();
    let live = services.answers.model_available();
    let message_limits = services.limits.limits().await;
    Json(AiHealthResponse {
        status: if live { "healthy" } else { "degraded" },
        model: services.answers.model_name(),
        features: AiFeatures {
            ai_responses: live,
            sentiment_analysis: live,
            message_validation: message_limits.enable_validation,
            knowledge_base: true,
        },
        message_limits,
    })
}
