//! HTTP surface of the Silverline call-flow engine.
//!
//! Carrier webhooks drive each call through the [`orchestrator`], whose
//! decisions are rendered to call-control XML by [`render`]. A small JSON API
//! takes family signups and exposes the assistant under `/api/ai`, and
//! `/health` reports which collaborators are live.

pub mod api;
pub mod api_ai;
pub mod api_health;
pub mod api_signup;
pub mod api_webhooks;
pub mod background;
pub mod config;
pub mod middleware;
pub mod orchestrator;
pub mod render;
pub mod twiml;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Router,
};
use config::Config;
use middleware::{RateLimiter, SignatureVerifier};
use orchestrator::{CallOrchestrator, Collaborators};
use render::{routes, CallScript};
use silverline_assist::{AnswerGenerator, AssistError, SentimentAnalyzer, SqliteKnowledgeBase};
use silverline_db::DbPool;
use silverline_identity::{DigestFeatureExtractor, VoiceIdentityResolver};
use silverline_types::RateLimitConfig;
use silverline_voice::{TranscriptionService, VoiceError};
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

const MAX_REQUEST_BODY_BYTES: usize = 256 * 1024;

/// Errors building the application state at startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("transcription setup failed: {0}")]
    Voice(#[from] VoiceError),
    #[error("assistant setup failed: {0}")]
    Assist(#[from] AssistError),
}

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub orchestrator: CallOrchestrator,
    pub script: CallScript,
    /// `None` when signature checking is switched off.
    pub signature: Option<SignatureVerifier>,
    pub rate_limit: RateLimitConfig,
    pub rate_limiter: RateLimiter,
    pub signup_ttl_days: u32,
}

impl AppState {
    /// Assembles the state from explicit collaborators.
    pub fn new(pool: DbPool, services: Collaborators, config: &Config) -> Self {
        let signature = if config.carrier.skip_signature_validation {
            tracing::warn!("carrier signature validation is disabled");
            None
        } else {
            if config.carrier.auth_token.is_empty() {
                tracing::error!("no carrier auth token configured; every webhook will be rejected");
            }
            Some(SignatureVerifier::new(
                config.carrier.auth_token.clone(),
                config.carrier.public_base_url.clone(),
            ))
        };

        Self {
            orchestrator: CallOrchestrator::new(pool.clone(), services),
            pool,
            script: CallScript::from_config(&config.carrier),
            signature,
            rate_limit: config.rate_limit.clone(),
            rate_limiter: RateLimiter::new(),
            signup_ttl_days: config.signup.expiry_days,
        }
    }

    /// Builds the production collaborators from configuration. Services
    /// without credentials get their degraded stand-ins.
    pub fn from_config(pool: DbPool, config: &Config) -> Result<Self, StartupError> {
        let limits = Arc::new(config.limits.build_validator());
        let model = config.assistant.build_model()?;
        let knowledge = Arc::new(SqliteKnowledgeBase::new(
            pool.clone(),
            config.knowledge.cache_ttl(),
        ));
        let transcription =
            TranscriptionService::from_config(&config.transcription, config.carrier.credentials())?;

        let services = Collaborators {
            resolver: VoiceIdentityResolver::default(),
            extractor: Arc::new(DigestFeatureExtractor),
            transcription: Arc::new(transcription),
            answers: Arc::new(AnswerGenerator::new(
                model.clone(),
                knowledge,
                limits.clone(),
                config.assistant.answer.clone(),
            )),
            sentiment: Arc::new(SentimentAnalyzer::new(
                model,
                limits.clone(),
                config.assistant.sentiment_timeout(),
            )),
            limits,
        };
        Ok(Self::new(pool, services, config))
    }
}

pub fn app(state: AppState) -> Router {
    let webhooks = Router::new()
        .route(
            routes::INCOMING_CALL,
            post(api_webhooks::incoming_call_handler),
        )
        .route(routes::VOICE_AUTH, post(api_webhooks::voice_auth_handler))
        .route(
            routes::COMPLETE_ENROLLMENT,
            post(api_webhooks::complete_enrollment_handler),
        )
        .route(
            routes::SUPPORT_REQUEST,
            post(api_webhooks::support_request_handler),
        )
        .route(routes::FOLLOW_UP, post(api_webhooks::follow_up_handler))
        .route(
            routes::SIGNUP_RESPONSE,
            post(api_webhooks::signup_response_handler),
        )
        .route(routes::CALL_STATUS, post(api_webhooks::call_status_handler))
        .route_layer(axum::middleware::from_fn(middleware::signature_middleware));

    Router::new()
        .route("/health", get(api_health::health_handler))
        .route("/api/signups", post(api_signup::create_signup_handler))
        .route("/api/ai/generate", post(api_ai::generate_handler))
        .route("/api/ai/sentiment", post(api_ai::sentiment_handler))
        .route("/api/ai/validate", post(api_ai::validate_handler))
        .route("/api/ai/limits", get(api_ai::limits_handler))
        .route("/api/ai/health", get(api_ai::ai_health_handler))
        .merge(webhooks)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(axum::middleware::from_fn(middleware::rate_limit_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
