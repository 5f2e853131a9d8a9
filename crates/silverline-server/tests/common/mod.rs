//! Shared harness for router tests: a file-backed database, scripted
//! collaborators, and helpers that post signed carrier webhooks.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
    Router,
};
use silverline_assist::{
    seed_knowledge, AnswerGenerator, AnswerSettings, AssistError, CompletionRequest,
    LanguageModel, LimitValidator, MessageLimits, SentimentAnalyzer, SqliteKnowledgeBase,
    StaticParameterStore,
};
use silverline_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings};
use silverline_identity::{DigestFeatureExtractor, VoiceIdentityResolver};
use silverline_server::config::Config;
use silverline_server::middleware::{SignatureVerifier, SIGNATURE_HEADER};
use silverline_server::orchestrator::Collaborators;
use silverline_server::{app, AppState};
use silverline_voice::{
    AudioFetcher, RetryPolicy, SpeechToText, Transcription, TranscriptionService, VoiceError,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

pub const AUTH_TOKEN: &str = "test-auth-token";
pub const BASE_URL: &str = "https://calls.test";
pub const AGENT_NUMBER: &str = "+18005550199";
pub const SIGNUP_AGENT_NUMBER: &str = "+18005550100";

pub const FAQS: &str = r#"{"faqs": [
    {"title": "Password reset", "content": "Use the forgot password link on the sign in page.", "keywords": ["password", "reset", "login"], "solution_steps": ["Open the sign in page", "Choose forgot password"]},
    {"title": "Printer offline", "content": "Turn the printer off and on, then check the cable.", "keywords": ["printer"]}
]}"#;

pub const CALM_SENTIMENT: &str =
    r#"{"sentiment":"neutral","score":0.2,"urgency":2,"escalation_recommended":false,"emotion":"neutral"}"#;

/// The recording id doubles as what the caller said: the fetcher returns
/// the last URL segment with dashes turned into spaces.
pub fn recording_url(words: &str) -> String {
    format!("https://api.twilio.test/recordings/{}", words.replace(' ', "-"))
}

struct ScriptedFetcher;

#[async_trait]
impl AudioFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, VoiceError> {
        let segment = url.rsplit('/').next().unwrap_or_default();
        if segment.starts_with("missing") {
            return Err(VoiceError::FetchStatus { status: 404 });
        }
        Ok(segment.replace('-', " ").into_bytes())
    }
}

/// "Transcribes" audio by reading it back as text.
struct EchoEngine;

#[async_trait]
impl SpeechToText for EchoEngine {
    fn name(&self) -> &'static str {
        "echo"
    }

    async fn transcribe(&self, audio: &[u8]) -> Result<Transcription, VoiceError> {
        Ok(Transcription {
            text: String::from_utf8_lossy(audio).into_owned(),
            confidence: 0.92,
            language: "en-US".to_string(),
        })
    }
}

/// Model double with one reply for sentiment prompts and one for answers.
pub struct ScriptedModel {
    answer: Mutex<Result<String, u16>>,
    sentiment: Mutex<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            answer: Mutex::new(Ok(
                "Open the sign in page and choose forgot password.".to_string()
            )),
            sentiment: Mutex::new(CALM_SENTIMENT.to_string()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn set_answer(&self, reply: Result<&str, u16>) {
        *self.answer.lock().unwrap() = reply.map(str::to_string);
    }

    pub fn set_sentiment(&self, json: &str) {
        *self.sentiment.lock().unwrap() = json.to_string();
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, AssistError> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        if request.prompt.starts_with("Analyze the sentiment") {
            return Ok(self.sentiment.lock().unwrap().clone());
        }
        match &*self.answer.lock().unwrap() {
            Ok(text) => Ok(text.clone()),
            Err(status) => Err(AssistError::ModelApi {
                status: *status,
                message: "overloaded".to_string(),
            }),
        }
    }
}

pub struct Harness {
    pub app: Router,
    pub pool: DbPool,
    pub model: Arc<ScriptedModel>,
    pub signer: SignatureVerifier,
    _db: tempfile::NamedTempFile,
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.carrier.auth_token = AUTH_TOKEN.to_string();
    config.carrier.public_base_url = Some(BASE_URL.to_string());
    config.carrier.human_agent_number = AGENT_NUMBER.to_string();
    config.carrier.signup_agent_number = Some(SIGNUP_AGENT_NUMBER.to_string());
    config
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        Self::with_limits(config, MessageLimits::default())
    }

    pub fn with_limits(config: Config, message_limits: MessageLimits) -> Self {
        let db = tempfile::NamedTempFile::new().unwrap();
        let pool = create_pool(db.path().to_str().unwrap(), DbRuntimeSettings::default()).unwrap();
        {
            let conn = pool.get().unwrap();
            run_migrations(&conn).unwrap();
            seed_knowledge(&conn, FAQS).unwrap();
        }

        let model = ScriptedModel::new();
        let limits = Arc::new(LimitValidator::new(
            Arc::new(StaticParameterStore::new(message_limits)),
            Duration::from_secs(300),
        ));
        let transcription = TranscriptionService::new(
            Arc::new(ScriptedFetcher),
            Arc::new(EchoEngine),
            RetryPolicy {
                attempts: 3,
                base_delay: Duration::from_millis(1),
            },
            "en-US",
        );
        let services = Collaborators {
            resolver: VoiceIdentityResolver::default(),
            extractor: Arc::new(DigestFeatureExtractor),
            transcription: Arc::new(transcription),
            answers: Arc::new(AnswerGenerator::new(
                model.clone(),
                Arc::new(SqliteKnowledgeBase::new(pool.clone(), Duration::from_secs(300))),
                limits.clone(),
                AnswerSettings::default(),
            )),
            sentiment: Arc::new(SentimentAnalyzer::new(
                model.clone(),
                limits.clone(),
                Duration::from_secs(5),
            )),
            limits,
        };

        let state = AppState::new(pool.clone(), services, &config);
        Self {
            app: app(state),
            pool,
            model,
            signer: SignatureVerifier::new(AUTH_TOKEN, Some(BASE_URL.to_string())),
            _db: db,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, String) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    /// Builds a correctly signed webhook request from `peer`.
    pub fn webhook_request(&self, path: &str, params: &[(&str, &str)], peer: IpAddr) -> Request<Body> {
        let owned: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let signature = self.signer.sign(&format!("{BASE_URL}{path}"), &owned);
        let body = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();

        let mut request = Request::builder()
            .uri(path)
            .method("POST")
            .header("content-type", "application/x-www-form-urlencoded")
            .header(SIGNATURE_HEADER, signature)
            .body(Body::from(body))
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::new(peer, 40000)));
        request
    }

    pub async fn webhook(&self, path: &str, params: &[(&str, &str)]) -> (StatusCode, String) {
        self.send(self.webhook_request(path, params, localhost())).await
    }

    pub fn get_request(&self, path: &str) -> Request<Body> {
        let mut request = Request::builder().uri(path).body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::new(localhost(), 40000)));
        request
    }

    pub fn json_request(&self, method: &str, path: &str, body: &serde_json::Value) -> Request<Body> {
        let mut request = Request::builder()
            .uri(path)
            .method(method)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::new(localhost(), 40000)));
        request
    }
}

pub fn localhost() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

/// Form fields for one webhook of a call.
pub fn call_params<'a>(call_sid: &'a str, from: &'a str, recording: Option<&'a str>) -> Vec<(&'a str, &'a str)> {
    let mut params = vec![("CallSid", call_sid), ("From", from), ("To", "+18005551212")];
    if let Some(url) = recording {
        params.push(("RecordingUrl", url));
        params.push(("RecordingSid", url.rsplit('/').next().unwrap_or(url)));
    }
    params
}
