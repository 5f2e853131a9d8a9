use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Which speech-to-text engine to construct at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Hosted Whisper API.
    Openai,
    /// whisper.cpp binary on the local machine.
    Local,
    /// No engine; every transcription degrades.
    Disabled,
}

fn default_engine() -> EngineKind {
    EngineKind::Openai
}

fn default_openai_model() -> String {
    "whisper-1".to_string()
}

fn default_openai_endpoint() -> String {
    "https://api.openai.com/v1/audio/transcriptions".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_prompt() -> String {
    "This is a customer calling technical support asking for help.".to_string()
}

fn default_fetch_attempts() -> u32 {
    3
}

fn default_fetch_backoff_ms() -> u64 {
    500
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Clone, Deserialize)]
pub struct TranscriptionConfig {
    #[serde(default = "default_engine")]
    pub engine: EngineKind,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default = "default_openai_model")]
    pub openai_model: String,
    #[serde(default = "default_openai_endpoint")]
    pub openai_endpoint: String,
    /// ISO language hint passed to the engine.
    #[serde(default = "default_language")]
    pub language: String,
    /// Context prompt that biases recognition toward support vocabulary.
    #[serde(default = "default_prompt")]
    pub prompt: String,
    #[serde(default)]
    pub whisper_binary: Option<String>,
    #[serde(default)]
    pub whisper_model: Option<String>,
    /// Total recording fetch attempts, including the first.
    #[serde(default = "default_fetch_attempts")]
    pub fetch_attempts: u32,
    /// Wait before the first retry; doubles on each subsequent retry.
    #[serde(default = "default_fetch_backoff_ms")]
    pub fetch_backoff_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            openai_api_key: None,
            openai_model: default_openai_model(),
            openai_endpoint: default_openai_endpoint(),
            language: default_language(),
            prompt: default_prompt(),
            whisper_binary: None,
            whisper_model: None,
            fetch_attempts: default_fetch_attempts(),
            fetch_backoff_ms: default_fetch_backoff_ms(),
            fetch_timeout_secs: default_timeout_secs(),
            request_timeout_secs: default_timeout_secs(),
        }
    }
}

impl fmt::Debug for TranscriptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscriptionConfig")
            .field("engine", &self.engine)
            .field(
                "openai_api_key",
                &self.openai_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("openai_model", &self.openai_model)
            .field("openai_endpoint", &self.openai_endpoint)
            .field("language", &self.language)
            .field("whisper_binary", &self.whisper_binary)
            .field("whisper_model", &self.whisper_model)
            .field("fetch_attempts", &self.fetch_attempts)
            .field("fetch_backoff_ms", &self.fetch_backoff_ms)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl TranscriptionConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Account credentials used to download carrier recordings.
#[derive(Clone, Default)]
pub struct CarrierCredentials {
    pub account_sid: String,
    pub auth_token: String,
}

impl CarrierCredentials {
    pub fn new(account_sid: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.account_sid.is_empty() && !self.auth_token.is_empty()
    }
}

impl fmt::Debug for CarrierCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CarrierCredentials")
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"[REDACTED]")
            .finish()
    }
}
