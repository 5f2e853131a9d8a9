use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::answer::AnswerSettings;
use crate::error::AssistError;
use crate::limits::{FileParameterStore, LimitValidator, MessageLimits, StaticParameterStore};
use crate::llm::{AnthropicModel, LanguageModel, UnavailableModel, ANTHROPIC_MESSAGES_URL};

fn default_model() -> String {
    "claude-3-5-sonnet-20241022".to_string()
}

fn default_endpoint() -> String {
    ANTHROPIC_MESSAGES_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    20
}

fn default_sentiment_timeout_secs() -> u64 {
    10
}

fn default_cache_ttl_secs() -> u64 {
    300
}

/// Language model settings.
#[derive(Clone, Deserialize)]
pub struct AssistantConfig {
    #[serde(default)]
    pub anthropic_api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_sentiment_timeout_secs")]
    pub sentiment_timeout_secs: u64,
    #[serde(default)]
    pub answer: AnswerSettings,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            anthropic_api_key: None,
            model: default_model(),
            endpoint: default_endpoint(),
            request_timeout_secs: default_request_timeout_secs(),
            sentiment_timeout_secs: default_sentiment_timeout_secs(),
            answer: AnswerSettings::default(),
        }
    }
}

impl fmt::Debug for AssistantConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssistantConfig")
            .field(
                "anthropic_api_key",
                &self.anthropic_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("sentiment_timeout_secs", &self.sentiment_timeout_secs)
            .field("answer", &self.answer)
            .finish()
    }
}

impl AssistantConfig {
    /// Builds the Anthropic client, or the unavailable stand-in without a key.
    pub fn build_model(&self) -> Result<Arc<dyn LanguageModel>, AssistError> {
        match self.anthropic_api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => {
                tracing::info!(model = %self.model, "language model ready");
                Ok(Arc::new(AnthropicModel::new(
                    key,
                    &self.model,
                    &self.endpoint,
                    Duration::from_secs(self.request_timeout_secs),
                )?))
            }
            None => {
                tracing::warn!("no Anthropic API key; answers will use the fallback text");
                Ok(Arc::new(UnavailableModel))
            }
        }
    }

    pub fn sentiment_timeout(&self) -> Duration {
        Duration::from_secs(self.sentiment_timeout_secs)
    }
}

/// Knowledge store settings.
#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeConfig {
    /// `{"faqs": [...]}` document imported at startup.
    #[serde(default)]
    pub seed_path: Option<PathBuf>,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            seed_path: None,
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl KnowledgeConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Message limit settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// JSON parameter document; when unset, `defaults` are served from memory.
    #[serde(default)]
    pub parameter_file: Option<PathBuf>,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default)]
    pub defaults: MessageLimits,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            parameter_file: None,
            cache_ttl_secs: default_cache_ttl_secs(),
            defaults: MessageLimits::default(),
        }
    }
}

impl LimitsConfig {
    pub fn build_validator(&self) -> LimitValidator {
        let ttl = Duration::from_secs(self.cache_ttl_secs);
        match &self.parameter_file {
            Some(path) => LimitValidator::new(Arc::new(FileParameterStore::new(path)), ttl),
            None => LimitValidator::new(Arc::new(StaticParameterStore::new(self.defaults)), ttl),
        }
    }
}
