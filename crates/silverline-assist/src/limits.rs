//! Message length limits backed by a dynamic parameter store.
//!
//! Limits are read through a [`ParameterStore`] and cached for a short TTL.
//! When the store fails, the defaults apply (and are cached the same way),
//! so a broken store never blocks a call.

use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::error::LimitError;

/// Category of text being validated; each has its own limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Message,
    Transcription,
    AiRequest,
    WebhookBody,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Transcription => "transcription",
            Self::AiRequest => "ai_request",
            Self::WebhookBody => "webhook_body",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "message" => Some(Self::Message),
            "transcription" => Some(Self::Transcription),
            "ai_request" => Some(Self::AiRequest),
            "webhook_body" => Some(Self::WebhookBody),
            _ => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_max_message_length() -> usize {
    8000
}

fn default_max_transcription_length() -> usize {
    5000
}

fn default_max_webhook_body_size() -> usize {
    10000
}

fn default_max_ai_request_length() -> usize {
    8000
}

fn default_enable_validation() -> bool {
    true
}

/// Limits as stored in the parameter document (camelCase JSON).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageLimits {
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
    #[serde(default = "default_max_transcription_length")]
    pub max_transcription_length: usize,
    #[serde(default = "default_max_webhook_body_size")]
    pub max_webhook_body_size: usize,
    #[serde(default = "default_max_ai_request_length")]
    pub max_ai_request_length: usize,
    #[serde(default = "default_enable_validation")]
    pub enable_validation: bool,
}

impl Default for MessageLimits {
    fn default() -> Self {
        Self {
            max_message_length: default_max_message_length(),
            max_transcription_length: default_max_transcription_length(),
            max_webhook_body_size: default_max_webhook_body_size(),
            max_ai_request_length: default_max_ai_request_length(),
            enable_validation: default_enable_validation(),
        }
    }
}

impl MessageLimits {
    pub fn max_for(&self, kind: MessageKind) -> usize {
        match kind {
            MessageKind::Message => self.max_message_length,
            MessageKind::Transcription => self.max_transcription_length,
            MessageKind::AiRequest => self.max_ai_request_length,
            MessageKind::WebhookBody => self.max_webhook_body_size,
        }
    }

    /// Checks `text` against the limit for `kind`. Length is counted in
    /// characters; a text exactly at the limit passes.
    pub fn check(&self, text: &str, kind: MessageKind) -> Result<(), LimitError> {
        if !self.enable_validation {
            return Ok(());
        }
        let max = self.max_for(kind);
        let length = text.chars().count();
        if length > max {
            return Err(LimitError::TooLong { kind, length, max });
        }
        Ok(())
    }
}

/// Source of runtime-adjustable limits.
#[async_trait]
pub trait ParameterStore: Send + Sync {
    async fn message_limits(&self) -> Result<MessageLimits, LimitError>;
}

/// Limits held in memory; can be replaced at runtime.
#[derive(Debug, Default)]
pub struct StaticParameterStore {
    limits: RwLock<MessageLimits>,
}

impl StaticParameterStore {
    pub fn new(limits: MessageLimits) -> Self {
        Self {
            limits: RwLock::new(limits),
        }
    }

    pub fn set(&self, limits: MessageLimits) {
        *self.limits.write().unwrap_or_else(|e| e.into_inner()) = limits;
    }
}

#[async_trait]
impl ParameterStore for StaticParameterStore {
    async fn message_limits(&self) -> Result<MessageLimits, LimitError> {
        Ok(*self.limits.read().unwrap_or_else(|e| e.into_inner()))
    }
}

/// Limits read from a JSON document on disk on every (uncached) lookup, so
/// operators can edit the file without a restart.
#[derive(Debug, Clone)]
pub struct FileParameterStore {
    path: PathBuf,
}

impl FileParameterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ParameterStore for FileParameterStore {
    async fn message_limits(&self) -> Result<MessageLimits, LimitError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| LimitError::Store(format!("{}: {e}", self.path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| LimitError::Store(format!("{}: {e}", self.path.display())))
    }
}

/// Validates text lengths against cached parameter-store limits.
pub struct LimitValidator {
    store: Arc<dyn ParameterStore>,
    cached: Cache<(), MessageLimits>,
}

impl LimitValidator {
    pub fn new(store: Arc<dyn ParameterStore>, ttl: Duration) -> Self {
        let cached = Cache::builder().max_capacity(1).time_to_live(ttl).build();
        Self { store, cached }
    }

    /// Current limits, from cache when fresh. Concurrent misses share one
    /// store lookup.
    pub async fn limits(&self) -> MessageLimits {
        self.cached
            .get_with((), async {
                match self.store.message_limits().await {
                    Ok(limits) => limits,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to load message limits, using defaults");
                        MessageLimits::default()
                    }
                }
            })
            .await
    }

    pub async fn validate(&self, text: &str, kind: MessageKind) -> Result<(), LimitError> {
        let result = self.limits().await.check(text, kind);
        if let Err(LimitError::TooLong { length, max, .. }) = &result {
            tracing::warn!(kind = %kind, length, max, "message validation failed");
        }
        result
    }

    /// Forgets cached limits so the next lookup hits the store.
    pub async fn invalidate(&self) {
        self.cached.invalidate(&()).await;
    }
}
