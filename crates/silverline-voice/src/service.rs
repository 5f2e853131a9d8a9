use crate::config::{CarrierCredentials, EngineKind, TranscriptionConfig};
use crate::error::VoiceError;
use crate::fetch::{fetch_with_retry, AudioFetcher, HttpAudioFetcher, RetryPolicy};
use crate::stt::{LocalWhisperEngine, SpeechToText, Transcription, UnavailableEngine, WhisperApiEngine};
use std::sync::Arc;
use std::time::Duration;

/// Text substituted when a recording could not be transcribed.
pub const UNCLEAR_AUDIO_TEXT: &str =
    "I'm sorry, I couldn't understand what you said. Could you please repeat your question more clearly?";

/// A transcribed caller recording.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingTranscript {
    pub transcription: Transcription,
    /// Raw audio, when it was retrieved.
    pub audio: Option<Vec<u8>>,
    /// True when the text is a placeholder rather than what the caller said.
    pub degraded: bool,
}

/// Fetch-then-transcribe pipeline. Never fails; failures yield a degraded
/// placeholder with confidence `0.0`.
#[derive(Clone)]
pub struct TranscriptionService {
    fetcher: Arc<dyn AudioFetcher>,
    engine: Arc<dyn SpeechToText>,
    retry: RetryPolicy,
    language: String,
}

impl TranscriptionService {
    pub fn new(
        fetcher: Arc<dyn AudioFetcher>,
        engine: Arc<dyn SpeechToText>,
        retry: RetryPolicy,
        language: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            engine,
            retry,
            language: language.into(),
        }
    }

    /// Builds the service from configuration. A selected engine whose
    /// settings are incomplete is replaced by [`UnavailableEngine`].
    pub fn from_config(
        config: &TranscriptionConfig,
        credentials: CarrierCredentials,
    ) -> Result<Self, VoiceError> {
        let fetcher = Arc::new(HttpAudioFetcher::new(credentials, config.fetch_timeout())?);
        let engine = build_engine(config)?;
        let retry = RetryPolicy {
            attempts: config.fetch_attempts,
            base_delay: Duration::from_millis(config.fetch_backoff_ms),
        };
        Ok(Self::new(fetcher, engine, retry, config.language.clone()))
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    pub fn is_available(&self) -> bool {
        self.engine.is_available()
    }

    /// Fetches and transcribes a recording.
    pub async fn transcribe_recording(&self, url: Option<&str>) -> RecordingTranscript {
        let Some(url) = url.filter(|u| !u.is_empty()) else {
            return self.degraded(None);
        };

        let audio = match fetch_with_retry(self.fetcher.as_ref(), url, self.retry).await {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(error = %e, "recording unavailable, using placeholder transcript");
                return self.degraded(None);
            }
        };

        match self.engine.transcribe(&audio).await {
            Ok(transcription) if !transcription.text.is_empty() => RecordingTranscript {
                transcription,
                audio: Some(audio),
                degraded: false,
            },
            Ok(_) => {
                tracing::warn!(engine = self.engine.name(), "engine returned empty text");
                self.degraded(Some(audio))
            }
            Err(e) => {
                tracing::warn!(engine = self.engine.name(), error = %e, "transcription failed");
                self.degraded(Some(audio))
            }
        }
    }

    fn degraded(&self, audio: Option<Vec<u8>>) -> RecordingTranscript {
        RecordingTranscript {
            transcription: Transcription {
                text: UNCLEAR_AUDIO_TEXT.to_string(),
                confidence: 0.0,
                language: self.language.clone(),
            },
            audio,
            degraded: true,
        }
    }
}

fn build_engine(config: &TranscriptionConfig) -> Result<Arc<dyn SpeechToText>, VoiceError> {
    let engine: Arc<dyn SpeechToText> = match config.engine {
        EngineKind::Openai => match config.openai_api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => Arc::new(WhisperApiEngine::new(
                key,
                &config.openai_endpoint,
                &config.openai_model,
                &config.language,
                &config.prompt,
                config.request_timeout(),
            )?),
            None => {
                tracing::warn!("OpenAI transcription selected without an API key");
                Arc::new(UnavailableEngine)
            }
        },
        EngineKind::Local => match (&config.whisper_binary, &config.whisper_model) {
            (Some(binary), Some(model)) => Arc::new(LocalWhisperEngine::new(
                model,
                binary,
                config.language.clone(),
            )),
            _ => {
                tracing::warn!("local transcription selected without binary and model paths");
                Arc::new(UnavailableEngine)
            }
        },
        EngineKind::Disabled => Arc::new(UnavailableEngine),
    };
    tracing::info!(engine = engine.name(), "transcription engine ready");
    Ok(engine)
}
