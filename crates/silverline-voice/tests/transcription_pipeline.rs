use async_trait::async_trait;
use silverline_voice::{
    AudioFetcher, CarrierCredentials, EngineKind, RetryPolicy, SpeechToText, Transcription,
    TranscriptionConfig, TranscriptionService, UnavailableEngine, VoiceError, UNCLEAR_AUDIO_TEXT,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct FlakyFetcher {
    failures_before_success: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl AudioFetcher for FlakyFetcher {
    async fn fetch(&self, _url: &str) -> Result<Vec<u8>, VoiceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures_before_success {
            Err(VoiceError::FetchStatus { status: 404 })
        } else {
            Ok(b"RIFF....WAVE".to_vec())
        }
    }
}

struct EchoEngine;

#[async_trait]
impl SpeechToText for EchoEngine {
    fn name(&self) -> &'static str {
        "echo"
    }

    async fn transcribe(&self, audio: &[u8]) -> Result<Transcription, VoiceError> {
        Ok(Transcription {
            text: format!("heard {} bytes", audio.len()),
            confidence: 0.85,
            language: "en".to_string(),
        })
    }
}

fn service(fetcher: Arc<FlakyFetcher>, engine: Arc<dyn SpeechToText>) -> TranscriptionService {
    TranscriptionService::new(
        fetcher,
        engine,
        RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(10),
        },
        "en",
    )
}

#[tokio::test(start_paused = true)]
async fn transcribes_after_transient_404s() {
    let fetcher = Arc::new(FlakyFetcher {
        failures_before_success: 2,
        calls: AtomicUsize::new(0),
    });
    let result = service(fetcher.clone(), Arc::new(EchoEngine))
        .transcribe_recording(Some("https://carrier/rec/RE1"))
        .await;

    assert!(!result.degraded);
    assert_eq!(result.transcription.text, "heard 12 bytes");
    assert_eq!(result.audio.as_deref(), Some(&b"RIFF....WAVE"[..]));
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn exhausted_fetch_degrades_to_zero_confidence() {
    let fetcher = Arc::new(FlakyFetcher {
        failures_before_success: usize::MAX,
        calls: AtomicUsize::new(0),
    });
    let result = service(fetcher.clone(), Arc::new(EchoEngine))
        .transcribe_recording(Some("https://carrier/rec/RE2"))
        .await;

    assert!(result.degraded);
    assert_eq!(result.transcription.confidence, 0.0);
    assert_eq!(result.transcription.text, UNCLEAR_AUDIO_TEXT);
    assert!(result.audio.is_none());
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn engine_failure_keeps_audio_for_voice_features() {
    let fetcher = Arc::new(FlakyFetcher {
        failures_before_success: 0,
        calls: AtomicUsize::new(0),
    });
    let result = service(fetcher, Arc::new(UnavailableEngine))
        .transcribe_recording(Some("https://carrier/rec/RE3"))
        .await;

    assert!(result.degraded);
    assert!(result.audio.is_some());
}

#[tokio::test]
async fn missing_url_skips_fetch() {
    let fetcher = Arc::new(FlakyFetcher {
        failures_before_success: 0,
        calls: AtomicUsize::new(0),
    });
    let result = service(fetcher.clone(), Arc::new(EchoEngine))
        .transcribe_recording(None)
        .await;

    assert!(result.degraded);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn incomplete_engine_settings_fall_back_to_unavailable() {
    let openai_without_key = TranscriptionConfig::default();
    let svc = TranscriptionService::from_config(&openai_without_key, CarrierCredentials::default())
        .unwrap();
    assert!(!svc.is_available());

    let local_without_paths = TranscriptionConfig {
        engine: EngineKind::Local,
        ..TranscriptionConfig::default()
    };
    let svc = TranscriptionService::from_config(&local_without_paths, CarrierCredentials::default())
        .unwrap();
    assert_eq!(svc.engine_name(), "unavailable");

    let local = TranscriptionConfig {
        engine: EngineKind::Local,
        whisper_binary: Some("/opt/whisper/main".to_string()),
        whisper_model: Some("/opt/whisper/ggml-base.en.bin".to_string()),
        ..TranscriptionConfig::default()
    };
    let svc = TranscriptionService::from_config(&local, CarrierCredentials::default()).unwrap();
    assert_eq!(svc.engine_name(), "local-whisper");
    assert!(svc.is_available());
}
