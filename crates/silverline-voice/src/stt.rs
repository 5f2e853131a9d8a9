use crate::error::VoiceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Maximum audio input size for STT (10 MiB). Prevents OOM from oversized payloads.
const MAX_STT_INPUT_BYTES: usize = 10 * 1024 * 1024;

/// Timeout for the local STT process.
const STT_TIMEOUT: Duration = Duration::from_secs(120);

/// Confidence reported for engines that do not score their output.
const ASSUMED_CONFIDENCE: f64 = 0.85;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
    /// Estimate in `[0, 1]`; `0.0` marks a degraded placeholder.
    pub confidence: f64,
    pub language: String,
}

/// Converts recorded audio into text.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Short engine name used in logs and health reports.
    fn name(&self) -> &'static str;

    /// False for engines that can never succeed.
    fn is_available(&self) -> bool {
        true
    }

    async fn transcribe(&self, audio: &[u8]) -> Result<Transcription, VoiceError>;
}

fn check_input_size(audio: &[u8]) -> Result<(), VoiceError> {
    if audio.len() > MAX_STT_INPUT_BYTES {
        return Err(VoiceError::Stt(format!(
            "audio data exceeds maximum size: {} bytes (limit: {} bytes)",
            audio.len(),
            MAX_STT_INPUT_BYTES
        )));
    }
    Ok(())
}

/// Hosted Whisper transcription over multipart upload.
#[derive(Debug, Clone)]
pub struct WhisperApiEngine {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    language: String,
    prompt: String,
}

#[derive(Deserialize)]
struct WhisperApiResponse {
    text: String,
    #[serde(default)]
    language: Option<String>,
}

impl WhisperApiEngine {
    pub fn new(
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        language: impl Into<String>,
        prompt: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, VoiceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: endpoint.into(),
            model: model.into(),
            language: language.into(),
            prompt: prompt.into(),
        })
    }
}

#[async_trait]
impl SpeechToText for WhisperApiEngine {
    fn name(&self) -> &'static str {
        "openai-whisper"
    }

    async fn transcribe(&self, audio: &[u8]) -> Result<Transcription, VoiceError> {
        check_input_size(audio)?;

        let file = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name("recording.wav")
            .mime_str("audio/wav")
            .map_err(|e| VoiceError::Stt(format!("failed to build form part: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("model", self.model.clone())
            .text("language", self.language.clone())
            .text("response_format", "json")
            .text("temperature", "0.2")
            .text("prompt", self.prompt.clone());

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::Stt(format!(
                "whisper API returned {}: {}",
                status.as_u16(),
                body.chars().take(200).collect::<String>()
            )));
        }

        let parsed: WhisperApiResponse = response.json().await?;
        Ok(Transcription {
            text: parsed.text.trim().to_string(),
            confidence: ASSUMED_CONFIDENCE,
            language: parsed.language.unwrap_or_else(|| self.language.clone()),
        })
    }
}

/// whisper.cpp run as a subprocess, audio on stdin and text on stdout.
#[derive(Debug, Clone)]
pub struct LocalWhisperEngine {
    model_path: PathBuf,
    binary_path: PathBuf,
    language: String,
}

impl LocalWhisperEngine {
    pub fn new(
        model_path: impl Into<PathBuf>,
        binary_path: impl Into<PathBuf>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            model_path: model_path.into(),
            binary_path: binary_path.into(),
            language: language.into(),
        }
    }
}

#[async_trait]
impl SpeechToText for LocalWhisperEngine {
    fn name(&self) -> &'static str {
        "local-whisper"
    }

    async fn transcribe(&self, audio: &[u8]) -> Result<Transcription, VoiceError> {
        check_input_size(audio)?;

        let mut command = Command::new(&self.binary_path);
        // -m <model>, -l <lang>, -f - reads stdin, -nt drops timestamps
        command
            .arg("-m")
            .arg(&self.model_path)
            .arg("-l")
            .arg(&self.language)
            .arg("-nt")
            .arg("-f")
            .arg("-")
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| VoiceError::Stt(format!("Failed to spawn STT binary: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VoiceError::Stt("Failed to open stdin".to_string()))?;
        stdin
            .write_all(audio)
            .await
            .map_err(|e| VoiceError::Stt(format!("Failed to write to stdin: {}", e)))?;
        drop(stdin);

        let output = tokio::time::timeout(STT_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| {
                VoiceError::Stt(format!(
                    "STT process timed out after {} seconds",
                    STT_TIMEOUT.as_secs()
                ))
            })?
            .map_err(|e| VoiceError::Stt(format!("Failed to read stdout: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoiceError::Stt(format!("STT binary failed: {}", stderr)));
        }

        Ok(Transcription {
            text: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            confidence: ASSUMED_CONFIDENCE,
            language: self.language.clone(),
        })
    }
}

/// Stand-in used when no engine is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableEngine;

#[async_trait]
impl SpeechToText for UnavailableEngine {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn is_available(&self) -> bool {
        false
    }

    async fn transcribe(&self, _audio: &[u8]) -> Result<Transcription, VoiceError> {
        Err(VoiceError::Unavailable("no speech-to-text engine configured"))
    }
}
