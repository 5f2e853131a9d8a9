//! Speech infrastructure for the Silverline call-flow engine.
//!
//! The carrier records what the caller says and hands us a URL. This crate
//! downloads the recording (retrying while the carrier finishes publishing
//! it) and converts it to text through a pluggable [`SpeechToText`] engine:
//! the hosted Whisper API, a local whisper.cpp binary, or a stand-in that
//! always fails.
//!
//! [`TranscriptionService`] never returns an error. When audio or text
//! cannot be obtained it yields a placeholder with confidence `0.0`, and the
//! call continues.

pub mod config;
pub mod error;
pub mod fetch;
pub mod service;
pub mod stt;

pub use config::{CarrierCredentials, EngineKind, TranscriptionConfig};
pub use error::VoiceError;
pub use fetch::{fetch_with_retry, AudioFetcher, HttpAudioFetcher, RetryPolicy};
pub use service::{RecordingTranscript, TranscriptionService, UNCLEAR_AUDIO_TEXT};
pub use stt::{LocalWhisperEngine, SpeechToText, Transcription, UnavailableEngine, WhisperApiEngine};
