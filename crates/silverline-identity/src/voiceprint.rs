//! Voice features, fingerprints, and the comparator seam.

use sha2::{Digest, Sha256};
use std::fmt;

/// Derived representation of a speaker's voice.
///
/// The value is opaque and must never reach logs, so `Debug` is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct Voiceprint(String);

impl Voiceprint {
    /// Wraps a stored fingerprint.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The stored form, for persistence only.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Voiceprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Voiceprint([REDACTED])")
    }
}

/// Coarse recording quality recorded on every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioQuality {
    Good,
    Poor,
    /// No usable audio was retrieved.
    Missing,
}

impl AudioQuality {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Poor => "poor",
            Self::Missing => "missing",
        }
    }
}

/// Features extracted from one caller recording.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceFeatures {
    pub voiceprint: Option<Voiceprint>,
    /// What the caller said, as transcribed.
    pub spoken_text: String,
    /// Extractor confidence in `[0, 1]`.
    pub confidence: f64,
    pub audio_quality: AudioQuality,
}

impl VoiceFeatures {
    /// Features for a call where no recording could be obtained.
    pub fn missing(spoken_text: impl Into<String>) -> Self {
        Self {
            voiceprint: None,
            spoken_text: spoken_text.into(),
            confidence: 0.0,
            audio_quality: AudioQuality::Missing,
        }
    }
}

/// Turns raw audio into comparable features.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, audio: Option<&[u8]>, spoken_text: &str) -> VoiceFeatures;
}

/// Recordings shorter than this are flagged as poor quality.
const MIN_GOOD_AUDIO_BYTES: usize = 8_000;

/// Placeholder extractor: the fingerprint is the SHA-256 of the audio bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigestFeatureExtractor;

impl FeatureExtractor for DigestFeatureExtractor {
    fn extract(&self, audio: Option<&[u8]>, spoken_text: &str) -> VoiceFeatures {
        let audio = match audio {
            Some(bytes) if !bytes.is_empty() => bytes,
            _ => return VoiceFeatures::missing(spoken_text),
        };

        let quality = if audio.len() >= MIN_GOOD_AUDIO_BYTES {
            AudioQuality::Good
        } else {
            AudioQuality::Poor
        };

        VoiceFeatures {
            voiceprint: Some(Voiceprint(hex::encode(Sha256::digest(audio)))),
            spoken_text: spoken_text.to_string(),
            confidence: 0.85,
            audio_quality: quality,
        }
    }
}

/// Scores how likely two voiceprints belong to the same speaker.
///
/// Returns a similarity in `[0, 1]`; a missing side scores `0.0`.
pub trait VoiceprintComparator: Send + Sync {
    fn compare(&self, presented: Option<&Voiceprint>, stored: Option<&Voiceprint>) -> f64;
}

/// Reference comparator: identical fingerprints score 0.95, anything else 0.45.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigestComparator;

impl VoiceprintComparator for DigestComparator {
    fn compare(&self, presented: Option<&Voiceprint>, stored: Option<&Voiceprint>) -> f64 {
        match (presented, stored) {
            (Some(a), Some(b)) if a == b => 0.95,
            (Some(_), Some(_)) => 0.45,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparator_scores() {
        let a = Voiceprint::new("aaa");
        let b = Voiceprint::new("bbb");
        let cmp = DigestComparator;
        assert_eq!(cmp.compare(Some(&a), Some(&a.clone())), 0.95);
        assert_eq!(cmp.compare(Some(&a), Some(&b)), 0.45);
        assert_eq!(cmp.compare(None, Some(&b)), 0.0);
        assert_eq!(cmp.compare(Some(&a), None), 0.0);
    }

    #[test]
    fn extractor_is_deterministic_for_same_audio() {
        let audio = vec![7u8; 16_000];
        let first = DigestFeatureExtractor.extract(Some(&audio), "hello");
        let second = DigestFeatureExtractor.extract(Some(&audio), "hello");
        assert_eq!(first.voiceprint, second.voiceprint);
        assert_eq!(first.audio_quality, AudioQuality::Good);
        assert_eq!(first.confidence, 0.85);
    }

    #[test]
    fn short_or_missing_audio_is_flagged() {
        let short = DigestFeatureExtractor.extract(Some(&[1, 2, 3]), "hi");
        assert_eq!(short.audio_quality, AudioQuality::Poor);
        assert!(short.voiceprint.is_some());

        let missing = DigestFeatureExtractor.extract(None, "");
        assert_eq!(missing.audio_quality, AudioQuality::Missing);
        assert_eq!(missing.voiceprint, None);

        let empty = DigestFeatureExtractor.extract(Some(&[]), "");
        assert_eq!(empty.audio_quality, AudioQuality::Missing);
    }

    #[test]
    fn debug_never_prints_the_fingerprint() {
        let print = Voiceprint::new("deadbeef");
        assert!(!format!("{print:?}").contains("deadbeef"));
    }
}
