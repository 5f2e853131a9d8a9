//! Caller sentiment scoring.
//!
//! The model is asked for a JSON verdict. Anything unusable (no model,
//! timeout, oversize text, unparsable output) falls back to keyword
//! heuristics. On both paths the score is clamped, the label follows the
//! ±0.2 bands, and the escalation flag is recomputed from urgency and score.

use serde::Deserialize;
use silverline_types::{SentimentLabel, SentimentSource};
use std::sync::Arc;
use std::time::Duration;

use crate::error::AssistError;
use crate::limits::{LimitValidator, MessageKind};
use crate::llm::{CompletionRequest, LanguageModel};

const NEGATIVE_WORDS: &[&str] = &[
    "angry",
    "frustrated",
    "hate",
    "terrible",
    "awful",
    "horrible",
    "broken",
    "doesn't work",
    "not working",
    "problem",
    "issue",
    "error",
];

const POSITIVE_WORDS: &[&str] = &[
    "good", "great", "excellent", "works", "working", "perfect", "love", "thank", "thanks",
    "helpful",
];

const URGENT_WORDS: &[&str] = &[
    "urgent",
    "emergency",
    "asap",
    "immediately",
    "critical",
    "important",
    "stuck",
    "can't",
];

const EMOTIONS: &[&str] = &[
    "frustrated",
    "angry",
    "satisfied",
    "confused",
    "neutral",
    "worried",
];

const BASELINE_URGENCY: u8 = 2;

/// Scored sentiment for one utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct SentimentReport {
    pub label: SentimentLabel,
    /// In `[-1, 1]`.
    pub score: f64,
    /// In `1..=5`.
    pub urgency: u8,
    pub emotion: String,
    pub escalation_recommended: bool,
    pub source: SentimentSource,
}

impl SentimentReport {
    /// Builds a report, clamping inputs and deriving label and escalation.
    pub fn new(score: f64, urgency: u8, emotion: &str, source: SentimentSource) -> Self {
        let score = if score.is_finite() { score.clamp(-1.0, 1.0) } else { 0.0 };
        let urgency = urgency.clamp(1, 5);
        let emotion = if EMOTIONS.contains(&emotion) { emotion } else { "neutral" };
        // Label and escalation use the exact score; only the stored value is rounded.
        Self {
            label: SentimentLabel::from_score(score),
            score: (score * 100.0).round() / 100.0,
            urgency,
            emotion: emotion.to_string(),
            escalation_recommended: urgency > 3 || score < -0.5,
            source,
        }
    }
}

/// Keyword scoring used when the model path is unavailable.
pub fn heuristic_sentiment(text: &str) -> SentimentReport {
    let lower = text.to_lowercase();
    let mut score = 0.0;
    let mut urgency = BASELINE_URGENCY;
    let mut emotion = "neutral";

    for word in NEGATIVE_WORDS {
        if lower.contains(word) {
            score -= 0.3;
            emotion = "frustrated";
        }
    }
    for word in POSITIVE_WORDS {
        if lower.contains(word) {
            score += 0.3;
            emotion = "satisfied";
        }
    }
    for word in URGENT_WORDS {
        if lower.contains(word) {
            urgency = (urgency + 1).min(5);
        }
    }

    SentimentReport::new(score, urgency, emotion, SentimentSource::Heuristic)
}

#[derive(Deserialize)]
struct ModelVerdict {
    score: f64,
    urgency: f64,
    #[serde(default)]
    emotion: Option<String>,
}

/// Pulls the first JSON object out of model text, tolerating prose or code
/// fences around it.
fn parse_verdict(text: &str) -> Result<ModelVerdict, AssistError> {
    let start = text
        .find('{')
        .ok_or_else(|| AssistError::Parse("no JSON object in sentiment output".to_string()))?;
    let end = text
        .rfind('}')
        .filter(|&end| end > start)
        .ok_or_else(|| AssistError::Parse("unterminated JSON in sentiment output".to_string()))?;
    serde_json::from_str(&text[start..=end]).map_err(|e| AssistError::Parse(e.to_string()))
}

fn build_prompt(text: &str) -> String {
    format!(
        "Analyze the sentiment of this customer message and provide a JSON response:
\"{text}\"

Return only valid JSON in this exact format:
{{
  \"sentiment\": \"positive|neutral|negative\",
  \"score\": -1.0 to 1.0,
  \"urgency\": 1-5,
  \"escalation_recommended\": true/false,
  \"emotion\": \"frustrated|angry|satisfied|confused|neutral|worried\"
}}"
    )
}

/// Scores utterances through the model, falling back to heuristics.
#[derive(Clone)]
pub struct SentimentAnalyzer {
    model: Arc<dyn LanguageModel>,
    limits: Arc<LimitValidator>,
    timeout: Duration,
}

impl SentimentAnalyzer {
    pub fn new(model: Arc<dyn LanguageModel>, limits: Arc<LimitValidator>, timeout: Duration) -> Self {
        Self {
            model,
            limits,
            timeout,
        }
    }

    /// Scores `text`. Never fails.
    pub async fn analyze(&self, text: &str) -> SentimentReport {
        if text.trim().is_empty() {
            return SentimentReport::new(0.0, BASELINE_URGENCY, "neutral", SentimentSource::Heuristic);
        }
        match self.analyze_with_model(text).await {
            Ok(report) => report,
            Err(e) => {
                tracing::debug!(error = %e, "sentiment model path failed, using heuristics");
                heuristic_sentiment(text)
            }
        }
    }

    async fn analyze_with_model(&self, text: &str) -> Result<SentimentReport, AssistError> {
        self.limits.validate(text, MessageKind::Message).await?;
        if !self.model.is_available() {
            return Err(AssistError::Unavailable("no language model configured"));
        }

        let request = CompletionRequest {
            prompt: build_prompt(text),
            max_tokens: 150,
            temperature: 0.1,
        };
        let output = tokio::time::timeout(self.timeout, self.model.complete(&request))
            .await
            .map_err(|_| AssistError::Timeout("sentiment model"))??;

        let verdict = parse_verdict(&output)?;
        if !verdict.urgency.is_finite() {
            return Err(AssistError::Parse("urgency is not a number".to_string()));
        }
        let urgency = verdict.urgency.round().clamp(1.0, 5.0) as u8;
        Ok(SentimentReport::new(
            verdict.score,
            urgency,
            verdict.emotion.as_deref().unwrap_or("neutral"),
            SentimentSource::Model,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_negative_and_urgent() {
        let report = heuristic_sentiment("This is terrible, my email is broken and it's urgent");
        assert_eq!(report.score, -0.6);
        assert_eq!(report.urgency, 3);
        assert_eq!(report.emotion, "frustrated");
        assert_eq!(report.label, SentimentLabel::Negative);
        assert!(report.escalation_recommended);
    }

    #[test]
    fn heuristic_positive() {
        let report = heuristic_sentiment("thanks, that was helpful");
        assert_eq!(report.label, SentimentLabel::Positive);
        assert_eq!(report.emotion, "satisfied");
        assert!(!report.escalation_recommended);
    }

    #[test]
    fn heuristic_urgency_caps_at_five() {
        let report = heuristic_sentiment("urgent emergency asap immediately critical");
        assert_eq!(report.urgency, 5);
        assert!(report.escalation_recommended);
    }

    #[test]
    fn escalation_recomputed_from_inputs() {
        let calm = SentimentReport::new(0.1, 5, "neutral", SentimentSource::Model);
        assert!(calm.escalation_recommended);
        let low = SentimentReport::new(-0.51, 1, "angry", SentimentSource::Model);
        assert!(low.escalation_recommended);
        let borderline = SentimentReport::new(-0.5, 3, "worried", SentimentSource::Model);
        assert!(!borderline.escalation_recommended);
    }

    #[test]
    fn escalation_uses_score_before_rounding() {
        let report = SentimentReport::new(-0.504, 1, "angry", SentimentSource::Model);
        assert_eq!(report.score, -0.5);
        assert!(report.escalation_recommended);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let report = SentimentReport::new(-4.0, 9, "furious", SentimentSource::Model);
        assert_eq!(report.score, -1.0);
        assert_eq!(report.urgency, 5);
        assert_eq!(report.emotion, "neutral");
        let nan = SentimentReport::new(f64::NAN, 0, "neutral", SentimentSource::Model);
        assert_eq!(nan.score, 0.0);
        assert_eq!(nan.urgency, 1);
    }

    #[test]
    fn verdict_parses_inside_code_fence() {
        let text = "```json\n{\"sentiment\":\"neutral\",\"score\":0.1,\"urgency\":5,\"escalation_recommended\":false,\"emotion\":\"worried\"}\n```";
        let verdict = parse_verdict(text).unwrap();
        assert_eq!(verdict.urgency, 5.0);
        assert!(parse_verdict("no json here").is_err());
    }
}
