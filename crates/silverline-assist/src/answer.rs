//! Knowledge-grounded answer generation.
//!
//! An utterance becomes search terms, the terms fan out to the knowledge
//! store, the merged matches become a bounded prompt context, and the model
//! answers. Every failure resolves to the fixed fallback answer; this module
//! never returns an error.

use futures_util::future::join_all;
use serde::Deserialize;
use silverline_types::{AnswerConfidence, AnswerSource};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::error::AssistError;
use crate::knowledge::{KnowledgeBase, KnowledgeEntry, KnowledgeMatch};
use crate::limits::{LimitValidator, MessageKind};
use crate::llm::{CompletionRequest, LanguageModel};

pub const FALLBACK_ANSWER: &str = "I apologize, but I'm having trouble processing your request right now. Let me connect you with a human agent who can better assist you.";

const NO_KNOWLEDGE_CONTEXT: &str = "No specific knowledge base information found for this query.";
const KNOWLEDGE_UNAVAILABLE_CONTEXT: &str = "Knowledge base temporarily unavailable.";

const STOP_WORDS: &[&str] = &[
    "how", "do", "can", "what", "where", "when", "why", "is", "are", "the", "a", "an", "to", "i",
    "my", "me", "with", "and", "or", "but",
];

fn default_max_terms() -> usize {
    5
}
fn default_query_terms() -> usize {
    3
}
fn default_per_term_limit() -> usize {
    3
}
fn default_max_entries() -> usize {
    5
}
fn default_max_context_chars() -> usize {
    4000
}
fn default_max_tokens() -> u32 {
    300
}
fn default_temperature() -> f32 {
    0.3
}
fn default_timeout_secs() -> u64 {
    20
}

/// Tunables for answer generation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AnswerSettings {
    /// Search terms kept from an utterance.
    #[serde(default = "default_max_terms")]
    pub max_terms: usize,
    /// Terms actually queried against the store.
    #[serde(default = "default_query_terms")]
    pub query_terms: usize,
    #[serde(default = "default_per_term_limit")]
    pub per_term_limit: usize,
    /// Entries kept after merging.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AnswerSettings {
    fn default() -> Self {
        Self {
            max_terms: default_max_terms(),
            query_terms: default_query_terms(),
            per_term_limit: default_per_term_limit(),
            max_entries: default_max_entries(),
            max_context_chars: default_max_context_chars(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Result of one support turn.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedAnswer {
    pub text: String,
    pub confidence: AnswerConfidence,
    pub source: AnswerSource,
    /// Entries that were placed in the prompt, best first.
    pub entries: Vec<KnowledgeEntry>,
    pub search_terms: Vec<String>,
    /// Why the fallback was used.
    pub error: Option<String>,
}

impl GeneratedAnswer {
    fn fallback(error: &AssistError) -> Self {
        Self {
            text: FALLBACK_ANSWER.to_string(),
            confidence: AnswerConfidence::Low,
            source: AnswerSource::Fallback,
            entries: Vec::new(),
            search_terms: Vec::new(),
            error: Some(error.to_string()),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.source == AnswerSource::Fallback
    }

    /// Best entry used, for the response record.
    pub fn primary_entry_id(&self) -> Option<i64> {
        self.entries.first().map(|e| e.id)
    }
}

/// Lower-cases, strips punctuation and stop words, dedupes in order, and
/// keeps at most `cap` terms longer than two characters.
pub fn extract_search_terms(utterance: &str, cap: usize) -> Vec<String> {
    let cleaned: String = utterance
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' || c.is_whitespace() { c } else { ' ' })
        .collect();

    let mut seen = HashSet::new();
    cleaned
        .split_whitespace()
        .filter(|w| w.chars().count() > 2 && !STOP_WORDS.contains(w))
        .filter(|w| seen.insert(w.to_string()))
        .take(cap)
        .map(str::to_string)
        .collect()
}

/// Merges per-term results.
///
/// Duplicates by (title, body) keep their best rank. The output is ordered
/// by rank, then by term order, then by position within the term's results,
/// and truncated to `limit`.
pub fn merge_matches(per_term: Vec<Vec<KnowledgeMatch>>, limit: usize) -> Vec<KnowledgeMatch> {
    let mut ordered: Vec<(usize, usize, KnowledgeMatch)> = Vec::new();
    for (term_idx, matches) in per_term.into_iter().enumerate() {
        for (pos, m) in matches.into_iter().enumerate() {
            ordered.push((term_idx, pos, m));
        }
    }
    ordered.sort_by(|a, b| (a.2.rank, a.0, a.1).cmp(&(b.2.rank, b.0, b.1)));

    let mut seen = HashSet::new();
    ordered
        .into_iter()
        .map(|(_, _, m)| m)
        .filter(|m| seen.insert((m.entry.title.clone(), m.entry.body.clone())))
        .take(limit)
        .collect()
}

/// Formats entries as prompt context, cut at `max_chars` characters.
pub fn build_context(entries: &[KnowledgeEntry], max_chars: usize) -> String {
    if entries.is_empty() {
        return NO_KNOWLEDGE_CONTEXT.to_string();
    }
    let context = entries
        .iter()
        .map(|entry| {
            let steps = if entry.solution_steps.is_empty() {
                "None provided".to_string()
            } else {
                entry
                    .solution_steps
                    .iter()
                    .enumerate()
                    .map(|(i, step)| format!("{}. {}", i + 1, step))
                    .collect::<Vec<_>>()
                    .join(" ")
            };
            format!(
                "Topic: {}\nSolution: {}\nSteps: {}",
                entry.title, entry.body, steps
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    match context.char_indices().nth(max_chars) {
        Some((cut, _)) => context[..cut].to_string(),
        None => context,
    }
}

fn build_prompt(utterance: &str, context: &str) -> String {
    format!(
        "You are a helpful technical support agent speaking with an older adult over the phone. \
A customer is asking: \"{utterance}\"

Based on the following knowledge base information:
{context}

Please provide a helpful, friendly response that:
1. Directly answers their question using the knowledge base information when available
2. Provides step-by-step instructions from the solution steps
3. Maintains a patient, professional but friendly tone
4. If multiple FAQs are relevant, mention the most appropriate one
5. Keeps the response under 200 words
6. If no specific knowledge base information is available, provides general helpful guidance

Response:"
    )
}

/// Produces support answers from a language model and the knowledge store.
#[derive(Clone)]
pub struct AnswerGenerator {
    model: Arc<dyn LanguageModel>,
    knowledge: Arc<dyn KnowledgeBase>,
    limits: Arc<LimitValidator>,
    settings: AnswerSettings,
}

impl AnswerGenerator {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        knowledge: Arc<dyn KnowledgeBase>,
        limits: Arc<LimitValidator>,
        settings: AnswerSettings,
    ) -> Self {
        Self {
            model,
            knowledge,
            limits,
            settings,
        }
    }

    pub fn model_name(&self) -> &'static str {
        self.model.name()
    }

    pub fn model_available(&self) -> bool {
        self.model.is_available()
    }

    /// Answers a caller utterance. Never fails.
    pub async fn answer(&self, utterance: &str) -> GeneratedAnswer {
        match self.try_answer(utterance).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!(error = %e, "answer generation failed, using fallback");
                GeneratedAnswer::fallback(&e)
            }
        }
    }

    async fn try_answer(&self, utterance: &str) -> Result<GeneratedAnswer, AssistError> {
        self.limits.validate(utterance, MessageKind::AiRequest).await?;
        if !self.model.is_available() {
            return Err(AssistError::Unavailable("no language model configured"));
        }

        let search_terms = extract_search_terms(utterance, self.settings.max_terms);
        let (entries, context) = self.gather_context(&search_terms).await;

        let prompt = build_prompt(utterance, &context);
        self.limits.validate(&prompt, MessageKind::AiRequest).await?;

        let request = CompletionRequest {
            prompt,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        };
        let text = tokio::time::timeout(
            Duration::from_secs(self.settings.timeout_secs),
            self.model.complete(&request),
        )
        .await
        .map_err(|_| AssistError::Timeout("language model"))??;

        let confidence = if entries.is_empty() {
            AnswerConfidence::Medium
        } else {
            AnswerConfidence::High
        };
        tracing::info!(
            entries = entries.len(),
            confidence = %confidence,
            length = text.len(),
            "support answer generated"
        );

        Ok(GeneratedAnswer {
            text: text.trim().to_string(),
            confidence,
            source: AnswerSource::ModelWithKnowledge,
            entries,
            search_terms,
            error: None,
        })
    }

    /// Queries the first `query_terms` terms concurrently and merges.
    ///
    /// A failed term is dropped; if every term fails the context says the
    /// knowledge base is unavailable.
    async fn gather_context(&self, terms: &[String]) -> (Vec<KnowledgeEntry>, String) {
        let queried: Vec<String> = terms
            .iter()
            .take(self.settings.query_terms)
            .cloned()
            .collect();
        if queried.is_empty() {
            return (Vec::new(), NO_KNOWLEDGE_CONTEXT.to_string());
        }

        let limit = self.settings.per_term_limit;
        let results: Vec<Result<Vec<KnowledgeMatch>, AssistError>> =
            join_all(queried.into_iter().map(|term| {
                let knowledge = Arc::clone(&self.knowledge);
                async move { knowledge.search(&term, limit).await }
            }))
            .await;

        let mut per_term = Vec::new();
        let mut failures = 0;
        for result in results {
            match result {
                Ok(matches) => per_term.push(matches),
                Err(e) => {
                    failures += 1;
                    tracing::warn!(error = %e, "knowledge lookup failed");
                }
            }
        }
        if per_term.is_empty() && failures > 0 {
            return (Vec::new(), KNOWLEDGE_UNAVAILABLE_CONTEXT.to_string());
        }

        let entries: Vec<KnowledgeEntry> = merge_matches(per_term, self.settings.max_entries)
            .into_iter()
            .map(|m| m.entry)
            .collect();
        let context = build_context(&entries, self.settings.max_context_chars);
        (entries, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::MatchRank;

    fn m(id: i64, title: &str, body: &str, rank: MatchRank) -> KnowledgeMatch {
        KnowledgeMatch {
            entry: KnowledgeEntry {
                id,
                title: title.to_string(),
                body: body.to_string(),
                keywords: Vec::new(),
                category: "general".to_string(),
                subcategory: None,
                solution_steps: Vec::new(),
            },
            rank,
        }
    }

    #[test]
    fn terms_drop_stop_words_and_duplicates() {
        let terms = extract_search_terms("How do I reset my password? Password RESET please!", 5);
        assert_eq!(terms, vec!["reset", "password", "please"]);
    }

    #[test]
    fn terms_are_capped() {
        let terms = extract_search_terms("alpha bravo charlie delta echo foxtrot golf", 5);
        assert_eq!(terms.len(), 5);
        assert_eq!(terms[4], "echo");
        assert!(extract_search_terms("", 5).is_empty());
    }

    #[test]
    fn merge_dedupes_and_keeps_best_rank_first() {
        let merged = merge_matches(
            vec![
                vec![m(1, "Email", "body", MatchRank::Body)],
                vec![
                    m(2, "Password reset", "x", MatchRank::Title),
                    m(1, "Email", "body", MatchRank::PartialKeyword),
                ],
            ],
            5,
        );
        let titles: Vec<(&str, MatchRank)> = merged
            .iter()
            .map(|m| (m.entry.title.as_str(), m.rank))
            .collect();
        assert_eq!(
            titles,
            vec![
                ("Password reset", MatchRank::Title),
                ("Email", MatchRank::PartialKeyword)
            ]
        );
    }

    #[test]
    fn merge_never_exceeds_limit() {
        let per_term = (0..4)
            .map(|t| {
                (0..3)
                    .map(|i| m(t * 10 + i, &format!("t{t}-{i}"), "b", MatchRank::Body))
                    .collect()
            })
            .collect();
        assert_eq!(merge_matches(per_term, 5).len(), 5);
    }

    #[test]
    fn context_is_bounded_and_formatted() {
        let mut entry = m(1, "Printer", "Check cable", MatchRank::Title).entry;
        entry.solution_steps = vec!["Unplug".to_string(), "Replug".to_string()];
        let full = build_context(std::slice::from_ref(&entry), 10_000);
        assert_eq!(
            full,
            "Topic: Printer\nSolution: Check cable\nSteps: 1. Unplug 2. Replug"
        );

        let cut = build_context(std::slice::from_ref(&entry), 12);
        assert_eq!(cut.chars().count(), 12);
        assert_eq!(build_context(&[], 100), NO_KNOWLEDGE_CONTEXT);
    }
}
