//! The support-answer pipeline for the Silverline call-flow engine.
//!
//! - [`limits`]: message length limits from a parameter store, cached
//! - [`llm`]: the language model seam and its Anthropic client
//! - [`knowledge`]: ranked FAQ search over SQLite
//! - [`answer`]: knowledge-grounded answers with a fixed fallback
//! - [`sentiment`]: model scoring with a keyword fallback
//!
//! External services sit behind traits ([`LanguageModel`],
//! [`KnowledgeBase`], [`ParameterStore`]) and each has a stand-in used when
//! it is not configured. Answer and sentiment calls never fail: degraded
//! paths produce low-confidence output that the orchestrator escalates.

pub mod answer;
pub mod config;
pub mod error;
pub mod knowledge;
pub mod limits;
pub mod llm;
pub mod sentiment;

pub use answer::{AnswerGenerator, AnswerSettings, GeneratedAnswer, FALLBACK_ANSWER};
pub use config::{AssistantConfig, KnowledgeConfig, LimitsConfig};
pub use error::{AssistError, LimitError};
pub use knowledge::{
    insert_entry, list_categories, search_knowledge, seed_knowledge, KnowledgeBase,
    KnowledgeEntry, KnowledgeMatch, MatchRank, NewKnowledgeEntry, SqliteKnowledgeBase,
};
pub use limits::{
    FileParameterStore, LimitValidator, MessageKind, MessageLimits, ParameterStore,
    StaticParameterStore,
};
pub use llm::{AnthropicModel, CompletionRequest, LanguageModel, UnavailableModel};
pub use sentiment::{heuristic_sentiment, SentimentAnalyzer, SentimentReport};
