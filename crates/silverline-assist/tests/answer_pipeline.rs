use async_trait::async_trait;
use silverline_assist::{
    seed_knowledge, AnswerGenerator, AnswerSettings, AssistError, CompletionRequest,
    KnowledgeBase, KnowledgeEntry, KnowledgeMatch, LanguageModel, LimitValidator, MatchRank,
    MessageLimits, SentimentAnalyzer, SqliteKnowledgeBase, StaticParameterStore,
    UnavailableModel, FALLBACK_ANSWER,
};
use silverline_db::{create_pool, run_migrations, DbRuntimeSettings};
use silverline_types::{AnswerConfidence, AnswerSource, SentimentSource};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Replays a fixed reply and records every prompt it receives.
struct ScriptedModel {
    reply: Result<String, u16>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn replying(text: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(text.to_string()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn failing(status: u16) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(status),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, AssistError> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        match &self.reply {
            Ok(text) => Ok(text.clone()),
            Err(status) => Err(AssistError::ModelApi {
                status: *status,
                message: "overloaded".to_string(),
            }),
        }
    }
}

struct DownKnowledge;

#[async_trait]
impl KnowledgeBase for DownKnowledge {
    async fn search(&self, _term: &str, _limit: usize) -> Result<Vec<KnowledgeMatch>, AssistError> {
        Err(AssistError::Unavailable("knowledge store offline"))
    }
}

struct EmptyKnowledge;

#[async_trait]
impl KnowledgeBase for EmptyKnowledge {
    async fn search(&self, _term: &str, _limit: usize) -> Result<Vec<KnowledgeMatch>, AssistError> {
        Ok(Vec::new())
    }
}

struct OneEntry;

#[async_trait]
impl KnowledgeBase for OneEntry {
    async fn search(&self, term: &str, _limit: usize) -> Result<Vec<KnowledgeMatch>, AssistError> {
        if term != "printer" {
            return Ok(Vec::new());
        }
        Ok(vec![KnowledgeMatch {
            entry: KnowledgeEntry {
                id: 7,
                title: "Printer offline".to_string(),
                body: "Turn the printer off and on again.".to_string(),
                keywords: vec!["printer".to_string()],
                category: "devices".to_string(),
                subcategory: None,
                solution_steps: vec!["Unplug the printer".to_string()],
            },
            rank: MatchRank::Title,
        }])
    }
}

fn limits(limits: MessageLimits) -> Arc<LimitValidator> {
    Arc::new(LimitValidator::new(
        Arc::new(StaticParameterStore::new(limits)),
        Duration::from_secs(300),
    ))
}

fn default_limits() -> Arc<LimitValidator> {
    limits(MessageLimits::default())
}

fn generator(model: Arc<dyn LanguageModel>, knowledge: Arc<dyn KnowledgeBase>) -> AnswerGenerator {
    AnswerGenerator::new(model, knowledge, default_limits(), AnswerSettings::default())
}

const FAQS: &str = r#"{"faqs": [
    {"title": "Email setup", "content": "If you need a password reset for email, call your provider.", "keywords": ["email"]},
    {"title": "Password reset", "content": "Use the forgot password link on the sign in page.", "keywords": ["password", "login"], "solution_steps": ["Open the sign in page", "Choose forgot password"]}
]}"#;

#[tokio::test]
async fn grounded_answer_is_high_confidence() {
    let model = ScriptedModel::replying("  Press forgot password and follow the email.  ");
    let pool = create_pool(":memory:", DbRuntimeSettings::default()).unwrap();
    {
        let conn = pool.get().unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(seed_knowledge(&conn, FAQS).unwrap(), 2);
    }
    let knowledge = Arc::new(SqliteKnowledgeBase::new(pool, Duration::from_secs(300)));

    let answer = generator(model.clone(), knowledge)
        .answer("I need a password reset please")
        .await;

    assert_eq!(answer.text, "Press forgot password and follow the email.");
    assert_eq!(answer.confidence, AnswerConfidence::High);
    assert_eq!(answer.source, AnswerSource::ModelWithKnowledge);
    assert_eq!(answer.entries[0].title, "Password reset");
    assert!(!answer.is_fallback());

    let prompt = &model.prompts()[0];
    assert!(prompt.contains("Topic: Password reset"));
    assert!(prompt.contains("I need a password reset please"));
}

#[tokio::test]
async fn answer_without_matches_is_medium_confidence() {
    let model = ScriptedModel::replying("Try restarting the device.");
    let answer = generator(model, Arc::new(EmptyKnowledge))
        .answer("my gadget is acting strange")
        .await;
    assert_eq!(answer.confidence, AnswerConfidence::Medium);
    assert!(answer.entries.is_empty());
}

#[tokio::test]
async fn model_error_yields_fallback() {
    let model = ScriptedModel::failing(529);
    let answer = generator(model, Arc::new(OneEntry))
        .answer("my printer is offline")
        .await;
    assert!(answer.is_fallback());
    assert_eq!(answer.text, FALLBACK_ANSWER);
    assert_eq!(answer.confidence, AnswerConfidence::Low);
    assert_eq!(answer.source, AnswerSource::Fallback);
    assert!(answer.error.is_some());
}

#[tokio::test]
async fn missing_model_yields_fallback() {
    let answer = generator(Arc::new(UnavailableModel), Arc::new(OneEntry))
        .answer("my printer is offline")
        .await;
    assert!(answer.is_fallback());
}

#[tokio::test]
async fn oversize_utterance_never_reaches_model() {
    let model = ScriptedModel::replying("unused");
    let generator = AnswerGenerator::new(
        model.clone(),
        Arc::new(OneEntry),
        limits(MessageLimits {
            max_ai_request_length: 20,
            ..MessageLimits::default()
        }),
        AnswerSettings::default(),
    );
    let answer = generator.answer("my printer is offline and smoking badly").await;
    assert!(answer.is_fallback());
    assert!(model.prompts().is_empty());
}

#[tokio::test]
async fn knowledge_outage_still_answers() {
    let model = ScriptedModel::replying("Let me help with that.");
    let answer = generator(model.clone(), Arc::new(DownKnowledge))
        .answer("printer offline again")
        .await;
    assert_eq!(answer.confidence, AnswerConfidence::Medium);
    assert!(model.prompts()[0].contains("Knowledge base temporarily unavailable."));
}

#[tokio::test]
async fn calm_but_urgent_caller_is_escalated() {
    let model = ScriptedModel::replying(
        r#"{"sentiment":"neutral","score":0.1,"urgency":5,"escalation_recommended":false,"emotion":"worried"}"#,
    );
    let analyzer = SentimentAnalyzer::new(model, default_limits(), Duration::from_secs(5));
    let report = analyzer.analyze("I need this fixed before my flight tonight").await;
    assert_eq!(report.source, SentimentSource::Model);
    assert_eq!(report.urgency, 5);
    assert_eq!(report.score, 0.1);
    assert!(report.escalation_recommended);
}

#[tokio::test]
async fn unparsable_verdict_falls_back_to_heuristics() {
    let model = ScriptedModel::replying("I think they sound fine.");
    let analyzer = SentimentAnalyzer::new(model, default_limits(), Duration::from_secs(5));
    let report = analyzer.analyze("thanks, that works great").await;
    assert_eq!(report.source, SentimentSource::Heuristic);
    assert!(report.score > 0.2);
    assert!(!report.escalation_recommended);
}
