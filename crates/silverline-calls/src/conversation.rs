//! Append-only conversation log: transcripts, generated responses, sentiment.

use rusqlite::{params, Connection, Row};
use serde::Serialize;
use silverline_types::{
    AnswerConfidence, AnswerSource, ResponseKind, SentimentLabel, SentimentSource, Speaker,
};

use crate::{label_column, CallStoreError};

/// One utterance. Insertion order is the conversation order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transcript {
    pub id: i64,
    pub session_id: i64,
    pub speaker: Speaker,
    pub text: String,
    pub confidence: Option<f64>,
    pub created_at: String,
}

/// Appends an utterance to a session's transcript.
pub fn append_transcript(
    conn: &Connection,
    session_id: i64,
    speaker: Speaker,
    text: &str,
    confidence: Option<f64>,
) -> Result<Transcript, CallStoreError> {
    let transcript = conn.query_row(
        "INSERT INTO call_transcripts (session_id, speaker, text, confidence)
         VALUES (?1, ?2, ?3, ?4)
         RETURNING id, session_id, speaker, text, confidence, created_at",
        params![session_id, speaker.as_str(), text, confidence],
        map_row_to_transcript,
    )?;
    Ok(transcript)
}

/// Lists a session's transcript in conversation order.
pub fn list_transcripts(
    conn: &Connection,
    session_id: i64,
) -> Result<Vec<Transcript>, CallStoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, session_id, speaker, text, confidence, created_at
         FROM call_transcripts WHERE session_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map([session_id], map_row_to_transcript)?;
    let mut transcripts = Vec::new();
    for row in rows {
        transcripts.push(row?);
    }
    Ok(transcripts)
}

fn map_row_to_transcript(row: &Row) -> rusqlite::Result<Transcript> {
    Ok(Transcript {
        id: row.get(0)?,
        session_id: row.get(1)?,
        speaker: label_column(row, 2)?,
        text: row.get(3)?,
        confidence: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// A generated answer to persist, one per support turn.
#[derive(Debug, Clone, PartialEq)]
pub struct NewResponse<'a> {
    pub kind: ResponseKind,
    pub text: &'a str,
    pub knowledge_entry_id: Option<i64>,
    pub confidence: AnswerConfidence,
    pub source: AnswerSource,
    pub success: bool,
}

/// A stored generated answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AiResponse {
    pub id: i64,
    pub session_id: i64,
    pub kind: ResponseKind,
    pub text: String,
    pub knowledge_entry_id: Option<i64>,
    pub confidence: AnswerConfidence,
    pub source: AnswerSource,
    pub success: bool,
    pub created_at: String,
}

/// Persists a generated answer for a session.
pub fn record_response(
    conn: &Connection,
    session_id: i64,
    response: &NewResponse<'_>,
) -> Result<AiResponse, CallStoreError> {
    let stored = conn.query_row(
        "INSERT INTO ai_responses
            (session_id, response_kind, text, knowledge_entry_id, confidence, source, success)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         RETURNING id, session_id, response_kind, text, knowledge_entry_id,
                   confidence, source, success, created_at",
        params![
            session_id,
            response.kind.as_str(),
            response.text,
            response.knowledge_entry_id,
            response.confidence.as_str(),
            response.source.as_str(),
            response.success,
        ],
        map_row_to_response,
    )?;
    Ok(stored)
}

/// Lists a session's generated answers in order.
pub fn list_responses(
    conn: &Connection,
    session_id: i64,
) -> Result<Vec<AiResponse>, CallStoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, session_id, response_kind, text, knowledge_entry_id,
                confidence, source, success, created_at
         FROM ai_responses WHERE session_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map([session_id], map_row_to_response)?;
    let mut responses = Vec::new();
    for row in rows {
        responses.push(row?);
    }
    Ok(responses)
}

fn map_row_to_response(row: &Row) -> rusqlite::Result<AiResponse> {
    Ok(AiResponse {
        id: row.get(0)?,
        session_id: row.get(1)?,
        kind: label_column(row, 2)?,
        text: row.get(3)?,
        knowledge_entry_id: row.get(4)?,
        confidence: label_column(row, 5)?,
        source: label_column(row, 6)?,
        success: row.get(7)?,
        created_at: row.get(8)?,
    })
}

/// Sentiment scores for one caller transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSentiment<'a> {
    pub transcript_id: i64,
    pub label: SentimentLabel,
    pub score: f64,
    pub urgency: u8,
    pub emotion: &'a str,
    pub escalation_recommended: bool,
    pub source: SentimentSource,
}

/// A stored sentiment record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SentimentRecord {
    pub id: i64,
    pub session_id: i64,
    pub transcript_id: i64,
    pub label: SentimentLabel,
    pub score: f64,
    pub urgency: u8,
    pub emotion: String,
    pub escalation_recommended: bool,
    pub source: SentimentSource,
    pub created_at: String,
}

/// Persists sentiment for a transcript.
///
/// The escalation flag is stored as set whenever urgency is 4 or more or the
/// score is below -0.5, whatever the caller passed.
pub fn record_sentiment(
    conn: &Connection,
    session_id: i64,
    sentiment: &NewSentiment<'_>,
) -> Result<SentimentRecord, CallStoreError> {
    let score = sentiment.score.clamp(-1.0, 1.0);
    let urgency = sentiment.urgency.clamp(1, 5);
    let escalate = sentiment.escalation_recommended || urgency >= 4 || score < -0.5;

    let stored = conn.query_row(
        "INSERT INTO sentiment_analysis
            (session_id, transcript_id, sentiment, score, urgency, emotion,
             escalation_recommended, source)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         RETURNING id, session_id, transcript_id, sentiment, score, urgency, emotion,
                   escalation_recommended, source, created_at",
        params![
            session_id,
            sentiment.transcript_id,
            sentiment.label.as_str(),
            score,
            urgency,
            sentiment.emotion,
            escalate,
            sentiment.source.as_str(),
        ],
        map_row_to_sentiment,
    )?;
    Ok(stored)
}

/// Lists a session's sentiment records in order.
pub fn list_sentiments(
    conn: &Connection,
    session_id: i64,
) -> Result<Vec<SentimentRecord>, CallStoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, session_id, transcript_id, sentiment, score, urgency, emotion,
                escalation_recommended, source, created_at
         FROM sentiment_analysis WHERE session_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map([session_id], map_row_to_sentiment)?;
    let mut records = Vec::new();
    for row in rows {
        records.push(row?);
    }
    Ok(records)
}

fn map_row_to_sentiment(row: &Row) -> rusqlite::Result<SentimentRecord> {
    Ok(SentimentRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        transcript_id: row.get(2)?,
        label: label_column(row, 3)?,
        score: row.get(4)?,
        urgency: row.get(5)?,
        emotion: row.get(6)?,
        escalation_recommended: row.get(7)?,
        source: label_column(row, 8)?,
        created_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::load_or_create_session;
    use crate::test_support::test_db;

    #[test]
    fn transcripts_keep_insertion_order() {
        let conn = test_db();
        let (session, _) = load_or_create_session(&conn, "CA1", "+15550200001").unwrap();

        append_transcript(&conn, session.id, Speaker::Caller, "my email is broken", Some(0.85))
            .unwrap();
        append_transcript(&conn, session.id, Speaker::System, "Let's fix that.", None).unwrap();
        append_transcript(&conn, session.id, Speaker::Caller, "thanks", Some(0.9)).unwrap();

        let log = list_transcripts(&conn, session.id).unwrap();
        let texts: Vec<&str> = log.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["my email is broken", "Let's fix that.", "thanks"]);
        assert_eq!(log[1].speaker, Speaker::System);
        assert_eq!(log[1].confidence, None);
    }

    #[test]
    fn responses_round_trip_labels() {
        let conn = test_db();
        let (session, _) = load_or_create_session(&conn, "CA2", "+15550200002").unwrap();

        let stored = record_response(
            &conn,
            session.id,
            &NewResponse {
                kind: ResponseKind::Fallback,
                text: "Sorry about that.",
                knowledge_entry_id: None,
                confidence: AnswerConfidence::Low,
                source: AnswerSource::Fallback,
                success: false,
            },
        )
        .unwrap();

        assert_eq!(stored.kind, ResponseKind::Fallback);
        assert_eq!(list_responses(&conn, session.id).unwrap(), vec![stored]);
    }

    #[test]
    fn sentiment_flag_forced_for_urgent_or_negative() {
        let conn = test_db();
        let (session, _) = load_or_create_session(&conn, "CA3", "+15550200003").unwrap();
        let transcript =
            append_transcript(&conn, session.id, Speaker::Caller, "urgent!", None).unwrap();

        let urgent = record_sentiment(
            &conn,
            session.id,
            &NewSentiment {
                transcript_id: transcript.id,
                label: SentimentLabel::Neutral,
                score: 0.1,
                urgency: 5,
                emotion: "neutral",
                escalation_recommended: false,
                source: SentimentSource::Model,
            },
        )
        .unwrap();
        assert!(urgent.escalation_recommended);

        let negative = record_sentiment(
            &conn,
            session.id,
            &NewSentiment {
                transcript_id: transcript.id,
                label: SentimentLabel::Negative,
                score: -0.9,
                urgency: 2,
                emotion: "frustrated",
                escalation_recommended: false,
                source: SentimentSource::Heuristic,
            },
        )
        .unwrap();
        assert!(negative.escalation_recommended);

        let calm = record_sentiment(
            &conn,
            session.id,
            &NewSentiment {
                transcript_id: transcript.id,
                label: SentimentLabel::Positive,
                score: 0.6,
                urgency: 2,
                emotion: "satisfied",
                escalation_recommended: false,
                source: SentimentSource::Heuristic,
            },
        )
        .unwrap();
        assert!(!calm.escalation_recommended);
        assert_eq!(list_sentiments(&conn, session.id).unwrap().len(), 3);
    }
}
