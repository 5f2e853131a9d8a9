//! FAQ knowledge store.
//!
//! A term matches an entry through its title, its keyword list, or its
//! body. Matches are ranked in that order:
//!
//! | rank | match |
//! |------|-------|
//! | 1 | title contains the term |
//! | 2 | a keyword equals the term |
//! | 3 | a keyword contains the term |
//! | 4 | body contains the term |
//!
//! Ties break on entry id. All comparisons are case-insensitive.

use async_trait::async_trait;
use moka::future::Cache;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use silverline_db::DbPool;
use std::time::Duration;

use crate::error::AssistError;

/// One FAQ record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KnowledgeEntry {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub keywords: Vec<String>,
    pub category: String,
    pub subcategory: Option<String>,
    pub solution_steps: Vec<String>,
}

/// Why an entry matched a term. Lower sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum MatchRank {
    Title = 1,
    ExactKeyword = 2,
    PartialKeyword = 3,
    Body = 4,
}

impl MatchRank {
    fn from_sql(value: i64) -> Option<Self> {
        match value {
            1 => Some(Self::Title),
            2 => Some(Self::ExactKeyword),
            3 => Some(Self::PartialKeyword),
            4 => Some(Self::Body),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KnowledgeMatch {
    pub entry: KnowledgeEntry,
    pub rank: MatchRank,
}

/// Ranked keyword search over the FAQ corpus.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Returns at most `limit` matches for `term`, best first.
    async fn search(&self, term: &str, limit: usize) -> Result<Vec<KnowledgeMatch>, AssistError>;
}

fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn json_list(row: &Row, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn map_row_to_match(row: &Row) -> rusqlite::Result<KnowledgeMatch> {
    let rank_value: i64 = row.get(7)?;
    let rank = MatchRank::from_sql(rank_value).ok_or(rusqlite::Error::IntegralValueOutOfRange(
        7,
        rank_value,
    ))?;
    Ok(KnowledgeMatch {
        entry: KnowledgeEntry {
            id: row.get(0)?,
            title: row.get(1)?,
            body: row.get(2)?,
            keywords: json_list(row, 3)?,
            category: row.get(4)?,
            subcategory: row.get(5)?,
            solution_steps: json_list(row, 6)?,
        },
        rank,
    })
}

/// Searches active entries for `term`.
pub fn search_knowledge(
    conn: &Connection,
    term: &str,
    limit: usize,
) -> Result<Vec<KnowledgeMatch>, AssistError> {
    let term = term.trim().to_lowercase();
    if term.is_empty() || limit == 0 {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare_cached(
        r"SELECT id, title, content, keywords_json, category, subcategory,
                 solution_steps_json, match_rank
          FROM (
              SELECT kb.*,
                  CASE
                      WHEN lower(kb.title) LIKE ?1 ESCAPE '\' THEN 1
                      WHEN EXISTS (SELECT 1 FROM json_each(kb.keywords_json)
                                   WHERE lower(json_each.value) = ?2) THEN 2
                      WHEN EXISTS (SELECT 1 FROM json_each(kb.keywords_json)
                                   WHERE lower(json_each.value) LIKE ?1 ESCAPE '\') THEN 3
                      WHEN lower(kb.content) LIKE ?1 ESCAPE '\' THEN 4
                  END AS match_rank
              FROM knowledge_base kb
              WHERE kb.is_active = 1
          )
          WHERE match_rank IS NOT NULL
          ORDER BY match_rank ASC, id ASC
          LIMIT ?3",
    )?;
    let rows = stmt.query_map(
        params![like_pattern(&term), term, limit as i64],
        map_row_to_match,
    )?;
    let mut matches = Vec::new();
    for row in rows {
        matches.push(row?);
    }
    Ok(matches)
}

/// Entry fields accepted when seeding or inserting.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewKnowledgeEntry {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub solution_steps: Vec<String>,
}

fn default_category() -> String {
    "general".to_string()
}

#[derive(Deserialize)]
struct SeedDocument {
    faqs: Vec<NewKnowledgeEntry>,
}

/// Inserts an entry. Returns `None` when the title already exists.
pub fn insert_entry(
    conn: &Connection,
    entry: &NewKnowledgeEntry,
) -> Result<Option<i64>, AssistError> {
    let keywords = serde_json::to_string(&entry.keywords)
        .map_err(|e| AssistError::Seed(e.to_string()))?;
    let steps = serde_json::to_string(&entry.solution_steps)
        .map_err(|e| AssistError::Seed(e.to_string()))?;
    let inserted = conn.execute(
        "INSERT INTO knowledge_base
            (title, content, keywords_json, category, subcategory, solution_steps_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(title) DO NOTHING",
        params![
            entry.title,
            entry.content,
            keywords,
            entry.category,
            entry.subcategory,
            steps
        ],
    )?;
    Ok((inserted == 1).then(|| conn.last_insert_rowid()))
}

/// Imports a `{"faqs": [...]}` document in one transaction. Entries whose
/// title already exists are skipped. Returns the number inserted.
pub fn seed_knowledge(conn: &Connection, json: &str) -> Result<usize, AssistError> {
    let document: SeedDocument =
        serde_json::from_str(json).map_err(|e| AssistError::Seed(e.to_string()))?;

    let tx = conn.unchecked_transaction()?;
    let mut inserted = 0;
    for entry in &document.faqs {
        if entry.title.trim().is_empty() || entry.content.trim().is_empty() {
            return Err(AssistError::Seed(
                "every FAQ needs a title and content".to_string(),
            ));
        }
        if insert_entry(&tx, entry)?.is_some() {
            inserted += 1;
        }
    }
    tx.commit()?;
    Ok(inserted)
}

/// Active categories with their entry counts.
pub fn list_categories(conn: &Connection) -> Result<Vec<(String, i64)>, AssistError> {
    let mut stmt = conn.prepare(
        "SELECT category, COUNT(*) FROM knowledge_base
         WHERE is_active = 1 GROUP BY category ORDER BY category",
    )?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    let mut categories = Vec::new();
    for row in rows {
        categories.push(row?);
    }
    Ok(categories)
}

/// Cached result sets kept before least-recently-used eviction.
const MAX_CACHED_SEARCHES: u64 = 1_000;

/// Pool-backed knowledge store with a short-TTL result cache.
#[derive(Clone)]
pub struct SqliteKnowledgeBase {
    pool: DbPool,
    cache: Cache<(String, usize), Vec<KnowledgeMatch>>,
}

impl SqliteKnowledgeBase {
    pub fn new(pool: DbPool, cache_ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(MAX_CACHED_SEARCHES)
            .time_to_live(cache_ttl)
            .build();
        Self { pool, cache }
    }

    /// Drops cached results, e.g. after seeding.
    pub fn clear_cache(&self) {
        self.cache.invalidate_all();
    }
}

#[async_trait]
impl KnowledgeBase for SqliteKnowledgeBase {
    async fn search(&self, term: &str, limit: usize) -> Result<Vec<KnowledgeMatch>, AssistError> {
        let key = (term.trim().to_lowercase(), limit);
        if let Some(hit) = self.cache.get(&key).await {
            tracing::debug!(term = %key.0, "knowledge cache hit");
            return Ok(hit);
        }

        let pool = self.pool.clone();
        let lookup = key.0.clone();
        let matches = tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            search_knowledge(&conn, &lookup, limit)
        })
        .await??;

        self.cache.insert(key, matches.clone()).await;
        Ok(matches)
    }
}
