//! Memory Retrieval and Ranking
//!
//! Rank-on-read search over active memory records.
//!
//! ## Search Flow
//!
//! 1. Retrieve active candidates passing the scope and type filters
//! 2. Keep candidates matching the query (substring or shared keyword)
//! 3. Score each candidate with the 4-signal formula
//! 4. Sort by score desc, then `updated_at` desc, then insertion order
//! 5. Truncate to the limit
//! 6. Bump `access_count` and `updated_at` for returned records

use std::cmp::Ordering;
use std::collections::HashSet;

use rusqlite::params;
use serde::{Deserialize, Serialize};

use claude_recall_core::MemoryType;

use crate::models::settings::RankingWeights;
use crate::services::memory::store::{row_to_memory_record, MemoryRecord, MemoryStore, RECORD_COLUMNS};
use crate::utils::error::AppResult;
use crate::utils::time::{days_between, from_millis, now_millis};

/// Words too common to say anything about relevance
const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "can", "had", "her", "was", "one",
    "our", "out", "has", "have", "his", "how", "its", "may", "new", "now", "old", "see", "way",
    "who", "did", "get", "let", "say", "she", "too", "use", "that", "this", "with", "from",
    "they", "will", "would", "there", "their", "what", "when", "which", "where", "about",
    "into", "than", "then", "them", "these", "those", "some", "should", "could", "been",
    "were", "does", "just", "also", "only", "very", "please", "help", "want", "need", "like",
    "make", "put", "being", "through", "during", "before", "after", "again", "further", "once",
    "here", "why", "each", "few", "more", "most", "other", "such", "nor", "own", "same", "might",
    "must", "your",
];

/// Which records a search may see
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilters {
    /// Project the caller is working in; `None` sees only universal and unscoped records
    pub project_id: Option<String>,
    /// Disable scope filtering entirely
    pub global: bool,
    /// Restrict to these types
    pub types: Option<Vec<MemoryType>>,
    pub limit: Option<usize>,
}

impl SearchFilters {
    pub fn for_project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            ..Self::default()
        }
    }

    pub fn global() -> Self {
        Self {
            global: true,
            ..Self::default()
        }
    }

    pub fn with_types(mut self, types: Vec<MemoryType>) -> Self {
        self.types = Some(types);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Search hit with its relevance score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedMemory {
    pub record: MemoryRecord,
    pub score: f32,
}

/// Lowercase, split on non-alphanumerics, drop stop words and tokens
/// shorter than 3 characters. Order-preserving, without repeats.
pub fn extract_query_keywords(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|s| s.chars().count() >= 3 && !STOP_WORDS.contains(s))
        .filter(|s| seen.insert(s.to_string()))
        .map(|s| s.to_string())
        .collect()
}

/// Empty query matches everything; otherwise a case-insensitive substring
/// hit or at least one shared keyword.
pub fn matches_query(content_lower: &str, query_lower: &str, query_keywords: &[String]) -> bool {
    if query_lower.is_empty() {
        return true;
    }
    if content_lower.contains(query_lower) {
        return true;
    }
    if query_keywords.is_empty() {
        return false;
    }
    let content_keywords: HashSet<String> = extract_query_keywords(content_lower).into_iter().collect();
    query_keywords.iter().any(|k| content_keywords.contains(k))
}

/// `type_weight * priority / 6`, so corrections score highest and tool-use lowest
pub fn type_weight(memory_type: MemoryType, weights: &RankingWeights) -> f32 {
    weights.type_weight * memory_type.priority() as f32 / 6.0
}

/// `recency_weight / (1 + days * rate)`
pub fn recency_decay(days_since_update: f64, weights: &RankingWeights) -> f32 {
    weights.recency_weight / (1.0 + days_since_update as f32 * weights.recency_decay_per_day)
}

/// Fraction of query keywords present in the content, plus a bonus when the
/// whole query appears verbatim.
pub fn keyword_overlap(
    content_lower: &str,
    query_lower: &str,
    query_keywords: &[String],
    weights: &RankingWeights,
) -> f32 {
    if query_lower.is_empty() {
        return 0.0;
    }

    let fraction = if query_keywords.is_empty() {
        0.0
    } else {
        let content_keywords: HashSet<String> =
            extract_query_keywords(content_lower).into_iter().collect();
        let hits = query_keywords
            .iter()
            .filter(|k| content_keywords.contains(*k))
            .count();
        hits as f32 / query_keywords.len() as f32
    };

    let bonus = if content_lower.contains(query_lower) {
        weights.substring_bonus
    } else {
        0.0
    };

    weights.keyword_weight * fraction + bonus
}

/// Boost frequently used records, penalize old ones nobody ever read
pub fn usage_adjustment(access_count: i64, age_days: f64, weights: &RankingWeights) -> f32 {
    let rate = access_count as f64 / age_days.max(1.0);
    if rate >= weights.high_usage_rate as f64 {
        weights.usage_boost
    } else if access_count == 0 && age_days > weights.low_usage_after_days as f64 {
        -weights.usage_penalty
    } else {
        0.0
    }
}

/// Relevance scoring formula:
///
///   score = type_weight(type)
///         + recency_decay(updated_at)
///         + keyword_overlap(query, content)
///         + usage_adjustment(access_count, age)
pub fn compute_relevance_score(
    record: &MemoryRecord,
    query_lower: &str,
    query_keywords: &[String],
    weights: &RankingWeights,
    now_ms: i64,
) -> f32 {
    let content_lower = record.content.to_lowercase();
    let days_since_update = days_between(record.updated_at.timestamp_millis(), now_ms);
    let age_days = days_between(record.created_at.timestamp_millis(), now_ms);

    type_weight(record.memory_type, weights)
        + recency_decay(days_since_update, weights)
        + keyword_overlap(&content_lower, query_lower, query_keywords, weights)
        + usage_adjustment(record.access_count, age_days, weights)
}

/// Filter, score and order candidates without touching usage counters
pub(crate) fn rank_candidates(
    store: &MemoryStore,
    query: &str,
    filters: &SearchFilters,
) -> AppResult<Vec<RankedMemory>> {
    let query_lower = query.trim().to_lowercase();
    let query_keywords = extract_query_keywords(&query_lower);
    let weights = &store.config().ranking;

    let mut sql = format!(
        "SELECT {}, rowid FROM memories WHERE superseded_by IS NULL",
        RECORD_COLUMNS
    );
    let mut bind: Vec<String> = Vec::new();

    if !filters.global {
        match filters.project_id.as_deref() {
            Some(project) => {
                sql.push_str(
                    " AND (scope IN ('universal', 'unscoped')
                          OR (scope = 'project' AND project_id = ?1))",
                );
                bind.push(project.to_string());
            }
            None => sql.push_str(" AND scope IN ('universal', 'unscoped')"),
        }
    }

    if let Some(ref types) = filters.types {
        if types.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders: Vec<String> = types
            .iter()
            .map(|t| {
                bind.push(t.as_str().to_string());
                format!("?{}", bind.len())
            })
            .collect();
        sql.push_str(&format!(" AND type IN ({})", placeholders.join(",")));
    }

    let candidates: Vec<(MemoryRecord, i64)> = {
        let conn = store.database().get_connection()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(bind.iter()), |row| {
            Ok((row_to_memory_record(row)?, row.get::<_, i64>(14)?))
        })?;
        rows.collect::<Result<Vec<_>, _>>()?
    }; // connection released here

    let now = now_millis();
    let mut scored: Vec<(RankedMemory, i64)> = candidates
        .into_iter()
        .filter(|(record, _)| {
            matches_query(&record.content.to_lowercase(), &query_lower, &query_keywords)
        })
        .map(|(record, rowid)| {
            let score = compute_relevance_score(&record, &query_lower, &query_keywords, weights, now);
            (RankedMemory { record, score }, rowid)
        })
        .collect();

    scored.sort_by(|(a, a_row), (b, b_row)| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.record.updated_at.cmp(&a.record.updated_at))
            .then_with(|| a_row.cmp(b_row))
    });

    if let Some(limit) = filters.limit {
        scored.truncate(limit);
    }

    Ok(scored.into_iter().map(|(hit, _)| hit).collect())
}

/// Search memories and record the read.
///
/// Every returned record has its `access_count` incremented and
/// `updated_at` refreshed, in one write transaction; the returned copies
/// reflect the bump.
pub fn search_memories(
    store: &MemoryStore,
    query: &str,
    filters: &SearchFilters,
) -> AppResult<Vec<RankedMemory>> {
    let mut results = rank_candidates(store, query, filters)?;
    if results.is_empty() {
        return Ok(results);
    }

    let now = now_millis();
    store.database().write_transaction(|tx| {
        let mut stmt = tx.prepare(
            "UPDATE memories SET access_count = access_count + 1, updated_at = ?2 WHERE id = ?1",
        )?;
        for hit in &results {
            stmt.execute(params![hit.record.id, now])?;
        }
        Ok(())
    })?;

    for hit in &mut results {
        hit.record.access_count += 1;
        hit.record.updated_at = from_millis(now);
    }

    tracing::debug!(query = %query, hits = results.len(), "memory search");
    Ok(results)
}

// ============================================================================
// Tests
// ============================================================================
