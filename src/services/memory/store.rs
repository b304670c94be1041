//! Memory Store
//!
//! Core operations for the persistent memory system. Records are
//! deduplicated by content hash, filtered by scope, ranked on read, and
//! replaced through forward `superseded_by` pointers rather than in-place
//! edits. Every write is one `BEGIN IMMEDIATE` transaction so concurrent
//! processes sharing the database never interleave a read-then-write.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use claude_recall_core::{Fact, MemoryType, Scope};

use crate::models::settings::MemoryConfig;
use crate::services::memory::maintenance::{MemoryMaintenance, PruneCriteria, PruneReport};
use crate::services::memory::retrieval::{self, RankedMemory, SearchFilters};
use crate::storage::database::Database;
use crate::utils::error::{AppError, AppResult};
use crate::utils::time::{from_millis, now_millis};

const MAX_CONTENT_LEN: usize = 16 * 1024;
const MAX_KEY_LEN: usize = 256;

/// Metadata key naming the queue message a record was stored from
pub const QUEUE_MESSAGE_ID_KEY: &str = "queueMessageId";
/// Metadata key of the last queue message that matched a record as a duplicate
pub const LAST_QUEUE_MESSAGE_ID_KEY: &str = "lastQueueMessageId";

/// Upper bound on supersession chain walks
const MAX_HISTORY_DEPTH: usize = 1_000;

pub(crate) const RECORD_COLUMNS: &str = "id, key, content, type, scope, project_id, preference_key, confidence,
     content_hash, metadata, created_at, updated_at, access_count, superseded_by";

// ============================================================================
// Data Types
// ============================================================================

/// A persisted memory record, active or superseded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    pub id: String,
    pub key: String,
    pub content: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub scope: Scope,
    pub project_id: Option<String>,
    pub preference_key: Option<String>,
    pub confidence: f32,
    pub content_hash: String,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub access_count: i64,
    pub superseded_by: Option<String>,
}

impl MemoryRecord {
    pub fn is_active(&self) -> bool {
        self.superseded_by.is_none()
    }
}

/// Input for storing a memory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMemory {
    /// Caller-chosen key; generated when absent
    #[serde(default)]
    pub key: Option<String>,
    pub content: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub scope: Scope,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub preference_key: Option<String>,
    pub confidence: f32,
    #[serde(default)]
    pub is_override: bool,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl NewMemory {
    /// A universal-scope memory with full confidence
    pub fn new(memory_type: MemoryType, content: impl Into<String>) -> Self {
        Self {
            key: None,
            content: content.into(),
            memory_type,
            scope: Scope::Universal,
            project_id: None,
            preference_key: None,
            confidence: 1.0,
            is_override: false,
            metadata: Map::new(),
        }
    }

    /// Build from a classified fact; a bound project makes the record project-scoped
    pub fn from_fact(fact: &Fact, project_id: Option<&str>) -> Self {
        let mut memory = Self::new(fact.fact_type, fact.content.clone());
        memory.confidence = fact.confidence;
        memory.is_override = fact.is_override;
        memory.preference_key = fact.preference_key.clone();
        if let Some(project) = project_id.filter(|p| !p.trim().is_empty()) {
            memory = memory.in_project(project);
        }
        memory
    }

    pub fn in_project(mut self, project_id: impl Into<String>) -> Self {
        self.scope = Scope::Project;
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        if scope != Scope::Project {
            self.project_id = None;
        }
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_preference_key(mut self, preference_key: impl Into<String>) -> Self {
        self.preference_key = Some(preference_key.into());
        self
    }

    /// Replace whatever is active under `preference_key`
    pub fn overriding(mut self, preference_key: impl Into<String>) -> Self {
        self.preference_key = Some(preference_key.into());
        self.is_override = true;
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Reject malformed input before anything is written
    pub fn validate(&self) -> AppResult<()> {
        let content = self.content.trim();
        if content.is_empty() {
            return Err(AppError::validation("memory content is empty"));
        }
        if content.len() > MAX_CONTENT_LEN {
            return Err(AppError::validation(format!(
                "memory content exceeds {} bytes",
                MAX_CONTENT_LEN
            )));
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(AppError::validation(format!(
                "confidence must be within [0, 1], got {}",
                self.confidence
            )));
        }

        match (self.scope, self.project_id.as_deref()) {
            (Scope::Project, None) => {
                return Err(AppError::validation("project scope requires a project id"));
            }
            (Scope::Project, Some(p)) if p.trim().is_empty() => {
                return Err(AppError::validation("project id is empty"));
            }
            (Scope::Universal | Scope::Unscoped, Some(_)) => {
                return Err(AppError::validation(format!(
                    "project id is only valid with project scope, not {}",
                    self.scope
                )));
            }
            _ => {}
        }

        if let Some(ref key) = self.key {
            if key.trim().is_empty() || key.len() > MAX_KEY_LEN {
                return Err(AppError::validation("memory key must be 1-256 characters"));
            }
        }

        match self.preference_key.as_deref() {
            Some(pk) if pk.trim().is_empty() => {
                return Err(AppError::validation("preference key is empty"));
            }
            None if self.is_override => {
                return Err(AppError::validation("override requires a preference key"));
            }
            _ => {}
        }

        Ok(())
    }
}

/// Which path `store()` took
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StoreOutcome {
    /// A new record was inserted
    Inserted { id: String },
    /// An identical active record already existed; its usage was bumped
    Duplicate { id: String },
    /// A new record was inserted and the previous holder of its preference key retired
    Superseded { id: String, replaced: String },
}

impl StoreOutcome {
    /// Id of the record that is now active for this content
    pub fn id(&self) -> &str {
        match self {
            StoreOutcome::Inserted { id }
            | StoreOutcome::Duplicate { id }
            | StoreOutcome::Superseded { id, .. } => id,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreOutcome::Duplicate { .. })
    }
}

/// Record counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub total: usize,
    pub active: usize,
    pub superseded: usize,
    /// All records (active and superseded) per type
    pub by_type: BTreeMap<String, usize>,
}

/// Active rules visible to a project, grouped by type and ranked
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSet {
    pub corrections: Vec<MemoryRecord>,
    pub devops: Vec<MemoryRecord>,
    pub preferences: Vec<MemoryRecord>,
    pub failures: Vec<MemoryRecord>,
}

impl RuleSet {
    pub fn is_empty(&self) -> bool {
        self.corrections.is_empty()
            && self.devops.is_empty()
            && self.preferences.is_empty()
            && self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.corrections.len() + self.devops.len() + self.preferences.len() + self.failures.len()
    }
}

// ============================================================================
// Hashing
// ============================================================================

/// Trim, lowercase, and collapse whitespace runs to a single space
pub fn normalize_content(content: &str) -> String {
    content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// SHA-256 (hex) over type, scope, project and normalized content
pub fn content_hash(
    memory_type: MemoryType,
    scope: Scope,
    project_id: Option<&str>,
    content: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(memory_type.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(scope.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(project_id.unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update(normalize_content(content).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// `<type>_<epoch-ms>_<8 hex>`
fn generate_key(memory_type: MemoryType, now_ms: i64) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", memory_type.as_str(), now_ms, &suffix[..8])
}

// ============================================================================
// MemoryStore
// ============================================================================

/// Persistent, deduplicating, scope-aware memory store
#[derive(Clone)]
pub struct MemoryStore {
    db: Database,
    config: MemoryConfig,
}

impl MemoryStore {
    pub fn new(db: Database, config: MemoryConfig) -> Self {
        Self { db, config }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    // ========================================================================
    // Write Operations
    // ========================================================================

    /// Store a memory.
    ///
    /// An identical active record (same content hash) is bumped and returned
    /// instead of inserting. Otherwise, if the input carries a preference key,
    /// the active holder of that key in the same type/scope/project bucket is
    /// marked superseded by the new record. Last committer wins.
    pub fn store(&self, memory: NewMemory) -> AppResult<StoreOutcome> {
        memory.validate()?;

        let content = memory.content.trim().to_string();
        let hash = content_hash(
            memory.memory_type,
            memory.scope,
            memory.project_id.as_deref(),
            &content,
        );
        let metadata_json = serde_json::to_string(&memory.metadata)?;
        let hard_ceiling = self.config.hard_ceiling;
        let queue_message_id = memory
            .metadata
            .get(QUEUE_MESSAGE_ID_KEY)
            .and_then(Value::as_str)
            .map(str::to_string);

        let outcome = self.db.write_transaction(|tx| {
            let now = now_millis();

            let existing: Option<(String, String)> = tx
                .query_row(
                    "SELECT id, metadata FROM memories
                     WHERE content_hash = ?1 AND superseded_by IS NULL",
                    params![hash],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            if let Some((id, existing_json)) = existing {
                let Some(ref message_id) = queue_message_id else {
                    tx.execute(
                        "UPDATE memories SET updated_at = ?2, access_count = access_count + 1
                         WHERE id = ?1",
                        params![id, now],
                    )?;
                    return Ok(StoreOutcome::Duplicate { id });
                };

                // a redelivered queue message must not count as a second use
                let mut existing_metadata: Map<String, Value> =
                    serde_json::from_str(&existing_json)?;
                let seen = [QUEUE_MESSAGE_ID_KEY, LAST_QUEUE_MESSAGE_ID_KEY]
                    .iter()
                    .any(|key| {
                        existing_metadata.get(*key).and_then(Value::as_str)
                            == Some(message_id.as_str())
                    });
                if seen {
                    return Ok(StoreOutcome::Duplicate { id });
                }

                existing_metadata.insert(
                    LAST_QUEUE_MESSAGE_ID_KEY.into(),
                    Value::String(message_id.clone()),
                );
                tx.execute(
                    "UPDATE memories
                     SET updated_at = ?2, access_count = access_count + 1, metadata = ?3
                     WHERE id = ?1",
                    params![id, now, serde_json::to_string(&existing_metadata)?],
                )?;
                return Ok(StoreOutcome::Duplicate { id });
            }

            if let Some(ceiling) = hard_ceiling {
                let total: i64 =
                    tx.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
                if total as usize >= ceiling {
                    return Err(AppError::capacity(format!(
                        "memory store holds {} records (hard ceiling {})",
                        total, ceiling
                    )));
                }
            }

            let key = match memory.key {
                Some(ref key) => {
                    let taken: bool = tx.query_row(
                        "SELECT EXISTS(SELECT 1 FROM memories WHERE key = ?1)",
                        params![key],
                        |row| row.get(0),
                    )?;
                    if taken {
                        return Err(AppError::validation(format!(
                            "memory key already exists: {}",
                            key
                        )));
                    }
                    key.clone()
                }
                None => generate_key(memory.memory_type, now),
            };

            let id = uuid::Uuid::new_v4().to_string();

            let replaced: Option<String> = match memory.preference_key {
                Some(ref pk) => tx
                    .query_row(
                        "SELECT id FROM memories
                         WHERE type = ?1 AND scope = ?2 AND IFNULL(project_id, '') = IFNULL(?3, '')
                           AND preference_key = ?4 AND superseded_by IS NULL",
                        params![
                            memory.memory_type.as_str(),
                            memory.scope.as_str(),
                            memory.project_id,
                            pk
                        ],
                        |row| row.get(0),
                    )
                    .optional()?,
                None => None,
            };

            // retire the old holder first so the active-key index never sees two rows
            if let Some(ref old_id) = replaced {
                tx.execute(
                    "UPDATE memories SET superseded_by = ?2 WHERE id = ?1",
                    params![old_id, id],
                )?;
            }

            tx.execute(
                "INSERT INTO memories (id, key, content, type, scope, project_id, preference_key,
                 confidence, content_hash, metadata, created_at, updated_at, access_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11, 0)",
                params![
                    id,
                    key,
                    content,
                    memory.memory_type.as_str(),
                    memory.scope.as_str(),
                    memory.project_id,
                    memory.preference_key,
                    memory.confidence,
                    hash,
                    metadata_json,
                    now,
                ],
            )?;

            Ok(match replaced {
                Some(replaced) => StoreOutcome::Superseded { id, replaced },
                None => StoreOutcome::Inserted { id },
            })
        })?;

        match &outcome {
            StoreOutcome::Superseded { id, replaced } => tracing::debug!(
                id = %id,
                replaced = %replaced,
                memory_type = %memory.memory_type,
                is_override = memory.is_override,
                "memory superseded"
            ),
            StoreOutcome::Duplicate { id } => {
                tracing::trace!(id = %id, "duplicate memory bumped")
            }
            StoreOutcome::Inserted { id } => {
                tracing::debug!(id = %id, memory_type = %memory.memory_type, "memory stored")
            }
        }

        Ok(outcome)
    }

    /// Store a classified fact, skipping it when below `min_fact_confidence`
    pub fn store_fact(
        &self,
        fact: &Fact,
        project_id: Option<&str>,
        metadata: Map<String, Value>,
    ) -> AppResult<Option<StoreOutcome>> {
        fact.validate()?;
        if fact.confidence < self.config.min_fact_confidence {
            tracing::debug!(
                confidence = fact.confidence,
                threshold = self.config.min_fact_confidence,
                "fact below confidence threshold, skipped"
            );
            return Ok(None);
        }
        let memory = NewMemory::from_fact(fact, project_id).with_metadata(metadata);
        self.store(memory).map(Some)
    }

    /// Apply retention rules. See [`MemoryMaintenance::prune`].
    pub fn prune(&self, criteria: &PruneCriteria) -> AppResult<PruneReport> {
        MemoryMaintenance::prune(self, criteria)
    }

    // ========================================================================
    // Read Operations
    // ========================================================================

    /// Ranked search over active records; bumps usage of every returned hit
    pub fn search(&self, query: &str, filters: &SearchFilters) -> AppResult<Vec<RankedMemory>> {
        retrieval::search_memories(self, query, filters)
    }

    /// Get any record, active or superseded, by key or id
    pub fn get(&self, key_or_id: &str) -> AppResult<Option<MemoryRecord>> {
        let conn = self.db.get_connection()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM memories WHERE key = ?1 OR id = ?1
                     ORDER BY (key = ?1) DESC LIMIT 1",
                    RECORD_COLUMNS
                ),
                params![key_or_id],
                row_to_memory_record,
            )
            .optional()?;
        Ok(record)
    }

    /// The supersession chain ending at `key_or_id`, newest first
    pub fn history(&self, key_or_id: &str) -> AppResult<Vec<MemoryRecord>> {
        let head = self
            .get(key_or_id)?
            .ok_or_else(|| AppError::not_found(format!("Memory not found: {}", key_or_id)))?;

        let conn = self.db.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM memories WHERE superseded_by = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
            RECORD_COLUMNS
        ))?;

        let mut chain = vec![head];
        while chain.len() < MAX_HISTORY_DEPTH {
            let current = chain[chain.len() - 1].id.clone();
            match stmt
                .query_row(params![current], row_to_memory_record)
                .optional()?
            {
                Some(previous) => chain.push(previous),
                None => break,
            }
        }
        Ok(chain)
    }

    /// The active record holding `preference_key` in a bucket, if any
    pub fn active_for_key(
        &self,
        memory_type: MemoryType,
        scope: Scope,
        project_id: Option<&str>,
        preference_key: &str,
    ) -> AppResult<Option<MemoryRecord>> {
        let conn = self.db.get_connection()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM memories
                     WHERE type = ?1 AND scope = ?2 AND IFNULL(project_id, '') = IFNULL(?3, '')
                       AND preference_key = ?4 AND superseded_by IS NULL",
                    RECORD_COLUMNS
                ),
                params![memory_type.as_str(), scope.as_str(), project_id, preference_key],
                row_to_memory_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Active corrections, devops rules, preferences and failures visible to
    /// `project_id`, ranked per type. Read-only: usage counters are untouched.
    pub fn load_rules(&self, project_id: Option<&str>) -> AppResult<RuleSet> {
        let filters = SearchFilters {
            project_id: project_id.map(str::to_string),
            types: Some(vec![
                MemoryType::Correction,
                MemoryType::Devops,
                MemoryType::Preference,
                MemoryType::Failure,
            ]),
            ..SearchFilters::default()
        };
        let ranked = retrieval::rank_candidates(self, "", &filters)?;

        let mut rules = RuleSet::default();
        for hit in ranked {
            let bucket = match hit.record.memory_type {
                MemoryType::Correction => &mut rules.corrections,
                MemoryType::Devops => &mut rules.devops,
                MemoryType::Preference => &mut rules.preferences,
                MemoryType::Failure => &mut rules.failures,
                _ => continue,
            };
            bucket.push(hit.record);
        }
        Ok(rules)
    }

    /// Total, active and superseded counts, plus per-type totals
    pub fn stats(&self) -> AppResult<MemoryStats> {
        let conn = self.db.get_connection()?;

        let (total, active): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE superseded_by IS NULL) FROM memories",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let mut by_type = BTreeMap::new();
        let mut stmt = conn.prepare("SELECT type, COUNT(*) FROM memories GROUP BY type")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (memory_type, count) = row?;
            by_type.insert(memory_type, count as usize);
        }

        Ok(MemoryStats {
            total: total as usize,
            active: active as usize,
            superseded: (total - active) as usize,
            by_type,
        })
    }

    /// Total number of records, active and superseded
    pub fn count(&self) -> AppResult<usize> {
        let conn = self.db.get_connection()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

/// Helper to convert a database row to MemoryRecord
pub(crate) fn row_to_memory_record(row: &Row) -> rusqlite::Result<MemoryRecord> {
    let type_str: String = row.get(3)?;
    let scope_str: String = row.get(4)?;
    let metadata_json: String = row.get(9)?;

    let memory_type = MemoryType::from_str(&type_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let scope = Scope::from_str(&scope_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let metadata: Map<String, Value> = serde_json::from_str(&metadata_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(MemoryRecord {
        id: row.get(0)?,
        key: row.get(1)?,
        content: row.get(2)?,
        memory_type,
        scope,
        project_id: row.get(5)?,
        preference_key: row.get(6)?,
        confidence: row.get(7)?,
        content_hash: row.get(8)?,
        metadata,
        created_at: from_millis(row.get(10)?),
        updated_at: from_millis(row.get(11)?),
        access_count: row.get(12)?,
        superseded_by: row.get(13)?,
    })
}

// ============================================================================
// Tests
// ============================================================================
