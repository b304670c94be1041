//! Durable Queue
//!
//! SQLite-backed work queue shared by every process that opens the same
//! database file. Each state transition is a single `BEGIN IMMEDIATE`
//! transaction, so two workers can never both claim one message and a
//! crash between steps leaves the message in a state the orphan sweep or a
//! retry can recover.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row, Transaction};
use serde_json::Value;

use crate::models::settings::QueueConfig;
use crate::services::queue::types::{
    DeadLetterEntry, EnqueueRequest, MessageStatus, NackOutcome, QueueMessage, QueueStats,
    SweepReport,
};
use crate::storage::database::Database;
use crate::utils::error::{AppError, AppResult};
use crate::utils::time::{from_millis, now_millis};

const MESSAGE_COLUMNS: &str = "id, queue_name, message_type, payload, status, priority, attempts,
     max_retries, created_at, scheduled_at, next_retry_at, processed_at, correlation_id,
     claimed_by, claimed_at, last_error";

const DEAD_LETTER_COLUMNS: &str = "id, original_message_id, original_queue_name, message_type,
     payload, error_message, failed_at, attempts, correlation_id";

/// Claim order: highest priority, then oldest, then insertion order
const CLAIM_ORDER: &str = "priority DESC, created_at ASC, rowid ASC";

/// Error recorded when the orphan sweep reclaims a message
pub const LOST_MESSAGE_ERROR: &str = "worker lost message";

const MAX_NAME_LEN: usize = 128;
const MAX_ERROR_LEN: usize = 4 * 1024;

/// Retry delay for the given attempt number (1-based) before jitter:
/// `min(base * 2^(attempts - 1), cap)`.
pub fn backoff_delay_ms(attempts: u32, base_ms: u64, cap_ms: u64) -> u64 {
    let exponent = attempts.saturating_sub(1).min(63);
    base_ms.saturating_mul(1u64 << exponent).min(cap_ms)
}

/// Add `jitter_fraction` (0.0..=0.1) of the delay on top of it, never
/// exceeding `cap_ms`
fn with_jitter(delay_ms: u64, jitter_fraction: f64, cap_ms: u64) -> u64 {
    let jitter = (delay_ms as f64 * jitter_fraction.clamp(0.0, 0.1)) as u64;
    delay_ms.saturating_add(jitter).min(cap_ms)
}

fn truncate_error(error: &str) -> String {
    if error.len() <= MAX_ERROR_LEN {
        return error.to_string();
    }
    let mut cut = MAX_ERROR_LEN;
    while !error.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &error[..cut])
}

fn validate_name(field: &str, value: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::validation(format!("{} cannot be empty", field)));
    }
    if value.len() > MAX_NAME_LEN {
        return Err(AppError::validation(format!(
            "{} exceeds {} bytes",
            field, MAX_NAME_LEN
        )));
    }
    Ok(())
}

/// Durable, multi-process message queue
#[derive(Clone)]
pub struct DurableQueue {
    db: Database,
    config: QueueConfig,
}

impl DurableQueue {
    pub fn new(db: Database, config: QueueConfig) -> Self {
        Self { db, config }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Persist a new `pending` message and return its id
    pub fn enqueue(&self, request: EnqueueRequest) -> AppResult<String> {
        validate_name("queue name", &request.queue_name)?;
        validate_name("message type", &request.message_type)?;

        let max_retries = request.max_retries.unwrap_or(self.config.default_max_retries);
        if max_retries < 1 {
            return Err(AppError::validation("max_retries must be at least 1"));
        }
        let priority = request.priority.unwrap_or(self.config.default_priority);
        let payload = serde_json::to_string(&request.payload)?;
        let scheduled_at = request.scheduled_at.map(|at| at.timestamp_millis());
        let id = uuid::Uuid::new_v4().to_string();

        self.db.write_transaction(|tx| {
            tx.execute(
                "INSERT INTO queue_messages (id, queue_name, message_type, payload, status,
                 priority, attempts, max_retries, created_at, scheduled_at, correlation_id)
                 VALUES (?1, ?2, ?3, ?4, 'pending', ?5, 0, ?6, ?7, ?8, ?9)",
                params![
                    id,
                    request.queue_name,
                    request.message_type,
                    payload,
                    priority,
                    max_retries,
                    now_millis(),
                    scheduled_at,
                    request.correlation_id,
                ],
            )?;
            Ok(())
        })?;

        tracing::debug!(
            id = %id,
            queue = %request.queue_name,
            message_type = %request.message_type,
            priority,
            "message enqueued"
        );
        Ok(id)
    }

    /// Claim the next eligible message for `worker_id`.
    ///
    /// Due `retrying` messages are promoted back to `pending` first, then the
    /// best `pending` message whose schedule has arrived flips to `processing`.
    pub fn claim(&self, queue_name: &str, worker_id: &str) -> AppResult<Option<QueueMessage>> {
        validate_name("worker id", worker_id)?;

        let claimed = self.db.write_transaction(|tx| {
            let now = now_millis();

            tx.execute(
                "UPDATE queue_messages SET status = 'pending'
                 WHERE queue_name = ?1 AND status = 'retrying' AND next_retry_at <= ?2",
                params![queue_name, now],
            )?;

            let next: Option<String> = tx
                .query_row(
                    &format!(
                        "SELECT id FROM queue_messages
                         WHERE queue_name = ?1 AND status = 'pending'
                           AND (scheduled_at IS NULL OR scheduled_at <= ?2)
                         ORDER BY {} LIMIT 1",
                        CLAIM_ORDER
                    ),
                    params![queue_name, now],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(id) = next else {
                return Ok(None);
            };

            let changed = tx.execute(
                "UPDATE queue_messages
                 SET status = 'processing', claimed_by = ?2, claimed_at = ?3
                 WHERE id = ?1 AND status = 'pending'",
                params![id, worker_id, now],
            )?;
            if changed != 1 {
                return Ok(None);
            }

            load_message(tx, &id)
        })?;

        if let Some(ref message) = claimed {
            tracing::debug!(
                id = %message.id,
                worker = %worker_id,
                message_type = %message.message_type,
                attempts = message.attempts,
                "message claimed"
            );
        }
        Ok(claimed)
    }

    /// Mark a claimed message as completed.
    ///
    /// `claim` is the message as returned by `claim()`; if the row has since
    /// been reclaimed by another worker this fails with `StaleClaim` and
    /// leaves the new claim untouched.
    pub fn ack(&self, claim: &QueueMessage) -> AppResult<()> {
        let id = claim.id.as_str();
        self.db.write_transaction(|tx| {
            require_claim(tx, claim)?;
            tx.execute(
                "UPDATE queue_messages SET status = 'completed', processed_at = ?2
                 WHERE id = ?1",
                params![id, now_millis()],
            )?;
            Ok(())
        })?;

        tracing::debug!(id = %id, "message acked");
        Ok(())
    }

    /// Record a failed attempt on a claimed message.
    ///
    /// Schedules a retry with exponential backoff while attempts remain,
    /// otherwise moves the message to the dead-letter table. Both paths are
    /// one transaction. Same claim check as `ack`.
    pub fn nack(&self, claim: &QueueMessage, error: &str) -> AppResult<NackOutcome> {
        let id = claim.id.as_str();
        let error = truncate_error(error);
        let jitter: f64 = rand::thread_rng().gen_range(0.0..=0.1);
        let base_ms = self.config.backoff_base_ms;
        let cap_ms = self.config.backoff_max_ms;

        let outcome = self.db.write_transaction(|tx| {
            let message = require_claim(tx, claim)?;
            let now = now_millis();
            let attempts = message.attempts + 1;

            if attempts < message.max_retries {
                let delay =
                    with_jitter(backoff_delay_ms(attempts, base_ms, cap_ms), jitter, cap_ms);
                let next_retry_at = now + delay as i64;
                tx.execute(
                    "UPDATE queue_messages
                     SET status = 'retrying', attempts = ?2, next_retry_at = ?3, last_error = ?4,
                         claimed_by = NULL, claimed_at = NULL
                     WHERE id = ?1",
                    params![id, attempts, next_retry_at, error],
                )?;
                Ok(NackOutcome::Retrying {
                    attempts,
                    next_retry_at: from_millis(next_retry_at),
                })
            } else {
                let dead_letter_id = dead_letter(tx, id, attempts, &error, now)?;
                Ok(NackOutcome::DeadLettered {
                    dead_letter_id,
                    attempts,
                })
            }
        })?;

        match &outcome {
            NackOutcome::Retrying {
                attempts,
                next_retry_at,
            } => tracing::info!(
                id = %id,
                attempts,
                next_retry_at = %next_retry_at,
                error = %error,
                "message scheduled for retry"
            ),
            NackOutcome::DeadLettered { attempts, .. } => tracing::warn!(
                id = %id,
                attempts,
                error = %error,
                "message dead-lettered"
            ),
        }
        Ok(outcome)
    }

    /// Reclaim `processing` messages whose claim is older than the configured
    /// staleness timeout.
    pub fn sweep_orphans(&self) -> AppResult<SweepReport> {
        self.sweep_orphans_older_than(Duration::from_secs(self.config.staleness_timeout_secs))
    }

    /// Return `processing` messages claimed more than `staleness` ago to
    /// `pending`. Attempts are left unchanged: a lost worker is not a
    /// handler failure.
    pub fn sweep_orphans_older_than(&self, staleness: Duration) -> AppResult<SweepReport> {
        let cutoff = now_millis() - staleness.as_millis() as i64;
        let requeued = self.db.write_transaction(|tx| {
            let n = tx.execute(
                "UPDATE queue_messages
                 SET status = 'pending', last_error = ?2, claimed_by = NULL, claimed_at = NULL
                 WHERE status = 'processing' AND claimed_at <= ?1",
                params![cutoff, LOST_MESSAGE_ERROR],
            )?;
            Ok(n)
        })?;

        let report = SweepReport { requeued };
        if report.total() > 0 {
            tracing::warn!(requeued, "reclaimed orphaned messages");
        }
        Ok(report)
    }

    /// Next claimable messages in claim order, without claiming them
    pub fn peek(&self, queue_name: &str, limit: usize) -> AppResult<Vec<QueueMessage>> {
        let conn = self.db.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM queue_messages
             WHERE queue_name = ?1 AND status IN ('pending', 'retrying')
             ORDER BY {} LIMIT ?2",
            MESSAGE_COLUMNS, CLAIM_ORDER
        ))?;
        let rows = stmt.query_map(params![queue_name, limit as i64], row_to_message)?;
        let messages = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    /// Counts by status, for one queue or all of them
    pub fn stats(&self, queue_name: Option<&str>) -> AppResult<QueueStats> {
        let conn = self.db.get_connection()?;
        let mut stats = QueueStats::default();

        {
            let mut stmt = conn.prepare(
                "SELECT status, COUNT(*) FROM queue_messages
                 WHERE ?1 IS NULL OR queue_name = ?1
                 GROUP BY status",
            )?;
            let rows = stmt.query_map(params![queue_name], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (status, count) = row?;
                if let Some(status) = MessageStatus::from_str_value(&status) {
                    stats.add(status, count.max(0) as u64);
                }
            }
        }

        let dead_letters: i64 = conn.query_row(
            "SELECT COUNT(*) FROM dead_letter_queue
             WHERE ?1 IS NULL OR original_queue_name = ?1",
            params![queue_name],
            |row| row.get(0),
        )?;
        stats.dead_letters = dead_letters.max(0) as u64;

        Ok(stats)
    }

    /// Most recent dead letters first
    pub fn list_dead_letters(&self, limit: usize) -> AppResult<Vec<DeadLetterEntry>> {
        let conn = self.db.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM dead_letter_queue ORDER BY failed_at DESC, rowid DESC LIMIT ?1",
            DEAD_LETTER_COLUMNS
        ))?;
        let rows = stmt.query_map(params![limit as i64], row_to_dead_letter)?;
        let entries = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn get(&self, id: &str) -> AppResult<Option<QueueMessage>> {
        let conn = self.db.get_connection()?;
        let message = conn
            .query_row(
                &format!("SELECT {} FROM queue_messages WHERE id = ?1", MESSAGE_COLUMNS),
                params![id],
                row_to_message,
            )
            .optional()?;
        Ok(message)
    }

    /// Delete completed messages processed more than `older_than` ago.
    /// Dead letters are kept.
    pub fn purge_completed(&self, older_than: Duration) -> AppResult<usize> {
        let cutoff = now_millis() - older_than.as_millis() as i64;
        let deleted = self.db.write_transaction(|tx| {
            let n = tx.execute(
                "DELETE FROM queue_messages WHERE status = 'completed' AND processed_at < ?1",
                params![cutoff],
            )?;
            Ok(n)
        })?;

        if deleted > 0 {
            tracing::info!(deleted, "purged completed messages");
        }
        Ok(deleted)
    }

    /// `purge_completed` with the configured retention window
    pub fn purge_expired(&self) -> AppResult<usize> {
        self.purge_completed(Duration::from_secs(self.config.completed_retention_secs))
    }
}

fn load_message(tx: &Transaction<'_>, id: &str) -> AppResult<Option<QueueMessage>> {
    let message = tx
        .query_row(
            &format!("SELECT {} FROM queue_messages WHERE id = ?1", MESSAGE_COLUMNS),
            params![id],
            row_to_message,
        )
        .optional()?;
    Ok(message)
}

/// Load a message that must still be `processing` under `claim`
fn require_claim(tx: &Transaction<'_>, claim: &QueueMessage) -> AppResult<QueueMessage> {
    let id = &claim.id;
    let message = load_message(tx, id)?
        .ok_or_else(|| AppError::not_found(format!("queue message {}", id)))?;
    if message.status != MessageStatus::Processing {
        return Err(AppError::validation(format!(
            "queue message {} is {}, not processing",
            id, message.status
        )));
    }
    if message.claimed_by != claim.claimed_by || message.claimed_at != claim.claimed_at {
        return Err(AppError::stale_claim(format!(
            "queue message {} is now claimed by {}",
            id,
            message.claimed_by.as_deref().unwrap_or("nobody")
        )));
    }
    Ok(message)
}

/// Copy a message into the dead-letter table and mark it `dead`
fn dead_letter(
    tx: &Transaction<'_>,
    id: &str,
    attempts: u32,
    error: &str,
    now: i64,
) -> AppResult<String> {
    let dead_letter_id = uuid::Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO dead_letter_queue (id, original_message_id, original_queue_name,
         message_type, payload, error_message, failed_at, attempts, correlation_id)
         SELECT ?1, id, queue_name, message_type, payload, ?2, ?3, ?4, correlation_id
         FROM queue_messages WHERE id = ?5",
        params![dead_letter_id, error, now, attempts, id],
    )?;
    tx.execute(
        "UPDATE queue_messages
         SET status = 'dead', attempts = ?2, last_error = ?3, processed_at = ?4,
             next_retry_at = NULL, claimed_by = NULL, claimed_at = NULL
         WHERE id = ?1",
        params![id, attempts, error, now],
    )?;
    Ok(dead_letter_id)
}

fn parse_payload(idx: usize, raw: String) -> rusqlite::Result<Value> {
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_time(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.map(from_millis)
}

fn row_to_message(row: &Row) -> rusqlite::Result<QueueMessage> {
    let status_str: String = row.get(4)?;
    let status = MessageStatus::from_str_value(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            Type::Text,
            format!("unknown message status: {}", status_str).into(),
        )
    })?;

    Ok(QueueMessage {
        id: row.get(0)?,
        queue_name: row.get(1)?,
        message_type: row.get(2)?,
        payload: parse_payload(3, row.get(3)?)?,
        status,
        priority: row.get(5)?,
        attempts: row.get(6)?,
        max_retries: row.get(7)?,
        created_at: from_millis(row.get(8)?),
        scheduled_at: opt_time(row.get(9)?),
        next_retry_at: opt_time(row.get(10)?),
        processed_at: opt_time(row.get(11)?),
        correlation_id: row.get(12)?,
        claimed_by: row.get(13)?,
        claimed_at: opt_time(row.get(14)?),
        last_error: row.get(15)?,
    })
}

fn row_to_dead_letter(row: &Row) -> rusqlite::Result<DeadLetterEntry> {
    Ok(DeadLetterEntry {
        id: row.get(0)?,
        original_message_id: row.get(1)?,
        original_queue_name: row.get(2)?,
        message_type: row.get(3)?,
        payload: parse_payload(4, row.get(4)?)?,
        error_message: row.get(5)?,
        failed_at: from_millis(row.get(6)?),
        attempts: row.get(7)?,
        correlation_id: row.get(8)?,
    })
}

// ============================================================================
// Tests
// ============================================================================
