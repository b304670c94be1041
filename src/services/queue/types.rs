//! Queue Core Types
//!
//! Messages, dead letters, and the results of queue operations.
//! Timestamps are persisted as epoch milliseconds and exposed as UTC.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle of a queue message
///
/// `pending → processing → completed`, or `processing → retrying → pending`
/// until retries run out, then `dead`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Processing,
    Retrying,
    Completed,
    Dead,
}

impl MessageStatus {
    pub const ALL: [MessageStatus; 5] = [
        MessageStatus::Pending,
        MessageStatus::Processing,
        MessageStatus::Retrying,
        MessageStatus::Completed,
        MessageStatus::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Retrying => "retrying",
            Self::Completed => "completed",
            Self::Dead => "dead",
        }
    }

    /// Parse from a database string representation.
    pub fn from_str_value(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "retrying" => Some(Self::Retrying),
            "completed" => Some(Self::Completed),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }

    /// Completed and dead messages never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Dead)
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted queue message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub id: String,
    pub queue_name: String,
    pub message_type: String,
    pub payload: Value,
    pub status: MessageStatus,
    pub priority: i32,
    pub attempts: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub correlation_id: Option<String>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Parameters for `DurableQueue::enqueue`
///
/// Priority and retry budget fall back to the queue configuration when unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRequest {
    pub queue_name: String,
    pub message_type: String,
    pub payload: Value,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Not claimable before this instant
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl EnqueueRequest {
    pub fn new(
        queue_name: impl Into<String>,
        message_type: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            queue_name: queue_name.into(),
            message_type: message_type.into(),
            payload,
            priority: None,
            max_retries: None,
            scheduled_at: None,
            correlation_id: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// A message that exhausted its retries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEntry {
    pub id: String,
    pub original_message_id: String,
    pub original_queue_name: String,
    pub message_type: String,
    pub payload: Value,
    pub error_message: String,
    pub failed_at: DateTime<Utc>,
    pub attempts: u32,
    pub correlation_id: Option<String>,
}

/// What `nack` did with the message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum NackOutcome {
    /// Scheduled for another attempt
    Retrying {
        attempts: u32,
        next_retry_at: DateTime<Utc>,
    },
    /// Moved to the dead-letter table
    DeadLettered {
        dead_letter_id: String,
        attempts: u32,
    },
}

impl NackOutcome {
    pub fn is_dead(&self) -> bool {
        matches!(self, Self::DeadLettered { .. })
    }
}

/// Result of an orphan sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub requeued: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.requeued
    }
}

/// Message counts by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub retrying: u64,
    pub completed: u64,
    pub dead: u64,
    /// Rows in the dead-letter table (never purged)
    pub dead_letters: u64,
}

impl QueueStats {
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.retrying + self.completed + self.dead
    }

    /// Messages that still have work ahead of them
    pub fn in_flight(&self) -> u64 {
        self.pending + self.processing + self.retrying
    }

    pub(crate) fn add(&mut self, status: MessageStatus, count: u64) {
        match status {
            MessageStatus::Pending => self.pending += count,
            MessageStatus::Processing => self.processing += count,
            MessageStatus::Retrying => self.retrying += count,
            MessageStatus::Completed => self.completed += count,
            MessageStatus::Dead => self.dead += count,
        }
    }
}
