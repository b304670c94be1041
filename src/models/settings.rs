//! Settings Models
//!
//! Runtime configuration for the memory store, queue, consumer loop, and
//! maintenance timer. Stored as JSON; every field has a default so partial
//! files load cleanly.

use serde::{Deserialize, Serialize};

use claude_recall_core::MemoryType;

/// Top-level configuration stored in config.json
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecallConfig {
    pub memory: MemoryConfig,
    pub queue: QueueConfig,
    pub consumer: ConsumerConfig,
    pub maintenance: MaintenanceConfig,
}

/// Memory store limits, retention and ranking
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Soft ceiling on total records; crossing it triggers pruning
    pub max_memories: usize,
    /// Database size (bytes) above which compaction runs
    pub compaction_size_threshold_bytes: u64,
    /// When set, `store()` refuses new records once this many exist
    pub hard_ceiling: Option<usize>,
    pub retention: RetentionConfig,
    pub ranking: RankingWeights,
    /// Classified facts below this confidence are not stored
    pub min_fact_confidence: f32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_memories: 10_000,
            compaction_size_threshold_bytes: 10 * 1024 * 1024,
            hard_ceiling: None,
            retention: RetentionConfig::default(),
            ranking: RankingWeights::default(),
            min_fact_confidence: 0.3,
        }
    }
}

/// Retention rule for one memory type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Keep at most this many active records; `None` means never count-pruned
    pub max_active: Option<usize>,
    /// Active records the ceiling pass must always leave in place
    pub floor: usize,
}

impl RetentionPolicy {
    pub const fn unbounded() -> Self {
        Self {
            max_active: None,
            floor: 0,
        }
    }

    pub const fn bounded(max_active: usize, floor: usize) -> Self {
        Self {
            max_active: Some(max_active),
            floor,
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.max_active.is_some()
    }
}

/// Per-type retention caps
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub correction: RetentionPolicy,
    pub devops: RetentionPolicy,
    pub preference: RetentionPolicy,
    pub failure: RetentionPolicy,
    pub project_knowledge: RetentionPolicy,
    pub tool_use: RetentionPolicy,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            correction: RetentionPolicy::bounded(100, 20),
            devops: RetentionPolicy::unbounded(),
            preference: RetentionPolicy::unbounded(),
            failure: RetentionPolicy::bounded(500, 50),
            project_knowledge: RetentionPolicy::unbounded(),
            tool_use: RetentionPolicy::bounded(1000, 50),
        }
    }
}

impl RetentionConfig {
    pub fn policy_for(&self, memory_type: MemoryType) -> RetentionPolicy {
        match memory_type {
            MemoryType::Correction => self.correction,
            MemoryType::Devops => self.devops,
            MemoryType::Preference => self.preference,
            MemoryType::Failure => self.failure,
            MemoryType::ProjectKnowledge => self.project_knowledge,
            MemoryType::ToolUse => self.tool_use,
        }
    }

    /// Types that may be pruned, in the order the ceiling pass visits them
    pub fn bounded_types(&self) -> Vec<MemoryType> {
        // lowest ranking first so tool-use traces go before corrections
        MemoryType::ALL
            .iter()
            .rev()
            .copied()
            .filter(|t| self.policy_for(*t).is_bounded())
            .collect()
    }
}

/// Tunable constants of the read-time ranking formula
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingWeights {
    /// Scales `priority / 6` of the record's type
    pub type_weight: f32,
    /// Maximum recency contribution (for a record updated just now)
    pub recency_weight: f32,
    /// Per-day decay rate in `recency_weight / (1 + days * rate)`
    pub recency_decay_per_day: f32,
    /// Scales the fraction of query tokens found in the content
    pub keyword_weight: f32,
    /// Extra credit when the whole query appears verbatim
    pub substring_bonus: f32,
    /// Added when accesses per day reach `high_usage_rate`
    pub usage_boost: f32,
    /// Subtracted from never-accessed records older than `low_usage_after_days`
    pub usage_penalty: f32,
    pub high_usage_rate: f32,
    pub low_usage_after_days: f32,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            type_weight: 0.5,
            recency_weight: 0.3,
            recency_decay_per_day: 0.1,
            keyword_weight: 0.4,
            substring_bonus: 0.1,
            usage_boost: 0.1,
            usage_penalty: 0.05,
            high_usage_rate: 1.0,
            low_usage_after_days: 30.0,
        }
    }
}

/// Durable queue retry and staleness settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub default_max_retries: u32,
    pub default_priority: i32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// `processing` messages older than this are reclaimed by the orphan sweep
    pub staleness_timeout_secs: u64,
    /// Completed messages older than this are purged by maintenance
    pub completed_retention_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            default_priority: 0,
            backoff_base_ms: 1_000,
            backoff_max_ms: 60_000,
            staleness_timeout_secs: 300,
            completed_retention_secs: 7 * 24 * 60 * 60,
        }
    }
}

/// Consumer polling loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub queue_name: String,
    /// Defaults to `<hostname-less pid>-<random>` when unset
    pub worker_id: Option<String>,
    pub idle_backoff_min_ms: u64,
    pub idle_backoff_max_ms: u64,
    pub sweep_interval_secs: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            queue_name: "memory".to_string(),
            worker_id: None,
            idle_backoff_min_ms: 100,
            idle_backoff_max_ms: 5_000,
            sweep_interval_secs: 30,
        }
    }
}

/// Stats & compaction timer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub warn_percent: f32,
    pub critical_percent: f32,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
            warn_percent: 80.0,
            critical_percent: 90.0,
        }
    }
}

impl RecallConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.memory.max_memories == 0 {
            return Err("memory.max_memories must be greater than 0".to_string());
        }

        if let Some(hard) = self.memory.hard_ceiling {
            if hard < self.memory.max_memories {
                return Err(format!(
                    "memory.hard_ceiling ({}) cannot be below memory.max_memories ({})",
                    hard, self.memory.max_memories
                ));
            }
        }

        if !(0.0..=1.0).contains(&self.memory.min_fact_confidence) {
            return Err("memory.min_fact_confidence must be within [0, 1]".to_string());
        }

        for t in MemoryType::ALL {
            let policy = self.memory.retention.policy_for(t);
            if let Some(max) = policy.max_active {
                if policy.floor > max {
                    return Err(format!(
                        "retention floor for {} ({}) exceeds its cap ({})",
                        t, policy.floor, max
                    ));
                }
            }
        }

        if self.queue.default_max_retries == 0 {
            return Err("queue.default_max_retries must be at least 1".to_string());
        }

        if self.queue.backoff_max_ms < self.queue.backoff_base_ms {
            return Err("queue.backoff_max_ms cannot be below queue.backoff_base_ms".to_string());
        }

        if self.consumer.queue_name.trim().is_empty() {
            return Err("consumer.queue_name cannot be empty".to_string());
        }

        if self.consumer.idle_backoff_min_ms == 0
            || self.consumer.idle_backoff_max_ms < self.consumer.idle_backoff_min_ms
        {
            return Err(
                "consumer idle backoff must satisfy 0 < idle_backoff_min_ms <= idle_backoff_max_ms"
                    .to_string(),
            );
        }

        let m = &self.maintenance;
        if !(0.0 < m.warn_percent && m.warn_percent <= m.critical_percent && m.critical_percent <= 100.0) {
            return Err("maintenance thresholds must satisfy 0 < warn <= critical <= 100".to_string());
        }

        if m.enabled && m.interval_secs == 0 {
            return Err("maintenance.interval_secs must be greater than 0".to_string());
        }

        Ok(())
    }
}
