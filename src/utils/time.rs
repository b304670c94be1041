//! Timestamp helpers
//!
//! Every persisted timestamp is UTC epoch milliseconds in an INTEGER column,
//! which keeps ordering and `<=` comparisons inside SQL exact across processes.

use chrono::{DateTime, Utc};

/// Current time as epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert stored epoch milliseconds back to a `DateTime<Utc>`
pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Fractional days elapsed between `then_ms` and `now_ms` (never negative)
pub fn days_between(then_ms: i64, now_ms: i64) -> f64 {
    ((now_ms - then_ms).max(0) as f64) / 86_400_000.0
}
