//! Async bridging for blocking SQLite work

use crate::utils::error::{AppError, AppResult};

/// Run a blocking storage operation on tokio's blocking pool.
///
/// A panic inside `op` surfaces as `AppError::Internal`.
pub async fn run_blocking<T, F>(op: F) -> AppResult<T>
where
    F: FnOnce() -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| AppError::internal(format!("Task join error: {}", e)))?
}
