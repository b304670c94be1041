//! SQLite Database
//!
//! Embedded database shared by every Claude Recall process, using rusqlite
//! with r2d2 connection pooling. File databases run in WAL mode with a busy
//! timeout on every pooled connection; writes go through short
//! `BEGIN IMMEDIATE` transactions with bounded retry on lock contention.

use std::path::Path;
use std::time::Duration;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::database_path;

/// Type alias for the connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Type alias for a pooled connection
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// How long a statement waits on a locked database before failing busy
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Retries of a whole write transaction after a busy/locked failure
const WRITE_RETRY_ATTEMPTS: u32 = 4;

const WRITE_RETRY_BASE_DELAY_MS: u64 = 25;

/// Set pragmas on every connection handed out by the pool.
#[derive(Debug)]
struct ConnectionCustomizer {
    wal: bool,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for ConnectionCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // only takes effect before the first table exists
        conn.execute_batch("PRAGMA auto_vacuum = INCREMENTAL; PRAGMA foreign_keys = ON;")?;
        if self.wal {
            let _mode: String =
                conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
            conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        }
        Ok(())
    }
}

/// Page-level size figures for the database file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub page_count: u64,
    pub page_size: u64,
    pub freelist_count: u64,
}

impl StorageStats {
    /// Total file size in bytes (WAL excluded)
    pub fn size_bytes(&self) -> u64 {
        self.page_count * self.page_size
    }

    /// Bytes held by free pages that an incremental vacuum can return
    pub fn reclaimable_bytes(&self) -> u64 {
        self.freelist_count * self.page_size
    }
}

/// Database service for managing SQLite operations
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create an in-memory database for testing.
    ///
    /// Uses a single pooled connection so every caller sees the same
    /// in-memory database and schema.
    pub fn new_in_memory() -> AppResult<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .connection_customizer(Box::new(ConnectionCustomizer { wal: false }))
            .build(manager)
            .map_err(|e| AppError::database(format!("Failed to create connection pool: {}", e)))?;

        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    /// Open the shared database at the default location
    pub fn new() -> AppResult<Self> {
        let db_path = database_path()?;
        Self::open(&db_path)
    }

    /// Open (or create) a database file with connection pooling
    pub fn open(db_path: &Path) -> AppResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(8)
            .connection_timeout(Duration::from_secs(10))
            .connection_customizer(Box::new(ConnectionCustomizer { wal: true }))
            .build(manager)
            .map_err(|e| AppError::database(format!("Failed to create connection pool: {}", e)))?;

        let db = Self { pool };
        db.init_schema()?;

        tracing::debug!(path = %db_path.display(), "database opened");
        Ok(db)
    }

    /// Initialize the database schema
    fn init_schema(&self) -> AppResult<()> {
        let conn = self.get_connection()?;

        // Memory records; superseded rows keep a forward pointer to their replacement
        conn.execute(
            "CREATE TABLE IF NOT EXISTS memories (
                id TEXT PRIMARY KEY,
                key TEXT NOT NULL UNIQUE,
                content TEXT NOT NULL,
                type TEXT NOT NULL CHECK(type IN (
                    'correction',
                    'devops',
                    'preference',
                    'failure',
                    'project-knowledge',
                    'tool-use'
                )),
                scope TEXT NOT NULL CHECK(scope IN ('universal', 'project', 'unscoped')),
                project_id TEXT,
                preference_key TEXT,
                confidence REAL NOT NULL DEFAULT 1.0,
                content_hash TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                access_count INTEGER NOT NULL DEFAULT 0,
                superseded_by TEXT
            )",
            [],
        )?;

        // At most one active record per content hash
        conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_memories_active_hash
             ON memories(content_hash) WHERE superseded_by IS NULL",
            [],
        )?;

        // At most one active record per preference key within a bucket
        conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_memories_active_preference
             ON memories(type, scope, IFNULL(project_id, ''), preference_key)
             WHERE superseded_by IS NULL AND preference_key IS NOT NULL",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_memories_type_updated
             ON memories(type, updated_at)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_memories_project
             ON memories(project_id)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_memories_superseded_by
             ON memories(superseded_by)",
            [],
        )?;

        // Durable queue messages
        conn.execute(
            "CREATE TABLE IF NOT EXISTS queue_messages (
                id TEXT PRIMARY KEY,
                queue_name TEXT NOT NULL,
                message_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending' CHECK(status IN (
                    'pending',
                    'processing',
                    'retrying',
                    'completed',
                    'dead'
                )),
                priority INTEGER NOT NULL DEFAULT 0,
                attempts INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 3,
                created_at INTEGER NOT NULL,
                scheduled_at INTEGER,
                next_retry_at INTEGER,
                processed_at INTEGER,
                correlation_id TEXT,
                claimed_by TEXT,
                claimed_at INTEGER,
                last_error TEXT
            )",
            [],
        )?;

        // Claim order: priority desc, oldest first
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_queue_messages_claim
             ON queue_messages(queue_name, status, priority DESC, created_at)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_queue_messages_retry
             ON queue_messages(status, next_retry_at)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_queue_messages_claimed
             ON queue_messages(status, claimed_at)",
            [],
        )?;

        // Append-only record of messages that exhausted their retries
        conn.execute(
            "CREATE TABLE IF NOT EXISTS dead_letter_queue (
                id TEXT PRIMARY KEY,
                original_message_id TEXT NOT NULL,
                original_queue_name TEXT NOT NULL,
                message_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                error_message TEXT NOT NULL,
                failed_at INTEGER NOT NULL,
                attempts INTEGER NOT NULL,
                correlation_id TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_dead_letter_failed_at
             ON dead_letter_queue(failed_at DESC)",
            [],
        )?;

        Ok(())
    }

    /// Get a connection from the pool
    ///
    /// A checkout timeout means every connection is busy, so it surfaces as
    /// a transient error the caller may retry.
    pub fn get_connection(&self) -> AppResult<DbConnection> {
        self.pool
            .get()
            .map_err(|e| AppError::transient(format!("Failed to get connection: {}", e)))
    }

    /// Check if the database is healthy
    pub fn is_healthy(&self) -> bool {
        if let Ok(conn) = self.pool.get() {
            conn.query_row("SELECT 1", [], |_| Ok(())).is_ok()
        } else {
            false
        }
    }

    /// Run `op` inside a `BEGIN IMMEDIATE` transaction.
    ///
    /// The write lock is taken up front, so two writers never both read and
    /// then race to upgrade. If the transaction fails with busy/locked it is
    /// rolled back and retried from scratch a bounded number of times, then
    /// surfaced as `TransientStorage`. Any other error rolls back and returns
    /// immediately.
    ///
    /// `op` must not check out another connection from this pool.
    pub fn write_transaction<T, F>(&self, mut op: F) -> AppResult<T>
    where
        F: FnMut(&Transaction<'_>) -> AppResult<T>,
    {
        let mut attempt: u32 = 0;
        loop {
            match self.try_write(&mut op) {
                Err(err) if err.is_transient() && attempt < WRITE_RETRY_ATTEMPTS => {
                    attempt += 1;
                    let delay_ms = WRITE_RETRY_BASE_DELAY_MS << (attempt - 1);
                    tracing::debug!(attempt, delay_ms, error = %err, "write contention, retrying");
                    std::thread::sleep(Duration::from_millis(delay_ms));
                }
                Err(err) if err.is_transient() => {
                    tracing::warn!(attempts = attempt + 1, error = %err, "write abandoned after retries");
                    return Err(err);
                }
                other => return other,
            }
        }
    }

    fn try_write<T, F>(&self, op: &mut F) -> AppResult<T>
    where
        F: FnMut(&Transaction<'_>) -> AppResult<T>,
    {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = op(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Current page counts of the main database file
    pub fn storage_stats(&self) -> AppResult<StorageStats> {
        let conn = self.get_connection()?;
        Self::read_storage_stats(&conn)
    }

    fn read_storage_stats(conn: &Connection) -> AppResult<StorageStats> {
        let page_count: i64 = conn.pragma_query_value(None, "page_count", |row| row.get(0))?;
        let page_size: i64 = conn.pragma_query_value(None, "page_size", |row| row.get(0))?;
        let freelist_count: i64 =
            conn.pragma_query_value(None, "freelist_count", |row| row.get(0))?;

        Ok(StorageStats {
            page_count: page_count.max(0) as u64,
            page_size: page_size.max(0) as u64,
            freelist_count: freelist_count.max(0) as u64,
        })
    }

    /// Return free pages to the filesystem in batches of `pages_per_batch`.
    ///
    /// Each batch runs on a freshly checked-out connection, so the exclusive
    /// window stays short and other writers can interleave between batches.
    /// Stops after `max_batches` or when nothing is left to free. Returns the
    /// number of pages released.
    pub fn incremental_vacuum(&self, pages_per_batch: u32, max_batches: u32) -> AppResult<u64> {
        let mut released = 0u64;

        for _ in 0..max_batches {
            let conn = self.get_connection()?;
            let before = Self::read_storage_stats(&conn)?.freelist_count;
            if before == 0 {
                break;
            }

            // every freed page yields a row; drain them so the batch runs to completion
            {
                let mut stmt =
                    conn.prepare(&format!("PRAGMA incremental_vacuum({})", pages_per_batch))?;
                let mut rows = stmt.query([])?;
                while rows.next()?.is_some() {}
            }

            let after = Self::read_storage_stats(&conn)?.freelist_count;
            released += before.saturating_sub(after);
            if after >= before {
                break;
            }
        }

        Ok(released)
    }

    /// Fold the WAL back into the main file without blocking readers or writers
    pub fn checkpoint_passive(&self) -> AppResult<()> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare("PRAGMA wal_checkpoint(PASSIVE)")?;
        let mut rows = stmt.query([])?;
        while rows.next()?.is_some() {}
        Ok(())
    }
}
