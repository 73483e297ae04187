//! Database connection management.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use sqlx::{Sqlite, Transaction};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::error::DbResult;

/// Handle to the reminder database.
///
/// Cloning is cheap: clones share the pool and the writer lock. Every
/// mutation goes through [`TicklerDb::begin_write`], so at most one write
/// transaction is in flight at any time, regardless of how many tasks hold a
/// handle.
#[derive(Debug, Clone)]
pub struct TicklerDb {
    pool: SqlitePool,
    writer: Arc<Mutex<()>>,
}

/// An exclusive write transaction.
///
/// Holds the database-wide writer lock for as long as it lives. Dropping it
/// without calling [`WriteTx::commit`] rolls the transaction back.
pub struct WriteTx {
    // Field order matters: the transaction must be released before the lock.
    tx: Transaction<'static, Sqlite>,
    _guard: OwnedMutexGuard<()>,
}

impl WriteTx {
    /// Connection to run statements on inside this transaction.
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    /// Commit the transaction and release the writer lock.
    pub async fn commit(self) -> DbResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

impl TicklerDb {
    /// Open or create a database at the given path.
    ///
    /// This will:
    /// 1. Create the parent directory and database file if missing
    /// 2. Configure SQLite (WAL mode, busy timeout, foreign keys)
    /// 3. Run any pending migrations
    pub async fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        info!("Opening reminder database: {}", path.display());

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .pragma("synchronous", "NORMAL") // Safe with WAL
            .pragma("temp_store", "MEMORY")
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        debug!("Database connection established");

        Self::run_migrations(&pool).await?;

        Ok(Self::from_pool(pool))
    }

    /// Open an in-memory database (for testing).
    pub async fn open_in_memory() -> DbResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .pragma("foreign_keys", "ON");

        // In-memory must be a single connection that never gets recycled,
        // otherwise the schema disappears with it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::run_migrations(&pool).await?;

        Ok(Self::from_pool(pool))
    }

    fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            writer: Arc::new(Mutex::new(())),
        }
    }

    async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
        debug!("Running database migrations");
        sqlx::migrate!("./migrations").run(pool).await?;
        info!("Database migrations complete");
        Ok(())
    }

    /// Connection pool for reads.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Acquire the writer lock and open a transaction.
    ///
    /// Never run queries against [`TicklerDb::pool`] while holding the
    /// returned transaction: an in-memory database has a single connection.
    pub async fn begin_write(&self) -> DbResult<WriteTx> {
        let guard = self.writer.clone().lock_owned().await;
        let tx = self.pool.begin().await?;
        Ok(WriteTx { tx, _guard: guard })
    }

    /// Close the database connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Check if the database is healthy.
    pub async fn health_check(&self) -> DbResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Get database statistics.
    pub async fn stats(&self) -> DbResult<DbStats> {
        let pending: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM reminders WHERE notified = 0")
            .fetch_one(&self.pool)
            .await?;

        let recurring: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM recurring_reminders WHERE active = 1")
                .fetch_one(&self.pool)
                .await?;

        let users: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM user_preferences")
            .fetch_one(&self.pool)
            .await?;

        Ok(DbStats {
            pending_reminders: pending.0 as u64,
            active_recurring: recurring.0 as u64,
            known_users: users.0 as u64,
        })
    }

    /// Checkpoint the WAL file.
    pub async fn checkpoint(&self) -> DbResult<()> {
        debug!("Checkpointing WAL");
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Database statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbStats {
    pub pending_reminders: u64,
    pub active_recurring: u64,
    pub known_users: u64,
}
