//! Usage Log
//!
//! Append-only audit log of conversion attempts with SQLite storage.
//! Records arrive over a channel and are written by a single writer task,
//! so the converter never touches the database directly. Supports
//! timestamped backups and aggregate statistics.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Backup file name prefix
const BACKUP_PREFIX: &str = "usage_";
const BACKUP_SUFFIX: &str = ".db";

/// One conversion attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRecord {
    pub timestamp: i64,
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub source: String,
    pub input_length: usize,
    pub fragment_count: usize,
    pub success: bool,
    pub error: String,
    pub is_premium: bool,
}

/// Aggregate statistics over the whole log
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageStats {
    pub total_records: i64,
    pub distinct_users: i64,
    pub successes: i64,
    pub failures: i64,
    pub premium_users: i64,
}

/// Sending half handed to the converter
pub type UsageSender = mpsc::UnboundedSender<UsageRecord>;

/// Usage store with SQLite backend
pub struct UsageStore {
    conn: Mutex<Connection>,
}

impl UsageStore {
    /// Create or open the usage database
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("opening usage db {}", db_path.display()))?;
        Self::init(conn)
    }

    /// In-memory store (tests, or when no path is configured)
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS usage_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                username TEXT,
                first_name TEXT NOT NULL,
                source TEXT NOT NULL,
                input_length INTEGER NOT NULL,
                fragment_count INTEGER NOT NULL,
                success INTEGER NOT NULL,
                error TEXT NOT NULL DEFAULT '',
                is_premium INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_usage_log_user_time ON usage_log(user_id, timestamp);
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Append one record
    pub fn record(&self, record: &UsageRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO usage_log
             (timestamp, user_id, username, first_name, source, input_length, fragment_count, success, error, is_premium)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.timestamp,
                record.user_id,
                record.username,
                record.first_name,
                record.source,
                record.input_length as i64,
                record.fragment_count as i64,
                record.success,
                record.error,
                record.is_premium,
            ],
        )?;
        Ok(())
    }

    /// Records for one user, oldest first
    pub fn records_for(&self, user_id: i64) -> Result<Vec<UsageRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT timestamp, user_id, username, first_name, source, input_length,
                    fragment_count, success, error, is_premium
             FROM usage_log WHERE user_id = ?1 ORDER BY id ASC",
        )?;

        let records = stmt
            .query_map(params![user_id], |row| {
                Ok(UsageRecord {
                    timestamp: row.get(0)?,
                    user_id: row.get(1)?,
                    username: row.get(2)?,
                    first_name: row.get(3)?,
                    source: row.get(4)?,
                    input_length: row.get::<_, i64>(5)? as usize,
                    fragment_count: row.get::<_, i64>(6)? as usize,
                    success: row.get(7)?,
                    error: row.get(8)?,
                    is_premium: row.get(9)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records)
    }

    /// Aggregate statistics
    pub fn stats(&self) -> Result<UsageStats> {
        let conn = self.conn.lock();
        let stats = conn.query_row(
            "SELECT
                COUNT(*),
                COUNT(DISTINCT user_id),
                COALESCE(SUM(CASE WHEN success = 1 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END), 0),
                COUNT(DISTINCT CASE WHEN is_premium = 1 THEN user_id END)
             FROM usage_log",
            [],
            |row| {
                Ok(UsageStats {
                    total_records: row.get(0)?,
                    distinct_users: row.get(1)?,
                    successes: row.get(2)?,
                    failures: row.get(3)?,
                    premium_users: row.get(4)?,
                })
            },
        )?;
        Ok(stats)
    }

    /// Write a consistent, timestamped copy of the database into `dir`
    pub fn backup(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating backup dir {}", dir.display()))?;

        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%3f");
        let path = dir.join(format!("{}{}{}", BACKUP_PREFIX, stamp, BACKUP_SUFFIX));

        let conn = self.conn.lock();
        conn.execute("VACUUM INTO ?1", params![path.to_string_lossy().into_owned()])
            .with_context(|| format!("writing backup {}", path.display()))?;

        info!("Usage log backed up to {}", path.display());
        Ok(path)
    }
}

/// Delete all but the newest `keep` backups in `dir`. Returns how many were removed.
pub fn prune_backups(dir: &Path, keep: usize) -> Result<usize> {
    let mut backups: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(BACKUP_PREFIX) && n.ends_with(BACKUP_SUFFIX))
                .unwrap_or(false)
        })
        .collect();

    // Timestamped names sort chronologically
    backups.sort();
    backups.reverse();

    let mut removed = 0;
    for old in backups.into_iter().skip(keep) {
        match std::fs::remove_file(&old) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to remove old backup {}: {}", old.display(), e),
        }
    }
    if removed > 0 {
        debug!("Pruned {} old backups", removed);
    }
    Ok(removed)
}

/// Start the single writer task. Records sent on the returned channel are
/// persisted in arrival order; the task ends when every sender is dropped.
pub fn spawn_recorder(store: Arc<UsageStore>) -> (UsageSender, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<UsageRecord>();

    let handle = tokio::task::spawn_blocking(move || {
        while let Some(record) = rx.blocking_recv() {
            if let Err(e) = store.record(&record) {
                error!(
                    "Failed to record usage for user {}: {}",
                    record.user_id, e
                );
            }
        }
        debug!("Usage recorder stopped");
    });

    (tx, handle)
}

/// Run a backup now and prune old copies
pub async fn run_backup(store: Arc<UsageStore>, dir: PathBuf, keep: usize) -> Result<PathBuf> {
    tokio::task::spawn_blocking(move || -> Result<PathBuf> {
        let path = store.backup(&dir)?;
        prune_backups(&dir, keep)?;
        Ok(path)
    })
    .await?
}

/// Periodic backups every `interval`, first one after one full interval
pub fn spawn_auto_backup(
    store: Arc<UsageStore>,
    dir: PathBuf,
    interval: Duration,
    keep: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        info!("Auto-backup every {:?} into {}", interval, dir.display());

        loop {
            ticker.tick().await;
            if let Err(e) = run_backup(Arc::clone(&store), dir.clone(), keep).await {
                error!("Auto-backup failed: {:#}", e);
            }
        }
    })
}
