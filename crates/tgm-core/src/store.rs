use std::{
    ffi::OsString,
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{Error, Result};

/// One persisted message record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: Uuid,
    pub channel: String,
    #[serde(rename = "channelId")]
    pub channel_id: String,
    pub sender: String,
    pub message: String,
    pub keywords: Vec<String>,
    pub time: DateTime<Utc>,
    #[serde(rename = "messageId")]
    pub message_id: i64,
    pub alerted: bool,
    pub ai_analyzed: bool,
    #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Durable store for log records.
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn insert(&self, record: &LogRecord) -> Result<()>;
}

/// Locks older than this are assumed to belong to a crashed writer.
pub const STALE_LOCK_AFTER: Duration = Duration::from_secs(30);

/// Append-only JSON-lines store guarded by a sibling `<path>.lock` file.
///
/// The lock is shared with any other process writing the same file; when it
/// is held, `insert` fails with [`Error::ResourceBusy`] so callers can retry.
#[derive(Clone, Debug)]
pub struct JsonlLogStore {
    path: PathBuf,
    stale_lock_after: Duration,
}

impl JsonlLogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stale_lock_after: STALE_LOCK_AFTER,
        }
    }

    pub fn with_stale_lock_after(mut self, after: Duration) -> Self {
        self.stale_lock_after = after;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> PathBuf {
        lock_path_for(&self.path)
    }

    fn append_blocking(&self, line: &str) -> Result<()> {
        // The lock file lives next to the log, so the directory comes first.
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let _lock = LockFile::acquire(&self.lock_path(), self.stale_lock_after)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

#[async_trait]
impl LogStore for JsonlLogStore {
    async fn insert(&self, record: &LogRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.append_blocking(&line))
            .await
            .map_err(|e| Error::External(format!("log store task failed: {e}")))?
    }
}

pub(crate) fn lock_path_for(path: &Path) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(".lock");
    PathBuf::from(s)
}

/// Exclusive lock file, removed on drop.
struct LockFile {
    path: PathBuf,
}

impl LockFile {
    fn acquire(path: &Path, stale_after: Duration) -> Result<Self> {
        match Self::create(path) {
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if is_stale(path, stale_after) {
                    warn!(lock = %path.display(), "removing stale lock file");
                    let _ = fs::remove_file(path);
                    return Self::create(path).map_err(|e| busy_or_io(path, e));
                }
                Err(busy_or_io(path, e))
            }
            other => other.map_err(Error::from),
        }
    }

    fn create(path: &Path) -> io::Result<Self> {
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            debug!(lock = %self.path.display(), error = %e, "failed to remove lock file");
        }
    }
}

fn busy_or_io(path: &Path, e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::AlreadyExists {
        Error::ResourceBusy {
            resource: path.display().to_string(),
        }
    } else {
        Error::Io(e)
    }
}

fn is_stale(path: &Path, stale_after: Duration) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.elapsed().ok())
        .is_some_and(|age| age > stale_after)
}
