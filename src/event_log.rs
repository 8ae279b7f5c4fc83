//! Event Log - append-only record of 2PC phase transitions
//!
//! The event log is the durable history recovery relies on.
//! Every phase is appended BEFORE the matching RPC is dispatched.
//!
//! # Design Principles
//!
//! 1. **Append-Only**: records are never rewritten or removed
//! 2. **Total Order**: append sequence is the only ordering
//! 3. **Prefix Tolerant**: readers may observe a prefix of the eventual log;
//!    a torn trailing line in the file format is skipped

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core_types::{AccountId, Balance, TransactionId};
use crate::error::StorageError;

// ============================================================
// LOG RECORD FORMAT
// ============================================================

/// Phase tag of a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogPhase {
    Prepare,
    Commit,
    Abort,
    Recovered,
}

impl LogPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogPhase::Prepare => "prepare",
            LogPhase::Commit => "commit",
            LogPhase::Abort => "abort",
            LogPhase::Recovered => "recovered",
        }
    }
}

impl fmt::Display for LogPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One immutable fact about a phase transition
///
/// JSON shape: `{"state": "commit", "timestamp": ..., "account_id": "A",
/// "account_balance": "400", "error": null, "transaction_id": 3}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(rename = "state")]
    pub phase: LogPhase,
    pub timestamp: DateTime<Utc>,
    pub account_id: AccountId,
    #[serde(rename = "account_balance")]
    pub balance: Balance,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
}

impl LogRecord {
    pub fn new(phase: LogPhase, account_id: &str, balance: Balance) -> Self {
        Self {
            phase,
            timestamp: Utc::now(),
            account_id: account_id.to_string(),
            balance,
            error: None,
            transaction_id: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_transaction(mut self, transaction_id: TransactionId) -> Self {
        self.transaction_id = Some(transaction_id);
        self
    }
}

/// Commit records for one account, in log order
pub fn commits_for<'a>(
    records: &'a [LogRecord],
    account_id: &'a str,
) -> impl Iterator<Item = &'a LogRecord> + 'a {
    records
        .iter()
        .filter(move |r| r.phase == LogPhase::Commit && r.account_id == account_id)
}

// ============================================================
// EVENT LOG
// ============================================================

/// Append-only, globally readable list of log records
pub trait EventLog: Send + Sync {
    /// Append one record; returns once the record is durable
    fn append(&self, record: LogRecord) -> Result<(), StorageError>;

    /// Snapshot of all records in append order
    fn records(&self) -> Result<Vec<LogRecord>, StorageError>;
}

/// In-memory event log
#[derive(Default)]
pub struct MemoryEventLog {
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records appended so far
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventLog for MemoryEventLog {
    fn append(&self, record: LogRecord) -> Result<(), StorageError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        Ok(())
    }

    fn records(&self) -> Result<Vec<LogRecord>, StorageError> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

/// JSON-lines event log file
///
/// Opened in append mode; each record is one line written with a single
/// `write_all` and synced before `append` returns. Several nodes may point at
/// the same file to share one log.
pub struct FileEventLog {
    path: PathBuf,
    file: Mutex<File>,
    sync_on_append: bool,
}

impl FileEventLog {
    /// Open (or create) the log file
    ///
    /// Creates the parent directory if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            file: Mutex::new(file),
            sync_on_append: true,
        })
    }

    /// Skip the per-append fsync (tests, throwaway clusters)
    pub fn without_sync(mut self) -> Self {
        self.sync_on_append = false;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventLog for FileEventLog {
    fn append(&self, record: LogRecord) -> Result<(), StorageError> {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(&line)?;
        if self.sync_on_append {
            file.sync_data()?;
        }
        Ok(())
    }

    fn records(&self) -> Result<Vec<LogRecord>, StorageError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        let mut lines = BufReader::new(file).lines().peekable();
        while let Some(line) = lines.next() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogRecord>(&line) {
                Ok(record) => records.push(record),
                // A concurrent appender may be mid-write on the last line
                Err(e) if lines.peek().is_none() => {
                    warn!(path = %self.path.display(), error = %e, "Skipping torn trailing log line");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(records)
    }
}
