//! Ledger - per-account balance storage
//!
//! Each participant owns one account and is the only writer of its entry.
//! `FileLedger` keeps a JSON map on disk (write-through), `MemoryLedger` is
//! used by tests and simulations.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::core_types::{AccountId, Balance};
use crate::error::StorageError;

/// Balance storage keyed by account id
pub trait Ledger: Send + Sync {
    /// Current balance, `None` if the account was never initialized
    fn balance(&self, account: &str) -> Result<Option<Balance>, StorageError>;

    /// Overwrite the balance of an account
    fn set_balance(&self, account: &str, balance: Balance) -> Result<(), StorageError>;
}

/// In-memory ledger
#[derive(Default)]
pub struct MemoryLedger {
    balances: Mutex<BTreeMap<AccountId, Balance>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ledger pre-populated with one account
    pub fn with_account(account: &str, balance: Balance) -> Self {
        let ledger = Self::new();
        ledger
            .balances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(account.to_string(), balance);
        ledger
    }
}

impl Ledger for MemoryLedger {
    fn balance(&self, account: &str) -> Result<Option<Balance>, StorageError> {
        let balances = self.balances.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(balances.get(account).copied())
    }

    fn set_balance(&self, account: &str, balance: Balance) -> Result<(), StorageError> {
        self.balances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(account.to_string(), balance);
        Ok(())
    }
}

/// JSON-file ledger
///
/// The whole map is rewritten on every update through a temp file + rename,
/// so a crash leaves either the old or the new map on disk.
pub struct FileLedger {
    path: PathBuf,
    balances: Mutex<BTreeMap<AccountId, Balance>>,
}

impl FileLedger {
    /// Open (or create) the ledger file
    ///
    /// Creates the parent directory if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let balances = match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            balances: Mutex::new(balances),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, balances: &BTreeMap<AccountId, Balance>) -> Result<(), StorageError> {
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(balances)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl Ledger for FileLedger {
    fn balance(&self, account: &str) -> Result<Option<Balance>, StorageError> {
        let balances = self.balances.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(balances.get(account).copied())
    }

    fn set_balance(&self, account: &str, balance: Balance) -> Result<(), StorageError> {
        let mut balances = self.balances.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = balances.insert(account.to_string(), balance);
        if let Err(e) = self.persist(&balances) {
            // keep memory consistent with disk
            match previous {
                Some(old) => balances.insert(account.to_string(), old),
                None => balances.remove(account),
            };
            return Err(e);
        }
        Ok(())
    }
}
