//! File-backed local account metadata store.
//!
//! A JSON file holding one record per account -- the display cache the
//! engine consults between cloud round-trips. Loaded once at startup,
//! rewritten on every mutation. Never authoritative for cookie state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use roster_core::account_store::{AccountStore, LocalAccountRecord};
use roster_core::{AccountId, CoreError};

use crate::ConfigError;

/// JSON-file implementation of [`AccountStore`].
pub struct JsonAccountStore {
    path: PathBuf,
    records: Mutex<HashMap<AccountId, LocalAccountRecord>>,
}

impl JsonAccountStore {
    /// Load the store from `path`, starting empty if the file does not
    /// exist yet. A file that exists but cannot be parsed is an error --
    /// silently starting empty would orphan every known account.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();

        let records = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            let list: Vec<LocalAccountRecord> =
                serde_json::from_str(&contents).map_err(|e| ConfigError::StoreCorrupt {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            list.into_iter()
                .map(|r| (r.account_id.clone(), r))
                .collect()
        } else {
            HashMap::new()
        };

        debug!(path = %path.display(), accounts = records.len(), "account store loaded");
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    /// The file this store persists to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, records: &HashMap<AccountId, LocalAccountRecord>) -> Result<(), CoreError> {
        let mut list: Vec<&LocalAccountRecord> = records.values().collect();
        list.sort_by(|a, b| a.account_id.cmp(&b.account_id));

        let json = serde_json::to_string_pretty(&list).map_err(|e| CoreError::Internal(
            format!("account store serialization failed: {e}"),
        ))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        // Write-then-rename so a crash mid-write never truncates the
        // only copy of the metadata.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(io_error)?;
        std::fs::rename(&tmp, &self.path).map_err(io_error)?;
        Ok(())
    }
}

fn io_error(e: std::io::Error) -> CoreError {
    CoreError::OperationFailed {
        message: format!("account store write failed: {e}"),
    }
}

impl AccountStore for JsonAccountStore {
    fn get(&self, id: &AccountId) -> Option<LocalAccountRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn upsert(&self, record: LocalAccountRecord) -> Result<(), CoreError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.insert(record.account_id.clone(), record);
        self.persist(&records)
    }

    fn remove(&self, id: &AccountId) -> Result<(), CoreError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if records.remove(id).is_none() {
            return Ok(());
        }
        self.persist(&records)
    }

    fn all(&self) -> Vec<LocalAccountRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

// ── Tests ───────────────────────────────────────────────────────────
