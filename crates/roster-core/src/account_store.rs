//! Local account metadata seam.
//!
//! Persisted configuration is an external collaborator: core only sees
//! this trait. Records are a display cache (who is this profile, when
//! did we last sync it) -- never authoritative for cookie state.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::{AccountId, AccountInfo, LoginMethod};

/// Minimal persisted metadata for one registered account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalAccountRecord {
    pub account_id: AccountId,
    pub account_info: AccountInfo,
    pub login_method: LoginMethod,
    pub login_time: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_sync_time: Option<DateTime<Utc>>,
}

impl LocalAccountRecord {
    /// A freshly synced record stamped `now`.
    pub fn synced_now(
        account_id: AccountId,
        account_info: AccountInfo,
        login_method: LoginMethod,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            account_id,
            account_info,
            login_method,
            login_time: now,
            updated_at: now,
            last_sync_time: Some(now),
        }
    }
}

/// Storage seam for [`LocalAccountRecord`]s.
pub trait AccountStore: Send + Sync {
    fn get(&self, id: &AccountId) -> Option<LocalAccountRecord>;
    fn upsert(&self, record: LocalAccountRecord) -> Result<(), CoreError>;
    fn remove(&self, id: &AccountId) -> Result<(), CoreError>;
    fn all(&self) -> Vec<LocalAccountRecord>;
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryAccountStore {
    records: DashMap<AccountId, LocalAccountRecord>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AccountStore for MemoryAccountStore {
    fn get(&self, id: &AccountId) -> Option<LocalAccountRecord> {
        self.records.get(id).map(|r| r.value().clone())
    }

    fn upsert(&self, record: LocalAccountRecord) -> Result<(), CoreError> {
        self.records.insert(record.account_id.clone(), record);
        Ok(())
    }

    fn remove(&self, id: &AccountId) -> Result<(), CoreError> {
        self.records.remove(id);
        Ok(())
    }

    fn all(&self) -> Vec<LocalAccountRecord> {
        self.records.iter().map(|r| r.value().clone()).collect()
    }
}

// ── Tests ───────────────────────────────────────────────────────────
