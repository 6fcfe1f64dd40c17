// ── Reactive status store ──
//
// Thread-safe storage for the per-account status cache. Mutations are
// broadcast to subscribers via a `watch` channel carrying a full
// snapshot; batch rewrites rebuild that snapshot exactly once so a
// reconciliation pass never spams observers with N notifications.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

use crate::model::{AccountId, CachedStatus, CookieStatus, StatusSummary};

/// The authoritative in-memory cache: `AccountId → Arc<CachedStatus>`.
///
/// Entries are immutable snapshots -- a mutation inserts a new `Arc`,
/// it never edits in place, so readers always observe a consistent
/// value. Writes are last-write-wins; `cached_at` records freshness.
pub struct StatusStore {
    entries: DashMap<AccountId, Arc<CachedStatus>>,

    /// Version counter, bumped on every mutation.
    version: watch::Sender<u64>,

    /// Full snapshot, rebuilt on mutation for efficient subscription.
    snapshot: watch::Sender<Arc<Vec<(AccountId, Arc<CachedStatus>)>>>,
}

impl StatusStore {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0u64);
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));

        Self {
            entries: DashMap::new(),
            version,
            snapshot,
        }
    }

    /// Insert or replace one entry. Returns `true` if the id was new.
    pub fn upsert(&self, id: AccountId, status: CachedStatus) -> bool {
        let is_new = !self.entries.contains_key(&id);
        self.entries.insert(id, Arc::new(status));
        self.rebuild_snapshot();
        self.bump_version();
        is_new
    }

    /// Remove one entry, returning it if it existed.
    pub fn remove(&self, id: &AccountId) -> Option<Arc<CachedStatus>> {
        let removed = self.entries.remove(id).map(|(_, v)| v);
        if removed.is_some() {
            self.rebuild_snapshot();
            self.bump_version();
        }
        removed
    }

    /// Apply a batch of upserts and removals as one swap.
    ///
    /// Used by the reconciliation pass: observers receive exactly one
    /// snapshot rebuild no matter how many accounts changed.
    pub fn apply_batch(
        &self,
        updates: Vec<(AccountId, CachedStatus)>,
        removals: &[AccountId],
    ) {
        for (id, status) in updates {
            self.entries.insert(id, Arc::new(status));
        }
        for id in removals {
            self.entries.remove(id);
        }
        self.rebuild_snapshot();
        self.bump_version();
    }

    pub fn get(&self, id: &AccountId) -> Option<Arc<CachedStatus>> {
        self.entries.get(id).map(|r| Arc::clone(r.value()))
    }

    pub fn contains(&self, id: &AccountId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All currently tracked account ids.
    pub fn ids(&self) -> Vec<AccountId> {
        self.entries.iter().map(|r| r.key().clone()).collect()
    }

    /// Get the current snapshot (cheap `Arc` clone).
    pub fn snapshot(&self) -> Arc<Vec<(AccountId, Arc<CachedStatus>)>> {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<(AccountId, Arc<CachedStatus>)>>> {
        self.snapshot.subscribe()
    }

    /// Aggregate counts over the whole cache.
    pub fn summary(&self) -> StatusSummary {
        let mut summary = StatusSummary::default();
        for entry in &self.entries {
            summary.total += 1;
            match entry.value().cookie_status {
                CookieStatus::Online => summary.online += 1,
                CookieStatus::Offline => summary.offline += 1,
                CookieStatus::Checking => summary.checking += 1,
                CookieStatus::Pending => summary.pending += 1,
            }
        }
        summary
    }

    // ── Private helpers ─────────────────────────────────────────────

    fn rebuild_snapshot(&self) {
        let values: Vec<(AccountId, Arc<CachedStatus>)> = self
            .entries
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect();
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }

    fn bump_version(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}

impl Default for StatusStore {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ───────────────────────────────────────────────────────────
