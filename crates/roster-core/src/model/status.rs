// ── Status projection types ──
//
// CachedStatus is the engine's authoritative in-memory view of one
// account. It is an immutable snapshot: mutations always build a new
// value (through the normalizer or a cloud conversion) and swap whole
// `Arc`s, so observers never see a half-applied update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::account::{AccountId, AccountInfo, LoginMethod};

// ── CookieStatus ────────────────────────────────────────────────────

/// Session validity state for one account, as judged by the cloud.
///
/// `pending → checking → {online, offline}`, with free movement between
/// `online` and `offline` afterwards. No terminal state.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CookieStatus {
    /// Not logged in yet, or status unknown.
    #[default]
    Pending,
    /// A validity check is in flight upstream.
    Checking,
    /// Session cookies are valid.
    Online,
    /// Session cookies were rejected upstream.
    Offline,
}

impl CookieStatus {
    /// Normalize a raw wire status. Absent or unrecognized strings map
    /// to [`Pending`](Self::Pending) -- an unknown status is never
    /// propagated into the cache.
    pub fn normalize(raw: Option<&str>) -> Self {
        match raw.map(str::to_ascii_lowercase).as_deref() {
            Some("online") => Self::Online,
            Some("offline") => Self::Offline,
            Some("checking") => Self::Checking,
            _ => Self::Pending,
        }
    }
}

// ── CachedStatus ────────────────────────────────────────────────────

/// The cached projection of one account's cloud record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedStatus {
    pub cookie_status: CookieStatus,
    pub last_check_time: DateTime<Utc>,
    pub last_valid_time: Option<DateTime<Utc>>,
    pub cookie_updated_at: Option<DateTime<Utc>>,
    pub cookie_expired_at: Option<DateTime<Utc>>,
    pub check_error_count: u32,
    pub account_info: Option<AccountInfo>,
    /// Landing URL derived for shop accounts, cached for the UI.
    pub channels_jump_url: Option<String>,
    /// When this snapshot was written. Freshness only -- the cache write
    /// path is last-write-wins and does not compare event timestamps.
    pub cached_at: DateTime<Utc>,
}

impl CachedStatus {
    /// A fresh placeholder for a just-subscribed account.
    pub fn pending(now: DateTime<Utc>) -> Self {
        Self {
            cookie_status: CookieStatus::Pending,
            last_check_time: now,
            last_valid_time: None,
            cookie_updated_at: None,
            cookie_expired_at: None,
            check_error_count: 0,
            account_info: None,
            channels_jump_url: None,
            cached_at: now,
        }
    }

    /// Project a cloud record into a cache entry.
    pub fn from_cloud(status: &roster_api::AccountStatus, now: DateTime<Utc>) -> Self {
        let cookie_status = CookieStatus::normalize(status.cookie_status.as_deref());
        Self {
            cookie_status,
            last_check_time: status.last_check_time.unwrap_or(now),
            last_valid_time: status.last_valid_time.or_else(|| {
                (cookie_status == CookieStatus::Online).then_some(now)
            }),
            cookie_updated_at: status.cookie_updated_at,
            cookie_expired_at: status.cookie_expired_at,
            check_error_count: status.check_error_count.unwrap_or(0),
            account_info: status.account_info.as_ref().map(AccountInfo::from),
            channels_jump_url: status.channels_jump_url.clone(),
            cached_at: now,
        }
    }

    /// The display name, if one has ever been observed.
    pub fn nickname(&self) -> Option<&str> {
        self.account_info
            .as_ref()
            .map(|info| info.nickname.as_str())
            .filter(|n| !n.is_empty())
    }

    pub fn login_method(&self) -> LoginMethod {
        self.account_info
            .as_ref()
            .map(|info| info.login_method)
            .unwrap_or_default()
    }

    /// Cache age relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.cached_at
    }
}

// ── StatusSummary ───────────────────────────────────────────────────

/// Aggregate counts over the whole cache, for dashboards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
    pub checking: usize,
    pub pending: usize,
    pub last_sync_time: Option<DateTime<Utc>>,
}

// ── MonitorEvent ────────────────────────────────────────────────────

/// User-facing notifications emitted by the status monitor.
///
/// Only expiry transitions and removals surface here; transient
/// reconciliation failures are logged and retried on the next pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    /// One account's cache entry was replaced.
    StatusChanged { account_id: AccountId },
    /// A debounced batch of accounts went offline. One event per burst.
    AccountsExpired { names: Vec<String> },
    /// An account was confirmed gone from the cloud and deregistered.
    AccountRemoved { account_id: AccountId },
}

// ── Tests ───────────────────────────────────────────────────────────
