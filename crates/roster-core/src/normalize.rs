//! Push-event normalization.
//!
//! Converts a possibly-partial [`PushEvent`] into one canonical
//! [`CachedStatus`], filling gaps from the previous cache entry. Pure
//! functions only: the monitor owns execution of the side effects a
//! transition implies, this module just computes what they are.

use chrono::{DateTime, Utc};
use roster_api::PushEvent;

use crate::model::{AccountInfo, CachedStatus, CookieStatus, LoginMethod};

// ── Normalization ───────────────────────────────────────────────────

/// Merge a push event over the previous cache entry.
///
/// Field rules:
/// - status: unknown strings collapse to `pending`;
/// - `account_info`: event's full object > reconstruction from the
///   event's loose fields > previous entry -- an identity observed once
///   is never lost;
/// - timestamps: event value > previous value (> `now` where a value is
///   mandatory), never regressed to absent once observed.
pub fn normalize(
    event: &PushEvent,
    previous: Option<&CachedStatus>,
    now: DateTime<Utc>,
) -> CachedStatus {
    let cookie_status = CookieStatus::normalize(event.cookie_status.as_deref());

    let account_info = event
        .account_info
        .as_ref()
        .map(AccountInfo::from)
        .or_else(|| loose_account_info(event))
        .or_else(|| previous.and_then(|p| p.account_info.clone()));

    CachedStatus {
        cookie_status,
        last_check_time: event.last_check_time.unwrap_or(now),
        last_valid_time: event.last_valid_time.or_else(|| {
            if cookie_status == CookieStatus::Online {
                Some(now)
            } else {
                previous.and_then(|p| p.last_valid_time)
            }
        }),
        cookie_updated_at: event
            .cookie_updated_at
            .or_else(|| previous.and_then(|p| p.cookie_updated_at)),
        cookie_expired_at: event
            .cookie_expired_at
            .or_else(|| previous.and_then(|p| p.cookie_expired_at)),
        check_error_count: event
            .check_error_count
            .or_else(|| previous.map(|p| p.check_error_count))
            .unwrap_or(0),
        account_info,
        channels_jump_url: event
            .channels_jump_url
            .clone()
            .or_else(|| previous.and_then(|p| p.channels_jump_url.clone())),
        cached_at: now,
    }
}

/// Rebuild an identity from the event's loose fields (older payload
/// versions sent nickname/avatar/loginMethod at the top level).
fn loose_account_info(event: &PushEvent) -> Option<AccountInfo> {
    let nickname = event.nickname.as_deref().filter(|n| !n.is_empty())?;
    Some(AccountInfo {
        nickname: nickname.to_owned(),
        avatar: event.avatar.clone().unwrap_or_default(),
        login_method: LoginMethod::from_wire(event.login_method.as_deref()),
        ..AccountInfo::default()
    })
}

// ── Side-effect planning ────────────────────────────────────────────

/// The bounded set of side effects a state transition implies.
///
/// Each is independently idempotent; the executor never blocks the
/// cache write on any of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SideEffectPlan {
    /// Rename the local profile to this nickname (changed).
    pub rename_to: Option<String>,
    /// The account transitioned into `online`: enqueue a recovery sync.
    pub recovered: bool,
    /// The account transitioned `online → offline`: close the local
    /// session and buffer an expiry notification.
    pub went_offline: bool,
}

/// Outcome of executing a [`SideEffectPlan`]. `None` means the effect
/// was not attempted; `Some(false)` means it was attempted and failed
/// (best-effort -- the cache write stands regardless).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SideEffectReport {
    pub renamed: Option<bool>,
    pub recovery_queued: bool,
    pub closed: Option<bool>,
    pub expiry_buffered: bool,
}

/// Diff the normalized entry against the previous one.
pub fn plan_side_effects(
    normalized: &CachedStatus,
    previous: Option<&CachedStatus>,
) -> SideEffectPlan {
    let old_status = previous.map(|p| p.cookie_status);
    let old_nickname = previous.and_then(|p| p.nickname());
    let new_nickname = normalized.nickname();

    SideEffectPlan {
        rename_to: new_nickname
            .filter(|n| Some(*n) != old_nickname)
            .map(str::to_owned),
        recovered: normalized.cookie_status == CookieStatus::Online
            && old_status != Some(CookieStatus::Online),
        went_offline: normalized.cookie_status == CookieStatus::Offline
            && old_status == Some(CookieStatus::Online),
    }
}

// ── Tests ───────────────────────────────────────────────────────────
