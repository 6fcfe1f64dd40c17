// Wire types for the cloud API.
//
// These mirror the JSON the gateway actually sends. Optional everywhere the
// backend has historically omitted fields -- `roster-core` normalizes them
// into domain types, nothing downstream branches on raw payload shape.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Cookies ─────────────────────────────────────────────────────────

/// One cookie as exchanged with the cloud and the automation host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieItem {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub secure: Option<bool>,
    #[serde(default)]
    pub http_only: Option<bool>,
}

impl CookieItem {
    /// A bare name/value pair with the given domain.
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
            path: None,
            secure: None,
            http_only: None,
        }
    }
}

// ── Account info ────────────────────────────────────────────────────

/// Display and identity metadata for one account.
///
/// Kind-specific identifiers are optional: channels accounts carry
/// `finder_username`/`appuin`, shop accounts carry `shop_name`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub login_method: Option<String>,
    #[serde(default)]
    pub wechat_id: Option<String>,
    #[serde(default)]
    pub finder_username: Option<String>,
    #[serde(default)]
    pub appuin: Option<String>,
    #[serde(default)]
    pub shop_name: Option<String>,
}

// ── Status queries ──────────────────────────────────────────────────

/// The cloud's current record for one account.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStatus {
    /// Raw status string; normalized by `roster-core` (unknown → pending).
    #[serde(default)]
    pub cookie_status: Option<String>,
    #[serde(default)]
    pub last_check_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_valid_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cookie_updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cookie_expired_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub check_error_count: Option<u32>,
    #[serde(default)]
    pub account_info: Option<AccountInfo>,
    /// Landing URL derived for shop accounts, cached for the UI.
    #[serde(default)]
    pub channels_jump_url: Option<String>,
}

/// Result of a batch status query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatus {
    #[serde(default)]
    pub total: usize,
    #[serde(default)]
    pub found: usize,
    #[serde(default)]
    pub accounts: HashMap<String, AccountStatus>,
}

// ── Login flow ──────────────────────────────────────────────────────

/// A freshly minted login link bound to one account id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginLink {
    pub account_id: String,
    /// Shareable permanent-link URL.
    pub url: String,
    /// QR code for the permanent-link page (link flow).
    #[serde(default)]
    pub qr_code: Option<String>,
    /// Upstream login QR code URL (QR flow).
    #[serde(default)]
    pub login_qr_url: Option<String>,
}

/// Snapshot of a login attempt, as returned by the status poke.
///
/// The poll's response is logged only -- real state delivery always
/// happens via the push channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginState {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub scanned: bool,
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default)]
    pub expired: bool,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub login_method: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub cookies: Option<Vec<CookieItem>>,
    #[serde(default)]
    pub message: Option<String>,
}

// ── Cookie sync / registration ──────────────────────────────────────

/// The cloud's cookie payload for one account, pulled during
/// cloud→local sync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieBundle {
    #[serde(default)]
    pub cookies: Vec<CookieItem>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub login_method: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Outcome of an atomic validate+register call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub account_id: String,
    #[serde(default)]
    pub cookie_status: Option<String>,
    #[serde(default)]
    pub account_info: Option<AccountInfo>,
}

/// Outcome of an on-demand cookie validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    pub valid: bool,
    #[serde(default)]
    pub cookie_status: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Result of an orphan-link cleanup sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    #[serde(default)]
    pub deleted_count: usize,
}
