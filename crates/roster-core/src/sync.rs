//! Bidirectional account sync engine.
//!
//! For one account, decides whether local data, cloud data, or neither
//! needs to be propagated, then does it. The cloud is the tie-breaking
//! source of truth: whenever both sides hold cookies and they differ,
//! the cloud copy wins.
//!
//! Every entry into [`SyncEngine::sync_single`] is guarded by a keyed
//! single-flight: a second call for the same account while one is in
//! flight awaits and returns the same result rather than starting a
//! duplicate operation.
//!
//! Failures never cross this boundary as errors -- callers always get a
//! structured [`SyncResult`].

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use roster_api::{AccountStatus, CloudClient, CookieBundle, CookieItem, HostClient};

use crate::account_store::{AccountStore, LocalAccountRecord};
use crate::cookies;
use crate::model::{AccountId, AccountInfo, LoginMethod};
use crate::ratelimit::RateLimiter;
use crate::singleflight::SingleFlight;

// ── Results ─────────────────────────────────────────────────────────

/// Which direction a sync resolved to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SyncAction {
    CloudToLocal,
    LocalToCloud,
    Skip,
    Delete,
}

/// Structured outcome of one `sync_single` invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub success: bool,
    pub action: Option<SyncAction>,
    pub message: Option<String>,
    pub account_info: Option<AccountInfo>,
}

impl SyncResult {
    fn done(action: SyncAction, info: Option<AccountInfo>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            action: Some(action),
            message: Some(message.into()),
            account_info: info,
        }
    }

    fn skip(message: impl Into<String>) -> Self {
        Self::done(SyncAction::Skip, None, message)
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            action: None,
            message: Some(message.into()),
            account_info: None,
        }
    }
}

/// One synced account in a full-sync report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedAccount {
    pub account_id: AccountId,
    pub nickname: String,
    pub action: SyncAction,
}

/// Aggregate outcome of a reconciliation sweep over all profiles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullSyncReport {
    pub total: usize,
    pub cloud_to_local: usize,
    pub local_to_cloud: usize,
    pub skipped: usize,
    pub failed: usize,
    pub synced: Vec<SyncedAccount>,
}

/// Aggregate outcome of a batch nickname sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameSyncReport {
    pub total: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

// ── SyncEngine ──────────────────────────────────────────────────────

/// The bidirectional state-matrix sync engine.
///
/// Cheaply cloneable; all clones share the per-account single-flight
/// guard.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<SyncInner>,
}

struct SyncInner {
    cloud: Arc<CloudClient>,
    host: Arc<HostClient>,
    accounts: Arc<dyn AccountStore>,
    limiter: Arc<RateLimiter>,
    flights: SingleFlight<AccountId, SyncResult>,
}

impl SyncEngine {
    pub fn new(
        cloud: Arc<CloudClient>,
        host: Arc<HostClient>,
        accounts: Arc<dyn AccountStore>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                cloud,
                host,
                accounts,
                limiter,
                flights: SingleFlight::new(),
            }),
        }
    }

    /// Reconcile one account between local profile and cloud record.
    ///
    /// Decision matrix (local cookie, cloud record, cloud cookie):
    ///
    /// | local | record | cookie | action                        |
    /// |-------|--------|--------|-------------------------------|
    /// | no    | no     | -      | register placeholder          |
    /// | no    | yes    | no     | skip (waiting for push)       |
    /// | no    | yes    | yes    | cloud → local                 |
    /// | yes   | no     | -      | local → cloud (register)      |
    /// | yes   | yes    | no     | local → cloud (update)        |
    /// | yes   | yes    | yes    | compare; cloud wins on drift  |
    ///
    /// `force` skips the comparison in the last row and pulls
    /// unconditionally.
    pub async fn sync_single(&self, account_id: &AccountId, force: bool) -> SyncResult {
        let inner = Arc::clone(&self.inner);
        let id = account_id.clone();
        self.inner
            .flights
            .run(account_id.clone(), move || async move {
                sync_single_inner(&inner, &id, force).await
            })
            .await
    }

    /// Reconcile every profile the host knows about, serially.
    pub async fn full_sync(&self, created_by: Option<&str>) -> FullSyncReport {
        let mut report = FullSyncReport::default();

        let page = match self
            .inner
            .limiter
            .run(|| self.inner.host.list_profiles(0, 1000, created_by))
            .await
        {
            Ok(page) => page,
            Err(e) => {
                warn!(error = %e, "full sync aborted: cannot list profiles");
                return report;
            }
        };

        report.total = page.list.len();

        for profile in page.list {
            let id = AccountId::from(profile.id.as_str());
            let result = self.sync_single(&id, false).await;

            if !result.success {
                report.failed += 1;
                continue;
            }

            match result.action {
                Some(SyncAction::CloudToLocal) => {
                    report.cloud_to_local += 1;
                    report.synced.push(SyncedAccount {
                        account_id: id,
                        nickname: result
                            .account_info
                            .map(|i| i.nickname)
                            .unwrap_or(profile.name),
                        action: SyncAction::CloudToLocal,
                    });
                }
                Some(SyncAction::LocalToCloud) => {
                    report.local_to_cloud += 1;
                    report.synced.push(SyncedAccount {
                        account_id: id,
                        nickname: result
                            .account_info
                            .map(|i| i.nickname)
                            .unwrap_or(profile.name),
                        action: SyncAction::LocalToCloud,
                    });
                }
                _ => report.skipped += 1,
            }
        }

        info!(
            total = report.total,
            cloud_to_local = report.cloud_to_local,
            local_to_cloud = report.local_to_cloud,
            skipped = report.skipped,
            failed = report.failed,
            "full sync complete"
        );
        report
    }

    /// Batch-compare cloud nicknames against local profile names and
    /// rename only the mismatches.
    pub async fn sync_profile_names_from_cloud(&self, account_ids: &[AccountId]) -> NameSyncReport {
        let mut report = NameSyncReport {
            total: account_ids.len(),
            ..NameSyncReport::default()
        };

        if account_ids.is_empty() {
            return report;
        }

        let ids: Vec<String> = account_ids.iter().map(|id| id.as_str().to_owned()).collect();
        let batch = match self.inner.cloud.batch_check_status(&ids).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, "name sync aborted: batch status failed");
                report.failed = report.total;
                return report;
            }
        };

        let profiles = match self
            .inner
            .limiter
            .run(|| self.inner.host.list_profiles(0, 1000, None))
            .await
        {
            Ok(page) => page.list,
            Err(e) => {
                warn!(error = %e, "name sync aborted: cannot list profiles");
                report.failed = report.total;
                return report;
            }
        };

        for id in account_ids {
            let cloud_nickname = batch
                .accounts
                .get(id.as_str())
                .and_then(|s| s.account_info.as_ref())
                .map(|info| info.nickname.as_str())
                .filter(|n| !n.is_empty());
            let local = profiles.iter().find(|p| p.id == id.as_str());

            let (Some(nickname), Some(profile)) = (cloud_nickname, local) else {
                report.skipped += 1;
                continue;
            };

            if profile.name == nickname {
                report.skipped += 1;
                continue;
            }

            match self
                .inner
                .limiter
                .run(|| self.inner.host.rename_profile(id.as_str(), nickname))
                .await
            {
                Ok(()) => {
                    debug!(account = %id, from = %profile.name, to = %nickname, "profile renamed");
                    report.updated += 1;
                }
                Err(e) => {
                    warn!(account = %id, error = %e, "profile rename failed");
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Remove an account everywhere: local metadata and cloud record.
    pub async fn delete_account(&self, account_id: &AccountId) -> bool {
        if let Err(e) = self.inner.accounts.remove(account_id) {
            warn!(account = %account_id, error = %e, "local metadata removal failed");
        }

        match self
            .inner
            .cloud
            .delete_link_by_profile(account_id.as_str())
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(account = %account_id, error = %e, "cloud record deletion failed");
                false
            }
        }
    }
}

// ── Decision matrix ─────────────────────────────────────────────────

async fn sync_single_inner(inner: &SyncInner, id: &AccountId, force: bool) -> SyncResult {
    // Local side: read the profile's cookies. Host hiccups degrade to
    // "no local cookie" (matching the next pass retry policy) but are
    // logged loudly.
    let local_cookies = match inner
        .limiter
        .run(|| inner.host.read_cookies(id.as_str()))
        .await
    {
        Ok(cookies) => cookies,
        Err(e) => {
            warn!(account = %id, error = %e, "local cookie read failed, treating as empty");
            Vec::new()
        }
    };
    let has_local = !local_cookies.is_empty();

    // Cloud side: a transient failure here aborts the decision -- guessing
    // "no record" could mint a duplicate registration.
    let cloud_status = match inner.cloud.check_account_status(id.as_str()).await {
        Ok(status) => status,
        Err(e) => {
            warn!(account = %id, error = %e, "cloud status query failed");
            return SyncResult::failed(format!("cloud status query failed: {e}"));
        }
    };

    let has_cloud_cookie = cloud_status.as_ref().is_some_and(cloud_has_cookie);

    match (has_local, &cloud_status, has_cloud_cookie) {
        // Nothing anywhere: park a placeholder so an operator can
        // complete login later.
        (false, None, _) => register_placeholder(inner, id).await,

        (false, Some(_), false) => SyncResult::skip("waiting for cloud cookie push"),

        (false, Some(status), true) => pull_cloud_to_local(inner, id, status).await,

        (true, None, _) => push_local_to_cloud(inner, id, &local_cookies, false).await,

        (true, Some(_), false) => push_local_to_cloud(inner, id, &local_cookies, true).await,

        (true, Some(status), true) => {
            if force {
                return pull_cloud_to_local(inner, id, status).await;
            }

            match inner.cloud.sync_cookie_from_cloud(id.as_str()).await {
                Ok(bundle) => {
                    let local = cookies::canonical_cookie_string(&local_cookies);
                    let cloud = cookies::canonical_cookie_string(&bundle.cookies);
                    if local == cloud {
                        SyncResult::skip("cookies already match")
                    } else {
                        apply_cloud_bundle(inner, id, &bundle, cloud_status.as_ref()).await
                    }
                }
                // Comparison failure: favor a consistent cookie over
                // risking staleness -- pull.
                Err(e) => {
                    warn!(account = %id, error = %e, "cookie comparison failed, pulling from cloud");
                    pull_cloud_to_local(inner, id, status).await
                }
            }
        }
    }
}

/// The cloud "has a cookie" when the record is online, or when it
/// carries a verified identity (older records predate the status field).
fn cloud_has_cookie(status: &AccountStatus) -> bool {
    if status.cookie_status.as_deref() == Some("online") {
        return true;
    }
    status
        .account_info
        .as_ref()
        .is_some_and(|info| !info.nickname.is_empty() && info.login_method.is_some())
}

// ── Case 1: placeholder registration ────────────────────────────────

async fn register_placeholder(inner: &SyncInner, id: &AccountId) -> SyncResult {
    match inner
        .cloud
        .register_account(id.as_str(), &[], LoginMethod::default().as_wire_str(), None)
        .await
    {
        Ok(()) => {
            info!(account = %id, "registered bare cloud placeholder");
            SyncResult::done(
                SyncAction::LocalToCloud,
                None,
                "registered placeholder, waiting for login",
            )
        }
        Err(e) => {
            debug!(account = %id, error = %e, "placeholder registration failed");
            SyncResult::skip("waiting for login")
        }
    }
}

// ── Cloud → local ───────────────────────────────────────────────────

async fn pull_cloud_to_local(
    inner: &SyncInner,
    id: &AccountId,
    status: &AccountStatus,
) -> SyncResult {
    let bundle = match inner.cloud.sync_cookie_from_cloud(id.as_str()).await {
        Ok(bundle) => bundle,
        Err(e) => return SyncResult::failed(format!("cloud cookie fetch failed: {e}")),
    };
    apply_cloud_bundle(inner, id, &bundle, Some(status)).await
}

async fn apply_cloud_bundle(
    inner: &SyncInner,
    id: &AccountId,
    bundle: &CookieBundle,
    status: Option<&AccountStatus>,
) -> SyncResult {
    if bundle.cookies.is_empty() {
        return SyncResult::failed("cloud cookie payload is empty");
    }

    if let Err(e) = inner
        .limiter
        .run(|| inner.host.write_cookies(id.as_str(), &bundle.cookies))
        .await
    {
        return SyncResult::failed(format!("local cookie write failed: {e}"));
    }

    let status_info = status.and_then(|s| s.account_info.as_ref());
    let login_method = LoginMethod::from_wire(
        bundle
            .login_method
            .as_deref()
            .or_else(|| status_info.and_then(|i| i.login_method.as_deref())),
    );

    let mut info = status_info.map(AccountInfo::from).unwrap_or_default();
    if let Some(nickname) = bundle.nickname.as_deref().filter(|n| !n.is_empty()) {
        info.nickname = nickname.to_owned();
    }
    if let Some(avatar) = bundle.avatar.as_deref().filter(|a| !a.is_empty()) {
        info.avatar = avatar.to_owned();
    }
    info.login_method = login_method;

    let record = LocalAccountRecord::synced_now(id.clone(), info.clone(), login_method, Utc::now());
    if let Err(e) = inner.accounts.upsert(record) {
        warn!(account = %id, error = %e, "local metadata save failed");
    }

    info!(account = %id, nickname = %info.nickname, "cloud → local sync complete");
    SyncResult::done(SyncAction::CloudToLocal, Some(info), "cloud → local sync complete")
}

// ── Local → cloud ───────────────────────────────────────────────────

async fn push_local_to_cloud(
    inner: &SyncInner,
    id: &AccountId,
    local_cookies: &[CookieItem],
    is_update: bool,
) -> SyncResult {
    let login_method = cookies::detect_login_method(local_cookies);
    let formatted = cookies::format_for_cloud(local_cookies);

    let registration = match inner
        .cloud
        .auto_register_account(id.as_str(), &formatted, login_method.as_wire_str(), None)
        .await
    {
        Ok(reg) => reg,
        Err(e) => return SyncResult::failed(format!("cloud registration failed: {e}")),
    };

    let mut info = registration
        .account_info
        .as_ref()
        .map(AccountInfo::from)
        .unwrap_or_default();
    info.login_method = login_method;

    let record = LocalAccountRecord::synced_now(id.clone(), info.clone(), login_method, Utc::now());
    if let Err(e) = inner.accounts.upsert(record) {
        warn!(account = %id, error = %e, "local metadata save failed");
    }

    let message = if is_update {
        "local → cloud update complete"
    } else {
        "local → cloud registration complete"
    };
    info!(account = %id, nickname = %info.nickname, update = is_update, "{message}");
    SyncResult::done(SyncAction::LocalToCloud, Some(info), message)
}
