// ── Account creation orchestrator ──
//
// Drives the multi-account onboarding flow: up to ten per-account state
// machines, each completing via push-channel events. Two flows:
//
// - QR: a temporary *virtual* id is minted locally, the cloud binds a
//   login QR to it, and on confirmation the virtual id is migrated to a
//   freshly created real profile id.
// - Permanent link: the real profile is created up front (empty cookie)
//   and the link is bound to it directly -- no migration.
//
// The per-account poll is a poke: it prompts the cloud to re-check the
// login upstream and write the result to the record. Its response is
// logged only; actual state delivery always arrives via the push
// channel. Wiring the poll response into the state machine would
// double-write what the push already delivered.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use roster_api::{CloudClient, CookieItem, HostClient, ProfileSpec, PushEvent, PushHandler};

use crate::account_store::{AccountStore, LocalAccountRecord};
use crate::config::EngineConfig;
use crate::cookies;
use crate::error::CoreError;
use crate::model::{AccountId, AccountInfo, LoginMethod};
use crate::monitor::StatusMonitor;
use crate::ratelimit::RateLimiter;

// ── State machine ───────────────────────────────────────────────────

/// Per-account onboarding state.
///
/// `Config → QrReady → WaitingScan → {Scanned → Confirmed |
/// Failed(expired)} → Creating → {Success | Failed}`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CreateState {
    #[default]
    Config,
    QrReady,
    WaitingScan,
    Scanned,
    Confirmed,
    Creating,
    Success,
    Failed,
}

impl CreateState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

/// Which login flow an account uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginWay {
    QrCode,
    #[default]
    PermanentLink,
}

impl LoginWay {
    fn as_wire_str(self) -> &'static str {
        match self {
            Self::QrCode => "qr_code",
            Self::PermanentLink => "permanent_link",
        }
    }
}

/// Operator-chosen options for one onboarding slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateConfig {
    pub login_method: LoginMethod,
    pub login_way: LoginWay,
    pub group_id: Option<String>,
    pub remark: Option<String>,
    pub proxy: Option<String>,
}

impl CreateConfig {
    fn profile_spec(&self) -> ProfileSpec {
        ProfileSpec {
            name: None,
            group_id: self.group_id.clone(),
            remark: self.remark.clone(),
            proxy: self.proxy.clone(),
        }
    }
}

/// One onboarding slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateItem {
    pub index: usize,
    pub config: CreateConfig,
    pub state: CreateState,
    pub progress: u8,
    pub error: Option<String>,

    /// Virtual during the QR flow until migration, real afterwards.
    pub account_id: Option<AccountId>,
    pub is_virtual: bool,

    pub qr_url: Option<String>,
    pub permanent_link: Option<String>,
    pub link_qr_code: Option<String>,

    pub account_info: Option<AccountInfo>,
    pub cookies: Vec<CookieItem>,
}

impl CreateItem {
    fn new(index: usize, config: CreateConfig) -> Self {
        Self {
            index,
            config,
            ..Self::default()
        }
    }

    fn fail(&mut self, message: impl Into<String>) {
        self.state = CreateState::Failed;
        self.error = Some(message.into());
    }

    fn reset(&mut self) {
        let config = self.config.clone();
        let index = self.index;
        *self = Self::new(index, config);
    }
}

/// Which page of the flow the operator is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnboardStep {
    Configure,
    Login,
    Done,
}

// ── OnboardingSession ───────────────────────────────────────────────

/// One multi-account onboarding session.
#[derive(Clone)]
pub struct OnboardingSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    poll_interval: std::time::Duration,
    stagger: std::time::Duration,
    max_accounts: usize,

    cloud: Arc<CloudClient>,
    host: Arc<HostClient>,
    limiter: Arc<RateLimiter>,
    monitor: StatusMonitor,
    accounts: Arc<dyn AccountStore>,

    items: Mutex<Vec<CreateItem>>,
    step: AtomicUsize,

    /// Ids whose "login completed" delivery has already been handled.
    /// Makes the virtual→real migration idempotent against the push
    /// channel's at-least-once delivery.
    processed: DashSet<AccountId>,

    /// Active poke-polls, keyed by the id they were started for.
    polls: DashMap<AccountId, CancellationToken>,

    event_tx: mpsc::UnboundedSender<Arc<PushEvent>>,
    event_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<Arc<PushEvent>>>>,
    cancel: CancellationToken,
}

impl OnboardingSession {
    pub fn new(
        config: &EngineConfig,
        cloud: Arc<CloudClient>,
        host: Arc<HostClient>,
        limiter: Arc<RateLimiter>,
        monitor: StatusMonitor,
        accounts: Arc<dyn AccountStore>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let session = Self {
            inner: Arc::new(SessionInner {
                poll_interval: config.poll_interval,
                stagger: config.creation_stagger,
                max_accounts: config.max_onboarding_accounts,
                cloud,
                host,
                limiter,
                monitor,
                accounts,
                items: Mutex::new(vec![CreateItem::new(0, CreateConfig::default())]),
                step: AtomicUsize::new(0),
                processed: DashSet::new(),
                polls: DashMap::new(),
                event_tx,
                event_rx: std::sync::Mutex::new(Some(event_rx)),
                cancel: CancellationToken::new(),
            }),
        };

        session.spawn_event_worker();
        session
    }

    pub fn step(&self) -> OnboardStep {
        match self.inner.step.load(Ordering::SeqCst) {
            0 => OnboardStep::Configure,
            1 => OnboardStep::Login,
            _ => OnboardStep::Done,
        }
    }

    pub async fn items(&self) -> Vec<CreateItem> {
        self.inner.items.lock().await.clone()
    }

    pub async fn success_count(&self) -> usize {
        self.count(|item| item.state == CreateState::Success).await
    }

    pub async fn failed_count(&self) -> usize {
        self.count(|item| item.state == CreateState::Failed).await
    }

    pub async fn processing_count(&self) -> usize {
        self.count(|item| item.state != CreateState::Config && !item.state.is_terminal())
            .await
    }

    async fn count(&self, predicate: impl Fn(&CreateItem) -> bool) -> usize {
        self.inner
            .items
            .lock()
            .await
            .iter()
            .filter(|i| predicate(i))
            .count()
    }

    // ── Slot management ─────────────────────────────────────────────

    /// Add one onboarding slot. Fails beyond the session maximum.
    pub async fn add_account(&self, config: CreateConfig) -> Result<usize, CoreError> {
        let mut items = self.inner.items.lock().await;
        if items.len() >= self.inner.max_accounts {
            return Err(CoreError::ValidationFailed {
                message: format!("at most {} accounts per session", self.inner.max_accounts),
            });
        }
        let index = items.len();
        items.push(CreateItem::new(index, config));
        Ok(index)
    }

    /// Replace one slot's configuration (configure step only).
    pub async fn update_config(&self, index: usize, config: CreateConfig) -> Result<(), CoreError> {
        if self.step() != OnboardStep::Configure {
            return Err(CoreError::ValidationFailed {
                message: "configuration is locked after link generation".into(),
            });
        }
        let mut items = self.inner.items.lock().await;
        let Some(item) = items.get_mut(index) else {
            return Err(CoreError::ValidationFailed {
                message: format!("no account slot #{index}"),
            });
        };
        item.config = config;
        Ok(())
    }

    /// Remove a slot (configure step only). The last slot stays.
    pub async fn remove_account(&self, index: usize) -> Result<(), CoreError> {
        let mut items = self.inner.items.lock().await;
        if items.len() <= 1 {
            return Err(CoreError::ValidationFailed {
                message: "at least one account is required".into(),
            });
        }
        if index >= items.len() {
            return Err(CoreError::ValidationFailed {
                message: format!("no account slot #{index}"),
            });
        }
        items.remove(index);
        for (i, item) in items.iter_mut().enumerate() {
            item.index = i;
        }
        Ok(())
    }

    // ── Step navigation ─────────────────────────────────────────────

    /// Advance the flow. Configure → Login validates the slots and
    /// starts serial link generation; Login advances only via pushes.
    pub async fn go_next(&self) -> Result<OnboardStep, CoreError> {
        match self.step() {
            OnboardStep::Configure => {
                self.validate_configs().await?;
                self.inner.step.store(1, Ordering::SeqCst);
                self.generate_links().await;
                Ok(OnboardStep::Login)
            }
            OnboardStep::Login | OnboardStep::Done => Ok(self.step()),
        }
    }

    /// Back to the configure step: stop polls, reset non-config state.
    pub async fn go_back(&self) {
        if self.step() == OnboardStep::Configure {
            return;
        }
        self.stop_all_polls().await;

        let mut items = self.inner.items.lock().await;
        for item in items.iter_mut() {
            item.reset();
        }
        self.inner.step.store(0, Ordering::SeqCst);
    }

    /// Mark every non-terminal slot failed and jump to Done.
    ///
    /// Materialized accounts (real profiles) keep their cloud records --
    /// the permanent link stays usable even for abandoned slots.
    pub async fn force_complete(&self) {
        self.stop_all_polls().await;

        let mut items = self.inner.items.lock().await;
        for item in items.iter_mut() {
            if !item.state.is_terminal() {
                item.fail("skipped by operator");
            }
        }
        self.inner.step.store(2, Ordering::SeqCst);
    }

    async fn validate_configs(&self) -> Result<(), CoreError> {
        let items = self.inner.items.lock().await;
        for item in items.iter() {
            if item.config.group_id.is_none() {
                return Err(CoreError::ValidationFailed {
                    message: format!("account #{} has no group selected", item.index + 1),
                });
            }
        }
        Ok(())
    }

    // ── Link generation ─────────────────────────────────────────────

    /// Generate every slot's login material serially, with a short
    /// stagger so a burst of slots never hammers the cloud API.
    async fn generate_links(&self) {
        let count = self.inner.items.lock().await.len();

        for index in 0..count {
            let way = {
                let items = self.inner.items.lock().await;
                let Some(item) = items.get(index) else { break };
                item.config.login_way
            };

            match way {
                LoginWay::QrCode => self.generate_qr(index).await,
                LoginWay::PermanentLink => self.generate_permanent_link(index).await,
            }

            if index + 1 < count {
                tokio::time::sleep(self.inner.stagger).await;
            }
        }
    }

    /// QR flow: mint a virtual id, bind a login QR to it, subscribe,
    /// and start the poke-poll.
    async fn generate_qr(&self, index: usize) {
        let config = {
            let mut items = self.inner.items.lock().await;
            let Some(item) = items.get_mut(index) else { return };
            item.state = CreateState::QrReady;
            item.progress = 10;
            item.config.clone()
        };

        let virtual_id = AccountId::virtual_id();
        debug!(slot = index, account = %virtual_id, "minted virtual id for QR login");

        let link = self
            .inner
            .cloud
            .generate_login_link(
                virtual_id.as_str(),
                config.login_method.as_wire_str(),
                LoginWay::QrCode.as_wire_str(),
                serde_json::to_value(&config).ok(),
            )
            .await;

        let mut items = self.inner.items.lock().await;
        let Some(item) = items.get_mut(index) else { return };

        let link = match link {
            Ok(link) => link,
            Err(e) => {
                warn!(slot = index, error = %e, "QR generation failed");
                item.fail(format!("QR generation failed: {e}"));
                return;
            }
        };

        item.account_id = Some(virtual_id.clone());
        item.is_virtual = true;
        item.qr_url = link.login_qr_url.clone();
        item.permanent_link = Some(link.url.clone());
        item.state = CreateState::WaitingScan;
        item.progress = 30;
        drop(items);

        if !self.subscribe_slot(&virtual_id) {
            let mut items = self.inner.items.lock().await;
            if let Some(item) = items.get_mut(index) {
                item.fail("push channel unavailable");
            }
            drop(items);
            let _ = self.inner.cloud.delete_link(virtual_id.as_str()).await;
            return;
        }

        self.start_poll(&virtual_id);
        self.initial_poke(&virtual_id).await;
    }

    /// Link flow: create the real profile up front (empty cookie), then
    /// bind a shareable link to it. No poll, no migration.
    async fn generate_permanent_link(&self, index: usize) {
        let config = {
            let mut items = self.inner.items.lock().await;
            let Some(item) = items.get_mut(index) else { return };
            item.state = CreateState::QrReady;
            item.progress = 10;
            item.config.clone()
        };

        let created = self
            .inner
            .limiter
            .run(|| {
                self.inner
                    .host
                    .create_profile(&config.profile_spec(), "", None)
            })
            .await;

        let real_id = match created {
            Ok(id) => AccountId::from(id),
            Err(e) => {
                warn!(slot = index, error = %e, "profile creation failed");
                let mut items = self.inner.items.lock().await;
                if let Some(item) = items.get_mut(index) {
                    item.fail(format!("profile creation failed: {e}"));
                }
                return;
            }
        };

        info!(slot = index, account = %real_id, "empty profile created for link login");

        let link = self
            .inner
            .cloud
            .generate_login_link(
                real_id.as_str(),
                config.login_method.as_wire_str(),
                LoginWay::PermanentLink.as_wire_str(),
                serde_json::to_value(&config).ok(),
            )
            .await;

        let mut items = self.inner.items.lock().await;
        let Some(item) = items.get_mut(index) else { return };
        item.account_id = Some(real_id.clone());
        item.is_virtual = false;

        let link = match link {
            Ok(link) => link,
            Err(e) => {
                warn!(slot = index, error = %e, "link generation failed");
                item.fail(format!("link generation failed: {e}"));
                return;
            }
        };

        item.permanent_link = Some(link.url.clone());
        item.link_qr_code = link.qr_code.clone();
        item.state = CreateState::WaitingScan;
        item.progress = 50;
        drop(items);

        if !self.subscribe_slot(&real_id) {
            let mut items = self.inner.items.lock().await;
            if let Some(item) = items.get_mut(index) {
                item.fail("push channel unavailable");
            }
            drop(items);
            let _ = self.inner.cloud.delete_link(real_id.as_str()).await;
            return;
        }

        self.initial_poke(&real_id).await;
    }

    /// Register this session's handler alongside the monitor's.
    fn subscribe_slot(&self, account_id: &AccountId) -> bool {
        let queue = self.inner.event_tx.clone();
        let handler: PushHandler = Arc::new(move |event| {
            let _ = queue.send(event);
        });
        self.inner.monitor.ensure_subscribed(account_id, Some(handler))
    }

    /// One immediate poke so a state change that happened before the
    /// subscription was in place still gets re-broadcast.
    async fn initial_poke(&self, account_id: &AccountId) {
        let token = CancellationToken::new();
        match self
            .inner
            .cloud
            .check_login_status(account_id.as_str(), &token)
            .await
        {
            Ok(state) => debug!(
                account = %account_id,
                scanned = state.scanned,
                confirmed = state.confirmed,
                "initial login-state poke"
            ),
            Err(e) => debug!(account = %account_id, error = %e, "initial poke failed"),
        }
    }

    // ── Poke-poll ───────────────────────────────────────────────────

    /// Start the cancelable poll that prompts the cloud to advance the
    /// login. Responses are logged, never written into any state.
    fn start_poll(&self, account_id: &AccountId) {
        if self.inner.polls.contains_key(account_id) {
            debug!(account = %account_id, "poll already running");
            return;
        }

        let token = CancellationToken::new();
        self.inner.polls.insert(account_id.clone(), token.clone());

        let session = self.clone();
        let id = account_id.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(session.inner.poll_interval);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        match session.inner.cloud.check_login_status(id.as_str(), &token).await {
                            Ok(state) => {
                                debug!(
                                    account = %id,
                                    scanned = state.scanned,
                                    confirmed = state.confirmed,
                                    expired = state.expired,
                                    "login-state poke"
                                );
                                // The poll's only job is prompting the
                                // server; it stops itself once the flow
                                // cannot advance further.
                                if state.confirmed || state.expired {
                                    session.stop_poll(&id);
                                    break;
                                }
                            }
                            Err(e) if e.is_cancelled() => break,
                            Err(e) => debug!(account = %id, error = %e, "poke failed"),
                        }
                    }
                }
            }
        });
    }

    /// Stop a poll: clears its timer and aborts any in-flight request.
    fn stop_poll(&self, account_id: &AccountId) {
        if let Some((_, token)) = self.inner.polls.remove(account_id) {
            token.cancel();
            debug!(account = %account_id, "poll stopped");
        }
    }

    async fn stop_all_polls(&self) {
        let ids: Vec<AccountId> = self.inner.polls.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.stop_poll(&id);
        }
    }

    // ── Push-driven progression ─────────────────────────────────────

    fn spawn_event_worker(&self) {
        let Some(mut rx) = self
            .inner
            .event_rx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
        else {
            return;
        };

        let session = self.clone();
        tokio::spawn(async move {
            let cancel = session.inner.cancel.clone();
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    event = rx.recv() => {
                        let Some(event) = event else { break };
                        session.handle_push(&event).await;
                    }
                }
            }
        });
    }

    /// Advance one slot's state machine from a push event.
    async fn handle_push(&self, event: &PushEvent) {
        let event_id = AccountId::from(event.account_id.as_str());

        let index = {
            let items = self.inner.items.lock().await;
            items
                .iter()
                .find(|item| item.account_id.as_ref() == Some(&event_id))
                .map(|item| item.index)
        };
        let Some(index) = index else {
            debug!(account = %event_id, "push for account outside this session, ignoring");
            return;
        };

        {
            let mut items = self.inner.items.lock().await;
            let Some(item) = items.get_mut(index) else { return };
            if item.state.is_terminal() {
                debug!(slot = index, state = %item.state, "slot already terminal, ignoring push");
                return;
            }

            if event.scanned == Some(true) && event.confirmed != Some(true) {
                item.state = CreateState::Scanned;
                item.progress = 50;
                debug!(slot = index, "login QR scanned");
            }
            if event.confirmed == Some(true) {
                item.state = CreateState::Confirmed;
                item.progress = 60;
                debug!(slot = index, "login confirmed");
            }
            if event.expired == Some(true) {
                item.fail("login QR expired");
                drop(items);
                self.stop_poll(&event_id);
                self.check_all_complete().await;
                return;
            }
        }

        if event.cookie_status.as_deref() == Some("online") {
            self.handle_login_completed(index, &event_id, event).await;
        }
    }

    /// Complete one slot after its login confirmed upstream.
    ///
    /// Idempotent: duplicate "completed" deliveries for the same id are
    /// dropped via the processed-id set, so the migration runs at most
    /// once per underlying login.
    async fn handle_login_completed(
        &self,
        index: usize,
        event_id: &AccountId,
        event: &PushEvent,
    ) {
        if !self.inner.processed.insert(event_id.clone()) {
            debug!(account = %event_id, "login completion already handled, ignoring duplicate");
            return;
        }

        let (config, is_virtual) = {
            let mut items = self.inner.items.lock().await;
            let Some(item) = items.get_mut(index) else { return };
            item.state = CreateState::Creating;
            item.progress = 70;
            (item.config.clone(), item.is_virtual)
        };

        // Pull the authoritative cookie payload; fall back to the push
        // event's own copy when the fetch fails.
        let (cookies_payload, mut info) =
            match self.inner.cloud.sync_cookie_from_cloud(event_id.as_str()).await {
                Ok(bundle) => {
                    let mut info = AccountInfo::named(
                        bundle.nickname.clone().unwrap_or_default(),
                        LoginMethod::from_wire(bundle.login_method.as_deref()),
                    );
                    info.avatar = bundle.avatar.clone().unwrap_or_default();
                    (bundle.cookies, info)
                }
                Err(e) => {
                    warn!(account = %event_id, error = %e, "cookie fetch failed, using push payload");
                    let info = event
                        .account_info
                        .as_ref()
                        .map(AccountInfo::from)
                        .unwrap_or_else(|| {
                            AccountInfo::named(
                                event.nickname.clone().unwrap_or_default(),
                                LoginMethod::from_wire(event.login_method.as_deref()),
                            )
                        });
                    (event.cookies.clone().unwrap_or_default(), info)
                }
            };
        if info.nickname.is_empty() {
            if let Some(nickname) = event.nickname.as_deref() {
                info.nickname = nickname.to_owned();
            }
        }

        let real_id = if is_virtual {
            // Stop the poll first so a later 404 on the deleted virtual
            // record can't surface as a poll error.
            self.stop_poll(event_id);

            match self.migrate_virtual(event_id, &config, &cookies_payload, &info).await {
                Ok(real_id) => real_id,
                Err(message) => {
                    let mut items = self.inner.items.lock().await;
                    if let Some(item) = items.get_mut(index) {
                        item.fail(&message);
                    }
                    drop(items);
                    let _ = self.inner.cloud.delete_link(event_id.as_str()).await;
                    self.check_all_complete().await;
                    return;
                }
            }
        } else {
            // Link flow: the profile already exists, write cookies in.
            if let Err(e) = self
                .inner
                .limiter
                .run(|| {
                    self.inner
                        .host
                        .write_cookies(event_id.as_str(), &cookies_payload)
                })
                .await
            {
                let mut items = self.inner.items.lock().await;
                if let Some(item) = items.get_mut(index) {
                    item.fail(format!("cookie write failed: {e}"));
                }
                drop(items);
                self.check_all_complete().await;
                return;
            }
            event_id.clone()
        };

        let record = LocalAccountRecord::synced_now(
            real_id.clone(),
            info.clone(),
            info.login_method,
            Utc::now(),
        );
        if let Err(e) = self.inner.accounts.upsert(record) {
            warn!(account = %real_id, error = %e, "local metadata save failed");
        }

        // Track the real id from here on; refresh fills its cache entry.
        self.inner.monitor.ensure_subscribed(&real_id, None);
        if let Err(e) = self.inner.monitor.refresh(&real_id).await {
            debug!(account = %real_id, error = %e, "post-login refresh failed");
        }

        self.stop_poll(event_id);

        {
            let mut items = self.inner.items.lock().await;
            if let Some(item) = items.get_mut(index) {
                item.account_id = Some(real_id.clone());
                item.is_virtual = false;
                item.account_info = Some(info.clone());
                item.cookies = cookies_payload;
                item.state = CreateState::Success;
                item.progress = 100;
                item.error = None;
            }
        }

        info!(slot = index, account = %real_id, nickname = %info.nickname, "account onboarded");
        self.check_all_complete().await;
    }

    /// Replace a virtual id with a freshly created real profile:
    /// create the profile (with cookies), delete the virtual cloud
    /// record, re-register under the real id.
    async fn migrate_virtual(
        &self,
        virtual_id: &AccountId,
        config: &CreateConfig,
        cookies_payload: &[CookieItem],
        info: &AccountInfo,
    ) -> Result<AccountId, String> {
        let header = cookies::cookie_header(cookies_payload);
        let created = self
            .inner
            .limiter
            .run(|| {
                self.inner.host.create_profile(
                    &config.profile_spec(),
                    &header,
                    Some(&info.nickname),
                )
            })
            .await
            .map_err(|e| format!("profile creation failed: {e}"))?;
        let real_id = AccountId::from(created);

        info!(virtual_id = %virtual_id, real_id = %real_id, "migrating virtual account");

        if let Err(e) = self.inner.cloud.delete_link(virtual_id.as_str()).await {
            warn!(account = %virtual_id, error = %e, "virtual record deletion failed");
        }

        let formatted = cookies::format_for_cloud(cookies_payload);
        if let Err(e) = self
            .inner
            .cloud
            .auto_register_account(
                real_id.as_str(),
                &formatted,
                info.login_method.as_wire_str(),
                Some(&info.to_wire()),
            )
            .await
        {
            // The profile exists and works; only cloud-side monitoring
            // is degraded until the next reconciliation pass.
            warn!(account = %real_id, error = %e, "re-registration under real id failed");
        }

        Ok(real_id)
    }

    /// Jump to Done once every slot is terminal.
    async fn check_all_complete(&self) {
        let items = self.inner.items.lock().await;
        if !items.is_empty() && items.iter().all(|item| item.state.is_terminal()) {
            let success = items.iter().filter(|i| i.state == CreateState::Success).count();
            let failed = items.len() - success;
            info!(success, failed, "onboarding session complete");
            self.inner.step.store(2, Ordering::SeqCst);
        }
    }

    // ── Retry / cleanup ─────────────────────────────────────────────

    /// Re-run a failed slot from scratch.
    pub async fn retry_failed(&self, index: usize) -> Result<(), CoreError> {
        let (account_id, way) = {
            let items = self.inner.items.lock().await;
            let Some(item) = items.get(index) else {
                return Err(CoreError::ValidationFailed {
                    message: format!("no account slot #{index}"),
                });
            };
            if item.state != CreateState::Failed {
                return Err(CoreError::ValidationFailed {
                    message: format!("slot #{index} has not failed"),
                });
            }
            (item.account_id.clone(), item.config.login_way)
        };

        if let Some(id) = account_id {
            self.stop_poll(&id);
            self.inner.processed.remove(&id);
            let _ = self.inner.cloud.delete_link(id.as_str()).await;
        }

        {
            let mut items = self.inner.items.lock().await;
            if let Some(item) = items.get_mut(index) {
                item.reset();
            }
        }

        match way {
            LoginWay::QrCode => self.generate_qr(index).await,
            LoginWay::PermanentLink => self.generate_permanent_link(index).await,
        }
        Ok(())
    }

    /// Tear down and re-mint one slot's QR / link.
    pub async fn regenerate_qr(&self, index: usize) -> Result<(), CoreError> {
        let (account_id, way) = {
            let items = self.inner.items.lock().await;
            let Some(item) = items.get(index) else {
                return Err(CoreError::ValidationFailed {
                    message: format!("no account slot #{index}"),
                });
            };
            (item.account_id.clone(), item.config.login_way)
        };

        if let Some(id) = account_id {
            self.stop_poll(&id);
            self.inner.processed.remove(&id);
            let _ = self.inner.cloud.delete_link(id.as_str()).await;
        }

        {
            let mut items = self.inner.items.lock().await;
            if let Some(item) = items.get_mut(index) {
                item.reset();
            }
        }

        match way {
            LoginWay::QrCode => self.generate_qr(index).await,
            LoginWay::PermanentLink => self.generate_permanent_link(index).await,
        }
        Ok(())
    }

    /// Delete cloud placeholders for slots that never materialized.
    ///
    /// Only still-virtual, non-successful slots are cleaned: a real
    /// profile's link record stays usable no matter how the session
    /// ended.
    pub async fn cleanup_unused_links(&self) -> usize {
        let targets: Vec<AccountId> = {
            let items = self.inner.items.lock().await;
            items
                .iter()
                .filter(|item| item.is_virtual && item.state != CreateState::Success)
                .filter_map(|item| item.account_id.clone())
                .collect()
        };

        if targets.is_empty() {
            return 0;
        }

        let mut deleted = 0usize;
        for id in targets {
            self.stop_poll(&id);
            match self.inner.cloud.delete_link(id.as_str()).await {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(e) => warn!(account = %id, error = %e, "placeholder cleanup failed"),
            }
        }

        info!(deleted, "unused cloud placeholders cleaned");
        deleted
    }

    /// End the session: stop polls and the event worker.
    pub async fn close(&self) {
        self.stop_all_polls().await;
        self.inner.cancel.cancel();
    }
}
