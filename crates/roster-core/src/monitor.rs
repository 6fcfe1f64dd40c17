// ── Status cache & monitor ──
//
// Owns the authoritative per-account status cache and its lifecycle:
// push-driven updates, read-through queries with background refresh,
// the full startup reconciliation pass, and the debounced expiry
// notification. One explicitly owned instance per engine -- tests
// construct as many independent ones as they like.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use roster_api::{CloudClient, HostClient, PushChannel, PushEvent, PushHandler};

use crate::account_store::AccountStore;
use crate::config::EngineConfig;
use crate::cookies;
use crate::debounce::ExpiryBuffer;
use crate::error::CoreError;
use crate::model::{AccountId, CachedStatus, CookieStatus, MonitorEvent, StatusSummary};
use crate::normalize::{SideEffectReport, normalize, plan_side_effects};
use crate::ratelimit::RateLimiter;
use crate::store::StatusStore;
use crate::sync::SyncEngine;

const EVENT_CHANNEL_SIZE: usize = 256;

// ── StatusMonitor ───────────────────────────────────────────────────

/// The reconciliation engine's cache owner.
///
/// Cheaply cloneable via `Arc<MonitorInner>`. Push events for one
/// account are processed by a single worker task in arrival order, so
/// per-account ordering from the channel is preserved end to end.
/// Cache writes are last-write-wins snapshots; side effects always run
/// after (and never block) the write.
#[derive(Clone)]
pub struct StatusMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    cache_ttl: chrono::Duration,
    creator_filter: Option<String>,

    cloud: Arc<CloudClient>,
    host: Arc<HostClient>,
    push: PushChannel,
    store: Arc<StatusStore>,
    accounts: Arc<dyn AccountStore>,
    limiter: Arc<RateLimiter>,
    sync: SyncEngine,

    /// Accounts whose monitor handler is registered on the push channel.
    subscribed: DashSet<AccountId>,

    events_tx: broadcast::Sender<MonitorEvent>,

    /// Push events queue: handlers enqueue, one worker drains in order.
    event_tx: mpsc::UnboundedSender<Arc<PushEvent>>,
    event_rx: StdMutex<Option<mpsc::UnboundedReceiver<Arc<PushEvent>>>>,

    expiry: ExpiryBuffer,
    expiry_rx: StdMutex<Option<mpsc::UnboundedReceiver<Vec<String>>>>,

    is_syncing: AtomicBool,
    last_sync: StdMutex<Option<DateTime<Utc>>>,

    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StatusMonitor {
    pub fn new(
        config: &EngineConfig,
        cloud: Arc<CloudClient>,
        host: Arc<HostClient>,
        push: PushChannel,
        accounts: Arc<dyn AccountStore>,
        limiter: Arc<RateLimiter>,
        sync: SyncEngine,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (expiry, expiry_rx) = ExpiryBuffer::new(config.expiry_debounce);

        Self {
            inner: Arc::new(MonitorInner {
                cache_ttl: chrono::Duration::from_std(config.cache_ttl)
                    .unwrap_or_else(|_| chrono::Duration::minutes(10)),
                creator_filter: config.creator_filter.clone(),
                cloud,
                host,
                push,
                store: Arc::new(StatusStore::new()),
                accounts,
                limiter,
                sync,
                subscribed: DashSet::new(),
                events_tx,
                event_tx,
                event_rx: StdMutex::new(Some(event_rx)),
                expiry,
                expiry_rx: StdMutex::new(Some(expiry_rx)),
                is_syncing: AtomicBool::new(false),
                last_sync: StdMutex::new(None),
                cancel: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The underlying status store (snapshots and subscriptions).
    pub fn store(&self) -> &Arc<StatusStore> {
        &self.inner.store
    }

    /// Subscribe to user-facing monitor notifications.
    pub fn events(&self) -> broadcast::Receiver<MonitorEvent> {
        self.inner.events_tx.subscribe()
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Start monitoring: spawn workers, subscribe every known account,
    /// then run one full reconciliation pass.
    ///
    /// Subscription failure degrades to "no realtime updates" -- the
    /// reconciliation pass still runs.
    pub async fn start(&self) -> Result<(), CoreError> {
        let mut tasks = self.inner.tasks.lock().await;

        if let Some(rx) = take_receiver(&self.inner.event_rx) {
            let monitor = self.clone();
            tasks.push(tokio::spawn(event_worker(monitor, rx)));
        }

        if let Some(rx) = take_receiver(&self.inner.expiry_rx) {
            let monitor = self.clone();
            tasks.push(tokio::spawn(expiry_forwarder(monitor, rx)));
        }
        drop(tasks);

        let known = self.inner.accounts.all();
        let mut subscribed = 0usize;
        for record in &known {
            if self.ensure_subscribed(&record.account_id, None) {
                subscribed += 1;
            }
        }

        if subscribed == 0 && !known.is_empty() {
            warn!("push channel unavailable: no realtime updates, relying on refresh");
        } else {
            info!(subscribed, total = known.len(), "push subscriptions established");
        }

        if let Err(e) = self.sync_all_status().await {
            warn!(error = %e, "startup reconciliation pass failed");
        }

        Ok(())
    }

    /// Stop monitoring: cancel workers and drop all subscriptions.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();
        self.inner.push.unsubscribe_all();
        self.inner.subscribed.clear();

        let mut tasks = self.inner.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
        debug!("monitor stopped");
    }

    // ── Subscriptions ───────────────────────────────────────────────

    /// Subscribe an account's monitor handler exactly once; safe to
    /// call repeatedly. An `extra_handler` (flow-specific, e.g. during
    /// onboarding) is appended on every call.
    pub fn ensure_subscribed(
        &self,
        account_id: &AccountId,
        extra_handler: Option<PushHandler>,
    ) -> bool {
        if self.inner.subscribed.contains(account_id) {
            if let Some(handler) = extra_handler {
                self.inner.push.subscribe(account_id.as_str(), handler);
            }
            return true;
        }

        let queue = self.inner.event_tx.clone();
        let monitor_handler: PushHandler = Arc::new(move |event| {
            let _ = queue.send(event);
        });

        if !self.inner.push.subscribe(account_id.as_str(), monitor_handler) {
            return false;
        }
        if let Some(handler) = extra_handler {
            self.inner.push.subscribe(account_id.as_str(), handler);
        }

        self.inner.subscribed.insert(account_id.clone());

        // First subscription seeds an empty pending entry so reads have
        // something to show before the first event or refresh lands.
        if !self.inner.store.contains(account_id) {
            self.inner
                .store
                .upsert(account_id.clone(), CachedStatus::pending(Utc::now()));
        }
        true
    }

    /// Drop one account's subscription without touching the cache.
    pub fn unsubscribe(&self, account_id: &AccountId) {
        self.inner.push.unsubscribe(account_id.as_str());
        self.inner.subscribed.remove(account_id);
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Read-through status lookup.
    ///
    /// A miss (or an entry older than the cache TTL) triggers a
    /// fire-and-forget background refresh; the current value -- possibly
    /// `None` -- is returned immediately. Callers must not assume a miss
    /// is permanent.
    pub fn get_status(&self, account_id: &AccountId) -> Option<Arc<CachedStatus>> {
        let cached = self.inner.store.get(account_id);

        match &cached {
            Some(entry) if entry.age(Utc::now()) <= self.inner.cache_ttl => {}
            _ => self.spawn_refresh(account_id.clone()),
        }

        cached
    }

    /// Aggregate counts plus the last reconciliation time.
    pub fn summary(&self) -> StatusSummary {
        let mut summary = self.inner.store.summary();
        summary.last_sync_time = *self
            .inner
            .last_sync
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        summary
    }

    /// Whether a reconciliation pass is currently running.
    pub fn is_syncing(&self) -> bool {
        self.inner.is_syncing.load(Ordering::SeqCst)
    }

    // ── Refresh ─────────────────────────────────────────────────────

    /// Synchronously query the cloud for one account and overwrite its
    /// cache entry.
    ///
    /// A definitive record-not-found response tears down the
    /// subscription and deletes the entry -- the sole automatic
    /// deregistration path. Transient failures leave the entry alone.
    pub async fn refresh(&self, account_id: &AccountId) -> Result<(), CoreError> {
        match self.inner.cloud.check_account_status(account_id.as_str()).await {
            Ok(Some(status)) => {
                let cached = CachedStatus::from_cloud(&status, Utc::now());
                self.inner.store.upsert(account_id.clone(), cached);
                let _ = self.inner.events_tx.send(MonitorEvent::StatusChanged {
                    account_id: account_id.clone(),
                });
                Ok(())
            }
            Ok(None) => {
                info!(account = %account_id, "record gone from cloud, deregistering");
                self.unsubscribe(account_id);
                self.inner.store.remove(account_id);
                if let Err(e) = self.inner.accounts.remove(account_id) {
                    warn!(account = %account_id, error = %e, "local metadata removal failed");
                }
                let _ = self.inner.events_tx.send(MonitorEvent::AccountRemoved {
                    account_id: account_id.clone(),
                });
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn spawn_refresh(&self, account_id: AccountId) {
        let monitor = self.clone();
        tokio::spawn(async move {
            if let Err(e) = monitor.refresh(&account_id).await {
                debug!(account = %account_id, error = %e, "background refresh failed");
            }
        });
    }

    // ── Full reconciliation pass ────────────────────────────────────

    /// Compare every host profile against the cloud in one batch.
    ///
    /// - Profiles the cloud has never seen but that carry local cookies
    ///   are discovered and registered in bulk.
    /// - Local metadata for profiles gone from the host is removed.
    /// - All returned records land in the cache as one single-swap
    ///   batch, so observers get exactly one notification.
    pub async fn sync_all_status(&self) -> Result<(), CoreError> {
        if self.inner.is_syncing.swap(true, Ordering::SeqCst) {
            debug!("reconciliation already running, skipping");
            return Ok(());
        }

        let result = self.sync_all_inner().await;
        self.inner.is_syncing.store(false, Ordering::SeqCst);
        result
    }

    async fn sync_all_inner(&self) -> Result<(), CoreError> {
        let inner = &self.inner;

        let page = inner
            .limiter
            .run(|| {
                inner
                    .host
                    .list_profiles(0, 1000, inner.creator_filter.as_deref())
            })
            .await?;
        let profile_ids: Vec<String> = page.list.iter().map(|p| p.id.clone()).collect();

        // Local metadata for profiles the host no longer has is stale.
        let stale: Vec<AccountId> = inner
            .accounts
            .all()
            .into_iter()
            .map(|r| r.account_id)
            .filter(|id| !profile_ids.iter().any(|p| p == id.as_str()))
            .collect();
        for id in &stale {
            debug!(account = %id, "removing stale local metadata");
            self.unsubscribe(id);
            if let Err(e) = inner.accounts.remove(id) {
                warn!(account = %id, error = %e, "stale metadata removal failed");
            }
            let _ = inner.events_tx.send(MonitorEvent::AccountRemoved {
                account_id: id.clone(),
            });
        }

        if profile_ids.is_empty() {
            inner.store.apply_batch(Vec::new(), &stale);
            self.mark_synced();
            return Ok(());
        }

        let batch = inner.cloud.batch_check_status(&profile_ids).await?;

        let mut updates: Vec<(AccountId, CachedStatus)> = Vec::new();
        let now = Utc::now();

        // Discover-and-register: locally present, cloud missing, with
        // cookies on disk.
        let missing: Vec<&String> = profile_ids
            .iter()
            .filter(|id| !batch.accounts.contains_key(*id))
            .collect();
        for id in missing {
            if let Some(update) = self.register_missing(id).await {
                updates.push(update);
            }
        }

        for (raw_id, status) in &batch.accounts {
            let id = AccountId::from(raw_id.as_str());
            let cached = CachedStatus::from_cloud(status, now);

            // An online → offline flip observed through the batch still
            // feeds the debounced expiry notification.
            let previous = inner.store.get(&id);
            if cached.cookie_status == CookieStatus::Offline
                && previous.map(|p| p.cookie_status) == Some(CookieStatus::Online)
            {
                let name = cached.nickname().unwrap_or(raw_id).to_owned();
                inner.expiry.push(name);
            }

            updates.push((id, cached));
        }

        info!(
            profiles = profile_ids.len(),
            found = batch.found,
            registered = updates.len().saturating_sub(batch.accounts.len()),
            stale = stale.len(),
            "reconciliation pass applied"
        );

        inner.store.apply_batch(updates, &stale);
        self.mark_synced();

        // New profiles discovered this pass start receiving pushes too.
        for id in &profile_ids {
            self.ensure_subscribed(&AccountId::from(id.as_str()), None);
        }

        Ok(())
    }

    /// Register one cloud-missing profile from its local cookies.
    async fn register_missing(&self, profile_id: &str) -> Option<(AccountId, CachedStatus)> {
        let inner = &self.inner;
        let id = AccountId::from(profile_id);

        let local_cookies = match inner
            .limiter
            .run(|| inner.host.read_cookies(profile_id))
            .await
        {
            Ok(cookies) => cookies,
            Err(e) => {
                warn!(account = %id, error = %e, "cookie read failed during discovery");
                return None;
            }
        };
        if local_cookies.is_empty() {
            return None;
        }

        let method = cookies::detect_login_method(&local_cookies);
        let formatted = cookies::format_for_cloud(&local_cookies);

        match inner
            .cloud
            .auto_register_account(profile_id, &formatted, method.as_wire_str(), None)
            .await
        {
            Ok(registration) => {
                info!(account = %id, "discovered local account registered with cloud");
                let status = roster_api::AccountStatus {
                    cookie_status: registration.cookie_status.clone(),
                    account_info: registration.account_info.clone(),
                    ..roster_api::AccountStatus::default()
                };
                let cached = CachedStatus::from_cloud(&status, Utc::now());

                if let Some(info) = cached.account_info.clone() {
                    let record = crate::account_store::LocalAccountRecord::synced_now(
                        id.clone(),
                        info,
                        method,
                        Utc::now(),
                    );
                    if let Err(e) = inner.accounts.upsert(record) {
                        warn!(account = %id, error = %e, "local metadata save failed");
                    }
                }

                Some((id, cached))
            }
            Err(e) => {
                warn!(account = %id, error = %e, "discovery registration failed");
                None
            }
        }
    }

    fn mark_synced(&self) {
        *self
            .inner
            .last_sync
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
    }

    // ── Push event processing ───────────────────────────────────────

    /// Normalize one event, write the cache, then run side effects.
    async fn process_event(&self, event: &PushEvent) -> SideEffectReport {
        let inner = &self.inner;
        let id = AccountId::from(event.account_id.as_str());
        let previous = inner.store.get(&id);
        let now = Utc::now();

        let normalized = normalize(event, previous.as_deref(), now);
        let plan = plan_side_effects(&normalized, previous.as_deref());
        let display_name = normalized.nickname().unwrap_or(id.as_str()).to_owned();

        inner.store.upsert(id.clone(), normalized);
        let _ = inner.events_tx.send(MonitorEvent::StatusChanged {
            account_id: id.clone(),
        });

        let mut report = SideEffectReport::default();

        // Rename: best-effort, a failure never rolls back the cache write.
        if let Some(name) = plan.rename_to {
            let renamed = inner
                .limiter
                .run(|| inner.host.rename_profile(id.as_str(), &name))
                .await;
            match &renamed {
                Ok(()) => debug!(account = %id, name = %name, "profile renamed from push"),
                Err(e) => warn!(account = %id, error = %e, "push-driven rename failed"),
            }
            report.renamed = Some(renamed.is_ok());
        }

        // Recovery: fire-and-forget, never blocks the cache update.
        if plan.recovered {
            debug!(account = %id, "account back online, queueing recovery sync");
            let sync = inner.sync.clone();
            let sync_id = id.clone();
            tokio::spawn(async move {
                let result = sync.sync_single(&sync_id, false).await;
                if !result.success {
                    warn!(
                        account = %sync_id,
                        message = result.message.as_deref().unwrap_or(""),
                        "recovery sync failed"
                    );
                }
            });
            report.recovery_queued = true;
        }

        // Expiry: close the local session and buffer the notification.
        if plan.went_offline {
            info!(account = %id, name = %display_name, "account went offline");
            let closed = inner
                .limiter
                .run(|| inner.host.close_profile(id.as_str()))
                .await;
            if let Err(e) = &closed {
                warn!(account = %id, error = %e, "auto-close failed");
            }
            report.closed = Some(closed.is_ok());

            inner.expiry.push(display_name);
            report.expiry_buffered = true;
        }

        report
    }
}

// ── Worker tasks ────────────────────────────────────────────────────

/// Drain the push-event queue in arrival order.
async fn event_worker(monitor: StatusMonitor, mut rx: mpsc::UnboundedReceiver<Arc<PushEvent>>) {
    let cancel = monitor.inner.cancel.clone();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = rx.recv() => {
                let Some(event) = event else { break };
                let report = monitor.process_event(&event).await;
                debug!(account = %event.account_id, ?report, "push event processed");
            }
        }
    }
}

/// Forward debounced expiry batches as aggregated notifications.
async fn expiry_forwarder(monitor: StatusMonitor, mut rx: mpsc::UnboundedReceiver<Vec<String>>) {
    let cancel = monitor.inner.cancel.clone();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            batch = rx.recv() => {
                let Some(names) = batch else { break };
                info!(count = names.len(), "accounts expired, notifying");
                let _ = monitor
                    .inner
                    .events_tx
                    .send(MonitorEvent::AccountsExpired { names });
            }
        }
    }
}

fn take_receiver<T>(slot: &StdMutex<Option<T>>) -> Option<T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}
