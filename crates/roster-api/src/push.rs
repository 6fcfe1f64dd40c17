//! Push channel client with auto-reconnect.
//!
//! Multiplexes per-account subscriptions over a single WebSocket to the
//! cloud's change-notification channel. Each decoded event is dispatched
//! to every handler registered for that account id. Handles reconnection
//! with exponential backoff + jitter automatically.
//!
//! The underlying socket is opened lazily on the first subscription and
//! torn down when the last subscription is removed. If the channel is not
//! configured (no endpoint), [`PushChannel::subscribe`] returns `false`
//! and callers fall back to polling.
//!
//! Delivery contract assumed from the cloud: at-least-once, ordered per
//! account. Events for different accounts carry no cross-ordering
//! guarantee.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::cloud::{AccountInfo, CookieItem};

// ── PushEvent ───────────────────────────────────────────────────────

/// A decoded change event for one account.
///
/// Every field except `account_id` is optional: the cloud pushes full
/// snapshots today, but older payload versions omitted fields, so the
/// normalizer in `roster-core` fills gaps from the previous cache entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEvent {
    pub account_id: String,

    /// Raw status string; normalized downstream (unknown → pending).
    #[serde(default)]
    pub cookie_status: Option<String>,

    // Login-flow progress flags (QR / link onboarding).
    #[serde(default)]
    pub scanned: Option<bool>,
    #[serde(default)]
    pub confirmed: Option<bool>,
    #[serde(default)]
    pub expired: Option<bool>,

    #[serde(default)]
    pub cookies: Option<Vec<CookieItem>>,

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

    /// Full identity object; preferred over the loose fields below.
    #[serde(default)]
    pub account_info: Option<AccountInfo>,

    // Loose fields kept for older payload versions.
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub login_method: Option<String>,

    #[serde(default)]
    pub channels_jump_url: Option<String>,

    /// Pre-change values, for consumers that want to diff.
    #[serde(default)]
    pub old_data: Option<PushOldData>,
}

/// The pre-change slice of a push event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushOldData {
    #[serde(default)]
    pub cookie_status: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
}

/// Callback invoked for every event delivered for a subscribed account.
pub type PushHandler = Arc<dyn Fn(Arc<PushEvent>) + Send + Sync>;

// ── Configuration ───────────────────────────────────────────────────

/// Exponential backoff configuration for reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

impl ReconnectConfig {
    /// Delay before reconnect attempt `attempt` (zero-based).
    ///
    /// Doubles per attempt up to `max_delay`, then spreads the result by
    /// a deterministic ±20% keyed off the attempt number, so a fleet of
    /// clients that lost the same backend does not redial in lockstep.
    fn delay_for(&self, attempt: u32) -> Duration {
        let doubled = self.initial_delay.saturating_mul(1_u32 << attempt.min(16));
        let capped = doubled.min(self.max_delay);

        let spread = f64::from(attempt.wrapping_mul(0x9E37_79B9) % 400) / 1000.0 - 0.2;
        capped.mul_f64(1.0 + spread)
    }
}

/// Push channel endpoint configuration.
#[derive(Debug, Clone, Default)]
pub struct PushConfig {
    /// WebSocket endpoint. `None` disables the channel entirely --
    /// subscriptions fail fast and callers degrade to polling.
    pub url: Option<Url>,

    /// Bearer token injected on the upgrade request.
    pub auth_key: Option<SecretString>,

    /// Reconnection behavior.
    pub reconnect: ReconnectConfig,
}

// ── PushChannel ─────────────────────────────────────────────────────

/// Per-account subscription hub over one shared WebSocket.
///
/// Cheaply cloneable. Subscribing is idempotent with respect to the
/// transport: a second `subscribe` for an already-subscribed id only
/// appends the new handler, it never re-establishes the socket.
#[derive(Clone)]
pub struct PushChannel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    config: PushConfig,
    handlers: Arc<DashMap<String, Vec<PushHandler>>>,
    conn: Mutex<Option<CancellationToken>>,
}

impl PushChannel {
    pub fn new(config: PushConfig) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                config,
                handlers: Arc::new(DashMap::new()),
                conn: Mutex::new(None),
            }),
        }
    }

    /// Whether the channel has an endpoint configured.
    pub fn is_available(&self) -> bool {
        self.inner.config.url.is_some()
    }

    /// Register a handler for one account's events.
    ///
    /// Opens the shared socket lazily on the first subscription. Returns
    /// `false` when the channel is unconfigured -- the caller must fall
    /// back to polling.
    pub fn subscribe(&self, account_id: &str, handler: PushHandler) -> bool {
        let Some(ref url) = self.inner.config.url else {
            tracing::warn!(account = %account_id, "push channel not configured, cannot subscribe");
            return false;
        };

        self.ensure_connected(url.clone());

        self.inner
            .handlers
            .entry(account_id.to_owned())
            .or_default()
            .push(handler);

        tracing::debug!(
            account = %account_id,
            subscriptions = self.inner.handlers.len(),
            "push handler registered"
        );
        true
    }

    /// Remove all handlers for one account.
    ///
    /// Tears down the shared socket when this was the last subscription.
    pub fn unsubscribe(&self, account_id: &str) {
        self.inner.handlers.remove(account_id);
        if self.inner.handlers.is_empty() {
            self.teardown();
        }
    }

    /// Remove every subscription and close the socket.
    pub fn unsubscribe_all(&self) {
        self.inner.handlers.clear();
        self.teardown();
    }

    /// Number of subscribed accounts.
    pub fn subscription_count(&self) -> usize {
        self.inner.handlers.len()
    }

    /// Total number of registered handlers across all accounts.
    pub fn handler_count(&self) -> usize {
        self.inner.handlers.iter().map(|e| e.value().len()).sum()
    }

    /// Deliver one already-decoded event to every handler registered
    /// for its account id.
    ///
    /// The read loop goes through this after parsing a frame; it is
    /// also the seam for feeding synthetic events into the pipeline
    /// (local re-broadcasts, tests). Events for unsubscribed accounts
    /// are dropped.
    pub fn dispatch(&self, event: PushEvent) {
        dispatch_event(Arc::new(event), &self.inner.handlers);
    }

    // ── Connection management ───────────────────────────────────────

    fn ensure_connected(&self, url: Url) {
        let mut conn = self.inner.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if conn.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let handlers = Arc::clone(&self.inner.handlers);
        let reconnect = self.inner.config.reconnect.clone();
        let auth = self
            .inner
            .config
            .auth_key
            .as_ref()
            .map(|k| format!("Bearer {}", k.expose_secret()));
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            run_channel(url, handlers, reconnect, task_cancel, auth).await;
        });

        *conn = Some(cancel);
    }

    fn teardown(&self) {
        let mut conn = self.inner.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(cancel) = conn.take() {
            cancel.cancel();
            tracing::debug!("push channel closed (no subscriptions left)");
        }
    }
}

// ── Background channel loop ──────────────────────────────────────────

/// How one connection ended.
enum Disconnect {
    /// The channel's cancellation token fired; stop for good.
    Cancelled,
    /// Orderly close (server close frame or stream end). Reconnect
    /// immediately -- the backend cycles connections on deploys.
    Clean,
    /// Dial or read failure; back off before the next attempt.
    Failed(crate::error::Error),
}

/// Keep one socket alive for as long as the channel has subscribers.
async fn run_channel(
    ws_url: Url,
    handlers: Arc<DashMap<String, Vec<PushHandler>>>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
    auth: Option<String>,
) {
    let mut attempt: u32 = 0;

    loop {
        match read_until_disconnect(&ws_url, &handlers, &cancel, auth.as_deref()).await {
            Disconnect::Cancelled => break,
            Disconnect::Clean => {
                tracing::info!("push channel closed by server, redialing");
                attempt = 0;
            }
            Disconnect::Failed(e) => {
                if reconnect.max_retries.is_some_and(|max| attempt >= max) {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "push channel unrecoverable, giving up"
                    );
                    break;
                }

                let delay = reconnect.delay_for(attempt);
                tracing::warn!(
                    error = %e,
                    attempt,
                    delay = ?delay,
                    "push channel dropped, backing off"
                );

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }

    tracing::debug!("push channel loop exited");
}

/// One connection lifecycle: dial, then pump frames into the handler
/// registry until something ends the stream. Cancellation aborts an
/// in-flight dial, not just an established read.
async fn read_until_disconnect(
    url: &Url,
    handlers: &DashMap<String, Vec<PushHandler>>,
    cancel: &CancellationToken,
    auth: Option<&str>,
) -> Disconnect {
    let request = match build_request(url, auth) {
        Ok(request) => request,
        Err(e) => return Disconnect::Failed(e),
    };

    let stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Disconnect::Cancelled,
        connected = tokio_tungstenite::connect_async(request) => match connected {
            Ok((stream, _response)) => stream,
            Err(e) => return Disconnect::Failed(crate::error::Error::PushConnect(e.to_string())),
        }
    };

    tracing::info!(url = %url, subscriptions = handlers.len(), "push channel connected");
    let (_write, mut frames) = stream.split();

    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Disconnect::Cancelled,
            frame = frames.next() => frame,
        };

        match frame {
            Some(Ok(tungstenite::Message::Text(text))) => dispatch_frame(&text, handlers),
            Some(Ok(tungstenite::Message::Close(frame))) => {
                let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                tracing::info!(%reason, "push channel close frame received");
                return Disconnect::Clean;
            }
            // Ping/pong are answered by tungstenite itself; binary
            // frames are not part of the protocol.
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                return Disconnect::Failed(crate::error::Error::PushConnect(e.to_string()));
            }
            None => return Disconnect::Clean,
        }
    }
}

/// Assemble the upgrade request, attaching the bearer token when one is
/// configured.
fn build_request(
    url: &Url,
    auth: Option<&str>,
) -> Result<ClientRequestBuilder, crate::error::Error> {
    let uri: tungstenite::http::Uri = url.as_str().parse().map_err(
        |e: tungstenite::http::uri::InvalidUri| crate::error::Error::PushConnect(e.to_string()),
    )?;

    let mut request = ClientRequestBuilder::new(uri);
    if let Some(token) = auth {
        request = request.with_header("Authorization", token);
    }
    Ok(request)
}

// ── Frame dispatch ───────────────────────────────────────────────────

/// Wire envelope for push frames: `{ "event": "...", "payload": {...} }`.
#[derive(Debug, Deserialize)]
struct PushFrame {
    #[serde(default)]
    event: String,
    payload: serde_json::Value,
}

/// Parse a text frame and invoke every handler registered for the
/// event's account id. Malformed frames are logged and skipped; frames
/// for unsubscribed accounts are dropped.
fn dispatch_frame(text: &str, handlers: &DashMap<String, Vec<PushHandler>>) {
    let frame: PushFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            tracing::debug!(error = %e, "failed to parse push frame");
            return;
        }
    };

    if frame.event != "account_update" {
        tracing::trace!(event = %frame.event, "ignoring non-account push frame");
        return;
    }

    let event: PushEvent = match serde_json::from_value(frame.payload) {
        Ok(evt) => evt,
        Err(e) => {
            tracing::debug!(error = %e, "could not deserialize push payload");
            return;
        }
    };

    if event.account_id.is_empty() {
        tracing::debug!("push payload missing account id, dropping");
        return;
    }

    dispatch_event(Arc::new(event), handlers);
}

/// Fan one event out to the handlers registered for its account id.
fn dispatch_event(event: Arc<PushEvent>, handlers: &DashMap<String, Vec<PushHandler>>) {
    let Some(registered) = handlers.get(&event.account_id) else {
        tracing::trace!(account = %event.account_id, "no handlers for pushed account");
        return;
    };

    for handler in registered.value() {
        handler(Arc::clone(&event));
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn reconnect_delay_grows_then_caps() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_retries: None,
        };

        let early: Vec<Duration> = (0..4).map(|a| config.delay_for(a)).collect();
        assert!(
            early.windows(2).all(|pair| pair[0] < pair[1]),
            "delays must grow early on: {early:?}"
        );

        // Deep into the retry tail the exponential is capped; only the
        // ±20% spread remains.
        let late = config.delay_for(12);
        assert!(
            late >= Duration::from_secs(8) && late <= Duration::from_secs(12),
            "capped delay out of spread band: {late:?}"
        );
    }

    #[test]
    fn reconnect_spread_is_deterministic_per_attempt() {
        let config = ReconnectConfig::default();
        assert_eq!(config.delay_for(5), config.delay_for(5));
        assert_ne!(config.delay_for(5), config.delay_for(6));
    }

    #[test]
    fn dispatch_routes_to_registered_handler() {
        let handlers: DashMap<String, Vec<PushHandler>> = DashMap::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        handlers.entry("acct-1".into()).or_default().push(Arc::new(move |evt| {
            assert_eq!(evt.account_id, "acct-1");
            assert_eq!(evt.cookie_status.as_deref(), Some("online"));
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let frame = serde_json::json!({
            "event": "account_update",
            "payload": {
                "accountId": "acct-1",
                "cookieStatus": "online",
                "nickname": "Shop42"
            }
        });

        dispatch_frame(&frame.to_string(), &handlers);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_fires_every_handler_for_the_account() {
        let handlers: DashMap<String, Vec<PushHandler>> = DashMap::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let counter = Arc::clone(&hits);
            handlers
                .entry("acct-1".into())
                .or_default()
                .push(Arc::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }));
        }

        let frame = serde_json::json!({
            "event": "account_update",
            "payload": { "accountId": "acct-1" }
        });

        dispatch_frame(&frame.to_string(), &handlers);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn dispatch_drops_unsubscribed_accounts() {
        let handlers: DashMap<String, Vec<PushHandler>> = DashMap::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        handlers.entry("acct-1".into()).or_default().push(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let frame = serde_json::json!({
            "event": "account_update",
            "payload": { "accountId": "someone-else" }
        });

        dispatch_frame(&frame.to_string(), &handlers);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dispatch_skips_malformed_frames() {
        let handlers: DashMap<String, Vec<PushHandler>> = DashMap::new();
        handlers.entry("acct-1".into()).or_default().push(Arc::new(|_| {
            panic!("handler must not fire for malformed input");
        }));

        dispatch_frame("not json at all", &handlers);
        dispatch_frame(r#"{"event":"account_update","payload":{"accountId":""}}"#, &handlers);
        dispatch_frame(r#"{"event":"presence","payload":{"accountId":"acct-1"}}"#, &handlers);
    }

    #[test]
    fn subscribe_without_endpoint_returns_false() {
        let channel = PushChannel::new(PushConfig::default());
        assert!(!channel.is_available());
        assert!(!channel.subscribe("acct-1", Arc::new(|_| {})));
        assert_eq!(channel.subscription_count(), 0);
    }

    #[test]
    fn deserialize_full_snapshot_event() {
        let json = r#"{
            "accountId": "acct-9",
            "cookieStatus": "offline",
            "scanned": true,
            "confirmed": true,
            "cookies": [{ "name": "sessionid", "value": "abc", "domain": ".weixin.qq.com" }],
            "accountInfo": { "nickname": "Shop42", "avatar": "http://a/1.png", "loginMethod": "channels_helper" },
            "oldData": { "cookieStatus": "online", "nickname": "Shop42" }
        }"#;

        let event: PushEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.account_id, "acct-9");
        assert_eq!(event.cookie_status.as_deref(), Some("offline"));
        assert_eq!(event.scanned, Some(true));
        assert_eq!(event.cookies.as_ref().unwrap().len(), 1);
        assert_eq!(event.account_info.as_ref().unwrap().nickname, "Shop42");
        assert_eq!(
            event.old_data.as_ref().unwrap().cookie_status.as_deref(),
            Some("online")
        );
    }
}
