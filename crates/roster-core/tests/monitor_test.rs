// Integration tests for the status monitor: refresh, the full
// reconciliation pass, push-driven cache updates, and the debounced
// expiry notification. Cloud and host are wiremock stand-ins; push
// events are injected through the channel's dispatch seam.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::broadcast;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use roster_api::{
    CloudClient, HostClient, PushChannel, PushConfig, PushEvent, ReconnectConfig, TransportConfig,
};
use roster_core::account_store::{LocalAccountRecord, MemoryAccountStore};
use roster_core::{
    AccountId, AccountInfo, AccountStore, CookieStatus, EngineConfig, LoginMethod, MonitorEvent,
    RateLimiter, StatusMonitor, SyncEngine,
};

// ── Harness ─────────────────────────────────────────────────────────

struct Harness {
    cloud: MockServer,
    host: MockServer,
    monitor: StatusMonitor,
    push: PushChannel,
    accounts: Arc<MemoryAccountStore>,
}

async fn setup(tune: impl FnOnce(&mut EngineConfig)) -> Harness {
    let cloud = MockServer::start().await;
    let host = MockServer::start().await;

    let mut config = EngineConfig::new(
        cloud.uri().parse().unwrap(),
        format!("{}/", host.uri()).parse().unwrap(),
        "ops-team",
    );
    // Nothing listens on the push endpoint; the channel registry still
    // works, and `dispatch` feeds events in directly.
    config.push = PushConfig {
        url: Some("ws://127.0.0.1:9/".parse().unwrap()),
        auth_key: None,
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(10),
            max_retries: Some(0),
        },
    };
    tune(&mut config);

    let cloud_client = Arc::new(
        CloudClient::new(config.cloud_url.clone(), "ops-team", &TransportConfig::default())
            .unwrap(),
    );
    let host_client = Arc::new(
        HostClient::new(config.host_url.clone(), &TransportConfig::default()).unwrap(),
    );
    let accounts = Arc::new(MemoryAccountStore::new());
    let limiter = Arc::new(RateLimiter::per_second(1000));
    let push = PushChannel::new(config.push.clone());

    let sync = SyncEngine::new(
        Arc::clone(&cloud_client),
        Arc::clone(&host_client),
        Arc::clone(&accounts) as Arc<dyn AccountStore>,
        Arc::clone(&limiter),
    );
    let monitor = StatusMonitor::new(
        &config,
        cloud_client,
        host_client,
        push.clone(),
        Arc::clone(&accounts) as Arc<dyn AccountStore>,
        limiter,
        sync,
    );

    Harness {
        cloud,
        host,
        monitor,
        push,
        accounts,
    }
}

fn ok_envelope(data: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "success": true, "data": data }))
}

fn online_record(nickname: &str) -> serde_json::Value {
    json!({
        "cookieStatus": "online",
        "accountInfo": { "nickname": nickname, "avatar": "", "loginMethod": "channels_helper" }
    })
}

fn seed_record(id: &str, nickname: &str) -> LocalAccountRecord {
    LocalAccountRecord::synced_now(
        id.into(),
        AccountInfo::named(nickname, LoginMethod::ChannelsHelper),
        LoginMethod::ChannelsHelper,
        Utc::now(),
    )
}

/// Mocks for the fire-and-forget traffic a push event can kick off
/// (recovery sync, rename, close). None of it is under test here.
async fn mount_side_effect_mocks(h: &Harness) {
    Mock::given(method("POST"))
        .and(path("/profile/rename"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .mount(&h.host)
        .await;
    Mock::given(method("POST"))
        .and(path("/profile/close"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .mount(&h.host)
        .await;
    Mock::given(method("POST"))
        .and(path("/profile/cookies"))
        .respond_with(ok_envelope(json!({ "cookies": [] })))
        .mount(&h.host)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/account"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .mount(&h.cloud)
        .await;
}

/// Poll until `pred` holds or the deadline passes.
async fn wait_until(mut pred: impl FnMut() -> bool) {
    for _ in 0..100 {
        if pred() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not reached within deadline");
}

async fn next_expiry(rx: &mut broadcast::Receiver<MonitorEvent>) -> Vec<String> {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no expiry notification within deadline")
            .unwrap();
        if let MonitorEvent::AccountsExpired { names } = event {
            return names;
        }
    }
}

// ── Refresh ─────────────────────────────────────────────────────────

#[tokio::test]
async fn refresh_overwrites_the_cache_entry() {
    let h = setup(|_| {}).await;

    Mock::given(method("GET"))
        .and(path("/api/status"))
        .and(query_param("action", "account"))
        .and(query_param("accountId", "acct-1"))
        .respond_with(ok_envelope(online_record("Shop42")))
        .mount(&h.cloud)
        .await;

    let id = AccountId::from("acct-1");
    assert!(h.monitor.ensure_subscribed(&id, None));

    // The seeded placeholder is pending until the refresh lands.
    assert_eq!(
        h.monitor.get_status(&id).unwrap().cookie_status,
        CookieStatus::Pending
    );

    h.monitor.refresh(&id).await.unwrap();

    let status = h.monitor.get_status(&id).unwrap();
    assert_eq!(status.cookie_status, CookieStatus::Online);
    assert_eq!(status.nickname(), Some("Shop42"));
}

#[tokio::test]
async fn refresh_not_found_deregisters_the_account() {
    let h = setup(|_| {}).await;

    Mock::given(method("GET"))
        .and(path("/api/status"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&h.cloud)
        .await;

    let id = AccountId::from("acct-gone");
    h.accounts.upsert(seed_record("acct-gone", "Ghost")).unwrap();
    assert!(h.monitor.ensure_subscribed(&id, None));
    let mut events = h.monitor.events();

    h.monitor.refresh(&id).await.unwrap();

    assert!(h.monitor.store().get(&id).is_none());
    assert!(h.accounts.get(&id).is_none());
    assert_eq!(
        events.recv().await.unwrap(),
        MonitorEvent::AccountRemoved { account_id: id }
    );
}

#[tokio::test]
async fn get_status_miss_triggers_background_refresh() {
    let h = setup(|_| {}).await;

    Mock::given(method("GET"))
        .and(path("/api/status"))
        .and(query_param("accountId", "acct-miss"))
        .respond_with(ok_envelope(online_record("Lazy")))
        .expect(1..)
        .mount(&h.cloud)
        .await;

    let id = AccountId::from("acct-miss");
    assert!(h.monitor.get_status(&id).is_none(), "miss returns immediately");

    let monitor = h.monitor.clone();
    wait_until(move || monitor.store().contains(&id)).await;
}

// ── Reconciliation pass ─────────────────────────────────────────────

#[tokio::test]
async fn reconciliation_pass_rewrites_cache_and_prunes_stale_metadata() {
    let h = setup(|_| {}).await;

    // Host knows p-1 and p-2; local metadata also remembers a "ghost"
    // profile the host no longer has.
    h.accounts.upsert(seed_record("ghost", "Ghost")).unwrap();

    Mock::given(method("POST"))
        .and(path("/profile/list"))
        .respond_with(ok_envelope(json!({
            "list": [
                { "id": "p-1", "name": "Shop42" },
                { "id": "p-2", "name": "fresh profile" }
            ],
            "total": 2
        })))
        .mount(&h.host)
        .await;

    // Cloud only knows p-1.
    Mock::given(method("POST"))
        .and(path("/api/status"))
        .and(query_param("action", "batch"))
        .respond_with(ok_envelope(json!({
            "total": 2,
            "found": 1,
            "accounts": { "p-1": online_record("Shop42") }
        })))
        .mount(&h.cloud)
        .await;

    // p-2 carries local cookies, so the pass discovers and registers it.
    Mock::given(method("POST"))
        .and(path("/profile/cookies"))
        .and(body_partial_json(json!({ "id": "p-2" })))
        .respond_with(ok_envelope(json!({
            "cookies": [
                { "name": "sessionid", "value": "X", "domain": ".weixin.qq.com" },
                { "name": "wxuin", "value": "Y", "domain": ".weixin.qq.com" }
            ]
        })))
        .mount(&h.host)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/account"))
        .and(query_param("action", "auto"))
        .and(body_partial_json(json!({ "accountId": "p-2" })))
        .respond_with(ok_envelope(json!({
            "accountId": "p-2",
            "cookieStatus": "online",
            "accountInfo": { "nickname": "Discovered", "avatar": "", "loginMethod": "channels_helper" }
        })))
        .expect(1)
        .mount(&h.cloud)
        .await;

    h.monitor.sync_all_status().await.unwrap();

    let store = h.monitor.store();
    assert_eq!(store.len(), 2);
    assert_eq!(
        store.get(&"p-1".into()).unwrap().nickname(),
        Some("Shop42")
    );
    assert_eq!(
        store.get(&"p-2".into()).unwrap().nickname(),
        Some("Discovered")
    );
    assert!(h.accounts.get(&"ghost".into()).is_none(), "stale metadata pruned");

    let summary = h.monitor.summary();
    assert_eq!(summary.total, 2);
    assert!(summary.last_sync_time.is_some());
}

// ── Push-driven updates ─────────────────────────────────────────────

fn online_event(id: &str, nickname: &str) -> PushEvent {
    PushEvent {
        account_id: id.to_owned(),
        cookie_status: Some("online".into()),
        account_info: Some(roster_api::AccountInfo {
            nickname: nickname.to_owned(),
            ..roster_api::AccountInfo::default()
        }),
        ..PushEvent::default()
    }
}

fn offline_event(id: &str) -> PushEvent {
    PushEvent {
        account_id: id.to_owned(),
        cookie_status: Some("offline".into()),
        ..PushEvent::default()
    }
}

#[tokio::test]
async fn push_event_updates_cache_and_keeps_nickname() {
    let h = setup(|_| {}).await;
    mount_side_effect_mocks(&h).await;
    Mock::given(method("POST"))
        .and(path("/profile/list"))
        .respond_with(ok_envelope(json!({ "list": [], "total": 0 })))
        .mount(&h.host)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/status"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&h.cloud)
        .await;

    h.monitor.start().await.unwrap();
    let id = AccountId::from("acct-1");
    assert!(h.monitor.ensure_subscribed(&id, None));

    h.push.dispatch(online_event("acct-1", "Shop42"));

    let monitor = h.monitor.clone();
    let check = id.clone();
    wait_until(move || {
        monitor
            .get_status(&check)
            .is_some_and(|s| s.cookie_status == CookieStatus::Online)
    })
    .await;
    assert_eq!(h.monitor.get_status(&id).unwrap().nickname(), Some("Shop42"));

    // A later event without identity must not lose the nickname.
    h.push.dispatch(offline_event("acct-1"));

    let monitor = h.monitor.clone();
    let check = id.clone();
    wait_until(move || {
        monitor
            .get_status(&check)
            .is_some_and(|s| s.cookie_status == CookieStatus::Offline)
    })
    .await;
    assert_eq!(h.monitor.get_status(&id).unwrap().nickname(), Some("Shop42"));

    h.monitor.stop().await;
}

#[tokio::test]
async fn burst_of_expiries_produces_one_aggregated_notification() {
    let h = setup(|config| {
        config.expiry_debounce = Duration::from_millis(150);
    })
    .await;
    mount_side_effect_mocks(&h).await;
    Mock::given(method("POST"))
        .and(path("/profile/list"))
        .respond_with(ok_envelope(json!({ "list": [], "total": 0 })))
        .mount(&h.host)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/status"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&h.cloud)
        .await;

    h.monitor.start().await.unwrap();
    let mut events = h.monitor.events();

    let ids = ["acct-1", "acct-2", "acct-3"];
    for (i, id) in ids.iter().enumerate() {
        assert!(h.monitor.ensure_subscribed(&AccountId::from(*id), None));
        h.push.dispatch(online_event(id, &format!("Shop{i}")));
    }

    let monitor = h.monitor.clone();
    wait_until(move || monitor.summary().online == 3).await;

    // All three expire within one debounce window.
    for id in ids {
        h.push.dispatch(offline_event(id));
    }

    let mut names = next_expiry(&mut events).await;
    names.sort();
    assert_eq!(names, vec!["Shop0", "Shop1", "Shop2"]);

    // The window produced exactly one aggregated notification.
    tokio::time::sleep(Duration::from_millis(400)).await;
    loop {
        match events.try_recv() {
            Ok(MonitorEvent::AccountsExpired { .. }) => panic!("second expiry notification"),
            Ok(_) => {}
            Err(_) => break,
        }
    }

    h.monitor.stop().await;
}
