// Integration tests for the onboarding orchestrator: QR and permanent
// link flows, idempotent virtual→real migration, expiry, and the
// operator escape hatches (force complete, cleanup).

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use roster_api::{
    CloudClient, CookieItem, HostClient, PushChannel, PushConfig, PushEvent, ReconnectConfig,
    TransportConfig,
};
use roster_core::account_store::MemoryAccountStore;
use roster_core::{
    CreateConfig, CreateState, EngineConfig, LoginWay, OnboardStep, OnboardingSession,
    RateLimiter, StatusMonitor, SyncEngine,
};

// ── Harness ─────────────────────────────────────────────────────────

struct Harness {
    cloud: MockServer,
    host: MockServer,
    push: PushChannel,
    session: OnboardingSession,
}

async fn setup(max_accounts: usize) -> Harness {
    let cloud = MockServer::start().await;
    let host = MockServer::start().await;

    let mut config = EngineConfig::new(
        cloud.uri().parse().unwrap(),
        format!("{}/", host.uri()).parse().unwrap(),
        "ops-team",
    );
    config.push = PushConfig {
        url: Some("ws://127.0.0.1:9/".parse().unwrap()),
        auth_key: None,
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(10),
            max_retries: Some(0),
        },
    };
    config.poll_interval = Duration::from_millis(50);
    config.creation_stagger = Duration::from_millis(10);
    config.max_onboarding_accounts = max_accounts;

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
        Arc::clone(&accounts) as Arc<dyn roster_core::AccountStore>,
        Arc::clone(&limiter),
    );
    // Monitor is constructed but not started: onboarding only needs its
    // subscription registry and refresh, not the background workers.
    let monitor = StatusMonitor::new(
        &config,
        Arc::clone(&cloud_client),
        Arc::clone(&host_client),
        push.clone(),
        Arc::clone(&accounts) as Arc<dyn roster_core::AccountStore>,
        Arc::clone(&limiter),
        sync,
    );
    let session = OnboardingSession::new(
        &config,
        cloud_client,
        host_client,
        limiter,
        monitor,
        accounts,
    );

    Harness {
        cloud,
        host,
        push,
        session,
    }
}

fn ok_envelope(data: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "success": true, "data": data }))
}

fn qr_config() -> CreateConfig {
    CreateConfig {
        login_way: LoginWay::QrCode,
        group_id: Some("group-1".into()),
        ..CreateConfig::default()
    }
}

fn link_config() -> CreateConfig {
    CreateConfig {
        login_way: LoginWay::PermanentLink,
        group_id: Some("group-1".into()),
        ..CreateConfig::default()
    }
}

/// Common mocks every flow touches: the login-state poke and the
/// post-login cache refresh.
async fn mount_flow_mocks(h: &Harness) {
    Mock::given(method("GET"))
        .and(path("/api/status"))
        .and(query_param("action", "qr"))
        .respond_with(ok_envelope(json!({ "success": true, "scanned": false })))
        .mount(&h.cloud)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/status"))
        .and(query_param("action", "account"))
        .respond_with(ok_envelope(json!({
            "cookieStatus": "online",
            "accountInfo": { "nickname": "Shop42", "avatar": "", "loginMethod": "channels_helper" }
        })))
        .mount(&h.cloud)
        .await;
}

fn login_completed_event(account_id: &str) -> PushEvent {
    PushEvent {
        account_id: account_id.to_owned(),
        confirmed: Some(true),
        cookie_status: Some("online".into()),
        nickname: Some("Shop42".into()),
        cookies: Some(vec![
            CookieItem::new("sessionid", "X", ".weixin.qq.com"),
            CookieItem::new("wxuin", "Y", ".weixin.qq.com"),
        ]),
        ..PushEvent::default()
    }
}

async fn wait_for_state(session: &OnboardingSession, index: usize, state: CreateState) {
    for _ in 0..100 {
        if session.items().await[index].state == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let actual = session.items().await[index].state;
    panic!("slot {index} never reached {state}, stuck at {actual}");
}

// ── QR flow ─────────────────────────────────────────────────────────

#[tokio::test]
async fn qr_flow_migrates_virtual_id_exactly_once() {
    let h = setup(10).await;
    mount_flow_mocks(&h).await;

    Mock::given(method("POST"))
        .and(path("/api/generate-link"))
        .and(body_partial_json(json!({ "loginWay": "qr_code", "owner": "ops-team" })))
        .respond_with(ok_envelope(json!({
            "accountId": "bound",
            "url": "https://cloud.example/login/bound",
            "loginQrUrl": "https://upstream.example/qr/abc"
        })))
        .expect(1)
        .mount(&h.cloud)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/sync-cookie"))
        .respond_with(ok_envelope(json!({
            "cookies": [
                { "name": "sessionid", "value": "X", "domain": ".weixin.qq.com" },
                { "name": "wxuin", "value": "Y", "domain": ".weixin.qq.com" }
            ],
            "nickname": "Shop42",
            "loginMethod": "channels_helper"
        })))
        .mount(&h.cloud)
        .await;

    // Migration atomicity: exactly one real profile created, exactly one
    // virtual record deleted, even with a duplicate completion push.
    Mock::given(method("POST"))
        .and(path("/profile/create"))
        .respond_with(ok_envelope(json!({ "id": "real-1" })))
        .expect(1)
        .mount(&h.host)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/admin"))
        .and(query_param("action", "delete-link"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&h.cloud)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/account"))
        .and(query_param("action", "auto"))
        .and(body_partial_json(json!({ "accountId": "real-1" })))
        .respond_with(ok_envelope(json!({
            "accountId": "real-1",
            "cookieStatus": "online",
            "accountInfo": { "nickname": "Shop42", "avatar": "", "loginMethod": "channels_helper" }
        })))
        .expect(1)
        .mount(&h.cloud)
        .await;

    h.session.update_config(0, qr_config()).await.unwrap();
    assert_eq!(h.session.go_next().await.unwrap(), OnboardStep::Login);

    wait_for_state(&h.session, 0, CreateState::WaitingScan).await;
    let item = h.session.items().await.into_iter().next().unwrap();
    assert!(item.is_virtual);
    assert!(item.qr_url.is_some());
    let virtual_id = item.account_id.unwrap();

    // At-least-once delivery: the completion push arrives twice.
    h.push.dispatch(login_completed_event(virtual_id.as_str()));
    h.push.dispatch(login_completed_event(virtual_id.as_str()));

    wait_for_state(&h.session, 0, CreateState::Success).await;
    let item = h.session.items().await.into_iter().next().unwrap();
    assert_eq!(item.account_id.unwrap().as_str(), "real-1");
    assert!(!item.is_virtual);
    assert_eq!(item.account_info.unwrap().nickname, "Shop42");

    assert_eq!(h.session.step(), OnboardStep::Done);
    assert_eq!(h.session.success_count().await, 1);

    h.session.close().await;
}

#[tokio::test]
async fn expired_qr_fails_the_slot() {
    let h = setup(10).await;
    mount_flow_mocks(&h).await;

    Mock::given(method("POST"))
        .and(path("/api/generate-link"))
        .respond_with(ok_envelope(json!({
            "accountId": "bound",
            "url": "https://cloud.example/login/bound",
            "loginQrUrl": "https://upstream.example/qr/abc"
        })))
        .mount(&h.cloud)
        .await;

    h.session.update_config(0, qr_config()).await.unwrap();
    h.session.go_next().await.unwrap();
    wait_for_state(&h.session, 0, CreateState::WaitingScan).await;
    let virtual_id = h.session.items().await[0].account_id.clone().unwrap();

    h.push.dispatch(PushEvent {
        account_id: virtual_id.as_str().to_owned(),
        expired: Some(true),
        ..PushEvent::default()
    });

    wait_for_state(&h.session, 0, CreateState::Failed).await;
    let item = h.session.items().await.into_iter().next().unwrap();
    assert_eq!(item.error.as_deref(), Some("login QR expired"));
    assert_eq!(h.session.step(), OnboardStep::Done);

    h.session.close().await;
}

// ── Permanent link flow ─────────────────────────────────────────────

#[tokio::test]
async fn link_flow_completes_without_migration() {
    let h = setup(10).await;
    mount_flow_mocks(&h).await;

    // The real profile is created up front, before the link.
    Mock::given(method("POST"))
        .and(path("/profile/create"))
        .respond_with(ok_envelope(json!({ "id": "real-9" })))
        .expect(1)
        .mount(&h.host)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate-link"))
        .and(body_partial_json(json!({
            "accountId": "real-9",
            "loginWay": "permanent_link"
        })))
        .respond_with(ok_envelope(json!({
            "accountId": "real-9",
            "url": "https://cloud.example/login/real-9",
            "qrCode": "data:image/png;base64,xyz"
        })))
        .expect(1)
        .mount(&h.cloud)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/sync-cookie"))
        .respond_with(ok_envelope(json!({
            "cookies": [
                { "name": "sessionid", "value": "X", "domain": ".weixin.qq.com" }
            ],
            "nickname": "Shop42"
        })))
        .mount(&h.cloud)
        .await;
    Mock::given(method("POST"))
        .and(path("/profile/cookies/set"))
        .and(body_partial_json(json!({ "id": "real-9" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&h.host)
        .await;

    // No migration in this flow: the virtual-record deletion endpoint
    // must never be hit.
    Mock::given(method("DELETE"))
        .and(path("/api/admin"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(0)
        .mount(&h.cloud)
        .await;

    h.session.update_config(0, link_config()).await.unwrap();
    h.session.go_next().await.unwrap();

    wait_for_state(&h.session, 0, CreateState::WaitingScan).await;
    let item = h.session.items().await.into_iter().next().unwrap();
    assert!(!item.is_virtual);
    assert_eq!(item.account_id.as_ref().unwrap().as_str(), "real-9");
    assert!(item.permanent_link.is_some());
    assert!(item.link_qr_code.is_some());

    h.push.dispatch(login_completed_event("real-9"));

    wait_for_state(&h.session, 0, CreateState::Success).await;
    assert_eq!(h.session.success_count().await, 1);

    h.session.close().await;
}

// ── Operator escape hatches ─────────────────────────────────────────

#[tokio::test]
async fn force_complete_fails_pending_slots_and_cleanup_deletes_virtuals() {
    let h = setup(10).await;
    mount_flow_mocks(&h).await;

    Mock::given(method("POST"))
        .and(path("/api/generate-link"))
        .respond_with(ok_envelope(json!({
            "accountId": "bound",
            "url": "https://cloud.example/login/bound",
            "loginQrUrl": "https://upstream.example/qr/abc"
        })))
        .mount(&h.cloud)
        .await;
    // Only the still-virtual slot's placeholder is deleted.
    Mock::given(method("DELETE"))
        .and(path("/api/admin"))
        .and(query_param("action", "delete-link"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&h.cloud)
        .await;

    h.session.update_config(0, qr_config()).await.unwrap();
    h.session.go_next().await.unwrap();
    wait_for_state(&h.session, 0, CreateState::WaitingScan).await;

    h.session.force_complete().await;
    let item = h.session.items().await.into_iter().next().unwrap();
    assert_eq!(item.state, CreateState::Failed);
    assert_eq!(item.error.as_deref(), Some("skipped by operator"));
    assert_eq!(h.session.step(), OnboardStep::Done);

    assert_eq!(h.session.cleanup_unused_links().await, 1);

    h.session.close().await;
}

// ── Slot management ─────────────────────────────────────────────────

#[tokio::test]
async fn slot_limits_and_validation_are_enforced() {
    let h = setup(3).await;

    // One slot exists at session start; the cap counts it.
    h.session.add_account(qr_config()).await.unwrap();
    h.session.add_account(qr_config()).await.unwrap();
    assert!(h.session.add_account(qr_config()).await.is_err());

    h.session.remove_account(2).await.unwrap();
    assert_eq!(h.session.items().await.len(), 2);

    // The default slot has no group selected, so the flow cannot start.
    let err = h.session.go_next().await.unwrap_err();
    assert!(err.to_string().contains("no group selected"));
    assert_eq!(h.session.step(), OnboardStep::Configure);

    h.session.close().await;
}
