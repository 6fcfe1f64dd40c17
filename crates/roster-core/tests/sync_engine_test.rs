// Integration tests for the sync engine's decision matrix, using
// wiremock stand-ins for the cloud backend and the automation host.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use roster_api::{CloudClient, HostClient, TransportConfig};
use roster_core::account_store::MemoryAccountStore;
use roster_core::{AccountId, AccountStore, RateLimiter, SyncAction, SyncEngine};

// ── Harness ─────────────────────────────────────────────────────────

struct Harness {
    cloud: MockServer,
    host: MockServer,
    engine: SyncEngine,
    accounts: Arc<MemoryAccountStore>,
}

async fn setup() -> Harness {
    let cloud = MockServer::start().await;
    let host = MockServer::start().await;

    let cloud_client = CloudClient::new(
        cloud.uri().parse().unwrap(),
        "ops-team",
        &TransportConfig::default(),
    )
    .unwrap();
    let host_client = HostClient::new(
        format!("{}/", host.uri()).parse().unwrap(),
        &TransportConfig::default(),
    )
    .unwrap();

    let accounts = Arc::new(MemoryAccountStore::new());
    let engine = SyncEngine::new(
        Arc::new(cloud_client),
        Arc::new(host_client),
        Arc::clone(&accounts) as Arc<dyn AccountStore>,
        Arc::new(RateLimiter::per_second(1000)),
    );

    Harness {
        cloud,
        host,
        engine,
        accounts,
    }
}

fn ok_envelope(data: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "success": true, "data": data }))
}

async fn mock_local_cookies(host: &MockServer, id: &str, cookies: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/profile/cookies"))
        .and(body_partial_json(json!({ "id": id })))
        .respond_with(ok_envelope(json!({ "cookies": cookies })))
        .mount(host)
        .await;
}

async fn mock_cloud_status(cloud: &MockServer, id: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path("/api/status"))
        .and(query_param("action", "account"))
        .and(query_param("accountId", id))
        .respond_with(response)
        .mount(cloud)
        .await;
}

// ── Case 1: nothing anywhere ────────────────────────────────────────

#[tokio::test]
async fn no_local_no_cloud_registers_placeholder() {
    let h = setup().await;
    mock_local_cookies(&h.host, "p-1", json!([])).await;
    mock_cloud_status(&h.cloud, "p-1", ResponseTemplate::new(404)).await;

    Mock::given(method("POST"))
        .and(path("/api/account"))
        .and(query_param("action", "register"))
        .and(body_partial_json(json!({ "accountId": "p-1", "owner": "ops-team" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&h.cloud)
        .await;

    let result = h.engine.sync_single(&AccountId::from("p-1"), false).await;
    assert!(result.success);
    assert_eq!(result.action, Some(SyncAction::LocalToCloud));
}

#[tokio::test]
async fn failed_placeholder_registration_degrades_to_skip() {
    let h = setup().await;
    mock_local_cookies(&h.host, "p-1", json!([])).await;
    mock_cloud_status(&h.cloud, "p-1", ResponseTemplate::new(404)).await;

    Mock::given(method("POST"))
        .and(path("/api/account"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "success": false, "error": "quota exceeded" })),
        )
        .mount(&h.cloud)
        .await;

    let result = h.engine.sync_single(&AccountId::from("p-1"), false).await;
    assert!(result.success);
    assert_eq!(result.action, Some(SyncAction::Skip));
}

// ── Case 2: cloud record, no cookie anywhere ────────────────────────

#[tokio::test]
async fn empty_cloud_record_waits_for_push() {
    let h = setup().await;
    mock_local_cookies(&h.host, "p-2", json!([])).await;
    mock_cloud_status(
        &h.cloud,
        "p-2",
        ok_envelope(json!({ "cookieStatus": "pending" })),
    )
    .await;

    // Same fixed inputs twice: the decision must be deterministic.
    for _ in 0..2 {
        let result = h.engine.sync_single(&AccountId::from("p-2"), false).await;
        assert!(result.success);
        assert_eq!(result.action, Some(SyncAction::Skip));
    }
}

// ── Case 3: cloud cookie, no local cookie ───────────────────────────

#[tokio::test]
async fn cloud_cookie_is_pulled_into_empty_profile() {
    let h = setup().await;
    mock_local_cookies(&h.host, "p-3", json!([])).await;
    mock_cloud_status(
        &h.cloud,
        "p-3",
        ok_envelope(json!({
            "cookieStatus": "online",
            "accountInfo": { "nickname": "Shop42", "avatar": "", "loginMethod": "channels_helper" }
        })),
    )
    .await;

    Mock::given(method("POST"))
        .and(path("/api/sync-cookie"))
        .and(body_partial_json(json!({ "accountId": "p-3", "owner": "ops-team" })))
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

    Mock::given(method("POST"))
        .and(path("/profile/cookies/set"))
        .and(body_partial_json(json!({
            "id": "p-3",
            "cookies": [
                { "name": "sessionid", "value": "X" },
                { "name": "wxuin", "value": "Y" }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&h.host)
        .await;

    let result = h.engine.sync_single(&AccountId::from("p-3"), false).await;
    assert!(result.success);
    assert_eq!(result.action, Some(SyncAction::CloudToLocal));
    assert_eq!(result.account_info.unwrap().nickname, "Shop42");

    // Display metadata was persisted locally.
    let record = h.accounts.get(&AccountId::from("p-3")).unwrap();
    assert_eq!(record.account_info.nickname, "Shop42");
}

// ── Cases 4/5: local cookie pushed up ───────────────────────────────

#[tokio::test]
async fn local_cookies_register_a_new_cloud_record() {
    let h = setup().await;
    mock_local_cookies(
        &h.host,
        "p-4",
        json!([
            { "name": "sessionid", "value": "X", "domain": "weixin.qq.com" },
            { "name": "wxuin", "value": "Y", "domain": "weixin.qq.com" }
        ]),
    )
    .await;
    mock_cloud_status(&h.cloud, "p-4", ResponseTemplate::new(404)).await;

    Mock::given(method("POST"))
        .and(path("/api/account"))
        .and(query_param("action", "auto"))
        .and(body_partial_json(json!({
            "accountId": "p-4",
            "loginMethod": "channels_helper",
            "owner": "ops-team",
            "cookies": [
                { "name": "sessionid", "value": "X", "domain": ".weixin.qq.com" },
                { "name": "wxuin", "value": "Y", "domain": ".weixin.qq.com" }
            ]
        })))
        .respond_with(ok_envelope(json!({
            "accountId": "p-4",
            "cookieStatus": "online",
            "accountInfo": { "nickname": "Shop42", "avatar": "", "loginMethod": "channels_helper" }
        })))
        .expect(1)
        .mount(&h.cloud)
        .await;

    let result = h.engine.sync_single(&AccountId::from("p-4"), false).await;
    assert!(result.success);
    assert_eq!(result.action, Some(SyncAction::LocalToCloud));
}

#[tokio::test]
async fn local_cookies_update_a_cookieless_cloud_record() {
    let h = setup().await;
    mock_local_cookies(
        &h.host,
        "p-5",
        json!([{ "name": "talent_token", "value": "T", "domain": "weixin.qq.com" }]),
    )
    .await;
    mock_cloud_status(
        &h.cloud,
        "p-5",
        ok_envelope(json!({ "cookieStatus": "pending" })),
    )
    .await;

    Mock::given(method("POST"))
        .and(path("/api/account"))
        .and(query_param("action", "auto"))
        .and(body_partial_json(json!({ "loginMethod": "shop_helper" })))
        .respond_with(ok_envelope(json!({
            "accountId": "p-5",
            "cookieStatus": "online",
            "accountInfo": { "nickname": "Talent9", "avatar": "", "loginMethod": "shop_helper" }
        })))
        .expect(1)
        .mount(&h.cloud)
        .await;

    let result = h.engine.sync_single(&AccountId::from("p-5"), false).await;
    assert!(result.success);
    assert_eq!(result.action, Some(SyncAction::LocalToCloud));
}

// ── Case 6: both sides hold cookies ─────────────────────────────────

async fn mock_both_sides(
    h: &Harness,
    id: &str,
    local_cookies: serde_json::Value,
    cloud_cookies: serde_json::Value,
) {
    mock_local_cookies(&h.host, id, local_cookies).await;
    mock_cloud_status(
        &h.cloud,
        id,
        ok_envelope(json!({
            "cookieStatus": "online",
            "accountInfo": { "nickname": "Shop42", "avatar": "", "loginMethod": "channels_helper" }
        })),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/api/sync-cookie"))
        .and(body_partial_json(json!({ "accountId": id })))
        .respond_with(ok_envelope(json!({
            "cookies": cloud_cookies,
            "nickname": "Shop42"
        })))
        .mount(&h.cloud)
        .await;
}

#[tokio::test]
async fn matching_cookies_skip_regardless_of_order() {
    let h = setup().await;
    // Cloud returns the same pairs in a different order.
    mock_both_sides(
        &h,
        "p-6",
        json!([
            { "name": "sessionid", "value": "X", "domain": ".weixin.qq.com" },
            { "name": "wxuin", "value": "Y", "domain": ".weixin.qq.com" }
        ]),
        json!([
            { "name": "wxuin", "value": "Y", "domain": ".weixin.qq.com" },
            { "name": "sessionid", "value": "X", "domain": ".weixin.qq.com" }
        ]),
    )
    .await;

    let result = h.engine.sync_single(&AccountId::from("p-6"), false).await;
    assert!(result.success);
    assert_eq!(result.action, Some(SyncAction::Skip));
}

#[tokio::test]
async fn matching_cookies_skip_despite_local_tracking_noise() {
    let h = setup().await;
    // A live profile carries tracking cookies the cloud never stores;
    // only the identity set is compared.
    mock_both_sides(
        &h,
        "p-6b",
        json!([
            { "name": "_ga", "value": "GA1.2.3", "domain": ".weixin.qq.com" },
            { "name": "sessionid", "value": "X", "domain": ".weixin.qq.com" },
            { "name": "pgv_pvid", "value": "12345", "domain": ".weixin.qq.com" },
            { "name": "wxuin", "value": "Y", "domain": ".weixin.qq.com" }
        ]),
        json!([
            { "name": "sessionid", "value": "X", "domain": ".weixin.qq.com" },
            { "name": "wxuin", "value": "Y", "domain": ".weixin.qq.com" }
        ]),
    )
    .await;

    let result = h.engine.sync_single(&AccountId::from("p-6b"), false).await;
    assert!(result.success);
    assert_eq!(result.action, Some(SyncAction::Skip));
}

#[tokio::test]
async fn drifted_cookies_pull_from_cloud() {
    let h = setup().await;
    mock_both_sides(
        &h,
        "p-7",
        json!([
            { "name": "sessionid", "value": "X", "domain": ".weixin.qq.com" },
            { "name": "wxuin", "value": "Y", "domain": ".weixin.qq.com" }
        ]),
        json!([
            { "name": "sessionid", "value": "NEWER", "domain": ".weixin.qq.com" },
            { "name": "wxuin", "value": "Y", "domain": ".weixin.qq.com" }
        ]),
    )
    .await;

    Mock::given(method("POST"))
        .and(path("/profile/cookies/set"))
        .and(body_partial_json(json!({
            "cookies": [{ "name": "sessionid", "value": "NEWER" }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&h.host)
        .await;

    let result = h.engine.sync_single(&AccountId::from("p-7"), false).await;
    assert!(result.success);
    assert_eq!(result.action, Some(SyncAction::CloudToLocal));
}

#[tokio::test]
async fn force_pulls_even_when_cookies_match() {
    let h = setup().await;
    mock_both_sides(
        &h,
        "p-8",
        json!([
            { "name": "sessionid", "value": "X", "domain": ".weixin.qq.com" },
            { "name": "wxuin", "value": "Y", "domain": ".weixin.qq.com" }
        ]),
        json!([
            { "name": "sessionid", "value": "X", "domain": ".weixin.qq.com" },
            { "name": "wxuin", "value": "Y", "domain": ".weixin.qq.com" }
        ]),
    )
    .await;

    Mock::given(method("POST"))
        .and(path("/profile/cookies/set"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&h.host)
        .await;

    let result = h.engine.sync_single(&AccountId::from("p-8"), true).await;
    assert_eq!(result.action, Some(SyncAction::CloudToLocal));
}

// ── Failure handling ────────────────────────────────────────────────

#[tokio::test]
async fn cloud_status_failure_aborts_the_decision() {
    let h = setup().await;
    mock_local_cookies(&h.host, "p-9", json!([])).await;
    mock_cloud_status(&h.cloud, "p-9", ResponseTemplate::new(500)).await;

    let result = h.engine.sync_single(&AccountId::from("p-9"), false).await;
    assert!(!result.success);
    assert!(result.action.is_none());
}

#[tokio::test]
async fn host_cookie_read_failure_degrades_to_empty() {
    let h = setup().await;
    // Host returns garbage: the read fails, the engine proceeds as if
    // the profile were empty and pulls the cloud cookie.
    Mock::given(method("POST"))
        .and(path("/profile/cookies"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&h.host)
        .await;
    mock_cloud_status(
        &h.cloud,
        "p-10",
        ok_envelope(json!({
            "cookieStatus": "online",
            "accountInfo": { "nickname": "Shop42", "avatar": "", "loginMethod": "channels_helper" }
        })),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/api/sync-cookie"))
        .respond_with(ok_envelope(json!({
            "cookies": [{ "name": "sessionid", "value": "X", "domain": ".weixin.qq.com" }]
        })))
        .mount(&h.cloud)
        .await;
    Mock::given(method("POST"))
        .and(path("/profile/cookies/set"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .mount(&h.host)
        .await;

    let result = h.engine.sync_single(&AccountId::from("p-10"), false).await;
    assert_eq!(result.action, Some(SyncAction::CloudToLocal));
}

// ── Single-flight ───────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_syncs_collapse_into_one_operation() {
    let h = setup().await;

    Mock::given(method("POST"))
        .and(path("/profile/cookies"))
        .respond_with(
            ok_envelope(json!({ "cookies": [] })).set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&h.host)
        .await;
    mock_cloud_status(
        &h.cloud,
        "p-11",
        ok_envelope(json!({ "cookieStatus": "pending" })),
    )
    .await;

    let id = AccountId::from("p-11");
    let e1 = h.engine.clone();
    let e2 = h.engine.clone();
    let id1 = id.clone();
    let id2 = id.clone();

    let (r1, r2) = tokio::join!(
        tokio::spawn(async move { e1.sync_single(&id1, false).await }),
        tokio::spawn(async move { e2.sync_single(&id2, false).await }),
    );
    let (r1, r2) = (r1.unwrap(), r2.unwrap());

    // Both callers observe the same structured result, and the host saw
    // exactly one cookie read (verified by the mock's expect count).
    assert_eq!(r1, r2);
    assert_eq!(r1.action, Some(SyncAction::Skip));
}

// ── Name sync ───────────────────────────────────────────────────────

#[tokio::test]
async fn name_sync_renames_only_mismatches() {
    let h = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/status"))
        .and(query_param("action", "batch"))
        .respond_with(ok_envelope(json!({
            "total": 2,
            "found": 2,
            "accounts": {
                "p-1": { "accountInfo": { "nickname": "Renamed", "avatar": "" } },
                "p-2": { "accountInfo": { "nickname": "Same", "avatar": "" } }
            }
        })))
        .mount(&h.cloud)
        .await;

    Mock::given(method("POST"))
        .and(path("/profile/list"))
        .respond_with(ok_envelope(json!({
            "list": [
                { "id": "p-1", "name": "Old Name" },
                { "id": "p-2", "name": "Same" }
            ],
            "total": 2
        })))
        .mount(&h.host)
        .await;

    Mock::given(method("POST"))
        .and(path("/profile/rename"))
        .and(body_partial_json(json!({ "id": "p-1", "name": "Renamed" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&h.host)
        .await;

    let report = h
        .engine
        .sync_profile_names_from_cloud(&["p-1".into(), "p-2".into()])
        .await;
    assert_eq!(report.updated, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 0);
}
