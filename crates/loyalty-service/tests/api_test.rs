//! HTTP 接口测试
//!
//! 直接对 Router 发请求，覆盖统一响应格式、错误码与管理令牌

mod common;

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use loyalty_core::api::{self, AppState};
use loyalty_core::models::{GiftKind, ItemKind, RecipientMode};
use loyalty_core::notification::LogNotifier;
use loyalty_core::repository::{LoyaltyStore, MemoryLoyaltyStore};

use common::{
    ADMIN_TOKEN, FakeWorkspace, REWARDS_DB, app_state, gift_link, page, test_config,
};

fn setup() -> (Arc<MemoryLoyaltyStore>, Router) {
    let store = Arc::new(MemoryLoyaltyStore::new());
    let state = app_state(store.clone(), Arc::new(FakeWorkspace::new()));
    (store, api::app(state))
}

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn with_admin(mut request: Request<Body>, token: &str) -> Request<Body> {
    request
        .headers_mut()
        .insert("X-Admin-Token", token.parse().unwrap());
    request
}

#[tokio::test]
async fn test_health_and_ready() {
    let (_, app) = setup();
    let (status, body) = call(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = call(&app, get("/ready")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["checks"]["database"], "ok");
}

#[tokio::test]
async fn test_get_client_envelope() {
    let (store, app) = setup();
    let client = store.seed_client("5550001111", 120);

    let (status, body) = call(&app, get(&format!("/api/clients/{}", client.id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["code"], "SUCCESS");
    assert_eq!(body["data"]["balance"], 120);
    assert_eq!(body["data"]["phone"], "5550001111");

    let (status, body) = call(&app, get("/api/clients/9999")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "CLIENT_NOT_FOUND");
    assert!(body["data"].is_null());
}

#[tokio::test]
async fn test_redeem_rejections_map_to_status_codes() {
    let (store, app) = setup();
    let client = store.seed_client("5550002222", 100);
    let item = store.seed_item("Mochila", ItemKind::Product, 150, Some(2));

    let (status, body) = call(
        &app,
        post_json(
            "/api/redemptions",
            json!({"clientId": client.id, "catalogItemId": item.id}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INSUFFICIENT_BALANCE");

    let (status, body) = call(
        &app,
        post_json("/api/redemptions", json!({"clientId": 0, "catalogItemId": item.id})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_redeem_and_movements() {
    let (store, app) = setup();
    let client = store.seed_client("5550003333", 200);
    let item = store.seed_item("Revisión", ItemKind::Service, 150, None);

    let (status, body) = call(
        &app,
        post_json(
            "/api/redemptions",
            json!({"clientId": client.id, "catalogItemId": item.id}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "in_queue");
    assert_eq!(body["data"]["balanceAfter"], 50);

    let (status, body) = call(
        &app,
        get(&format!("/api/clients/{}/movements?limit=1", client.id)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let movements = body["data"].as_array().unwrap();
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0]["delta"], -150);
}

#[tokio::test]
async fn test_gift_redeem_errors() {
    let (store, app) = setup();
    let client = store.seed_client("5550004444", 0);
    let mut link = gift_link("API-1", GiftKind::Points, RecipientMode::Single, 30);
    link.recipient_phone = Some("5550009999".to_string());
    store.seed_gift_link(link);

    let (status, body) = call(
        &app,
        post_json(
            "/api/gifts/redeem",
            json!({"code": "API-1", "phone": client.phone}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "WRONG_RECIPIENT");

    let (status, body) = call(
        &app,
        post_json(
            "/api/gifts/redeem",
            json!({"code": "NOPE", "phone": client.phone}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "GIFT_LINK_NOT_FOUND");
}

#[tokio::test]
async fn test_admin_requires_token() {
    let (store, app) = setup();
    let client = store.seed_client("5550005555", 10);
    let uri = format!("/api/admin/clients/{}/audit", client.id);

    let (status, body) = call(&app, get(&uri)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let (status, _) = call(&app, with_admin(get(&uri), "wrong")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = call(&app, with_admin(get(&uri), ADMIN_TOKEN)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["consistent"], true);
    assert_eq!(body["data"]["recomputedBalance"], 10);
}

#[tokio::test]
async fn test_admin_adjust_points() {
    let (store, app) = setup();
    let client = store.seed_client("5550006666", 10);
    let uri = format!("/api/admin/clients/{}/adjust", client.id);

    let (status, body) = call(
        &app,
        with_admin(
            post_json(&uri, json!({"delta": -20, "reason": "ajuste"})),
            ADMIN_TOKEN,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INSUFFICIENT_BALANCE");

    let (status, body) = call(
        &app,
        with_admin(
            post_json(&uri, json!({"delta": 15, "reason": "bono"})),
            ADMIN_TOKEN,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["client"]["balance"], 25);
}

#[tokio::test]
async fn test_dead_letter_endpoints() {
    let (_, app) = setup();

    let (status, body) = call(
        &app,
        with_admin(get("/api/admin/sync/dead-letters"), ADMIN_TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));

    let (status, body) = call(
        &app,
        with_admin(
            post_json("/api/admin/sync/42/requeue", json!({})),
            ADMIN_TOKEN,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "SYNC_ITEM_NOT_FOUND");
}

#[tokio::test]
async fn test_webhook_endpoint() {
    let (_, app) = setup();

    let (status, body) = call(
        &app,
        post_json("/webhooks/workspace", json!({"challenge": "abc"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["challenge"], "abc");

    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/workspace")
        .body(Body::from("not json"))
        .unwrap();
    let (status, body) = call(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "skipped");
}

#[tokio::test]
async fn test_webhook_token_guard_lets_challenge_through() {
    let mut config = test_config();
    config.webhook.verification_token = Some("hook-secret".to_string());
    let store = Arc::new(MemoryLoyaltyStore::new());
    let state = AppState::new(
        store,
        Arc::new(FakeWorkspace::new()),
        Arc::new(LogNotifier),
        &config,
    );
    let app = api::app(state);

    // 订阅校验请求不带令牌头
    let (status, body) = call(
        &app,
        post_json("/webhooks/workspace", json!({"verification_token": "v-1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verification_token"], "v-1");

    let event = json!({"type": "page.properties_updated", "entity": {"id": "page-1"}});
    let (status, _) = call(&app, post_json("/webhooks/workspace", event.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let mut request = post_json("/webhooks/workspace", event);
    request
        .headers_mut()
        .insert("X-Webhook-Token", "wrong".parse().unwrap());
    let (status, _) = call(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_reconcile_links_rewards_pages() {
    let store = Arc::new(MemoryLoyaltyStore::new());
    let workspace = Arc::new(FakeWorkspace::new());
    let app = api::app(app_state(store.clone(), workspace.clone()));
    let client = store.seed_client("5550007777", 40);

    workspace.put(page(
        "rewards-1",
        REWARDS_DB,
        json!({"Teléfono": {"type": "phone_number", "phone_number": "555 000 7777"}}),
    ));
    workspace.put(page(
        "rewards-2",
        REWARDS_DB,
        json!({"Teléfono": {"type": "phone_number", "phone_number": "5550000000"}}),
    ));

    let (status, body) = call(
        &app,
        with_admin(post_json("/api/admin/reconcile", json!({})), ADMIN_TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["scanned"], 2);
    assert_eq!(body["data"]["linked"], 1);
    assert_eq!(body["data"]["unmatched"], 1);
    assert_eq!(body["data"]["unmatchedPageIds"], json!(["rewards-2"]));

    let client = store.get_client(client.id).await.unwrap().unwrap();
    assert_eq!(client.rewards_page_id.as_deref(), Some("rewards-1"));
    assert_eq!(client.balance, 40);

    // 第二次对账只计为已关联
    let (_, body) = call(
        &app,
        with_admin(post_json("/api/admin/reconcile", json!({})), ADMIN_TOKEN),
    )
    .await;
    assert_eq!(body["data"]["alreadyLinked"], 1);
    assert_eq!(body["data"]["linked"], 0);
}
