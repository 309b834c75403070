//! 并发兑换测试
//!
//! 多个任务同时争抢库存、余额与礼品名额，检查不超卖、不透支、不重复发放

mod common;

use std::sync::Arc;

use tokio::task::JoinSet;

use loyalty_core::error::LoyaltyError;
use loyalty_core::models::{GiftKind, GiftLinkStatus, ItemKind, RecipientMode};
use loyalty_core::repository::{LoyaltyStore, MemoryLoyaltyStore};

use common::{FakeWorkspace, app_state, gift_link};

fn setup() -> (Arc<MemoryLoyaltyStore>, loyalty_core::api::AppState) {
    let store = Arc::new(MemoryLoyaltyStore::new());
    let state = app_state(store.clone(), Arc::new(FakeWorkspace::new()));
    (store, state)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stock_never_oversold() {
    let (store, state) = setup();
    let item = store.seed_item("Gorra", ItemKind::Product, 50, Some(5));
    let clients: Vec<_> = (0..20)
        .map(|i| store.seed_client(&format!("55510000{i:02}"), 100))
        .collect();

    let mut tasks = JoinSet::new();
    for client in &clients {
        let redemptions = state.redemptions.clone();
        let (client_id, item_id) = (client.id, item.id);
        tasks.spawn(async move { redemptions.redeem(client_id, item_id).await });
    }

    let mut succeeded = 0;
    let mut unavailable = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined.unwrap() {
            Ok(_) => succeeded += 1,
            Err(LoyaltyError::ItemUnavailable(_)) => unavailable += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(succeeded, 5);
    assert_eq!(unavailable, 15);
    let item = store.get_catalog_item(item.id).await.unwrap().unwrap();
    assert_eq!(item.stock, Some(0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_client_never_overdrawn() {
    let (store, state) = setup();
    let client = store.seed_client("5552000000", 500);
    let item = store.seed_item("Lavado", ItemKind::Service, 120, None);

    let mut tasks = JoinSet::new();
    for _ in 0..10 {
        let redemptions = state.redemptions.clone();
        let (client_id, item_id) = (client.id, item.id);
        tasks.spawn(async move { redemptions.redeem(client_id, item_id).await });
    }

    let mut succeeded = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined.unwrap() {
            Ok(outcome) => {
                assert!(outcome.movement.balance_after() >= 0);
                succeeded += 1;
            }
            Err(LoyaltyError::InsufficientBalance { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    // 500 / 120 = 4
    assert_eq!(succeeded, 4);
    let client = state.ledger.get_client(client.id).await.unwrap();
    assert_eq!(client.balance, 20);

    let audit = state.ledger.audit_client(client.id).await.unwrap();
    assert!(audit.consistent, "{audit:?}");
    assert_eq!(audit.recomputed_balance, 20);
    assert_eq!(audit.movement_count, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_link_granted_exactly_once() {
    let (store, state) = setup();
    let client = store.seed_client("5553000000", 0);
    let mut link = gift_link("SOLO-1", GiftKind::Points, RecipientMode::Single, 40);
    link.recipient_phone = Some(client.phone.clone());
    store.seed_gift_link(link);

    let mut tasks = JoinSet::new();
    for _ in 0..50 {
        let gifts = state.gifts.clone();
        let phone = client.phone.clone();
        tasks.spawn(async move { gifts.redeem_gift_link("SOLO-1", &phone).await });
    }

    let mut granted = 0;
    let mut rejected = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined.unwrap() {
            Ok(_) => granted += 1,
            Err(LoyaltyError::AlreadyRedeemed(code)) => {
                assert_eq!(code, "SOLO-1");
                rejected += 1;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(granted, 1);
    assert_eq!(rejected, 49);

    let link = store.get_gift_link("SOLO-1").await.unwrap().unwrap();
    assert_eq!(link.status, GiftLinkStatus::Redeemed);
    assert_eq!(link.redeemed_by, Some(client.id));
    assert_eq!(store.list_benefits_for_link(link.id).await.unwrap().len(), 1);

    let client = state.ledger.get_client(client.id).await.unwrap();
    assert_eq!(client.balance, 40);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_campaign_cap_respected_under_contention() {
    const CAP: i32 = 10;
    let (store, state) = setup();
    let mut link = gift_link("CAMP-1", GiftKind::Service, RecipientMode::Campaign, 0);
    link.cap = Some(CAP);
    store.seed_gift_link(link);

    let phones: Vec<String> = (0..CAP + 50)
        .map(|i| store.seed_client(&format!("5554{i:06}"), 0).phone)
        .collect();

    let mut tasks = JoinSet::new();
    for phone in phones {
        let gifts = state.gifts.clone();
        tasks.spawn(async move { gifts.redeem_gift_link("CAMP-1", &phone).await });
    }

    let mut granted = 0;
    let mut exhausted = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined.unwrap() {
            Ok(_) => granted += 1,
            Err(LoyaltyError::CampaignExhausted(_)) => exhausted += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(granted, CAP);
    assert_eq!(exhausted, 50);

    let link = store.get_gift_link("CAMP-1").await.unwrap().unwrap();
    assert_eq!(link.counter, CAP);
    assert_eq!(link.status, GiftLinkStatus::Exhausted);
    assert_eq!(
        store.list_benefits_for_link(link.id).await.unwrap().len(),
        CAP as usize
    );
}
