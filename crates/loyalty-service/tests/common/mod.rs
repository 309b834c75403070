//! 集成测试共用的辅助函数与工作台替身
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use loyalty_core::api::AppState;
use loyalty_core::error::{LoyaltyError, Result};
use loyalty_core::models::{GiftKind, GiftLink, RecipientMode};
use loyalty_core::notification::LogNotifier;
use loyalty_core::repository::MemoryLoyaltyStore;
use loyalty_core::workspace::{Page, PageParent, PropertyMap, QueryResult, WorkspaceClient};
use loyalty_shared::config::AppConfig;

pub const REDEMPTIONS_DB: &str = "db-redemptions";
pub const TICKETS_DB: &str = "db-tickets";
pub const CLIENTS_DB: &str = "db-clients";
pub const REWARDS_DB: &str = "db-rewards";
pub const BENEFITS_DB: &str = "db-benefits";
pub const ADMIN_TOKEN: &str = "admin-test-token";

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.workspace.api_token = "ws-token".to_string();
    config.workspace.redemptions_database_id = REDEMPTIONS_DB.to_string();
    config.workspace.tickets_database_id = TICKETS_DB.to_string();
    config.workspace.clients_database_id = CLIENTS_DB.to_string();
    config.workspace.rewards_database_id = REWARDS_DB.to_string();
    config.workspace.benefits_database_id = BENEFITS_DB.to_string();
    config.admin.api_token = ADMIN_TOKEN.to_string();
    config.sync.initial_backoff_ms = 0;
    config.sync.max_backoff_ms = 0;
    config
}

pub fn app_state(store: Arc<MemoryLoyaltyStore>, workspace: Arc<FakeWorkspace>) -> AppState {
    AppState::new(store, workspace, Arc::new(LogNotifier), &test_config())
}

pub fn gift_link(code: &str, kind: GiftKind, mode: RecipientMode, points: i64) -> GiftLink {
    let now = Utc::now();
    GiftLink::new(code, kind, mode, points, now + Duration::days(7), now)
}

pub fn page(id: &str, database_id: &str, properties: Value) -> Page {
    Page {
        id: id.to_string(),
        parent: Some(PageParent {
            kind: Some("database_id".to_string()),
            database_id: Some(database_id.to_string()),
        }),
        properties: properties.as_object().cloned().unwrap_or_default(),
        last_edited_time: Some("2026-03-01T10:00:00.000Z".to_string()),
        archived: false,
    }
}

/// 内存中的工作台替身
///
/// 页面存放在 map 中；`fail_next(n)` 让接下来 n 次调用返回 503
#[derive(Default)]
pub struct FakeWorkspace {
    pages: Mutex<HashMap<String, Page>>,
    fetches: AtomicU64,
    creates: AtomicU64,
    failures: AtomicU32,
    seq: AtomicU64,
}

impl FakeWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, page: Page) {
        self.pages.lock().insert(page.id.clone(), page);
    }

    pub fn get(&self, id: &str) -> Option<Page> {
        self.pages.lock().get(id).cloned()
    }

    pub fn pages_in(&self, database_id: &str) -> Vec<Page> {
        self.pages
            .lock()
            .values()
            .filter(|p| p.database_id() == Some(database_id))
            .cloned()
            .collect()
    }

    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn create_count(&self) -> u64 {
        self.creates.load(Ordering::SeqCst)
    }

    fn maybe_fail(&self, op: &str) -> Result<()> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(LoyaltyError::Workspace {
                status: Some(503),
                message: format!("{op}: service unavailable"),
            });
        }
        Ok(())
    }
}

/// 过滤条件只支持 `{property, <type>: {equals}}` 单条件
fn matches_filter(page: &Page, filter: &Value) -> bool {
    let Some(property) = filter.get("property").and_then(Value::as_str) else {
        return true;
    };
    let Some(prop) = page.properties.get(property) else {
        return false;
    };
    let expected = filter
        .as_object()
        .and_then(|o| o.iter().find(|(k, _)| k.as_str() != "property"))
        .and_then(|(_, cond)| cond.get("equals"));

    match expected {
        Some(Value::Number(n)) => prop.get("number") == Some(&Value::Number(n.clone())),
        Some(Value::String(s)) => prop
            .get("phone_number")
            .and_then(Value::as_str)
            .map(|v| v == s)
            .unwrap_or(false),
        _ => false,
    }
}

#[async_trait]
impl WorkspaceClient for FakeWorkspace {
    async fn fetch_page(&self, page_id: &str) -> Result<Page> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.maybe_fail("fetch_page")?;
        self.get(page_id).ok_or_else(|| LoyaltyError::Workspace {
            status: Some(404),
            message: format!("page {page_id} not found"),
        })
    }

    async fn query_database(
        &self,
        database_id: &str,
        filter: Option<Value>,
        _page_size: u32,
        _cursor: Option<String>,
    ) -> Result<QueryResult> {
        self.maybe_fail("query_database")?;
        let results = self
            .pages_in(database_id)
            .into_iter()
            .filter(|p| filter.as_ref().is_none_or(|f| matches_filter(p, f)))
            .collect();
        Ok(QueryResult {
            results,
            has_more: false,
            next_cursor: None,
        })
    }

    async fn create_page(&self, database_id: &str, properties: PropertyMap) -> Result<Page> {
        self.maybe_fail("create_page")?;
        self.creates.fetch_add(1, Ordering::SeqCst);
        let id = format!("page-{}", self.seq.fetch_add(1, Ordering::SeqCst) + 1);
        let page = Page {
            id: id.clone(),
            parent: Some(PageParent {
                kind: Some("database_id".to_string()),
                database_id: Some(database_id.to_string()),
            }),
            properties,
            last_edited_time: None,
            archived: false,
        };
        self.put(page.clone());
        Ok(page)
    }

    async fn update_page(&self, page_id: &str, properties: PropertyMap) -> Result<Page> {
        self.maybe_fail("update_page")?;
        let mut pages = self.pages.lock();
        let page = pages.get_mut(page_id).ok_or_else(|| LoyaltyError::Workspace {
            status: Some(404),
            message: format!("page {page_id} not found"),
        })?;
        page.properties.extend(properties);
        Ok(page.clone())
    }
}
