//! Webhook 载荷规范化
//!
//! 平台推送的载荷有三种形态：完整记录、部分记录（有属性但缺父级）、只有记录 ID。
//! 后两种需要回源拉取页面，规范化后总是得到一条完整页面再交给提取逻辑。

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use loyalty_shared::retry::{RetryPolicy, retry_with_policy};

use crate::error::{LoyaltyError, Result};
use crate::workspace::{Page, WorkspaceClient};

/// 未携带事件类型时的默认值
pub const DEFAULT_EVENT_TYPE: &str = "page.updated";

/// 规范化结果
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    /// 订阅校验请求，原样回显
    Challenge(Value),
    /// 完整记录
    Record(ResolvedRecord),
    /// 无法识别的载荷
    Unrecognized(String),
}

/// 已补全的记录
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRecord {
    pub event_type: String,
    pub page: Page,
}

/// 载荷形态
#[derive(Debug, Clone, PartialEq)]
enum Shape {
    Full(Page),
    Partial(Page),
    IdOnly(String),
}

pub struct PayloadNormalizer {
    client: Arc<dyn WorkspaceClient>,
    fetch_policy: RetryPolicy,
}

impl PayloadNormalizer {
    pub fn new(client: Arc<dyn WorkspaceClient>, fetch_policy: RetryPolicy) -> Self {
        Self {
            client,
            fetch_policy,
        }
    }

    pub async fn normalize(&self, raw: &Value) -> Result<Normalized> {
        if is_challenge(raw) {
            return Ok(Normalized::Challenge(raw.clone()));
        }

        let event_type = raw
            .get("type")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_EVENT_TYPE)
            .to_string();

        let Some(shape) = classify(raw) else {
            return Ok(Normalized::Unrecognized("载荷中没有记录 ID".to_string()));
        };

        let page = match shape {
            Shape::Full(page) => page,
            Shape::Partial(partial) => {
                debug!(page_id = %partial.id, "部分记录，回源补全");
                let fetched = self.fetch(&partial.id).await?;
                merge(partial, fetched)
            }
            Shape::IdOnly(id) => {
                debug!(page_id = %id, "仅有记录 ID，回源拉取");
                self.fetch(&id).await?
            }
        };

        Ok(Normalized::Record(ResolvedRecord { event_type, page }))
    }

    async fn fetch(&self, page_id: &str) -> Result<Page> {
        retry_with_policy(
            &self.fetch_policy,
            "fetch_page",
            |e: &LoyaltyError| e.is_retryable(),
            || self.client.fetch_page(page_id),
        )
        .await
    }
}

/// 订阅校验请求：带 `challenge`，或只有 `verification_token` 没有事件类型
pub fn is_challenge(raw: &Value) -> bool {
    raw.get("challenge").is_some()
        || (raw.get("verification_token").is_some() && raw.get("type").is_none())
}

/// 找到载荷中的记录对象：`data` / `entity` / `page` 包裹，或载荷本身
fn record_object(raw: &Value) -> Option<&Value> {
    ["data", "entity", "page"]
        .iter()
        .filter_map(|key| raw.get(*key))
        .find(|v| v.get("id").and_then(Value::as_str).is_some())
        .or_else(|| raw.get("id").and_then(Value::as_str).map(|_| raw))
}

fn classify(raw: &Value) -> Option<Shape> {
    let record = record_object(raw)?;
    let id = record.get("id").and_then(Value::as_str)?.to_string();

    let has_properties = record
        .get("properties")
        .and_then(Value::as_object)
        .is_some_and(|p| !p.is_empty());
    if !has_properties {
        return Some(Shape::IdOnly(id));
    }

    match serde_json::from_value::<Page>(record.clone()) {
        Ok(page) if page.database_id().is_some() => Some(Shape::Full(page)),
        Ok(page) => Some(Shape::Partial(page)),
        Err(_) => Some(Shape::IdOnly(id)),
    }
}

/// 合并部分记录与回源结果，回源结果优先
fn merge(partial: Page, fetched: Page) -> Page {
    let mut properties = partial.properties;
    properties.extend(fetched.properties);

    Page {
        id: fetched.id,
        parent: fetched.parent.or(partial.parent),
        properties,
        last_edited_time: fetched.last_edited_time.or(partial.last_edited_time),
        archived: fetched.archived,
    }
}
