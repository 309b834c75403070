//! 工作台积分库批量对账
//!
//! 逐页扫描积分库，把页面关联到本地客户。只写入页面 ID，
//! 从不根据工作台数据修改本地余额或等级

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use loyalty_shared::config::WorkspaceConfig;
use loyalty_shared::retry::{RetryPolicy, retry_with_policy};

use crate::error::{LoyaltyError, Result};
use crate::models::Client;
use crate::repository::LoyaltyStore;
use crate::webhook::properties::PropertyReader;
use crate::workspace::{Page, WorkspaceClient};

/// 报告中保留的未匹配页面数上限
const MAX_UNMATCHED_IDS: usize = 100;

/// 对账结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub scanned: u64,
    pub already_linked: u64,
    pub linked: u64,
    pub unmatched: u64,
    /// 未匹配的页面 ID（截断）
    pub unmatched_page_ids: Vec<String>,
}

/// 单个页面的匹配结论
#[derive(Debug, PartialEq)]
enum Match {
    AlreadyLinked,
    Found(Client),
    Unmatched,
}

pub struct Reconciler {
    store: Arc<dyn LoyaltyStore>,
    workspace: Arc<dyn WorkspaceClient>,
    config: WorkspaceConfig,
    query_policy: RetryPolicy,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn LoyaltyStore>,
        workspace: Arc<dyn WorkspaceClient>,
        config: WorkspaceConfig,
        query_policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            workspace,
            config,
            query_policy,
        }
    }

    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let mut cursor: Option<String> = None;
        let db = self.config.rewards_database_id.as_str();

        loop {
            let page_cursor = cursor.clone();
            let batch = retry_with_policy(
                &self.query_policy,
                "query_database",
                |e: &LoyaltyError| e.is_retryable(),
                || {
                    self.workspace
                        .query_database(db, None, self.config.page_size, page_cursor.clone())
                },
            )
            .await?;

            debug!(count = batch.results.len(), has_more = batch.has_more, "对账批次");

            for page in batch.results.iter().filter(|p| !p.archived) {
                report.scanned += 1;
                match self.match_page(page).await? {
                    Match::AlreadyLinked => report.already_linked += 1,
                    Match::Found(client) => {
                        self.store
                            .link_client_pages(client.id, None, Some(page.id.clone()))
                            .await?;
                        report.linked += 1;
                    }
                    Match::Unmatched => {
                        report.unmatched += 1;
                        if report.unmatched_page_ids.len() < MAX_UNMATCHED_IDS {
                            report.unmatched_page_ids.push(page.id.clone());
                        }
                    }
                }
            }

            match batch.next_cursor {
                Some(next) if batch.has_more => cursor = Some(next),
                _ => break,
            }
        }

        info!(
            scanned = report.scanned,
            already_linked = report.already_linked,
            linked = report.linked,
            unmatched = report.unmatched,
            "对账完成"
        );
        Ok(report)
    }

    /// 匹配顺序：已记录的页面 ID → 关联的客户页 → 手机号
    async fn match_page(&self, page: &Page) -> Result<Match> {
        if self.store.find_client_by_rewards_page(&page.id).await?.is_some() {
            return Ok(Match::AlreadyLinked);
        }

        let fields = &self.config.fields;
        let reader = PropertyReader::new(&page.properties);

        let mut candidate = None;
        for contact_page in reader.relation_ids(&fields.client_relation) {
            if let Some(client) = self.store.find_client_by_workspace_page(&contact_page).await? {
                candidate = Some(client);
                break;
            }
        }
        if candidate.is_none()
            && let Some(phone) = reader.phone(&fields.phone)
        {
            candidate = self.store.find_client_by_phone(&phone).await?;
        }

        match candidate {
            // 客户已关联到另一页面时不覆盖
            Some(client) if client.rewards_page_id.is_some() => {
                warn!(
                    page_id = %page.id,
                    client_id = client.id,
                    "客户已关联其他积分页面"
                );
                Ok(Match::Unmatched)
            }
            Some(client) => Ok(Match::Found(client)),
            None => Ok(Match::Unmatched),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryLoyaltyStore;
    use crate::workspace::QueryResult;
    use crate::workspace::client::MockWorkspaceClient;
    use serde_json::json;

    fn config() -> WorkspaceConfig {
        WorkspaceConfig {
            rewards_database_id: "db-rewards".to_string(),
            page_size: 2,
            ..WorkspaceConfig::default()
        }
    }

    fn rewards_page(id: &str, properties: serde_json::Value) -> Page {
        serde_json::from_value(json!({ "id": id, "properties": properties })).unwrap()
    }

    #[tokio::test]
    async fn test_reconcile_pages_through_cursor() {
        let store = Arc::new(MemoryLoyaltyStore::new());
        let by_phone = store.seed_client("5551000", 300);
        let by_relation = store.seed_client("5552000", 0);
        store
            .link_client_pages(by_relation.id, Some("contact-2".to_string()), None)
            .await
            .unwrap();
        let linked = store.seed_client("5553000", 0);
        store
            .link_client_pages(linked.id, None, Some("rw-3".to_string()))
            .await
            .unwrap();

        let mut ws = MockWorkspaceClient::new();
        ws.expect_query_database()
            .withf(|_, _, _, cursor| cursor.is_none())
            .times(1)
            .returning(|_, _, _, _| {
                Ok(QueryResult {
                    results: vec![
                        rewards_page("rw-1", json!({
                            "Teléfono": {"type": "phone_number", "phone_number": "555-1000"},
                            "Puntos": {"type": "number", "number": 9999}
                        })),
                        rewards_page("rw-2", json!({
                            "Cliente": {"type": "relation", "relation": [{"id": "contact-2"}]}
                        })),
                    ],
                    has_more: true,
                    next_cursor: Some("c2".to_string()),
                })
            });
        ws.expect_query_database()
            .withf(|_, _, _, cursor| cursor.as_deref() == Some("c2"))
            .times(1)
            .returning(|_, _, _, _| {
                Ok(QueryResult {
                    results: vec![
                        rewards_page("rw-3", json!({})),
                        rewards_page("rw-4", json!({
                            "Teléfono": {"type": "phone_number", "phone_number": "5559999"}
                        })),
                    ],
                    has_more: false,
                    next_cursor: None,
                })
            });

        let reconciler = Reconciler::new(store.clone(), Arc::new(ws), config(), RetryPolicy::immediate(1));
        let report = reconciler.reconcile().await.unwrap();

        assert_eq!(report.scanned, 4);
        assert_eq!(report.already_linked, 1);
        assert_eq!(report.linked, 2);
        assert_eq!(report.unmatched, 1);
        assert_eq!(report.unmatched_page_ids, vec!["rw-4".to_string()]);

        // 只写页面 ID，余额保持本地值
        let client = store.get_client(by_phone.id).await.unwrap().unwrap();
        assert_eq!(client.rewards_page_id.as_deref(), Some("rw-1"));
        assert_eq!(client.balance, 300);
        let client = store.get_client(by_relation.id).await.unwrap().unwrap();
        assert_eq!(client.rewards_page_id.as_deref(), Some("rw-2"));
    }

    #[tokio::test]
    async fn test_client_linked_elsewhere_is_not_overwritten() {
        let store = Arc::new(MemoryLoyaltyStore::new());
        let client = store.seed_client("5554000", 0);
        store
            .link_client_pages(client.id, None, Some("rw-original".to_string()))
            .await
            .unwrap();

        let mut ws = MockWorkspaceClient::new();
        ws.expect_query_database().returning(|_, _, _, _| {
            Ok(QueryResult {
                results: vec![rewards_page("rw-dup", json!({
                    "Teléfono": {"type": "phone_number", "phone_number": "5554000"}
                }))],
                ..QueryResult::default()
            })
        });

        let reconciler = Reconciler::new(store.clone(), Arc::new(ws), config(), RetryPolicy::immediate(1));
        let report = reconciler.reconcile().await.unwrap();
        assert_eq!(report.unmatched, 1);

        let stored = store.get_client(client.id).await.unwrap().unwrap();
        assert_eq!(stored.rewards_page_id.as_deref(), Some("rw-original"));
    }
}
