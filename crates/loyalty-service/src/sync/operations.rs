//! 同步操作：把本地资源投影到工作台
//!
//! 每个操作都先按自然键查找已有页面再决定创建或更新，
//! 同一条目被重复投递时不会产生重复页面

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use loyalty_shared::config::WorkspaceConfig;

use crate::error::Result;
use crate::models::{Client, GiftKind, GrantedBenefit, Redemption, SyncOperation, SyncQueueItem};
use crate::repository::LoyaltyStore;
use crate::webhook::mapping::{BENEFIT_PENDING, redemption_status_label};
use crate::workspace::types::{self, PropertyMap};
use crate::workspace::WorkspaceClient;

/// 同步条目执行器
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SyncExecutor: Send + Sync {
    async fn execute(&self, item: &SyncQueueItem) -> Result<()>;
}

pub struct SyncOperations {
    store: Arc<dyn LoyaltyStore>,
    workspace: Arc<dyn WorkspaceClient>,
    config: WorkspaceConfig,
}

impl SyncOperations {
    pub fn new(
        store: Arc<dyn LoyaltyStore>,
        workspace: Arc<dyn WorkspaceClient>,
        config: WorkspaceConfig,
    ) -> Self {
        Self {
            store,
            workspace,
            config,
        }
    }

    /// 按过滤条件查找第一条页面
    async fn find_one(&self, database_id: &str, filter: Value) -> Result<Option<String>> {
        let result = self
            .workspace
            .query_database(database_id, Some(filter), 1, None)
            .await?;
        Ok(result.results.into_iter().next().map(|p| p.id))
    }

    // ==================== 客户积分 ====================

    /// 客户写入联系人库与积分库，并在两张页面之间互相关联
    ///
    /// 顺序：联系人页 → 积分页 → 联系人页回写积分关联 → 本地记录积分页 ID。
    /// 积分页 ID 最后落库，中途失败重试时仍会补写回向关联
    #[instrument(skip(self))]
    pub async fn sync_client(&self, client_id: i64) -> Result<()> {
        let Some(client) = self.store.get_client(client_id).await? else {
            warn!("客户不存在，跳过同步");
            return Ok(());
        };

        let (contact_page, contact_new) = self.upsert_contact(&client).await?;
        let rewards_page = self.upsert_rewards(&client, &contact_page).await?;

        let rewards_changed = client.rewards_page_id.as_deref() != Some(rewards_page.as_str());
        if contact_new || rewards_changed {
            let mut back = PropertyMap::new();
            back.insert(
                self.config.fields.rewards_relation.clone(),
                types::relation(&[rewards_page.as_str()]),
            );
            self.workspace.update_page(&contact_page, back).await?;
            debug!(contact_page = %contact_page, rewards_page = %rewards_page, "回写积分关联");
        }
        if rewards_changed {
            self.store
                .link_client_pages(client.id, None, Some(rewards_page))
                .await?;
        }
        Ok(())
    }

    /// 已记录的联系人页直接使用；否则按手机号查找，找不到则新建。
    /// 返回页面 ID 以及本次是否新关联
    async fn upsert_contact(&self, client: &Client) -> Result<(String, bool)> {
        if let Some(page_id) = &client.workspace_page_id {
            return Ok((page_id.clone(), false));
        }

        let fields = &self.config.fields;
        let db = &self.config.clients_database_id;
        let page_id = match self
            .find_one(db, types::phone_equals(&fields.phone, &client.phone))
            .await?
        {
            Some(page_id) => page_id,
            None => {
                let mut props = PropertyMap::new();
                props.insert(
                    fields.title.clone(),
                    types::title(client.name.as_deref().unwrap_or(&client.phone)),
                );
                props.insert(fields.phone.clone(), types::phone_number(&client.phone));
                let page = self.workspace.create_page(db, props).await?;
                info!(page_id = %page.id, "创建联系人页面");
                page.id
            }
        };

        self.store
            .link_client_pages(client.id, Some(page_id.clone()), None)
            .await?;
        Ok((page_id, true))
    }

    async fn upsert_rewards(&self, client: &Client, contact_page: &str) -> Result<String> {
        let properties = self.client_properties(client, contact_page);
        let existing = match &client.rewards_page_id {
            Some(page_id) => Some(page_id.clone()),
            None => {
                self.find_one(
                    &self.config.rewards_database_id,
                    types::phone_equals(&self.config.fields.phone, &client.phone),
                )
                .await?
            }
        };

        match existing {
            Some(page_id) => {
                debug!(page_id = %page_id, "更新积分页面");
                self.workspace.update_page(&page_id, properties).await?;
                Ok(page_id)
            }
            None => {
                let page = self
                    .workspace
                    .create_page(&self.config.rewards_database_id, properties)
                    .await?;
                info!(page_id = %page.id, "创建积分页面");
                Ok(page.id)
            }
        }
    }

    fn client_properties(&self, client: &Client, contact_page: &str) -> PropertyMap {
        let fields = &self.config.fields;
        let mut props = PropertyMap::new();
        props.insert(
            fields.title.clone(),
            types::title(client.name.as_deref().unwrap_or(&client.phone)),
        );
        props.insert(fields.phone.clone(), types::phone_number(&client.phone));
        props.insert(fields.balance.clone(), types::number(client.balance));
        props.insert(
            fields.lifetime_points.clone(),
            types::number(client.lifetime_points),
        );
        props.insert(fields.tier.clone(), types::select(client.tier.as_str()));
        props.insert(fields.local_id.clone(), types::number(client.id));
        props.insert(
            fields.client_relation.clone(),
            types::relation(&[contact_page]),
        );
        props
    }

    // ==================== 权益工单 ====================

    /// 为权益创建工单；已有工单时不做任何事
    #[instrument(skip(self))]
    pub async fn create_benefit_ticket(&self, benefit_id: i64) -> Result<()> {
        let Some(benefit) = self.store.get_benefit(benefit_id).await? else {
            warn!("权益不存在，跳过工单创建");
            return Ok(());
        };
        if benefit.workspace_page_id.is_some() {
            debug!("工单已存在");
            return Ok(());
        }

        let db = &self.config.benefits_database_id;
        let found = self
            .find_one(db, types::number_equals(&self.config.fields.local_id, benefit.id))
            .await?;

        let page_id = match found {
            Some(page_id) => page_id,
            None => {
                let client = self.store.get_client(benefit.client_id).await?;
                let properties = self.benefit_properties(&benefit, client.as_ref());
                let page = self.workspace.create_page(db, properties).await?;
                info!(page_id = %page.id, "创建权益工单");
                page.id
            }
        };

        self.store.set_benefit_page(benefit.id, &page_id).await
    }

    fn benefit_properties(&self, benefit: &GrantedBenefit, client: Option<&Client>) -> PropertyMap {
        let fields = &self.config.fields;
        let label = match (&benefit.description, benefit.kind) {
            (Some(desc), _) => desc.clone(),
            (None, GiftKind::Points) => format!("{} puntos de regalo", benefit.points_granted),
            (None, GiftKind::Service) => format!("Beneficio #{}", benefit.id),
        };

        let mut props = PropertyMap::new();
        props.insert(fields.title.clone(), types::title(&label));
        props.insert(fields.status.clone(), types::status(BENEFIT_PENDING));
        props.insert(fields.local_id.clone(), types::number(benefit.id));
        props.insert(fields.points.clone(), types::number(benefit.points_granted));
        props.insert(fields.valid_until.clone(), types::date(benefit.valid_until));
        if let Some(contact_page) = client.and_then(|c| c.workspace_page_id.as_deref()) {
            props.insert(
                fields.client_relation.clone(),
                types::relation(&[contact_page]),
            );
        }
        props
    }

    // ==================== 兑换记录 ====================

    /// 兑换记录投影：按本地 ID 查找，否则创建，然后写入状态
    #[instrument(skip(self))]
    pub async fn sync_redemption(&self, redemption_id: i64) -> Result<()> {
        let Some(redemption) = self.store.get_redemption(redemption_id).await? else {
            warn!("兑换记录不存在，跳过同步");
            return Ok(());
        };

        let db = &self.config.redemptions_database_id;
        let existing = match &redemption.workspace_page_id {
            Some(page_id) => Some(page_id.clone()),
            None => {
                self.find_one(
                    db,
                    types::number_equals(&self.config.fields.local_id, redemption.id),
                )
                .await?
            }
        };

        let page_id = match existing {
            Some(page_id) => {
                let mut props = PropertyMap::new();
                props.insert(
                    self.config.fields.status.clone(),
                    types::status(redemption_status_label(redemption.status)),
                );
                self.workspace.update_page(&page_id, props).await?;
                page_id
            }
            None => {
                let client = self.store.get_client(redemption.client_id).await?;
                let props = self.redemption_properties(&redemption, client.as_ref());
                let page = self.workspace.create_page(db, props).await?;
                info!(page_id = %page.id, "创建兑换页面");
                page.id
            }
        };

        if redemption.workspace_page_id.as_deref() != Some(page_id.as_str()) {
            self.store.set_redemption_page(redemption.id, &page_id).await?;
        }
        Ok(())
    }

    fn redemption_properties(&self, redemption: &Redemption, client: Option<&Client>) -> PropertyMap {
        let fields = &self.config.fields;
        let mut props = PropertyMap::new();
        props.insert(
            fields.title.clone(),
            types::title(&format!("Canje #{}", redemption.id)),
        );
        props.insert(
            fields.status.clone(),
            types::status(redemption_status_label(redemption.status)),
        );
        props.insert(fields.local_id.clone(), types::number(redemption.id));
        props.insert(fields.points.clone(), types::number(redemption.points_spent));
        if let Some(contact_page) = client.and_then(|c| c.workspace_page_id.as_deref()) {
            props.insert(
                fields.client_relation.clone(),
                types::relation(&[contact_page]),
            );
        }
        props
    }
}

#[async_trait]
impl SyncExecutor for SyncOperations {
    async fn execute(&self, item: &SyncQueueItem) -> Result<()> {
        match item.operation {
            SyncOperation::SyncClient => self.sync_client(item.resource_id).await,
            SyncOperation::CreateBenefitTicket => self.create_benefit_ticket(item.resource_id).await,
            SyncOperation::SyncRedemption => self.sync_redemption(item.resource_id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoyaltyError;
    use crate::models::{GiftLink, ItemKind, NewSyncItem, RecipientMode, RedemptionStatus};
    use crate::repository::MemoryLoyaltyStore;
    use crate::workspace::client::MockWorkspaceClient;
    use crate::workspace::{Page, QueryResult};
    use chrono::Utc;

    fn config() -> WorkspaceConfig {
        WorkspaceConfig {
            clients_database_id: "db-clients".to_string(),
            rewards_database_id: "db-rewards".to_string(),
            benefits_database_id: "db-benefits".to_string(),
            redemptions_database_id: "db-redemptions".to_string(),
            ..WorkspaceConfig::default()
        }
    }

    fn page(id: &str) -> Page {
        Page {
            id: id.to_string(),
            ..Page::default()
        }
    }

    #[tokio::test]
    async fn test_sync_client_creates_contact_and_rewards_pages() {
        let store = Arc::new(MemoryLoyaltyStore::new());
        let client = store.seed_client("5550001", 120);

        let mut ws = MockWorkspaceClient::new();
        ws.expect_query_database()
            .withf(|_, filter, _, _| filter.is_some())
            .times(2)
            .returning(|_, _, _, _| Ok(QueryResult::default()));
        ws.expect_create_page()
            .withf(|db, props| db.to_string() == "db-clients" && props["Teléfono"]["phone_number"] == "5550001")
            .times(1)
            .returning(|_, _| Ok(page("ct-1")));
        ws.expect_create_page()
            .withf(|db, props| {
                db.to_string() == "db-rewards"
                    && props["Puntos"]["number"] == 120
                    && props["Cliente"]["relation"][0]["id"] == "ct-1"
            })
            .times(1)
            .returning(|_, _| Ok(page("rw-1")));
        ws.expect_update_page()
            .withf(|id, props| id.to_string() == "ct-1" && props["Recompensas"]["relation"][0]["id"] == "rw-1")
            .times(1)
            .returning(|id, _| Ok(page(id)));

        let ops = SyncOperations::new(store.clone(), Arc::new(ws), config());
        ops.sync_client(client.id).await.unwrap();

        let stored = store.get_client(client.id).await.unwrap().unwrap();
        assert_eq!(stored.workspace_page_id.as_deref(), Some("ct-1"));
        assert_eq!(stored.rewards_page_id.as_deref(), Some("rw-1"));
    }

    #[tokio::test]
    async fn test_sync_client_reuses_pages_found_by_phone() {
        let store = Arc::new(MemoryLoyaltyStore::new());
        let client = store.seed_client("5550002", 0);

        let mut ws = MockWorkspaceClient::new();
        ws.expect_query_database()
            .withf(|db, _, _, _| db.to_string() == "db-clients")
            .times(1)
            .returning(|_, _, _, _| {
                Ok(QueryResult {
                    results: vec![page("ct-existing")],
                    ..QueryResult::default()
                })
            });
        ws.expect_query_database()
            .withf(|db, _, _, _| db.to_string() == "db-rewards")
            .times(1)
            .returning(|_, _, _, _| {
                Ok(QueryResult {
                    results: vec![page("rw-existing")],
                    ..QueryResult::default()
                })
            });
        ws.expect_create_page().never();
        ws.expect_update_page()
            .withf(|id, _| id.to_string() == "rw-existing" || id.to_string() == "ct-existing")
            .times(2)
            .returning(|id, _| Ok(page(id)));

        let ops = SyncOperations::new(store.clone(), Arc::new(ws), config());
        ops.sync_client(client.id).await.unwrap();

        let stored = store.get_client(client.id).await.unwrap().unwrap();
        assert_eq!(stored.workspace_page_id.as_deref(), Some("ct-existing"));
        assert_eq!(stored.rewards_page_id.as_deref(), Some("rw-existing"));
    }

    #[tokio::test]
    async fn test_linked_client_updates_without_lookup() {
        let store = Arc::new(MemoryLoyaltyStore::new());
        let client = store.seed_client("5550003", 10);
        store
            .link_client_pages(client.id, Some("ct-9".to_string()), Some("rw-9".to_string()))
            .await
            .unwrap();

        // 两侧都已关联：只刷新积分页
        let mut ws = MockWorkspaceClient::new();
        ws.expect_query_database().never();
        ws.expect_create_page().never();
        ws.expect_update_page()
            .withf(|id, _| id.to_string() == "rw-9")
            .times(1)
            .returning(|id, _| Ok(page(id)));

        let ops = SyncOperations::new(store, Arc::new(ws), config());
        ops.sync_client(client.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_benefit_ticket_created_once() {
        let store = Arc::new(MemoryLoyaltyStore::new());
        store.seed_client("5550004", 0);
        let now = Utc::now();
        store.seed_gift_link(GiftLink::new(
            "SRV1",
            GiftKind::Service,
            RecipientMode::Single,
            0,
            now + chrono::Duration::days(5),
            now,
        ));
        let grant = store
            .redeem_gift_link("SRV1", "5550004", Utc::now(), 365)
            .await
            .unwrap();

        let mut ws = MockWorkspaceClient::new();
        ws.expect_query_database()
            .times(1)
            .returning(|_, _, _, _| Ok(QueryResult::default()));
        ws.expect_create_page()
            .withf(|db, props| db.to_string() == "db-benefits" && props["Estado"]["status"]["name"] == "Pendiente")
            .times(1)
            .returning(|_, _| Ok(page("tk-1")));

        let ops = SyncOperations::new(store.clone(), Arc::new(ws), config());
        ops.create_benefit_ticket(grant.benefit.id).await.unwrap();
        // 重复投递：页面已记录，不再访问工作台
        ops.create_benefit_ticket(grant.benefit.id).await.unwrap();

        let benefit = store.get_benefit(grant.benefit.id).await.unwrap().unwrap();
        assert_eq!(benefit.workspace_page_id.as_deref(), Some("tk-1"));
    }

    #[tokio::test]
    async fn test_sync_redemption_updates_status_label() {
        let store = Arc::new(MemoryLoyaltyStore::new());
        let client = store.seed_client("5550005", 200);
        let item = store.seed_item("Corte", ItemKind::Service, 100, None);
        let outcome = store.redeem_catalog_item(client.id, item.id).await.unwrap();
        store
            .set_redemption_page(outcome.redemption.id, "rd-1")
            .await
            .unwrap();
        store
            .update_redemption_status(outcome.redemption.id, RedemptionStatus::Scheduled, None)
            .await
            .unwrap();

        let mut ws = MockWorkspaceClient::new();
        ws.expect_update_page()
            .withf(|id, props| id.to_string() == "rd-1" && props["Estado"]["status"]["name"] == "Agendado")
            .times(1)
            .returning(|id, _| Ok(page(id)));

        let ops = SyncOperations::new(store, Arc::new(ws), config());
        ops.sync_redemption(outcome.redemption.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_workspace_error_propagates_for_retry() {
        let store = Arc::new(MemoryLoyaltyStore::new());
        let client = store.seed_client("5550006", 0);

        let mut ws = MockWorkspaceClient::new();
        ws.expect_query_database().returning(|_, _, _, _| {
            Err(LoyaltyError::Workspace {
                status: Some(502),
                message: "bad gateway".to_string(),
            })
        });

        let ops = SyncOperations::new(store, Arc::new(ws), config());
        let item = NewSyncItem::sync_client(client.id).into_item(1, Utc::now());
        let err = ops.execute(&item).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
