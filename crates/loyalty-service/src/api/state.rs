//! 应用状态定义
//!
//! 服务、队列与对账器在启动时装配一次，通过 Arc 在 handler 与后台 Worker 之间共享

use std::sync::Arc;

use tokio::sync::Notify;

use loyalty_shared::config::AppConfig;
use loyalty_shared::database::Database;
use loyalty_shared::retry::RetryPolicy;

use crate::api::auth::AuthSettings;
use crate::notification::Notifier;
use crate::reconcile::Reconciler;
use crate::repository::{LoyaltyStore, SyncQueueStore};
use crate::service::{GiftService, LedgerService, RedemptionService};
use crate::sync::SyncQueue;
use crate::webhook::{IngestorSettings, PayloadNormalizer, WebhookIngestor};
use crate::workspace::WorkspaceClient;

/// Axum 应用共享状态
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<LedgerService>,
    pub redemptions: Arc<RedemptionService>,
    pub gifts: Arc<GiftService>,
    pub ingestor: Arc<WebhookIngestor>,
    pub sync_queue: Arc<SyncQueue>,
    pub reconciler: Arc<Reconciler>,
    pub auth: AuthSettings,
    /// 同步 Worker 的唤醒信号，写操作提交后触发
    pub sync_wake: Arc<Notify>,
    /// 就绪探针使用；内存存储运行时为空
    pub database: Option<Database>,
}

impl AppState {
    /// 装配全部服务
    ///
    /// `store` 同时提供账本与同步队列的存储，两者必须共享同一份数据
    pub fn new<S>(
        store: Arc<S>,
        workspace: Arc<dyn WorkspaceClient>,
        notifier: Arc<dyn Notifier>,
        config: &AppConfig,
    ) -> Self
    where
        S: LoyaltyStore + SyncQueueStore + 'static,
    {
        let sync_wake = Arc::new(Notify::new());
        let loyalty_store: Arc<dyn LoyaltyStore> = store.clone();
        let queue_store: Arc<dyn SyncQueueStore> = store;

        let ledger = Arc::new(LedgerService::new(loyalty_store.clone(), sync_wake.clone()));
        let redemptions = Arc::new(RedemptionService::new(
            loyalty_store.clone(),
            notifier.clone(),
            sync_wake.clone(),
        ));
        let gifts = Arc::new(GiftService::new(
            loyalty_store.clone(),
            notifier,
            sync_wake.clone(),
            config.loyalty.default_gift_validity_days,
        ));

        // 回源拉取与批量查询使用与同步队列一致的退避参数，但只做少量即时重试
        let fetch_policy = RetryPolicy {
            max_retries: 2,
            ..RetryPolicy::from_sync_config(&config.sync)
        };

        let ingestor = Arc::new(WebhookIngestor::new(
            PayloadNormalizer::new(workspace.clone(), fetch_policy.clone()),
            loyalty_store.clone(),
            ledger.clone(),
            redemptions.clone(),
            gifts.clone(),
            IngestorSettings::new(
                &config.workspace,
                &config.webhook.source,
                config.loyalty.revenue_points_percent,
            ),
        ));

        let reconciler = Arc::new(Reconciler::new(
            loyalty_store,
            workspace,
            config.workspace.clone(),
            fetch_policy,
        ));

        Self {
            ledger,
            redemptions,
            gifts,
            ingestor,
            sync_queue: Arc::new(SyncQueue::new(queue_store, &config.sync)),
            reconciler,
            auth: AuthSettings::new(
                &config.admin.api_token,
                config.webhook.verification_token.clone(),
            ),
            sync_wake,
            database: None,
        }
    }

    pub fn with_database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }
}
