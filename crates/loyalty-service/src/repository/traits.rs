//! 存储 Trait 定义
//!
//! 每个方法都是一个原子操作：行锁、校验、写入、回执与同步出箱在同一事务（或同一把写锁）内完成。
//! 服务层只依赖这些抽象，Postgres 与内存实现共享 models 中的决策函数。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::models::{
    CatalogItem, Client, EventReceipt, ExpireReport, GiftLink, GiftRedemption, GrantedBenefit,
    LedgerMovement, MovementRequest, MovementResult, NewSyncItem, Redemption, RedemptionStatus,
    SyncQueueItem, SyncStatus,
};

/// 目录兑换结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemOutcome {
    pub redemption: Redemption,
    pub movement: MovementResult,
}

/// 兑换取消结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOutcome {
    pub redemption: Redemption,
    /// 退款流水；消耗为 0 的兑换没有退款
    pub refund: Option<MovementResult>,
}

/// 联系人写入结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactUpsert {
    pub client: Client,
    pub created: bool,
}

/// 积分账本存储接口
///
/// 带 `receipt` 参数的操作：回执已存在时整体回滚并返回 `DuplicateEvent`
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LoyaltyStore: Send + Sync {
    // ==================== 客户 ====================

    async fn get_client(&self, id: i64) -> Result<Option<Client>>;
    async fn find_client_by_phone(&self, phone: &str) -> Result<Option<Client>>;
    async fn find_client_by_workspace_page(&self, page_id: &str) -> Result<Option<Client>>;
    async fn find_client_by_rewards_page(&self, page_id: &str) -> Result<Option<Client>>;

    /// 按手机号查找或创建客户，并记录工作台页面 ID
    async fn upsert_client_by_phone(
        &self,
        phone: &str,
        name: Option<String>,
        workspace_page_id: Option<String>,
        receipt: Option<EventReceipt>,
    ) -> Result<ContactUpsert>;

    /// 记录工作台页面 ID（None 表示不修改）
    async fn link_client_pages(
        &self,
        client_id: i64,
        workspace_page_id: Option<String>,
        rewards_page_id: Option<String>,
    ) -> Result<()>;

    // ==================== 账本 ====================

    /// 写入流水并更新余额，同时入队客户同步
    async fn apply_movement(
        &self,
        request: MovementRequest,
        receipt: Option<EventReceipt>,
    ) -> Result<MovementResult>;

    /// 按 ID 升序返回流水；limit 为空时返回全部
    async fn list_movements(&self, client_id: i64, limit: Option<i64>)
    -> Result<Vec<LedgerMovement>>;

    // ==================== 目录兑换 ====================

    async fn get_catalog_item(&self, id: i64) -> Result<Option<CatalogItem>>;

    /// 锁目录项与客户 → 重读校验 → 扣库存 → 扣积分 → 写兑换记录
    async fn redeem_catalog_item(&self, client_id: i64, item_id: i64) -> Result<RedeemOutcome>;

    async fn get_redemption(&self, id: i64) -> Result<Option<Redemption>>;

    async fn update_redemption_status(
        &self,
        id: i64,
        status: RedemptionStatus,
        receipt: Option<EventReceipt>,
    ) -> Result<Redemption>;

    /// 取消兑换：退款（manual_adjustment）并退回库存，回执与取消同事务写入
    async fn cancel_redemption(
        &self,
        id: i64,
        reason: &str,
        receipt: Option<EventReceipt>,
    ) -> Result<CancelOutcome>;

    async fn set_redemption_page(&self, id: i64, page_id: &str) -> Result<()>;

    // ==================== 礼品与权益 ====================

    async fn get_gift_link(&self, code: &str) -> Result<Option<GiftLink>>;

    /// 礼品链接兑换，链接行锁贯穿整个事务
    async fn redeem_gift_link(
        &self,
        code: &str,
        phone: &str,
        now: DateTime<Utc>,
        default_validity_days: i64,
    ) -> Result<GiftRedemption>;

    async fn get_benefit(&self, id: i64) -> Result<Option<GrantedBenefit>>;
    async fn list_benefits_for_link(&self, gift_link_id: i64) -> Result<Vec<GrantedBenefit>>;

    async fn use_benefit(
        &self,
        id: i64,
        now: DateTime<Utc>,
        receipt: Option<EventReceipt>,
    ) -> Result<GrantedBenefit>;

    async fn set_benefit_page(&self, id: i64, page_id: &str) -> Result<()>;

    /// 过期扫描：已过期的 active 权益与 pending 链接
    async fn expire_overdue(&self, now: DateTime<Utc>, batch_size: i64) -> Result<ExpireReport>;

    // ==================== 幂等回执 ====================

    async fn receipt_exists(&self, receipt: &EventReceipt) -> Result<bool>;
}

/// 同步队列存储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SyncQueueStore: Send + Sync {
    async fn enqueue(&self, item: NewSyncItem) -> Result<SyncQueueItem>;

    /// 原子认领一条到期的 pending 条目，并发 worker 之间不会重复认领
    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<SyncQueueItem>>;

    async fn get_sync_item(&self, id: i64) -> Result<Option<SyncQueueItem>>;

    /// 写回处理结果；仅当条目仍为 in_flight 时生效，返回是否写入
    async fn save_outcome(&self, item: &SyncQueueItem) -> Result<bool>;

    /// 认领时间早于 cutoff 的 in_flight 条目放回 pending
    async fn requeue_stale(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn list_by_status(&self, status: SyncStatus, limit: i64) -> Result<Vec<SyncQueueItem>>;

    /// 死信重新入队，返回更新后的条目；非死信状态返回 None
    async fn requeue_dead_letter(
        &self,
        id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<SyncQueueItem>>;
}
