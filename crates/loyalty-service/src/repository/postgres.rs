//! Postgres 存储实现
//!
//! 每个写操作一个事务：回执 → 行锁 → 重读校验 → 写入 → 出箱入队 → 提交。
//! 任一步失败时事务随 `Transaction` drop 回滚。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::{info, instrument};

use crate::error::{LoyaltyError, Result};
use crate::models::{
    CatalogItem, Client, EventReceipt, ExpireReport, GiftKind, GiftLink, GiftRedemption,
    GrantedBenefit, LedgerMovement, LinkCheck, MovementKind, MovementRequest, MovementResult,
    NewSyncItem, Redemption, RedemptionStatus, SyncQueueItem, SyncStatus,
};
use crate::repository::catalog_repo::{CatalogRepository, RedemptionRepository};
use crate::repository::client_repo::{ClientRepository, LedgerRepository, LookupColumn};
use crate::repository::gift_repo::{BenefitRepository, GiftLinkRepository};
use crate::repository::sync_repo::{ReceiptRepository, SyncQueueRepository};
use crate::repository::traits::{
    CancelOutcome, ContactUpsert, LoyaltyStore, RedeemOutcome, SyncQueueStore,
};

/// Postgres 存储
#[derive(Clone)]
pub struct PgLoyaltyStore {
    pool: PgPool,
}

impl PgLoyaltyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 写入礼品链接（后台发放链接时使用）
    pub async fn create_gift_link(&self, link: &GiftLink) -> Result<GiftLink> {
        GiftLinkRepository::insert(&self.pool, link).await
    }
}

async fn insert_receipt(tx: &mut PgConnection, receipt: &Option<EventReceipt>) -> Result<()> {
    match receipt {
        Some(r) => ReceiptRepository::insert_in_tx(tx, r).await,
        None => Ok(()),
    }
}

/// 锁定客户并应用一次变动
async fn lock_and_apply(
    tx: &mut PgConnection,
    client_id: i64,
    delta: i64,
    kind: MovementKind,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<MovementResult> {
    let client = ClientRepository::get_for_update(&mut *tx, client_id)
        .await?
        .ok_or(LoyaltyError::ClientNotFound(client_id))?;
    let plan = client.plan_movement(delta, kind, reason)?;
    ClientRepository::apply_plan_in_tx(tx, client_id, &plan, now).await
}

#[async_trait]
impl LoyaltyStore for PgLoyaltyStore {
    async fn get_client(&self, id: i64) -> Result<Option<Client>> {
        ClientRepository::get(&self.pool, id).await
    }

    async fn find_client_by_phone(&self, phone: &str) -> Result<Option<Client>> {
        ClientRepository::find_by(&self.pool, LookupColumn::Phone, phone).await
    }

    async fn find_client_by_workspace_page(&self, page_id: &str) -> Result<Option<Client>> {
        ClientRepository::find_by(&self.pool, LookupColumn::WorkspacePage, page_id).await
    }

    async fn find_client_by_rewards_page(&self, page_id: &str) -> Result<Option<Client>> {
        ClientRepository::find_by(&self.pool, LookupColumn::RewardsPage, page_id).await
    }

    #[instrument(skip(self, name, receipt))]
    async fn upsert_client_by_phone(
        &self,
        phone: &str,
        name: Option<String>,
        workspace_page_id: Option<String>,
        receipt: Option<EventReceipt>,
    ) -> Result<ContactUpsert> {
        let mut tx = self.pool.begin().await?;
        insert_receipt(&mut tx, &receipt).await?;

        let (client, created) = ClientRepository::insert_or_lock_by_phone(&mut tx, phone).await?;
        let client = ClientRepository::update_profile_in_tx(
            &mut tx,
            client.id,
            name.as_deref(),
            workspace_page_id.as_deref(),
            None,
        )
        .await?;
        SyncQueueRepository::enqueue_in_tx(&mut tx, &NewSyncItem::sync_client(client.id)).await?;

        tx.commit().await?;

        if created {
            info!(client_id = client.id, "新客户已由联系人事件创建");
        }
        Ok(ContactUpsert { client, created })
    }

    async fn link_client_pages(
        &self,
        client_id: i64,
        workspace_page_id: Option<String>,
        rewards_page_id: Option<String>,
    ) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        ClientRepository::update_profile_in_tx(
            &mut conn,
            client_id,
            None,
            workspace_page_id.as_deref(),
            rewards_page_id.as_deref(),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, receipt), fields(client_id = request.client_id, delta = request.delta))]
    async fn apply_movement(
        &self,
        request: MovementRequest,
        receipt: Option<EventReceipt>,
    ) -> Result<MovementResult> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        insert_receipt(&mut tx, &receipt).await?;

        let result = lock_and_apply(
            &mut tx,
            request.client_id,
            request.delta,
            request.kind,
            &request.reason,
            now,
        )
        .await?;
        SyncQueueRepository::enqueue_in_tx(&mut tx, &NewSyncItem::sync_client(request.client_id))
            .await?;

        tx.commit().await?;
        Ok(result)
    }

    async fn list_movements(
        &self,
        client_id: i64,
        limit: Option<i64>,
    ) -> Result<Vec<LedgerMovement>> {
        LedgerRepository::list_by_client(&self.pool, client_id, limit).await
    }

    async fn get_catalog_item(&self, id: i64) -> Result<Option<CatalogItem>> {
        CatalogRepository::get(&self.pool, id).await
    }

    #[instrument(skip(self))]
    async fn redeem_catalog_item(&self, client_id: i64, item_id: i64) -> Result<RedeemOutcome> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        // 锁顺序固定为 目录项 → 客户
        let mut item = CatalogRepository::get_for_update(&mut tx, item_id)
            .await?
            .ok_or(LoyaltyError::ItemNotFound(item_id))?;
        let client = ClientRepository::get_for_update(&mut tx, client_id)
            .await?
            .ok_or(LoyaltyError::ClientNotFound(client_id))?;

        item.check_redeemable(client.balance)?;
        let plan = client.plan_movement(
            -item.point_cost,
            MovementKind::Redeemed,
            &format!("Canje: {}", item.name),
        )?;

        if item.tracks_stock() {
            item.take_one();
            item.updated_at = now;
            CatalogRepository::save_stock_in_tx(&mut tx, &item).await?;
        }

        let movement = ClientRepository::apply_plan_in_tx(&mut tx, client_id, &plan, now).await?;
        let redemption = RedemptionRepository::insert_in_tx(&mut tx, client_id, &item, now).await?;

        SyncQueueRepository::enqueue_in_tx(&mut tx, &NewSyncItem::sync_client(client_id)).await?;
        SyncQueueRepository::enqueue_in_tx(&mut tx, &NewSyncItem::sync_redemption(redemption.id))
            .await?;

        tx.commit().await?;
        Ok(RedeemOutcome {
            redemption,
            movement,
        })
    }

    async fn get_redemption(&self, id: i64) -> Result<Option<Redemption>> {
        RedemptionRepository::get(&self.pool, id).await
    }

    #[instrument(skip(self, receipt))]
    async fn update_redemption_status(
        &self,
        id: i64,
        status: RedemptionStatus,
        receipt: Option<EventReceipt>,
    ) -> Result<Redemption> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        insert_receipt(&mut tx, &receipt).await?;

        let current = RedemptionRepository::get_for_update(&mut tx, id)
            .await?
            .ok_or(LoyaltyError::RedemptionNotFound(id))?;
        current.ensure_transition(status)?;

        let updated = RedemptionRepository::update_status_in_tx(&mut tx, id, status, None, now).await?;
        SyncQueueRepository::enqueue_in_tx(&mut tx, &NewSyncItem::sync_redemption(id)).await?;

        tx.commit().await?;
        Ok(updated)
    }

    #[instrument(skip(self, receipt))]
    async fn cancel_redemption(
        &self,
        id: i64,
        reason: &str,
        receipt: Option<EventReceipt>,
    ) -> Result<CancelOutcome> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        insert_receipt(&mut tx, &receipt).await?;

        let current = RedemptionRepository::get_for_update(&mut tx, id)
            .await?
            .ok_or(LoyaltyError::RedemptionNotFound(id))?;
        current.ensure_transition(RedemptionStatus::Cancelled)?;

        if let Some(mut item) =
            CatalogRepository::get_for_update(&mut tx, current.catalog_item_id).await?
            && item.tracks_stock()
        {
            item.restock_one();
            item.updated_at = now;
            CatalogRepository::save_stock_in_tx(&mut tx, &item).await?;
        }

        let refund = if current.points_spent > 0 {
            Some(
                lock_and_apply(
                    &mut tx,
                    current.client_id,
                    current.points_spent,
                    MovementKind::ManualAdjustment,
                    &format!("Reembolso canje #{}: {}", id, reason),
                    now,
                )
                .await?,
            )
        } else {
            None
        };

        let redemption = RedemptionRepository::update_status_in_tx(
            &mut tx,
            id,
            RedemptionStatus::Cancelled,
            Some(reason),
            now,
        )
        .await?;

        if refund.is_some() {
            SyncQueueRepository::enqueue_in_tx(
                &mut tx,
                &NewSyncItem::sync_client(current.client_id),
            )
            .await?;
        }
        SyncQueueRepository::enqueue_in_tx(&mut tx, &NewSyncItem::sync_redemption(id)).await?;

        tx.commit().await?;
        Ok(CancelOutcome { redemption, refund })
    }

    async fn set_redemption_page(&self, id: i64, page_id: &str) -> Result<()> {
        RedemptionRepository::set_page(&self.pool, id, page_id).await
    }

    async fn get_gift_link(&self, code: &str) -> Result<Option<GiftLink>> {
        GiftLinkRepository::get_by_code(&self.pool, code).await
    }

    #[instrument(skip(self, now))]
    async fn redeem_gift_link(
        &self,
        code: &str,
        phone: &str,
        now: DateTime<Utc>,
        default_validity_days: i64,
    ) -> Result<GiftRedemption> {
        let mut tx = self.pool.begin().await?;

        let mut link = GiftLinkRepository::get_by_code_for_update(&mut tx, code)
            .await?
            .ok_or_else(|| LoyaltyError::GiftLinkNotFound(code.to_string()))?;

        if link.check_claimable(phone, now)? == LinkCheck::MustExpire {
            link.expire(now);
            GiftLinkRepository::save_state_in_tx(&mut tx, &link).await?;
            tx.commit().await?;
            return Err(LoyaltyError::Expired(code.to_string()));
        }

        let client = ClientRepository::get_by_phone_for_update(&mut tx, phone)
            .await?
            .ok_or_else(|| LoyaltyError::ClientNotRegistered(phone.to_string()))?;

        if link.is_campaign()
            && BenefitRepository::exists_for_client(&mut tx, client.id, link.id).await?
        {
            return Err(LoyaltyError::AlreadyRedeemedByClient {
                code: code.to_string(),
                client_id: client.id,
            });
        }

        let balance_after = match link.kind {
            GiftKind::Points if link.points > 0 => {
                let plan = client.plan_movement(
                    link.points,
                    MovementKind::Gifted,
                    &format!("Regalo {}", link.code),
                )?;
                let result =
                    ClientRepository::apply_plan_in_tx(&mut tx, client.id, &plan, now).await?;
                Some(result.balance_after())
            }
            _ => None,
        };

        let draft = GrantedBenefit::issue(&link, client.id, now, default_validity_days);
        let benefit = BenefitRepository::insert_in_tx(&mut tx, &draft).await?;

        link.record_redemption(client.id, now);
        GiftLinkRepository::save_state_in_tx(&mut tx, &link).await?;

        if balance_after.is_some() {
            SyncQueueRepository::enqueue_in_tx(&mut tx, &NewSyncItem::sync_client(client.id))
                .await?;
        }
        SyncQueueRepository::enqueue_in_tx(&mut tx, &NewSyncItem::benefit_ticket(benefit.id))
            .await?;

        tx.commit().await?;
        Ok(GiftRedemption {
            benefit,
            link,
            balance_after,
        })
    }

    async fn get_benefit(&self, id: i64) -> Result<Option<GrantedBenefit>> {
        BenefitRepository::get(&self.pool, id).await
    }

    async fn list_benefits_for_link(&self, gift_link_id: i64) -> Result<Vec<GrantedBenefit>> {
        BenefitRepository::list_for_link(&self.pool, gift_link_id).await
    }

    #[instrument(skip(self, now, receipt))]
    async fn use_benefit(
        &self,
        id: i64,
        now: DateTime<Utc>,
        receipt: Option<EventReceipt>,
    ) -> Result<GrantedBenefit> {
        let mut tx = self.pool.begin().await?;
        insert_receipt(&mut tx, &receipt).await?;

        let mut benefit = BenefitRepository::get_for_update(&mut tx, id)
            .await?
            .ok_or(LoyaltyError::BenefitNotFound(id))?;
        benefit.mark_used(now)?;
        BenefitRepository::save_usage_in_tx(&mut tx, &benefit).await?;

        tx.commit().await?;
        Ok(benefit)
    }

    async fn set_benefit_page(&self, id: i64, page_id: &str) -> Result<()> {
        BenefitRepository::set_page(&self.pool, id, page_id).await
    }

    async fn expire_overdue(&self, now: DateTime<Utc>, batch_size: i64) -> Result<ExpireReport> {
        Ok(ExpireReport {
            benefits_expired: BenefitRepository::expire_overdue(&self.pool, now, batch_size)
                .await?,
            links_expired: GiftLinkRepository::expire_overdue(&self.pool, now, batch_size).await?,
        })
    }

    async fn receipt_exists(&self, receipt: &EventReceipt) -> Result<bool> {
        ReceiptRepository::exists(&self.pool, receipt).await
    }
}

#[async_trait]
impl SyncQueueStore for PgLoyaltyStore {
    async fn enqueue(&self, item: NewSyncItem) -> Result<SyncQueueItem> {
        let mut conn = self.pool.acquire().await?;
        SyncQueueRepository::enqueue_in_tx(&mut conn, &item).await
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<SyncQueueItem>> {
        SyncQueueRepository::claim_next(&self.pool, now).await
    }

    async fn get_sync_item(&self, id: i64) -> Result<Option<SyncQueueItem>> {
        SyncQueueRepository::get(&self.pool, id).await
    }

    async fn save_outcome(&self, item: &SyncQueueItem) -> Result<bool> {
        SyncQueueRepository::save_outcome(&self.pool, item).await
    }

    async fn requeue_stale(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        SyncQueueRepository::requeue_stale(&self.pool, cutoff).await
    }

    async fn list_by_status(&self, status: SyncStatus, limit: i64) -> Result<Vec<SyncQueueItem>> {
        SyncQueueRepository::list_by_status(&self.pool, status, limit).await
    }

    async fn requeue_dead_letter(
        &self,
        id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<SyncQueueItem>> {
        SyncQueueRepository::requeue_dead_letter(&self.pool, id, now).await
    }
}
