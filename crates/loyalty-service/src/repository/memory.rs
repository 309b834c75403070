//! 内存存储实现
//!
//! 单写者模型：所有操作在同一把 `parking_lot::Mutex` 下完成“读取 → 校验 → 写入”，
//! 等价于数据库行锁 + 事务。每个操作先完成全部校验再修改状态，因此失败时无需回滚。
//! 用于测试与本地开发，行为与 Postgres 实现保持一致。

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::{LoyaltyError, Result};
use crate::models::{
    BenefitStatus, CatalogItem, Client, EventReceipt, ExpireReport, GiftLink, GiftLinkStatus,
    GiftKind, GiftRedemption, GrantedBenefit, ItemKind, LedgerMovement, LinkCheck,
    MovementKind, MovementPlan, MovementRequest, MovementResult, NewSyncItem,
    Redemption, RedemptionStatus, SyncQueueItem, SyncStatus,
};
use crate::repository::traits::{
    CancelOutcome, ContactUpsert, LoyaltyStore, RedeemOutcome, SyncQueueStore,
};

/// 各表的自增序列
#[derive(Default)]
struct Sequences {
    client: i64,
    movement: i64,
    item: i64,
    redemption: i64,
    gift_link: i64,
    benefit: i64,
    sync_item: i64,
}

fn next(seq: &mut i64) -> i64 {
    *seq += 1;
    *seq
}

#[derive(Default)]
struct State {
    seq: Sequences,
    clients: BTreeMap<i64, Client>,
    movements: Vec<LedgerMovement>,
    items: BTreeMap<i64, CatalogItem>,
    redemptions: BTreeMap<i64, Redemption>,
    gift_links: BTreeMap<i64, GiftLink>,
    benefits: BTreeMap<i64, GrantedBenefit>,
    sync_items: BTreeMap<i64, SyncQueueItem>,
    receipts: HashSet<EventReceipt>,
}

impl State {
    fn ensure_new_receipt(&self, receipt: &Option<EventReceipt>) -> Result<()> {
        match receipt {
            Some(r) if self.receipts.contains(r) => Err(r.duplicate_error()),
            _ => Ok(()),
        }
    }

    fn record_receipt(&mut self, receipt: Option<EventReceipt>) {
        if let Some(r) = receipt {
            self.receipts.insert(r);
        }
    }

    fn client(&self, id: i64) -> Result<Client> {
        self.clients
            .get(&id)
            .cloned()
            .ok_or(LoyaltyError::ClientNotFound(id))
    }

    fn client_by_phone(&self, phone: &str) -> Option<Client> {
        self.clients.values().find(|c| c.phone == phone).cloned()
    }

    /// 写入流水并更新客户快照，plan 必须基于该客户当前快照计算
    fn commit_movement(
        &mut self,
        client_id: i64,
        plan: &MovementPlan,
        now: DateTime<Utc>,
    ) -> Result<MovementResult> {
        let client = self
            .clients
            .get_mut(&client_id)
            .ok_or(LoyaltyError::ClientNotFound(client_id))?;
        client.apply_plan(plan, now);
        let client = client.clone();

        let movement = LedgerMovement {
            id: next(&mut self.seq.movement),
            client_id,
            delta: plan.delta,
            kind: plan.kind,
            reason: plan.reason.clone(),
            balance_before: plan.balance_before,
            balance_after: plan.balance_after,
            created_at: now,
        };
        self.movements.push(movement.clone());

        Ok(MovementResult { movement, client })
    }

    fn push_sync(&mut self, item: NewSyncItem, now: DateTime<Utc>) -> SyncQueueItem {
        let id = next(&mut self.seq.sync_item);
        let item = item.into_item(id, now);
        self.sync_items.insert(id, item.clone());
        item
    }
}

/// 内存存储
#[derive(Default)]
pub struct MemoryLoyaltyStore {
    state: Mutex<State>,
}

impl MemoryLoyaltyStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== 测试数据准备 ====================

    /// 创建客户；初始积分以一条 earned 流水写入，保持余额与流水一致
    pub fn seed_client(&self, phone: &str, initial_points: i64) -> Client {
        let now = Utc::now();
        let mut st = self.state.lock();
        let id = next(&mut st.seq.client);
        let client = Client::new_member(id, phone, now);
        st.clients.insert(id, client.clone());

        match client.plan_movement(initial_points, MovementKind::Earned, "saldo inicial") {
            Ok(plan) => st
                .commit_movement(id, &plan, now)
                .map(|result| result.client)
                .unwrap_or(client),
            Err(_) => client,
        }
    }

    pub fn seed_item(
        &self,
        name: &str,
        kind: ItemKind,
        point_cost: i64,
        stock: Option<i32>,
    ) -> CatalogItem {
        let now = Utc::now();
        let mut st = self.state.lock();
        let id = next(&mut st.seq.item);
        let item = CatalogItem {
            id,
            name: name.to_string(),
            kind,
            point_cost,
            stock,
            active: true,
            created_at: now,
            updated_at: now,
        };
        st.items.insert(id, item.clone());
        item
    }

    /// 写入礼品链接，忽略传入的 id
    pub fn seed_gift_link(&self, mut link: GiftLink) -> GiftLink {
        let mut st = self.state.lock();
        link.id = next(&mut st.seq.gift_link);
        st.gift_links.insert(link.id, link.clone());
        link
    }

    /// 当前全部同步条目（按 ID 升序）
    pub fn sync_items(&self) -> Vec<SyncQueueItem> {
        self.state.lock().sync_items.values().cloned().collect()
    }
}

#[async_trait]
impl LoyaltyStore for MemoryLoyaltyStore {
    async fn get_client(&self, id: i64) -> Result<Option<Client>> {
        Ok(self.state.lock().clients.get(&id).cloned())
    }

    async fn find_client_by_phone(&self, phone: &str) -> Result<Option<Client>> {
        Ok(self.state.lock().client_by_phone(phone))
    }

    async fn find_client_by_workspace_page(&self, page_id: &str) -> Result<Option<Client>> {
        Ok(self
            .state
            .lock()
            .clients
            .values()
            .find(|c| c.workspace_page_id.as_deref() == Some(page_id))
            .cloned())
    }

    async fn find_client_by_rewards_page(&self, page_id: &str) -> Result<Option<Client>> {
        Ok(self
            .state
            .lock()
            .clients
            .values()
            .find(|c| c.rewards_page_id.as_deref() == Some(page_id))
            .cloned())
    }

    async fn upsert_client_by_phone(
        &self,
        phone: &str,
        name: Option<String>,
        workspace_page_id: Option<String>,
        receipt: Option<EventReceipt>,
    ) -> Result<ContactUpsert> {
        let now = Utc::now();
        let mut st = self.state.lock();
        st.ensure_new_receipt(&receipt)?;

        let (client_id, created) = match st.client_by_phone(phone) {
            Some(existing) => (existing.id, false),
            None => {
                let id = next(&mut st.seq.client);
                st.clients.insert(id, Client::new_member(id, phone, now));
                (id, true)
            }
        };

        let client = st
            .clients
            .get_mut(&client_id)
            .ok_or(LoyaltyError::ClientNotFound(client_id))?;
        if name.is_some() {
            client.name = name;
        }
        if workspace_page_id.is_some() {
            client.workspace_page_id = workspace_page_id;
        }
        client.updated_at = now;
        let client = client.clone();

        st.push_sync(NewSyncItem::sync_client(client_id), now);
        st.record_receipt(receipt);

        Ok(ContactUpsert { client, created })
    }

    async fn link_client_pages(
        &self,
        client_id: i64,
        workspace_page_id: Option<String>,
        rewards_page_id: Option<String>,
    ) -> Result<()> {
        let mut st = self.state.lock();
        let client = st
            .clients
            .get_mut(&client_id)
            .ok_or(LoyaltyError::ClientNotFound(client_id))?;
        if workspace_page_id.is_some() {
            client.workspace_page_id = workspace_page_id;
        }
        if rewards_page_id.is_some() {
            client.rewards_page_id = rewards_page_id;
        }
        client.updated_at = Utc::now();
        Ok(())
    }

    async fn apply_movement(
        &self,
        request: MovementRequest,
        receipt: Option<EventReceipt>,
    ) -> Result<MovementResult> {
        let now = Utc::now();
        let mut st = self.state.lock();
        st.ensure_new_receipt(&receipt)?;

        let client = st.client(request.client_id)?;
        let plan = client.plan_movement(request.delta, request.kind, &request.reason)?;

        let result = st.commit_movement(request.client_id, &plan, now)?;
        st.push_sync(NewSyncItem::sync_client(request.client_id), now);
        st.record_receipt(receipt);

        Ok(result)
    }

    async fn list_movements(
        &self,
        client_id: i64,
        limit: Option<i64>,
    ) -> Result<Vec<LedgerMovement>> {
        let st = self.state.lock();
        let all: Vec<LedgerMovement> = st
            .movements
            .iter()
            .filter(|m| m.client_id == client_id)
            .cloned()
            .collect();

        Ok(match limit {
            // 取最近 N 条，仍按 ID 升序返回
            Some(n) if n >= 0 && (n as usize) < all.len() => all[all.len() - n as usize..].to_vec(),
            _ => all,
        })
    }

    async fn get_catalog_item(&self, id: i64) -> Result<Option<CatalogItem>> {
        Ok(self.state.lock().items.get(&id).cloned())
    }

    async fn redeem_catalog_item(&self, client_id: i64, item_id: i64) -> Result<RedeemOutcome> {
        let now = Utc::now();
        let mut st = self.state.lock();

        let mut item = st
            .items
            .get(&item_id)
            .cloned()
            .ok_or(LoyaltyError::ItemNotFound(item_id))?;
        let client = st.client(client_id)?;

        item.check_redeemable(client.balance)?;
        let plan = client.plan_movement(
            -item.point_cost,
            MovementKind::Redeemed,
            &format!("Canje: {}", item.name),
        )?;

        item.take_one();
        item.updated_at = now;
        st.items.insert(item_id, item.clone());

        let movement = st.commit_movement(client_id, &plan, now)?;

        let redemption = Redemption {
            id: next(&mut st.seq.redemption),
            client_id,
            catalog_item_id: item_id,
            item_kind: item.kind,
            points_spent: item.point_cost,
            status: RedemptionStatus::initial_for(item.kind),
            cancel_reason: None,
            workspace_page_id: None,
            created_at: now,
            updated_at: now,
        };
        st.redemptions.insert(redemption.id, redemption.clone());

        st.push_sync(NewSyncItem::sync_client(client_id), now);
        st.push_sync(NewSyncItem::sync_redemption(redemption.id), now);

        Ok(RedeemOutcome {
            redemption,
            movement,
        })
    }

    async fn get_redemption(&self, id: i64) -> Result<Option<Redemption>> {
        Ok(self.state.lock().redemptions.get(&id).cloned())
    }

    async fn update_redemption_status(
        &self,
        id: i64,
        status: RedemptionStatus,
        receipt: Option<EventReceipt>,
    ) -> Result<Redemption> {
        let now = Utc::now();
        let mut st = self.state.lock();
        st.ensure_new_receipt(&receipt)?;

        let redemption = st
            .redemptions
            .get_mut(&id)
            .ok_or(LoyaltyError::RedemptionNotFound(id))?;
        redemption.ensure_transition(status)?;
        redemption.status = status;
        redemption.updated_at = now;
        let redemption = redemption.clone();

        st.push_sync(NewSyncItem::sync_redemption(id), now);
        st.record_receipt(receipt);

        Ok(redemption)
    }

    async fn cancel_redemption(
        &self,
        id: i64,
        reason: &str,
        receipt: Option<EventReceipt>,
    ) -> Result<CancelOutcome> {
        let now = Utc::now();
        let mut st = self.state.lock();
        st.ensure_new_receipt(&receipt)?;

        let mut redemption = st
            .redemptions
            .get(&id)
            .cloned()
            .ok_or(LoyaltyError::RedemptionNotFound(id))?;
        redemption.ensure_transition(RedemptionStatus::Cancelled)?;

        let client = st.client(redemption.client_id)?;
        let plan = if redemption.points_spent > 0 {
            Some(client.plan_movement(
                redemption.points_spent,
                MovementKind::ManualAdjustment,
                &format!("Reembolso canje #{}: {}", id, reason),
            )?)
        } else {
            None
        };

        if let Some(item) = st.items.get_mut(&redemption.catalog_item_id) {
            item.restock_one();
            item.updated_at = now;
        }

        let refund = plan
            .map(|p| st.commit_movement(redemption.client_id, &p, now))
            .transpose()?;

        redemption.status = RedemptionStatus::Cancelled;
        redemption.cancel_reason = Some(reason.to_string());
        redemption.updated_at = now;
        st.redemptions.insert(id, redemption.clone());

        if refund.is_some() {
            st.push_sync(NewSyncItem::sync_client(redemption.client_id), now);
        }
        st.push_sync(NewSyncItem::sync_redemption(id), now);
        st.record_receipt(receipt);

        Ok(CancelOutcome { redemption, refund })
    }

    async fn set_redemption_page(&self, id: i64, page_id: &str) -> Result<()> {
        let mut st = self.state.lock();
        let redemption = st
            .redemptions
            .get_mut(&id)
            .ok_or(LoyaltyError::RedemptionNotFound(id))?;
        redemption.workspace_page_id = Some(page_id.to_string());
        Ok(())
    }

    async fn get_gift_link(&self, code: &str) -> Result<Option<GiftLink>> {
        Ok(self
            .state
            .lock()
            .gift_links
            .values()
            .find(|l| l.code == code)
            .cloned())
    }

    async fn redeem_gift_link(
        &self,
        code: &str,
        phone: &str,
        now: DateTime<Utc>,
        default_validity_days: i64,
    ) -> Result<GiftRedemption> {
        let mut st = self.state.lock();

        let mut link = st
            .gift_links
            .values()
            .find(|l| l.code == code)
            .cloned()
            .ok_or_else(|| LoyaltyError::GiftLinkNotFound(code.to_string()))?;

        if link.check_claimable(phone, now)? == LinkCheck::MustExpire {
            // 过期状态先落库再拒绝
            link.expire(now);
            st.gift_links.insert(link.id, link);
            return Err(LoyaltyError::Expired(code.to_string()));
        }

        let client = st
            .client_by_phone(phone)
            .ok_or_else(|| LoyaltyError::ClientNotRegistered(phone.to_string()))?;

        if link.is_campaign()
            && st
                .benefits
                .values()
                .any(|b| b.gift_link_id == link.id && b.client_id == client.id)
        {
            return Err(LoyaltyError::AlreadyRedeemedByClient {
                code: code.to_string(),
                client_id: client.id,
            });
        }

        let plan = match link.kind {
            GiftKind::Points if link.points > 0 => Some(client.plan_movement(
                link.points,
                MovementKind::Gifted,
                &format!("Regalo {}", link.code),
            )?),
            _ => None,
        };

        let balance_after = plan
            .map(|p| st.commit_movement(client.id, &p, now))
            .transpose()?
            .map(|m| m.balance_after());

        let mut benefit = GrantedBenefit::issue(&link, client.id, now, default_validity_days);
        benefit.id = next(&mut st.seq.benefit);
        st.benefits.insert(benefit.id, benefit.clone());

        link.record_redemption(client.id, now);
        st.gift_links.insert(link.id, link.clone());

        if balance_after.is_some() {
            st.push_sync(NewSyncItem::sync_client(client.id), now);
        }
        st.push_sync(NewSyncItem::benefit_ticket(benefit.id), now);

        Ok(GiftRedemption {
            benefit,
            link,
            balance_after,
        })
    }

    async fn get_benefit(&self, id: i64) -> Result<Option<GrantedBenefit>> {
        Ok(self.state.lock().benefits.get(&id).cloned())
    }

    async fn list_benefits_for_link(&self, gift_link_id: i64) -> Result<Vec<GrantedBenefit>> {
        Ok(self
            .state
            .lock()
            .benefits
            .values()
            .filter(|b| b.gift_link_id == gift_link_id)
            .cloned()
            .collect())
    }

    async fn use_benefit(
        &self,
        id: i64,
        now: DateTime<Utc>,
        receipt: Option<EventReceipt>,
    ) -> Result<GrantedBenefit> {
        let mut st = self.state.lock();
        st.ensure_new_receipt(&receipt)?;

        let mut benefit = st
            .benefits
            .get(&id)
            .cloned()
            .ok_or(LoyaltyError::BenefitNotFound(id))?;
        benefit.mark_used(now)?;
        st.benefits.insert(id, benefit.clone());
        st.record_receipt(receipt);

        Ok(benefit)
    }

    async fn set_benefit_page(&self, id: i64, page_id: &str) -> Result<()> {
        let mut st = self.state.lock();
        let benefit = st
            .benefits
            .get_mut(&id)
            .ok_or(LoyaltyError::BenefitNotFound(id))?;
        benefit.workspace_page_id = Some(page_id.to_string());
        Ok(())
    }

    async fn expire_overdue(&self, now: DateTime<Utc>, batch_size: i64) -> Result<ExpireReport> {
        let limit = batch_size.max(0) as usize;
        let mut st = self.state.lock();
        let mut report = ExpireReport::default();

        for benefit in st
            .benefits
            .values_mut()
            .filter(|b| b.status == BenefitStatus::Active && b.valid_until < now)
            .take(limit)
        {
            benefit.status = BenefitStatus::Expired;
            benefit.updated_at = now;
            report.benefits_expired += 1;
        }

        for link in st
            .gift_links
            .values_mut()
            .filter(|l| l.status == GiftLinkStatus::Pending && l.expires_at < now)
            .take(limit)
        {
            link.expire(now);
            report.links_expired += 1;
        }

        Ok(report)
    }

    async fn receipt_exists(&self, receipt: &EventReceipt) -> Result<bool> {
        Ok(self.state.lock().receipts.contains(receipt))
    }
}

#[async_trait]
impl SyncQueueStore for MemoryLoyaltyStore {
    async fn enqueue(&self, item: NewSyncItem) -> Result<SyncQueueItem> {
        Ok(self.state.lock().push_sync(item, Utc::now()))
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<SyncQueueItem>> {
        let mut st = self.state.lock();
        let candidate = st
            .sync_items
            .values()
            .filter(|i| i.status == SyncStatus::Pending && i.next_attempt_at <= now)
            .min_by_key(|i| (i.next_attempt_at, i.id))
            .map(|i| i.id);

        Ok(candidate.and_then(|id| {
            st.sync_items.get_mut(&id).map(|item| {
                item.claim(now);
                item.clone()
            })
        }))
    }

    async fn get_sync_item(&self, id: i64) -> Result<Option<SyncQueueItem>> {
        Ok(self.state.lock().sync_items.get(&id).cloned())
    }

    async fn save_outcome(&self, item: &SyncQueueItem) -> Result<bool> {
        let mut st = self.state.lock();
        match st.sync_items.get_mut(&item.id) {
            Some(current) if current.status == SyncStatus::InFlight => {
                *current = item.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn requeue_stale(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let now = Utc::now();
        let mut st = self.state.lock();
        let mut count = 0;
        for item in st.sync_items.values_mut().filter(|i| {
            i.status == SyncStatus::InFlight && i.claimed_at.is_some_and(|at| at < cutoff)
        }) {
            item.status = SyncStatus::Pending;
            item.claimed_at = None;
            item.next_attempt_at = now;
            item.updated_at = now;
            count += 1;
        }
        Ok(count)
    }

    async fn list_by_status(&self, status: SyncStatus, limit: i64) -> Result<Vec<SyncQueueItem>> {
        Ok(self
            .state
            .lock()
            .sync_items
            .values()
            .filter(|i| i.status == status)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn requeue_dead_letter(
        &self,
        id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<SyncQueueItem>> {
        let mut st = self.state.lock();
        let item = st
            .sync_items
            .get_mut(&id)
            .ok_or(LoyaltyError::SyncItemNotFound(id))?;
        if item.status != SyncStatus::DeadLetter {
            return Ok(None);
        }
        item.requeue(now);
        Ok(Some(item.clone()))
    }
}
