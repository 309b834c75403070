//! 目录兑换服务
//!
//! ## 兑换流程
//!
//! 1. 锁目录项 -> 2. 锁客户 -> 3. 重读校验（上架、库存、余额）
//!    -> 4. 扣库存 -> 5. 扣积分 -> 6. 写兑换记录与同步出箱 -> 7. 提交
//!
//! 1-7 由存储层在一个事务内完成，本服务负责计时、日志、唤醒同步与通知。

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Notify;
use tracing::{error, info, instrument};

use loyalty_shared::observability::metrics;

use crate::error::{LoyaltyError, Result};
use crate::models::{EventReceipt, Redemption, RedemptionStatus};
use crate::notification::{self, Notifier};
use crate::repository::{CancelOutcome, LoyaltyStore, RedeemOutcome};

pub struct RedemptionService {
    store: Arc<dyn LoyaltyStore>,
    notifier: Arc<dyn Notifier>,
    sync_wake: Arc<Notify>,
}

impl RedemptionService {
    pub fn new(
        store: Arc<dyn LoyaltyStore>,
        notifier: Arc<dyn Notifier>,
        sync_wake: Arc<Notify>,
    ) -> Self {
        Self {
            store,
            notifier,
            sync_wake,
        }
    }

    /// 兑换目录商品或服务
    ///
    /// 业务拒绝原样返回；意外错误包装为 `RedemptionFailed` 并附带原因
    #[instrument(skip(self))]
    pub async fn redeem(&self, client_id: i64, catalog_item_id: i64) -> Result<RedeemOutcome> {
        let started = Instant::now();
        let result = self.store.redeem_catalog_item(client_id, catalog_item_id).await;
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(outcome) => {
                metrics::record_redemption("success", elapsed);
                metrics::record_movement("redeemed", "success");
                self.sync_wake.notify_one();

                info!(
                    redemption_id = outcome.redemption.id,
                    status = outcome.redemption.status.as_str(),
                    points_spent = outcome.redemption.points_spent,
                    balance_after = outcome.movement.balance_after(),
                    "兑换成功"
                );

                notification::log_failure(
                    "redemption_created",
                    self.notifier
                        .redemption_created(&outcome.movement.client, &outcome.redemption)
                        .await,
                );
                Ok(outcome)
            }
            Err(e) => {
                metrics::record_redemption(e.error_code(), elapsed);
                if e.is_business_error() {
                    info!(code = e.error_code(), reason = %e, "兑换被拒绝");
                } else {
                    error!(error = %e, "兑换失败");
                }
                Err(e.into_redemption_failure())
            }
        }
    }

    pub async fn get_redemption(&self, id: i64) -> Result<Redemption> {
        self.store
            .get_redemption(id)
            .await?
            .ok_or(LoyaltyError::RedemptionNotFound(id))
    }

    /// 推进兑换状态
    #[instrument(skip(self))]
    pub async fn update_status(&self, id: i64, status: RedemptionStatus) -> Result<Redemption> {
        self.transition(id, status, None).await
    }

    /// 由工作台事件推进状态，同一事件只生效一次
    #[instrument(skip(self, receipt))]
    pub async fn update_status_once(
        &self,
        id: i64,
        status: RedemptionStatus,
        receipt: EventReceipt,
    ) -> Result<Redemption> {
        self.transition(id, status, Some(receipt)).await
    }

    async fn transition(
        &self,
        id: i64,
        status: RedemptionStatus,
        receipt: Option<EventReceipt>,
    ) -> Result<Redemption> {
        if status == RedemptionStatus::Cancelled {
            return Err(LoyaltyError::Validation(
                "取消兑换需使用 cancel 接口以退还积分".to_string(),
            ));
        }

        let redemption = self
            .store
            .update_redemption_status(id, status, receipt)
            .await?;
        self.sync_wake.notify_one();

        info!(redemption_id = id, status = status.as_str(), "兑换状态已更新");
        Ok(redemption)
    }

    /// 取消兑换：退还积分与库存
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: i64, reason: &str) -> Result<CancelOutcome> {
        self.cancel_with_receipt(id, reason, None).await
    }

    /// Webhook 推来的取消；同一回执只生效一次
    #[instrument(skip(self, receipt))]
    pub async fn cancel_once(
        &self,
        id: i64,
        reason: &str,
        receipt: EventReceipt,
    ) -> Result<CancelOutcome> {
        self.cancel_with_receipt(id, reason, Some(receipt)).await
    }

    async fn cancel_with_receipt(
        &self,
        id: i64,
        reason: &str,
        receipt: Option<EventReceipt>,
    ) -> Result<CancelOutcome> {
        if reason.trim().is_empty() {
            return Err(LoyaltyError::Validation("取消原因不能为空".to_string()));
        }

        let outcome = self
            .store
            .cancel_redemption(id, reason.trim(), receipt)
            .await?;
        if outcome.refund.is_some() {
            metrics::record_movement("manual_adjustment", "success");
        }
        self.sync_wake.notify_one();

        info!(
            redemption_id = id,
            refunded = outcome.redemption.points_spent,
            "兑换已取消"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemKind;
    use crate::notification::{LogNotifier, MockNotifier};
    use crate::repository::MemoryLoyaltyStore;
    use crate::repository::traits::MockLoyaltyStore;

    fn service(store: Arc<dyn LoyaltyStore>) -> RedemptionService {
        RedemptionService::new(store, Arc::new(LogNotifier), Arc::new(Notify::new()))
    }

    #[tokio::test]
    async fn test_insufficient_balance_leaves_balance() {
        let store = Arc::new(MemoryLoyaltyStore::new());
        let client = store.seed_client("5550001", 100);
        let item = store.seed_item("Tratamiento facial", ItemKind::Service, 150, None);
        let svc = service(store.clone());

        let err = svc.redeem(client.id, item.id).await.unwrap_err();
        assert!(matches!(
            err,
            LoyaltyError::InsufficientBalance {
                required: 150,
                available: 100
            }
        ));
        assert_eq!(store.get_client(client.id).await.unwrap().unwrap().balance, 100);
    }

    #[tokio::test]
    async fn test_service_redemption_goes_to_queue() {
        let store = Arc::new(MemoryLoyaltyStore::new());
        let client = store.seed_client("5550001", 150);
        let item = store.seed_item("Masaje", ItemKind::Service, 150, Some(0));
        let svc = service(store.clone());

        // 服务类目录项忽略库存
        let outcome = svc.redeem(client.id, item.id).await.unwrap();
        assert_eq!(outcome.redemption.status, RedemptionStatus::InQueue);
        assert_eq!(outcome.movement.balance_after(), 0);
    }

    #[tokio::test]
    async fn test_cancel_refunds_and_restocks() {
        let store = Arc::new(MemoryLoyaltyStore::new());
        let client = store.seed_client("5550001", 500);
        let item = store.seed_item("Crema", ItemKind::Product, 200, Some(1));
        let svc = service(store.clone());

        let outcome = svc.redeem(client.id, item.id).await.unwrap();
        let cancelled = svc
            .cancel(outcome.redemption.id, "sin existencias")
            .await
            .unwrap();

        assert_eq!(cancelled.redemption.status, RedemptionStatus::Cancelled);
        assert_eq!(cancelled.refund.unwrap().balance_after(), 500);
        assert_eq!(
            store.get_catalog_item(item.id).await.unwrap().unwrap().stock,
            Some(1)
        );

        // 终态不可再变更
        assert!(matches!(
            svc.update_status(outcome.redemption.id, RedemptionStatus::Delivered)
                .await,
            Err(LoyaltyError::InvalidStatusTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_status_update_rejects_cancel_shortcut() {
        let store = Arc::new(MemoryLoyaltyStore::new());
        let svc = service(store);
        assert!(matches!(
            svc.update_status(1, RedemptionStatus::Cancelled).await,
            Err(LoyaltyError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_system_error_wrapped_as_redemption_failure() {
        let mut mock = MockLoyaltyStore::new();
        mock.expect_redeem_catalog_item()
            .returning(|_, _| Err(LoyaltyError::Database(sqlx::Error::PoolTimedOut)));
        let svc = service(Arc::new(mock));

        let err = svc.redeem(1, 1).await.unwrap_err();
        assert_eq!(err.error_code(), "REDEMPTION_FAILED");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_notifier_failure_does_not_fail_redemption() {
        let store = Arc::new(MemoryLoyaltyStore::new());
        let client = store.seed_client("5550001", 100);
        let item = store.seed_item("Crema", ItemKind::Product, 50, None);

        let mut notifier = MockNotifier::new();
        notifier
            .expect_redemption_created()
            .times(1)
            .returning(|_, _| Err(LoyaltyError::Internal("smtp down".to_string())));
        let svc = RedemptionService::new(store, Arc::new(notifier), Arc::new(Notify::new()));

        assert!(svc.redeem(client.id, item.id).await.is_ok());
    }
}
