//! 礼品链接与权益服务
//!
//! 链接兑换的全部校验与写入在链接行锁内由存储层完成；
//! 本服务负责手机号规范化、指标、同步唤醒与通知

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{error, info, instrument};

use loyalty_shared::observability::metrics;

use crate::error::{LoyaltyError, Result};
use crate::models::{EventReceipt, ExpireReport, GiftRedemption, GrantedBenefit, normalize_phone};
use crate::notification::{self, Notifier};
use crate::repository::LoyaltyStore;

pub struct GiftService {
    store: Arc<dyn LoyaltyStore>,
    notifier: Arc<dyn Notifier>,
    sync_wake: Arc<Notify>,
    default_validity_days: i64,
}

impl GiftService {
    pub fn new(
        store: Arc<dyn LoyaltyStore>,
        notifier: Arc<dyn Notifier>,
        sync_wake: Arc<Notify>,
        default_validity_days: i64,
    ) -> Self {
        Self {
            store,
            notifier,
            sync_wake,
            default_validity_days,
        }
    }

    /// 兑换礼品链接
    ///
    /// 客户必须已注册，不会按手机号自动创建
    #[instrument(skip(self, recipient_phone))]
    pub async fn redeem_gift_link(&self, code: &str, recipient_phone: &str) -> Result<GiftRedemption> {
        let phone = normalize_phone(recipient_phone)
            .ok_or_else(|| LoyaltyError::Validation("手机号无效".to_string()))?;

        let result = self
            .store
            .redeem_gift_link(code, &phone, Utc::now(), self.default_validity_days)
            .await;

        match result {
            Ok(grant) => {
                metrics::record_gift_redemption("success");
                if grant.balance_after.is_some() {
                    metrics::record_movement("gifted", "success");
                }
                self.sync_wake.notify_one();

                info!(
                    code,
                    client_id = grant.benefit.client_id,
                    benefit_id = grant.benefit.id,
                    counter = grant.link.counter,
                    "礼品兑换成功"
                );

                notification::log_failure(
                    "gift_granted",
                    self.notifier
                        .gift_granted(grant.benefit.client_id, &grant)
                        .await,
                );
                Ok(grant)
            }
            Err(e) => {
                metrics::record_gift_redemption(e.error_code());
                if e.is_business_error() {
                    info!(code, reason = e.error_code(), "礼品兑换被拒绝");
                } else {
                    error!(code, error = %e, "礼品兑换失败");
                }
                Err(e.into_redemption_failure())
            }
        }
    }

    pub async fn get_benefit(&self, id: i64) -> Result<GrantedBenefit> {
        self.store
            .get_benefit(id)
            .await?
            .ok_or(LoyaltyError::BenefitNotFound(id))
    }

    /// 使用权益（active → used）
    #[instrument(skip(self))]
    pub async fn use_benefit(&self, id: i64) -> Result<GrantedBenefit> {
        let benefit = self.store.use_benefit(id, Utc::now(), None).await?;
        info!(benefit_id = id, "权益已使用");
        Ok(benefit)
    }

    /// 由工作台工单触发的权益使用，同一事件只生效一次
    #[instrument(skip(self, receipt))]
    pub async fn use_benefit_once(&self, id: i64, receipt: EventReceipt) -> Result<GrantedBenefit> {
        let benefit = self.store.use_benefit(id, Utc::now(), Some(receipt)).await?;
        info!(benefit_id = id, "权益已由工作台标记为使用");
        Ok(benefit)
    }

    /// 过期扫描
    pub async fn expire_overdue(&self, batch_size: i64) -> Result<ExpireReport> {
        let report = self.store.expire_overdue(Utc::now(), batch_size).await?;
        if report.benefits_expired > 0 || report.links_expired > 0 {
            info!(
                benefits = report.benefits_expired,
                links = report.links_expired,
                "过期扫描完成"
            );
        }
        Ok(report)
    }
}
