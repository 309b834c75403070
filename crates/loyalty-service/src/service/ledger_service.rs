//! 积分账本服务
//!
//! 余额的唯一写入口。人工调整、服务积分与 webhook 触发的变动都经过这里，
//! 由存储层在同一事务内写流水、更新余额并入队客户同步。

use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{info, instrument, warn};

use loyalty_shared::observability::metrics;

use crate::error::{LoyaltyError, Result};
use crate::models::{Client, EventReceipt, LedgerAudit, LedgerMovement, MovementRequest, MovementResult};
use crate::repository::LoyaltyStore;

/// 流水查询默认条数
pub const DEFAULT_MOVEMENT_LIMIT: i64 = 50;

pub struct LedgerService {
    store: Arc<dyn LoyaltyStore>,
    sync_wake: Arc<Notify>,
}

impl LedgerService {
    pub fn new(store: Arc<dyn LoyaltyStore>, sync_wake: Arc<Notify>) -> Self {
        Self { store, sync_wake }
    }

    pub async fn get_client(&self, client_id: i64) -> Result<Client> {
        self.store
            .get_client(client_id)
            .await?
            .ok_or(LoyaltyError::ClientNotFound(client_id))
    }

    /// 客户最近的流水（按 ID 升序）
    pub async fn list_movements(
        &self,
        client_id: i64,
        limit: Option<i64>,
    ) -> Result<Vec<LedgerMovement>> {
        self.get_client(client_id).await?;
        self.store
            .list_movements(client_id, Some(limit.unwrap_or(DEFAULT_MOVEMENT_LIMIT)))
            .await
    }

    /// 记录一次积分变动
    #[instrument(skip(self, request), fields(client_id = request.client_id, delta = request.delta, kind = request.kind.as_str()))]
    pub async fn apply_movement(&self, request: MovementRequest) -> Result<MovementResult> {
        self.apply(request, None).await
    }

    /// 记录由外部事件触发的积分变动，回执保证同一事件只生效一次
    #[instrument(skip(self, request), fields(client_id = request.client_id, delta = request.delta, event = %receipt.event_type))]
    pub async fn apply_movement_once(
        &self,
        request: MovementRequest,
        receipt: EventReceipt,
    ) -> Result<MovementResult> {
        self.apply(request, Some(receipt)).await
    }

    async fn apply(
        &self,
        request: MovementRequest,
        receipt: Option<EventReceipt>,
    ) -> Result<MovementResult> {
        let kind = request.kind;
        match self.store.apply_movement(request, receipt).await {
            Ok(result) => {
                metrics::record_movement(kind.as_str(), "success");
                self.sync_wake.notify_one();
                info!(
                    movement_id = result.movement.id,
                    balance_before = result.balance_before(),
                    balance_after = result.balance_after(),
                    "积分变动已记录"
                );
                Ok(result)
            }
            Err(e) => {
                metrics::record_movement(kind.as_str(), e.error_code());
                if e.is_business_error() {
                    info!(code = e.error_code(), reason = %e, "积分变动被拒绝");
                } else {
                    warn!(error = %e, "积分变动失败");
                }
                Err(e)
            }
        }
    }

    /// 按流水重算余额并检查前后衔接；只报告偏差，不做修复
    #[instrument(skip(self))]
    pub async fn audit_client(&self, client_id: i64) -> Result<LedgerAudit> {
        let client = self.get_client(client_id).await?;
        let movements = self.store.list_movements(client_id, None).await?;
        let audit = LedgerAudit::from_log(&client, &movements);

        if !audit.consistent {
            warn!(
                client_id,
                stored_balance = audit.stored_balance,
                recomputed_balance = audit.recomputed_balance,
                broken_links = ?audit.broken_links,
                "账本审计发现不一致"
            );
        }
        Ok(audit)
    }
}
