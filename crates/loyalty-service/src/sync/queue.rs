//! 同步队列
//!
//! 至少一次投递：认领 pending → in_flight，成功标记 done，
//! 失败按指数退避回到 pending，累计失败达到上限后进入死信

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{info, instrument, warn};

use loyalty_shared::config::SyncConfig;
use loyalty_shared::observability::metrics;
use loyalty_shared::retry::RetryPolicy;

use crate::error::{LoyaltyError, Result};
use crate::models::{NewSyncItem, SyncOperation, SyncQueueItem, SyncStatus};
use crate::repository::SyncQueueStore;

pub struct SyncQueue {
    store: Arc<dyn SyncQueueStore>,
    policy: RetryPolicy,
    max_retries: u32,
    lease: chrono::Duration,
}

impl SyncQueue {
    pub fn new(store: Arc<dyn SyncQueueStore>, config: &SyncConfig) -> Self {
        Self {
            store,
            policy: RetryPolicy::from_sync_config(config),
            max_retries: config.max_retries,
            lease: chrono::Duration::seconds(config.lease_timeout_secs as i64),
        }
    }

    /// 测试用：自定义退避策略
    pub fn with_policy(
        store: Arc<dyn SyncQueueStore>,
        policy: RetryPolicy,
        max_retries: u32,
    ) -> Self {
        Self {
            store,
            policy,
            max_retries,
            lease: chrono::Duration::minutes(5),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub async fn enqueue(
        &self,
        operation: SyncOperation,
        resource_id: i64,
        payload: Value,
    ) -> Result<SyncQueueItem> {
        self.store
            .enqueue(NewSyncItem::new(operation, resource_id, payload))
            .await
    }

    /// 认领下一条到期条目
    pub async fn dequeue_next(&self) -> Result<Option<SyncQueueItem>> {
        self.store.claim_next(Utc::now()).await
    }

    /// 写回处理结果
    ///
    /// 条目已不在 in_flight（如租约过期被重新认领）时结果被丢弃，返回当前状态
    #[instrument(skip(self, error))]
    pub async fn complete(
        &self,
        item_id: i64,
        success: bool,
        error: Option<&str>,
    ) -> Result<SyncQueueItem> {
        let mut item = self
            .store
            .get_sync_item(item_id)
            .await?
            .ok_or(LoyaltyError::SyncItemNotFound(item_id))?;

        if item.status != SyncStatus::InFlight {
            warn!(status = ?item.status, "条目不在处理中，忽略结果");
            return Ok(item);
        }

        let now = Utc::now();
        let operation = item.operation.as_str();
        if success {
            item.mark_done(now);
            metrics::record_sync_item(operation, "done");
        } else {
            let reason = error.unwrap_or("未知错误");
            match item.record_failure(reason, &self.policy, self.max_retries, now) {
                SyncStatus::DeadLetter => {
                    metrics::record_sync_item(operation, "dead_letter");
                    metrics::record_dead_letter(operation);
                    warn!(
                        operation,
                        resource_id = item.resource_id,
                        retry_count = item.retry_count,
                        error = reason,
                        "同步条目进入死信"
                    );
                }
                _ => {
                    metrics::record_sync_item(operation, "retry");
                    info!(
                        operation,
                        retry_count = item.retry_count,
                        next_attempt_at = %item.next_attempt_at,
                        "同步失败，等待重试"
                    );
                }
            }
        }

        if !self.store.save_outcome(&item).await? {
            warn!("条目状态已被其他 worker 改变，结果未写入");
            return self
                .store
                .get_sync_item(item_id)
                .await?
                .ok_or(LoyaltyError::SyncItemNotFound(item_id));
        }
        Ok(item)
    }

    /// 把租约过期的 in_flight 条目放回 pending
    pub async fn requeue_stale(&self) -> Result<u64> {
        let cutoff = Utc::now() - self.lease;
        let count = self.store.requeue_stale(cutoff).await?;
        if count > 0 {
            warn!(count, "回收租约过期的同步条目");
        }
        Ok(count)
    }

    pub async fn list_dead_letters(&self, limit: i64) -> Result<Vec<SyncQueueItem>> {
        self.store.list_by_status(SyncStatus::DeadLetter, limit).await
    }

    /// 死信重新入队（失败次数清零）
    #[instrument(skip(self))]
    pub async fn requeue(&self, item_id: i64) -> Result<SyncQueueItem> {
        let item = self
            .store
            .requeue_dead_letter(item_id, Utc::now())
            .await?
            .ok_or(LoyaltyError::SyncItemNotDeadLetter(item_id))?;
        info!(operation = item.operation.as_str(), "死信已重新入队");
        Ok(item)
    }
}
