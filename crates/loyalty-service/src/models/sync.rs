//! 同步队列与幂等回执模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use loyalty_shared::retry::RetryPolicy;

use crate::models::enums::{SyncOperation, SyncStatus};

/// 同步队列条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueItem {
    pub id: i64,
    pub operation: SyncOperation,
    /// 目标本地资源 ID（客户、权益或兑换记录）
    pub resource_id: i64,
    pub payload: Value,
    /// 累计失败次数
    pub retry_count: i32,
    pub status: SyncStatus,
    pub last_error: Option<String>,
    pub next_attempt_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 待入队的同步任务
#[derive(Debug, Clone, PartialEq)]
pub struct NewSyncItem {
    pub operation: SyncOperation,
    pub resource_id: i64,
    pub payload: Value,
}

impl NewSyncItem {
    pub fn new(operation: SyncOperation, resource_id: i64, payload: Value) -> Self {
        Self {
            operation,
            resource_id,
            payload,
        }
    }

    pub fn sync_client(client_id: i64) -> Self {
        Self::new(SyncOperation::SyncClient, client_id, Value::Null)
    }

    pub fn benefit_ticket(benefit_id: i64) -> Self {
        Self::new(SyncOperation::CreateBenefitTicket, benefit_id, Value::Null)
    }

    pub fn sync_redemption(redemption_id: i64) -> Self {
        Self::new(SyncOperation::SyncRedemption, redemption_id, Value::Null)
    }

    /// 构建完整条目（id 由存储层分配）
    pub fn into_item(self, id: i64, now: DateTime<Utc>) -> SyncQueueItem {
        SyncQueueItem {
            id,
            operation: self.operation,
            resource_id: self.resource_id,
            payload: self.payload,
            retry_count: 0,
            status: SyncStatus::Pending,
            last_error: None,
            next_attempt_at: now,
            claimed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl SyncQueueItem {
    /// 认领：pending → in_flight
    pub fn claim(&mut self, now: DateTime<Utc>) {
        self.status = SyncStatus::InFlight;
        self.claimed_at = Some(now);
        self.updated_at = now;
    }

    /// 标记完成
    pub fn mark_done(&mut self, now: DateTime<Utc>) {
        self.status = SyncStatus::Done;
        self.last_error = None;
        self.claimed_at = None;
        self.updated_at = now;
    }

    /// 记录一次失败
    ///
    /// `retry_count` 为已安排的重试次数。重试已用满 max_retries 后再失败进入死信，
    /// 即总共执行 max_retries + 1 次；否则按退避策略回到 pending
    pub fn record_failure(
        &mut self,
        error: &str,
        policy: &RetryPolicy,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> SyncStatus {
        self.last_error = Some(error.to_string());
        self.claimed_at = None;
        self.updated_at = now;

        if self.retry_count as u32 >= max_retries {
            self.status = SyncStatus::DeadLetter;
        } else {
            self.retry_count += 1;
            self.status = SyncStatus::Pending;
            self.next_attempt_at = policy.next_attempt_at(now, self.retry_count as u32);
        }

        self.status
    }

    /// 死信重新入队：清零失败次数
    pub fn requeue(&mut self, now: DateTime<Utc>) {
        self.status = SyncStatus::Pending;
        self.retry_count = 0;
        self.next_attempt_at = now;
        self.claimed_at = None;
        self.updated_at = now;
    }
}

/// 入站事件幂等回执
///
/// (source, source_record_id, event_type) 唯一，与事件效果在同一事务内写入
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EventReceipt {
    pub source: String,
    pub source_record_id: String,
    pub event_type: String,
}

impl EventReceipt {
    pub fn new(
        source: impl Into<String>,
        source_record_id: impl Into<String>,
        event_type: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            source_record_id: source_record_id.into(),
            event_type: event_type.into(),
        }
    }

    /// 转换为重复事件错误
    pub fn duplicate_error(&self) -> crate::error::LoyaltyError {
        crate::error::LoyaltyError::DuplicateEvent {
            origin: self.source.clone(),
            record_id: self.source_record_id.clone(),
            event_type: self.event_type.clone(),
        }
    }
}
