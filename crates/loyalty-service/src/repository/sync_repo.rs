//! 同步出箱队列与事件回执仓储

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use crate::error::{LoyaltyError, Result};
use crate::models::{EventReceipt, NewSyncItem, SyncQueueItem, SyncStatus};

const SYNC_COLUMNS: &str = "id, operation, resource_id, payload, retry_count, status, \
    last_error, next_attempt_at, claimed_at, created_at, updated_at";

/// 同步队列仓储
pub struct SyncQueueRepository;

impl SyncQueueRepository {
    /// 在业务事务内入队，与本地写入同时提交或同时回滚
    pub async fn enqueue_in_tx(tx: &mut PgConnection, item: &NewSyncItem) -> Result<SyncQueueItem> {
        let sql = format!(
            r#"
            INSERT INTO sync_queue (operation, resource_id, payload, status, next_attempt_at)
            VALUES ($1, $2, $3, 'pending', NOW())
            RETURNING {}
            "#,
            SYNC_COLUMNS
        );
        Ok(sqlx::query_as::<_, SyncQueueItem>(&sql)
            .bind(item.operation)
            .bind(item.resource_id)
            .bind(&item.payload)
            .fetch_one(tx)
            .await?)
    }

    /// 认领下一条到期条目
    ///
    /// SKIP LOCKED 保证多个 worker 并发认领时互不阻塞且不会拿到同一条
    pub async fn claim_next(pool: &PgPool, now: DateTime<Utc>) -> Result<Option<SyncQueueItem>> {
        let sql = format!(
            r#"
            UPDATE sync_queue
            SET status = 'in_flight', claimed_at = $1, updated_at = $1
            WHERE id = (
                SELECT id FROM sync_queue
                WHERE status = 'pending' AND next_attempt_at <= $1
                ORDER BY next_attempt_at, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {}
            "#,
            SYNC_COLUMNS
        );
        Ok(sqlx::query_as::<_, SyncQueueItem>(&sql)
            .bind(now)
            .fetch_optional(pool)
            .await?)
    }

    pub async fn get(pool: &PgPool, id: i64) -> Result<Option<SyncQueueItem>> {
        let sql = format!("SELECT {} FROM sync_queue WHERE id = $1", SYNC_COLUMNS);
        Ok(sqlx::query_as::<_, SyncQueueItem>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await?)
    }

    /// 写回处理结果，仅对仍处于 in_flight 的条目生效
    pub async fn save_outcome(pool: &PgPool, item: &SyncQueueItem) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sync_queue
            SET status = $2, retry_count = $3, last_error = $4,
                next_attempt_at = $5, claimed_at = $6, updated_at = $7
            WHERE id = $1 AND status = 'in_flight'
            "#,
        )
        .bind(item.id)
        .bind(item.status)
        .bind(item.retry_count)
        .bind(&item.last_error)
        .bind(item.next_attempt_at)
        .bind(item.claimed_at)
        .bind(item.updated_at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn requeue_stale(pool: &PgPool, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE sync_queue
            SET status = 'pending', claimed_at = NULL, next_attempt_at = NOW(), updated_at = NOW()
            WHERE status = 'in_flight' AND claimed_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn list_by_status(
        pool: &PgPool,
        status: SyncStatus,
        limit: i64,
    ) -> Result<Vec<SyncQueueItem>> {
        let sql = format!(
            "SELECT {} FROM sync_queue WHERE status = $1 ORDER BY id LIMIT $2",
            SYNC_COLUMNS
        );
        Ok(sqlx::query_as::<_, SyncQueueItem>(&sql)
            .bind(status)
            .bind(limit)
            .fetch_all(pool)
            .await?)
    }

    pub async fn requeue_dead_letter(
        pool: &PgPool,
        id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<SyncQueueItem>> {
        let sql = format!(
            r#"
            UPDATE sync_queue
            SET status = 'pending', retry_count = 0, next_attempt_at = $2,
                claimed_at = NULL, updated_at = $2
            WHERE id = $1 AND status = 'dead_letter'
            RETURNING {}
            "#,
            SYNC_COLUMNS
        );
        let requeued = sqlx::query_as::<_, SyncQueueItem>(&sql)
            .bind(id)
            .bind(now)
            .fetch_optional(pool)
            .await?;

        if requeued.is_none() && Self::get(pool, id).await?.is_none() {
            return Err(LoyaltyError::SyncItemNotFound(id));
        }
        Ok(requeued)
    }
}

/// 事件回执仓储
pub struct ReceiptRepository;

impl ReceiptRepository {
    /// 在效果事务内写入回执；已存在时返回 DuplicateEvent，调用方随之回滚
    pub async fn insert_in_tx(tx: &mut PgConnection, receipt: &EventReceipt) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO event_receipts (source, source_record_id, event_type)
            VALUES ($1, $2, $3)
            ON CONFLICT (source, source_record_id, event_type) DO NOTHING
            "#,
        )
        .bind(&receipt.source)
        .bind(&receipt.source_record_id)
        .bind(&receipt.event_type)
        .execute(tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(receipt.duplicate_error());
        }
        Ok(())
    }

    pub async fn exists(pool: &PgPool, receipt: &EventReceipt) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM event_receipts
                WHERE source = $1 AND source_record_id = $2 AND event_type = $3
            )
            "#,
        )
        .bind(&receipt.source)
        .bind(&receipt.source_record_id)
        .bind(&receipt.event_type)
        .fetch_one(pool)
        .await?;
        Ok(exists)
    }
}
