//! 目录与兑换记录仓储

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use crate::error::{LoyaltyError, Result};
use crate::models::{CatalogItem, Redemption, RedemptionStatus};

const ITEM_COLUMNS: &str = "id, name, kind, point_cost, stock, active, created_at, updated_at";

const REDEMPTION_COLUMNS: &str = "id, client_id, catalog_item_id, item_kind, points_spent, \
    status, cancel_reason, workspace_page_id, created_at, updated_at";

/// 目录仓储
pub struct CatalogRepository;

impl CatalogRepository {
    pub async fn get(pool: &PgPool, id: i64) -> Result<Option<CatalogItem>> {
        let sql = format!("SELECT {} FROM catalog_items WHERE id = $1", ITEM_COLUMNS);
        Ok(sqlx::query_as::<_, CatalogItem>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await?)
    }

    /// 在事务中获取目录项（带行级锁）
    ///
    /// 兑换时先锁目录项再锁客户，保证同一商品的最后一件库存只会被一个请求拿到
    pub async fn get_for_update(tx: &mut PgConnection, id: i64) -> Result<Option<CatalogItem>> {
        let sql = format!(
            "SELECT {} FROM catalog_items WHERE id = $1 FOR UPDATE",
            ITEM_COLUMNS
        );
        Ok(sqlx::query_as::<_, CatalogItem>(&sql)
            .bind(id)
            .fetch_optional(tx)
            .await?)
    }

    /// 写回库存（不跟踪库存的目录项 stock 保持 NULL）
    pub async fn save_stock_in_tx(tx: &mut PgConnection, item: &CatalogItem) -> Result<()> {
        sqlx::query("UPDATE catalog_items SET stock = $2, updated_at = $3 WHERE id = $1")
            .bind(item.id)
            .bind(item.stock)
            .bind(item.updated_at)
            .execute(tx)
            .await?;
        Ok(())
    }
}

/// 兑换记录仓储
pub struct RedemptionRepository;

impl RedemptionRepository {
    pub async fn get(pool: &PgPool, id: i64) -> Result<Option<Redemption>> {
        let sql = format!("SELECT {} FROM redemptions WHERE id = $1", REDEMPTION_COLUMNS);
        Ok(sqlx::query_as::<_, Redemption>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await?)
    }

    pub async fn get_for_update(tx: &mut PgConnection, id: i64) -> Result<Option<Redemption>> {
        let sql = format!(
            "SELECT {} FROM redemptions WHERE id = $1 FOR UPDATE",
            REDEMPTION_COLUMNS
        );
        Ok(sqlx::query_as::<_, Redemption>(&sql)
            .bind(id)
            .fetch_optional(tx)
            .await?)
    }

    pub async fn insert_in_tx(
        tx: &mut PgConnection,
        client_id: i64,
        item: &CatalogItem,
        now: DateTime<Utc>,
    ) -> Result<Redemption> {
        let sql = format!(
            r#"
            INSERT INTO redemptions
                (client_id, catalog_item_id, item_kind, points_spent, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING {}
            "#,
            REDEMPTION_COLUMNS
        );
        Ok(sqlx::query_as::<_, Redemption>(&sql)
            .bind(client_id)
            .bind(item.id)
            .bind(item.kind)
            .bind(item.point_cost)
            .bind(RedemptionStatus::initial_for(item.kind))
            .bind(now)
            .fetch_one(tx)
            .await?)
    }

    /// 更新状态（与取消原因）
    pub async fn update_status_in_tx(
        tx: &mut PgConnection,
        id: i64,
        status: RedemptionStatus,
        cancel_reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Redemption> {
        let sql = format!(
            r#"
            UPDATE redemptions
            SET status = $2, cancel_reason = COALESCE($3, cancel_reason), updated_at = $4
            WHERE id = $1
            RETURNING {}
            "#,
            REDEMPTION_COLUMNS
        );
        sqlx::query_as::<_, Redemption>(&sql)
            .bind(id)
            .bind(status)
            .bind(cancel_reason)
            .bind(now)
            .fetch_optional(tx)
            .await?
            .ok_or(LoyaltyError::RedemptionNotFound(id))
    }

    pub async fn set_page(pool: &PgPool, id: i64, page_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE redemptions SET workspace_page_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(page_id)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LoyaltyError::RedemptionNotFound(id));
        }
        Ok(())
    }
}
