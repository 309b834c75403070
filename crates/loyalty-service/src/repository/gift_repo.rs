//! 礼品链接与权益仓储

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use crate::error::{LoyaltyError, Result};
use crate::models::{GiftLink, GrantedBenefit};

const LINK_COLUMNS: &str = "id, code, kind, recipient_mode, points, description, \
    recipient_phone, validity_days, expires_at, cap, counter, status, redeemed_by, \
    redeemed_at, created_at, updated_at";

const BENEFIT_COLUMNS: &str = "id, client_id, gift_link_id, kind, points_granted, description, \
    valid_from, valid_until, status, used_at, workspace_page_id, created_at, updated_at";

/// 礼品链接仓储
pub struct GiftLinkRepository;

impl GiftLinkRepository {
    pub async fn get_by_code(pool: &PgPool, code: &str) -> Result<Option<GiftLink>> {
        let sql = format!("SELECT {} FROM gift_links WHERE code = $1", LINK_COLUMNS);
        Ok(sqlx::query_as::<_, GiftLink>(&sql)
            .bind(code)
            .fetch_optional(pool)
            .await?)
    }

    /// 在事务中获取链接（带行级锁），整个兑换期间持有
    pub async fn get_by_code_for_update(
        tx: &mut PgConnection,
        code: &str,
    ) -> Result<Option<GiftLink>> {
        let sql = format!(
            "SELECT {} FROM gift_links WHERE code = $1 FOR UPDATE",
            LINK_COLUMNS
        );
        Ok(sqlx::query_as::<_, GiftLink>(&sql)
            .bind(code)
            .fetch_optional(tx)
            .await?)
    }

    pub async fn insert(pool: &PgPool, link: &GiftLink) -> Result<GiftLink> {
        let sql = format!(
            r#"
            INSERT INTO gift_links
                (code, kind, recipient_mode, points, description, recipient_phone,
                 validity_days, expires_at, cap, counter, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12)
            RETURNING {}
            "#,
            LINK_COLUMNS
        );
        Ok(sqlx::query_as::<_, GiftLink>(&sql)
            .bind(&link.code)
            .bind(link.kind)
            .bind(link.recipient_mode)
            .bind(link.points)
            .bind(&link.description)
            .bind(&link.recipient_phone)
            .bind(link.validity_days)
            .bind(link.expires_at)
            .bind(link.cap)
            .bind(link.counter)
            .bind(link.status)
            .bind(link.created_at)
            .fetch_one(pool)
            .await?)
    }

    /// 写回链接的可变状态
    pub async fn save_state_in_tx(tx: &mut PgConnection, link: &GiftLink) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE gift_links
            SET status = $2, counter = $3, redeemed_by = $4, redeemed_at = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(link.id)
        .bind(link.status)
        .bind(link.counter)
        .bind(link.redeemed_by)
        .bind(link.redeemed_at)
        .bind(link.updated_at)
        .execute(tx)
        .await?;
        Ok(())
    }

    /// 批量过期 pending 链接
    pub async fn expire_overdue(pool: &PgPool, now: DateTime<Utc>, batch_size: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE gift_links SET status = 'expired', updated_at = $1
            WHERE id IN (
                SELECT id FROM gift_links
                WHERE status = 'pending' AND expires_at < $1
                ORDER BY id
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            "#,
        )
        .bind(now)
        .bind(batch_size)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}

/// 已发放权益仓储
pub struct BenefitRepository;

impl BenefitRepository {
    pub async fn get(pool: &PgPool, id: i64) -> Result<Option<GrantedBenefit>> {
        let sql = format!("SELECT {} FROM granted_benefits WHERE id = $1", BENEFIT_COLUMNS);
        Ok(sqlx::query_as::<_, GrantedBenefit>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await?)
    }

    pub async fn get_for_update(tx: &mut PgConnection, id: i64) -> Result<Option<GrantedBenefit>> {
        let sql = format!(
            "SELECT {} FROM granted_benefits WHERE id = $1 FOR UPDATE",
            BENEFIT_COLUMNS
        );
        Ok(sqlx::query_as::<_, GrantedBenefit>(&sql)
            .bind(id)
            .fetch_optional(tx)
            .await?)
    }

    pub async fn list_for_link(pool: &PgPool, gift_link_id: i64) -> Result<Vec<GrantedBenefit>> {
        let sql = format!(
            "SELECT {} FROM granted_benefits WHERE gift_link_id = $1 ORDER BY id",
            BENEFIT_COLUMNS
        );
        Ok(sqlx::query_as::<_, GrantedBenefit>(&sql)
            .bind(gift_link_id)
            .fetch_all(pool)
            .await?)
    }

    /// 客户是否已领取过该链接
    pub async fn exists_for_client(
        tx: &mut PgConnection,
        client_id: i64,
        gift_link_id: i64,
    ) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM granted_benefits WHERE client_id = $1 AND gift_link_id = $2)",
        )
        .bind(client_id)
        .bind(gift_link_id)
        .fetch_one(tx)
        .await?;
        Ok(exists)
    }

    pub async fn insert_in_tx(
        tx: &mut PgConnection,
        benefit: &GrantedBenefit,
    ) -> Result<GrantedBenefit> {
        let sql = format!(
            r#"
            INSERT INTO granted_benefits
                (client_id, gift_link_id, kind, points_granted, description,
                 valid_from, valid_until, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
            RETURNING {}
            "#,
            BENEFIT_COLUMNS
        );
        Ok(sqlx::query_as::<_, GrantedBenefit>(&sql)
            .bind(benefit.client_id)
            .bind(benefit.gift_link_id)
            .bind(benefit.kind)
            .bind(benefit.points_granted)
            .bind(&benefit.description)
            .bind(benefit.valid_from)
            .bind(benefit.valid_until)
            .bind(benefit.status)
            .bind(benefit.created_at)
            .fetch_one(tx)
            .await?)
    }

    pub async fn save_usage_in_tx(tx: &mut PgConnection, benefit: &GrantedBenefit) -> Result<()> {
        sqlx::query(
            "UPDATE granted_benefits SET status = $2, used_at = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(benefit.id)
        .bind(benefit.status)
        .bind(benefit.used_at)
        .bind(benefit.updated_at)
        .execute(tx)
        .await?;
        Ok(())
    }

    pub async fn set_page(pool: &PgPool, id: i64, page_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE granted_benefits SET workspace_page_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(page_id)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LoyaltyError::BenefitNotFound(id));
        }
        Ok(())
    }

    /// 批量过期 active 权益
    pub async fn expire_overdue(pool: &PgPool, now: DateTime<Utc>, batch_size: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE granted_benefits SET status = 'expired', updated_at = $1
            WHERE id IN (
                SELECT id FROM granted_benefits
                WHERE status = 'active' AND valid_until < $1
                ORDER BY id
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            "#,
        )
        .bind(now)
        .bind(batch_size)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
