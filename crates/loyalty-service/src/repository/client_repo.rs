//! 客户与账本流水仓储
//!
//! 余额变动必须在事务内先 `get_for_update` 锁定客户行，
//! 同一客户的流水因此按行锁全序写入

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use crate::error::{LoyaltyError, Result};
use crate::models::{Client, LedgerMovement, MovementPlan, MovementResult};

const CLIENT_COLUMNS: &str = "id, phone, name, balance, lifetime_points, tier, \
    workspace_page_id, rewards_page_id, created_at, updated_at";

const MOVEMENT_COLUMNS: &str =
    "id, client_id, delta, kind, reason, balance_before, balance_after, created_at";

/// 客户仓储
pub struct ClientRepository;

impl ClientRepository {
    pub async fn get(pool: &PgPool, id: i64) -> Result<Option<Client>> {
        let sql = format!("SELECT {} FROM clients WHERE id = $1", CLIENT_COLUMNS);
        Ok(sqlx::query_as::<_, Client>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await?)
    }

    /// 按指定唯一列查找（phone / workspace_page_id / rewards_page_id）
    pub async fn find_by(pool: &PgPool, column: LookupColumn, value: &str) -> Result<Option<Client>> {
        let sql = format!(
            "SELECT {} FROM clients WHERE {} = $1",
            CLIENT_COLUMNS,
            column.as_sql()
        );
        Ok(sqlx::query_as::<_, Client>(&sql)
            .bind(value)
            .fetch_optional(pool)
            .await?)
    }

    // ==================== 事务操作 ====================

    /// 在事务中获取客户（带行级锁）
    pub async fn get_for_update(tx: &mut PgConnection, id: i64) -> Result<Option<Client>> {
        let sql = format!(
            "SELECT {} FROM clients WHERE id = $1 FOR UPDATE",
            CLIENT_COLUMNS
        );
        Ok(sqlx::query_as::<_, Client>(&sql)
            .bind(id)
            .fetch_optional(tx)
            .await?)
    }

    /// 在事务中按手机号获取客户（带行级锁）
    pub async fn get_by_phone_for_update(
        tx: &mut PgConnection,
        phone: &str,
    ) -> Result<Option<Client>> {
        let sql = format!(
            "SELECT {} FROM clients WHERE phone = $1 FOR UPDATE",
            CLIENT_COLUMNS
        );
        Ok(sqlx::query_as::<_, Client>(&sql)
            .bind(phone)
            .fetch_optional(tx)
            .await?)
    }

    /// 按手机号插入客户；并发插入同一手机号时返回已存在的行
    ///
    /// 返回 (客户, 是否新建)
    pub async fn insert_or_lock_by_phone(
        tx: &mut PgConnection,
        phone: &str,
    ) -> Result<(Client, bool)> {
        let sql = format!(
            r#"
            INSERT INTO clients (phone, tier, created_at, updated_at)
            VALUES ($1, 'bronze', NOW(), NOW())
            ON CONFLICT (phone) DO NOTHING
            RETURNING {}
            "#,
            CLIENT_COLUMNS
        );
        let inserted = sqlx::query_as::<_, Client>(&sql)
            .bind(phone)
            .fetch_optional(&mut *tx)
            .await?;

        match inserted {
            Some(client) => Ok((client, true)),
            None => {
                let client = Self::get_by_phone_for_update(tx, phone)
                    .await?
                    .ok_or_else(|| LoyaltyError::ClientNotRegistered(phone.to_string()))?;
                Ok((client, false))
            }
        }
    }

    /// 更新联系人资料，None 字段保持不变
    pub async fn update_profile_in_tx(
        tx: &mut PgConnection,
        id: i64,
        name: Option<&str>,
        workspace_page_id: Option<&str>,
        rewards_page_id: Option<&str>,
    ) -> Result<Client> {
        let sql = format!(
            r#"
            UPDATE clients
            SET name = COALESCE($2, name),
                workspace_page_id = COALESCE($3, workspace_page_id),
                rewards_page_id = COALESCE($4, rewards_page_id),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            CLIENT_COLUMNS
        );
        sqlx::query_as::<_, Client>(&sql)
            .bind(id)
            .bind(name)
            .bind(workspace_page_id)
            .bind(rewards_page_id)
            .fetch_optional(tx)
            .await?
            .ok_or(LoyaltyError::ClientNotFound(id))
    }

    /// 在事务中应用已校验的变动计划：写流水 + 更新余额
    ///
    /// 调用方必须已通过 get_for_update 锁定该客户，plan 基于锁定后的快照计算
    pub async fn apply_plan_in_tx(
        tx: &mut PgConnection,
        client_id: i64,
        plan: &MovementPlan,
        now: DateTime<Utc>,
    ) -> Result<MovementResult> {
        let movement = LedgerRepository::insert_in_tx(&mut *tx, client_id, plan, now).await?;

        let sql = format!(
            r#"
            UPDATE clients
            SET balance = $2, lifetime_points = $3, tier = $4, updated_at = $5
            WHERE id = $1
            RETURNING {}
            "#,
            CLIENT_COLUMNS
        );
        let client = sqlx::query_as::<_, Client>(&sql)
            .bind(client_id)
            .bind(plan.balance_after)
            .bind(plan.lifetime_after)
            .bind(plan.tier_after)
            .bind(now)
            .fetch_one(tx)
            .await?;

        Ok(MovementResult { movement, client })
    }
}

/// 客户唯一查找列
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupColumn {
    Phone,
    WorkspacePage,
    RewardsPage,
}

impl LookupColumn {
    fn as_sql(&self) -> &'static str {
        match self {
            Self::Phone => "phone",
            Self::WorkspacePage => "workspace_page_id",
            Self::RewardsPage => "rewards_page_id",
        }
    }
}

/// 账本流水仓储（只追加）
pub struct LedgerRepository;

impl LedgerRepository {
    pub async fn insert_in_tx(
        tx: &mut PgConnection,
        client_id: i64,
        plan: &MovementPlan,
        now: DateTime<Utc>,
    ) -> Result<LedgerMovement> {
        let sql = format!(
            r#"
            INSERT INTO ledger_movements
                (client_id, delta, kind, reason, balance_before, balance_after, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            MOVEMENT_COLUMNS
        );
        Ok(sqlx::query_as::<_, LedgerMovement>(&sql)
            .bind(client_id)
            .bind(plan.delta)
            .bind(plan.kind)
            .bind(&plan.reason)
            .bind(plan.balance_before)
            .bind(plan.balance_after)
            .bind(now)
            .fetch_one(tx)
            .await?)
    }

    /// 按 ID 升序返回流水；limit 为空时返回全部，否则返回最近 N 条
    pub async fn list_by_client(
        pool: &PgPool,
        client_id: i64,
        limit: Option<i64>,
    ) -> Result<Vec<LedgerMovement>> {
        let sql = format!(
            r#"
            SELECT {cols} FROM (
                SELECT {cols} FROM ledger_movements
                WHERE client_id = $1
                ORDER BY id DESC
                LIMIT $2
            ) recent
            ORDER BY id ASC
            "#,
            cols = MOVEMENT_COLUMNS
        );
        Ok(sqlx::query_as::<_, LedgerMovement>(&sql)
            .bind(client_id)
            .bind(limit)
            .fetch_all(pool)
            .await?)
    }
}
