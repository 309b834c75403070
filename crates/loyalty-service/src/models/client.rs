//! 客户与积分账本模型
//!
//! 余额是不可变流水日志的物化视图：`balance == sum(movements.delta)`。
//! 所有余额变动都先经 [`Client::plan_movement`] 计算，再由存储层在同一事务内落库。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LoyaltyError, Result};
use crate::models::enums::{MembershipTier, MovementKind};

/// 会员客户
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: i64,
    /// 自然键，仅保留数字
    pub phone: String,
    pub name: Option<String>,
    pub balance: i64,
    pub lifetime_points: i64,
    pub tier: MembershipTier,
    /// 工作台客户库中的页面 ID
    pub workspace_page_id: Option<String>,
    /// 工作台积分库中的页面 ID
    pub rewards_page_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 账本流水（只追加，不可修改）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LedgerMovement {
    pub id: i64,
    pub client_id: i64,
    pub delta: i64,
    pub kind: MovementKind,
    pub reason: String,
    pub balance_before: i64,
    pub balance_after: i64,
    pub created_at: DateTime<Utc>,
}

/// 积分变动请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementRequest {
    pub client_id: i64,
    pub delta: i64,
    pub kind: MovementKind,
    pub reason: String,
}

impl MovementRequest {
    pub fn new(client_id: i64, delta: i64, kind: MovementKind, reason: impl Into<String>) -> Self {
        Self {
            client_id,
            delta,
            kind,
            reason: reason.into(),
        }
    }
}

/// 已校验的变动计划，存储层据此写入流水并更新客户
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementPlan {
    pub delta: i64,
    pub kind: MovementKind,
    pub reason: String,
    pub balance_before: i64,
    pub balance_after: i64,
    pub lifetime_after: i64,
    pub tier_after: MembershipTier,
}

/// 积分变动结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementResult {
    pub movement: LedgerMovement,
    pub client: Client,
}

impl MovementResult {
    pub fn balance_before(&self) -> i64 {
        self.movement.balance_before
    }

    pub fn balance_after(&self) -> i64 {
        self.movement.balance_after
    }
}

impl Client {
    /// 新会员：零余额、铜卡
    pub fn new_member(id: i64, phone: &str, now: DateTime<Utc>) -> Self {
        Self {
            id,
            phone: phone.to_string(),
            name: None,
            balance: 0,
            lifetime_points: 0,
            tier: MembershipTier::Bronze,
            workspace_page_id: None,
            rewards_page_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 计算一次积分变动
    ///
    /// 任何类型的变动都不允许使余额为负；等级按累计积分重算且只升不降
    pub fn plan_movement(
        &self,
        delta: i64,
        kind: MovementKind,
        reason: &str,
    ) -> Result<MovementPlan> {
        if !kind.accepts_delta(delta) {
            return Err(LoyaltyError::InvalidMovement(format!(
                "{} 不接受变动值 {}",
                kind.as_str(),
                delta
            )));
        }

        let balance_after = self
            .balance
            .checked_add(delta)
            .ok_or_else(|| LoyaltyError::InvalidMovement("积分余额溢出".to_string()))?;

        if balance_after < 0 {
            return Err(LoyaltyError::InsufficientBalance {
                required: -delta,
                available: self.balance,
            });
        }

        let lifetime_after = if kind.counts_toward_lifetime() {
            self.lifetime_points.saturating_add(delta)
        } else {
            self.lifetime_points
        };
        let tier_after = self
            .tier
            .max(MembershipTier::for_lifetime_points(lifetime_after));

        Ok(MovementPlan {
            delta,
            kind,
            reason: reason.to_string(),
            balance_before: self.balance,
            balance_after,
            lifetime_after,
            tier_after,
        })
    }

    /// 将计划应用到内存中的客户快照
    pub fn apply_plan(&mut self, plan: &MovementPlan, now: DateTime<Utc>) {
        self.balance = plan.balance_after;
        self.lifetime_points = plan.lifetime_after;
        self.tier = plan.tier_after;
        self.updated_at = now;
    }
}

/// 手机号规范化：只保留数字
///
/// 工作台与前端录入格式不一（空格、横线、括号、国家码前的 +），
/// 统一后作为客户的自然键；没有任何数字时返回 None
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() { None } else { Some(digits) }
}

/// 流水链审计结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerAudit {
    pub client_id: i64,
    pub stored_balance: i64,
    pub recomputed_balance: i64,
    pub movement_count: usize,
    /// balance_before 与上一条 balance_after 不衔接，或 before+delta≠after 的流水 ID
    pub broken_links: Vec<i64>,
    pub consistent: bool,
}

impl LedgerAudit {
    /// 按 ID 升序的流水重算余额并检查前后衔接
    pub fn from_log(client: &Client, movements: &[LedgerMovement]) -> Self {
        let mut running = 0i64;
        let mut broken_links = Vec::new();

        for movement in movements {
            if movement.balance_before != running
                || movement.balance_before + movement.delta != movement.balance_after
            {
                broken_links.push(movement.id);
            }
            running += movement.delta;
        }

        Self {
            client_id: client.id,
            stored_balance: client.balance,
            recomputed_balance: running,
            movement_count: movements.len(),
            consistent: broken_links.is_empty() && running == client.balance,
            broken_links,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(balance: i64, lifetime: i64, tier: MembershipTier) -> Client {
        let now = Utc::now();
        Client {
            id: 1,
            phone: "5215550001".to_string(),
            name: None,
            balance,
            lifetime_points: lifetime,
            tier,
            workspace_page_id: None,
            rewards_page_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn movement(id: i64, delta: i64, before: i64) -> LedgerMovement {
        LedgerMovement {
            id,
            client_id: 1,
            delta,
            kind: MovementKind::ManualAdjustment,
            reason: "test".to_string(),
            balance_before: before,
            balance_after: before + delta,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_plan_rejects_negative_balance() {
        let c = client(100, 100, MembershipTier::Bronze);
        let err = c
            .plan_movement(-150, MovementKind::Redeemed, "兑换")
            .unwrap_err();
        assert!(matches!(
            err,
            LoyaltyError::InsufficientBalance {
                required: 150,
                available: 100
            }
        ));

        // 人工调整同样不能透支
        assert!(c
            .plan_movement(-101, MovementKind::ManualAdjustment, "调整")
            .is_err());
    }

    #[test]
    fn test_plan_exact_balance_reaches_zero() {
        let c = client(150, 150, MembershipTier::Bronze);
        let plan = c.plan_movement(-150, MovementKind::Redeemed, "兑换").unwrap();
        assert_eq!(plan.balance_before, 150);
        assert_eq!(plan.balance_after, 0);
        assert_eq!(plan.lifetime_after, 150);
    }

    #[test]
    fn test_plan_rejects_wrong_direction() {
        let c = client(100, 100, MembershipTier::Bronze);
        assert!(matches!(
            c.plan_movement(-5, MovementKind::Earned, "x"),
            Err(LoyaltyError::InvalidMovement(_))
        ));
        assert!(matches!(
            c.plan_movement(0, MovementKind::ManualAdjustment, "x"),
            Err(LoyaltyError::InvalidMovement(_))
        ));
    }

    #[test]
    fn test_tier_upgrades_and_never_downgrades() {
        let c = client(900, 900, MembershipTier::Bronze);
        let plan = c.plan_movement(200, MovementKind::Earned, "服务").unwrap();
        assert_eq!(plan.tier_after, MembershipTier::Silver);

        // 已是金卡的客户，累计积分不足也不降级
        let gold = client(10, 10, MembershipTier::Gold);
        let plan = gold.plan_movement(5, MovementKind::Gifted, "礼品").unwrap();
        assert_eq!(plan.tier_after, MembershipTier::Gold);
    }

    #[test]
    fn test_refund_does_not_count_toward_lifetime() {
        let c = client(0, 500, MembershipTier::Bronze);
        let plan = c
            .plan_movement(600, MovementKind::ManualAdjustment, "退款")
            .unwrap();
        assert_eq!(plan.lifetime_after, 500);
        assert_eq!(plan.tier_after, MembershipTier::Bronze);
    }

    #[test]
    fn test_normalize_phone() {
        assert_eq!(
            normalize_phone("+52 (55) 5000-1234"),
            Some("525550001234".to_string())
        );
        assert_eq!(normalize_phone("  "), None);
        assert_eq!(normalize_phone("n/a"), None);
    }

    #[test]
    fn test_audit_consistent_log() {
        let c = client(70, 100, MembershipTier::Bronze);
        let log = vec![movement(1, 100, 0), movement(2, -30, 100)];
        let audit = LedgerAudit::from_log(&c, &log);
        assert!(audit.consistent);
        assert_eq!(audit.recomputed_balance, 70);
        assert_eq!(audit.movement_count, 2);
    }

    #[test]
    fn test_audit_detects_drift() {
        let c = client(90, 100, MembershipTier::Bronze);
        let log = vec![movement(1, 100, 0), movement(2, -30, 90)];
        let audit = LedgerAudit::from_log(&c, &log);
        assert!(!audit.consistent);
        assert_eq!(audit.broken_links, vec![2]);
        assert_eq!(audit.recomputed_balance, 70);
    }
}
