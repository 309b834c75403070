//! 积分服务枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化，
//! 数据库中统一以小写蛇形字符串存储

use serde::{Deserialize, Serialize};

/// 账本流水类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum MovementKind {
    /// 服务消费获得（+）
    Earned,
    /// 兑换目录商品/服务消耗（-）
    Redeemed,
    /// 礼品链接赠送（+）
    Gifted,
    /// 人工调整（±），兑换取消的退款也记为此类
    ManualAdjustment,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Earned => "earned",
            Self::Redeemed => "redeemed",
            Self::Gifted => "gifted",
            Self::ManualAdjustment => "manual_adjustment",
        }
    }

    /// 该类型是否允许此方向的变动
    ///
    /// earned/gifted 只能为正，redeemed 只能为负，人工调整两者皆可；零变动一律拒绝
    pub fn accepts_delta(&self, delta: i64) -> bool {
        match self {
            _ if delta == 0 => false,
            Self::Earned | Self::Gifted => delta > 0,
            Self::Redeemed => delta < 0,
            Self::ManualAdjustment => true,
        }
    }

    /// 是否计入累计积分（决定会员等级）
    pub fn counts_toward_lifetime(&self) -> bool {
        matches!(self, Self::Earned | Self::Gifted)
    }
}

/// 会员等级
///
/// 由累计积分决定，只升不降
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum MembershipTier {
    #[default]
    Bronze,
    Silver,
    Gold,
    Platinum,
}

impl MembershipTier {
    /// 根据累计积分计算等级
    pub fn for_lifetime_points(points: i64) -> Self {
        match points {
            p if p >= 15_000 => Self::Platinum,
            p if p >= 5_000 => Self::Gold,
            p if p >= 1_000 => Self::Silver,
            _ => Self::Bronze,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bronze => "bronze",
            Self::Silver => "silver",
            Self::Gold => "gold",
            Self::Platinum => "platinum",
        }
    }
}

/// 目录项类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum ItemKind {
    /// 实物商品，受库存约束
    Product,
    /// 服务，忽略库存
    Service,
}

/// 兑换状态
///
/// 商品：pending_delivery → delivered；
/// 服务：in_queue → scheduled → completed；
/// 任一非终态均可 → cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum RedemptionStatus {
    PendingDelivery,
    Delivered,
    InQueue,
    Scheduled,
    Completed,
    Cancelled,
}

impl RedemptionStatus {
    /// 新建兑换的初始状态
    pub fn initial_for(kind: ItemKind) -> Self {
        match kind {
            ItemKind::Product => Self::PendingDelivery,
            ItemKind::Service => Self::InQueue,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Completed | Self::Cancelled)
    }

    /// 状态机校验
    ///
    /// 服务允许跳过 scheduled 直接完成（工作台上常直接标记“Completado”）
    pub fn can_transition_to(&self, next: Self) -> bool {
        if self.is_terminal() || *self == next {
            return false;
        }

        match (self, next) {
            (_, Self::Cancelled) => true,
            (Self::PendingDelivery, Self::Delivered) => true,
            (Self::InQueue, Self::Scheduled) | (Self::InQueue, Self::Completed) => true,
            (Self::Scheduled, Self::Completed) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingDelivery => "pending_delivery",
            Self::Delivered => "delivered",
            Self::InQueue => "in_queue",
            Self::Scheduled => "scheduled",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// 礼品类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum GiftKind {
    /// 赠送积分，兑换时写入 gifted 流水
    Points,
    /// 赠送服务，只发放权益
    Service,
}

/// 礼品链接接收方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum RecipientMode {
    /// 单人链接，至多兑换一次
    Single,
    /// 活动链接，按上限计数，每个客户至多一次
    Campaign,
}

/// 礼品链接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum GiftLinkStatus {
    Pending,
    Redeemed,
    Expired,
    Exhausted,
}

/// 已发放权益状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum BenefitStatus {
    Active,
    Used,
    Expired,
    Cancelled,
}

impl BenefitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Used => "used",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }
}

/// 同步队列条目状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    InFlight,
    Done,
    DeadLetter,
}

/// 同步操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum SyncOperation {
    /// 将客户余额/等级投影到工作台
    SyncClient,
    /// 为已发放权益创建工单
    CreateBenefitTicket,
    /// 将兑换记录及其状态投影到工作台
    SyncRedemption,
}

impl SyncOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SyncClient => "sync_client",
            Self::CreateBenefitTicket => "create_benefit_ticket",
            Self::SyncRedemption => "sync_redemption",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_movement_kind_direction() {
        assert!(MovementKind::Earned.accepts_delta(10));
        assert!(!MovementKind::Earned.accepts_delta(-10));
        assert!(MovementKind::Redeemed.accepts_delta(-10));
        assert!(!MovementKind::Redeemed.accepts_delta(10));
        assert!(MovementKind::ManualAdjustment.accepts_delta(-5));
        assert!(MovementKind::ManualAdjustment.accepts_delta(5));
        assert!(!MovementKind::ManualAdjustment.accepts_delta(0));
    }

    #[test]
    fn test_tier_thresholds() {
        assert_eq!(MembershipTier::for_lifetime_points(0), MembershipTier::Bronze);
        assert_eq!(MembershipTier::for_lifetime_points(999), MembershipTier::Bronze);
        assert_eq!(MembershipTier::for_lifetime_points(1_000), MembershipTier::Silver);
        assert_eq!(MembershipTier::for_lifetime_points(5_000), MembershipTier::Gold);
        assert_eq!(
            MembershipTier::for_lifetime_points(15_000),
            MembershipTier::Platinum
        );
        assert!(MembershipTier::Gold > MembershipTier::Silver);
    }

    #[test]
    fn test_initial_redemption_status() {
        assert_eq!(
            RedemptionStatus::initial_for(ItemKind::Product),
            RedemptionStatus::PendingDelivery
        );
        assert_eq!(
            RedemptionStatus::initial_for(ItemKind::Service),
            RedemptionStatus::InQueue
        );
    }

    #[test]
    fn test_redemption_transitions() {
        use RedemptionStatus::*;

        assert!(PendingDelivery.can_transition_to(Delivered));
        assert!(PendingDelivery.can_transition_to(Cancelled));
        assert!(!PendingDelivery.can_transition_to(Scheduled));

        assert!(InQueue.can_transition_to(Scheduled));
        assert!(InQueue.can_transition_to(Completed));
        assert!(Scheduled.can_transition_to(Completed));
        assert!(Scheduled.can_transition_to(Cancelled));
        assert!(!Scheduled.can_transition_to(InQueue));

        // 终态不可再变更
        for terminal in [Delivered, Completed, Cancelled] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(Cancelled));
        }
    }

    #[test]
    fn test_serde_representation() {
        let json = serde_json::to_string(&RedemptionStatus::PendingDelivery).unwrap();
        assert_eq!(json, "\"pending_delivery\"");

        let kind: MovementKind = serde_json::from_str("\"manual_adjustment\"").unwrap();
        assert_eq!(kind, MovementKind::ManualAdjustment);
        assert_eq!(SyncOperation::CreateBenefitTicket.as_str(), "create_benefit_ticket");
    }
}
