//! 服务层数据传输对象
//!
//! 对外响应只暴露必要字段，与内部领域模型解耦

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{
    Client, GiftKind, GiftRedemption, MembershipTier, RedemptionStatus,
};
use crate::repository::RedeemOutcome;

/// 客户余额 DTO
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientBalanceDto {
    pub id: i64,
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub balance: i64,
    pub lifetime_points: i64,
    pub tier: MembershipTier,
}

impl From<&Client> for ClientBalanceDto {
    fn from(client: &Client) -> Self {
        Self {
            id: client.id,
            phone: client.phone.clone(),
            name: client.name.clone(),
            balance: client.balance,
            lifetime_points: client.lifetime_points,
            tier: client.tier,
        }
    }
}

/// 目录兑换响应
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemResponse {
    pub redemption_id: i64,
    pub status: RedemptionStatus,
    pub points_spent: i64,
    pub balance_before: i64,
    pub balance_after: i64,
}

impl From<&RedeemOutcome> for RedeemResponse {
    fn from(outcome: &RedeemOutcome) -> Self {
        Self {
            redemption_id: outcome.redemption.id,
            status: outcome.redemption.status,
            points_spent: outcome.redemption.points_spent,
            balance_before: outcome.movement.balance_before(),
            balance_after: outcome.movement.balance_after(),
        }
    }
}

/// 礼品兑换响应
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GiftRedeemResponse {
    pub benefit_id: i64,
    pub code: String,
    pub kind: GiftKind,
    pub points_granted: i64,
    pub valid_until: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance_after: Option<i64>,
}

impl From<&GiftRedemption> for GiftRedeemResponse {
    fn from(grant: &GiftRedemption) -> Self {
        Self {
            benefit_id: grant.benefit.id,
            code: grant.link.code.clone(),
            kind: grant.benefit.kind,
            points_granted: grant.benefit.points_granted,
            valid_until: grant.benefit.valid_until,
            balance_after: grant.balance_after,
        }
    }
}
