//! 礼品链接与已发放权益模型
//!
//! 礼品链接的校验顺序是兑换正确性的一部分：
//! 已兑换 → 已过期 → 名额已满 → 接收人不符，存储层在持有链接行锁期间调用

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LoyaltyError, Result};
use crate::models::enums::{BenefitStatus, GiftKind, GiftLinkStatus, RecipientMode};

/// 礼品链接
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct GiftLink {
    pub id: i64,
    pub code: String,
    pub kind: GiftKind,
    pub recipient_mode: RecipientMode,
    /// 积分礼品发放的积分数，服务礼品为 0
    pub points: i64,
    pub description: Option<String>,
    /// 单人链接绑定的手机号（规范化后），为空表示先到先得
    pub recipient_phone: Option<String>,
    /// 权益有效天数，为空时使用配置的默认值
    pub validity_days: Option<i64>,
    pub expires_at: DateTime<Utc>,
    /// 活动名额上限，为空表示不限
    pub cap: Option<i32>,
    pub counter: i32,
    pub status: GiftLinkStatus,
    pub redeemed_by: Option<i64>,
    pub redeemed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 链接校验结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkCheck {
    /// 可以继续兑换
    Claimable,
    /// 已超过有效期，调用方需先持久化 expired 状态再拒绝
    MustExpire,
}

impl GiftLink {
    /// 新建 pending 链接（id 由存储层分配），其余可选项由调用方按需设置
    pub fn new(
        code: impl Into<String>,
        kind: GiftKind,
        recipient_mode: RecipientMode,
        points: i64,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            code: code.into(),
            kind,
            recipient_mode,
            points: match kind {
                GiftKind::Points => points,
                GiftKind::Service => 0,
            },
            description: None,
            recipient_phone: None,
            validity_days: None,
            expires_at,
            cap: None,
            counter: 0,
            status: GiftLinkStatus::Pending,
            redeemed_by: None,
            redeemed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_campaign(&self) -> bool {
        self.recipient_mode == RecipientMode::Campaign
    }

    /// 兑换前校验（不含客户相关检查）
    pub fn check_claimable(&self, caller_phone: &str, now: DateTime<Utc>) -> Result<LinkCheck> {
        if !self.is_campaign() && self.status == GiftLinkStatus::Redeemed {
            return Err(LoyaltyError::AlreadyRedeemed(self.code.clone()));
        }

        if self.status == GiftLinkStatus::Expired {
            return Err(LoyaltyError::Expired(self.code.clone()));
        }
        if self.expires_at < now {
            return if self.status == GiftLinkStatus::Pending {
                Ok(LinkCheck::MustExpire)
            } else {
                Err(LoyaltyError::Expired(self.code.clone()))
            };
        }

        if self.is_campaign() && (self.status == GiftLinkStatus::Exhausted || self.cap_reached()) {
            return Err(LoyaltyError::CampaignExhausted(self.code.clone()));
        }

        if !self.is_campaign()
            && let Some(bound) = &self.recipient_phone
            && bound != caller_phone
        {
            return Err(LoyaltyError::WrongRecipient(self.code.clone()));
        }

        Ok(LinkCheck::Claimable)
    }

    fn cap_reached(&self) -> bool {
        self.cap.is_some_and(|cap| self.counter >= cap)
    }

    /// 标记过期
    pub fn expire(&mut self, now: DateTime<Utc>) {
        self.status = GiftLinkStatus::Expired;
        self.updated_at = now;
    }

    /// 记录一次成功兑换
    ///
    /// 活动链接计数 +1，达到上限时转为 exhausted；单人链接转为 redeemed 并记录兑换人
    pub fn record_redemption(&mut self, client_id: i64, now: DateTime<Utc>) {
        if self.is_campaign() {
            self.counter += 1;
            if self.cap_reached() {
                self.status = GiftLinkStatus::Exhausted;
            }
        } else {
            self.status = GiftLinkStatus::Redeemed;
            self.redeemed_by = Some(client_id);
            self.redeemed_at = Some(now);
        }
        self.updated_at = now;
    }
}

/// 已发放权益
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct GrantedBenefit {
    pub id: i64,
    pub client_id: i64,
    pub gift_link_id: i64,
    pub kind: GiftKind,
    pub points_granted: i64,
    pub description: Option<String>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub status: BenefitStatus,
    pub used_at: Option<DateTime<Utc>>,
    pub workspace_page_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GrantedBenefit {
    /// 按链接生成待写入的权益（id 由存储层分配）
    pub fn issue(
        link: &GiftLink,
        client_id: i64,
        now: DateTime<Utc>,
        default_validity_days: i64,
    ) -> Self {
        let days = link.validity_days.unwrap_or(default_validity_days);
        Self {
            id: 0,
            client_id,
            gift_link_id: link.id,
            kind: link.kind,
            points_granted: match link.kind {
                GiftKind::Points => link.points,
                GiftKind::Service => 0,
            },
            description: link.description.clone(),
            valid_from: now,
            valid_until: now + Duration::days(days),
            status: BenefitStatus::Active,
            used_at: None,
            workspace_page_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 使用权益：仅 active 且在有效期内可用
    pub fn mark_used(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != BenefitStatus::Active {
            return Err(LoyaltyError::BenefitNotUsable {
                benefit_id: self.id,
                reason: format!("当前状态为 {}", self.status.as_str()),
            });
        }
        if now < self.valid_from || now > self.valid_until {
            return Err(LoyaltyError::BenefitNotUsable {
                benefit_id: self.id,
                reason: "不在有效期内".to_string(),
            });
        }

        self.status = BenefitStatus::Used;
        self.used_at = Some(now);
        self.updated_at = now;
        Ok(())
    }
}

/// 礼品兑换结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GiftRedemption {
    pub benefit: GrantedBenefit,
    pub link: GiftLink,
    /// 积分礼品产生的流水后余额
    pub balance_after: Option<i64>,
}

/// 过期扫描结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpireReport {
    pub benefits_expired: u64,
    pub links_expired: u64,
}
