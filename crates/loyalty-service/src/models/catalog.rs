//! 兑换目录与兑换记录模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LoyaltyError, Result};
use crate::models::enums::{ItemKind, RedemptionStatus};

/// 兑换目录项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub id: i64,
    pub name: String,
    pub kind: ItemKind,
    pub point_cost: i64,
    /// 商品库存；None 表示不限量，服务类忽略此字段
    pub stock: Option<i32>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CatalogItem {
    /// 是否受库存约束
    pub fn tracks_stock(&self) -> bool {
        self.kind == ItemKind::Product && self.stock.is_some()
    }

    /// 兑换前校验：上架、库存、余额（按此顺序）
    ///
    /// 必须在持有目录项行锁、重新读取最新数据后调用
    pub fn check_redeemable(&self, balance: i64) -> Result<()> {
        if !self.active {
            return Err(LoyaltyError::ItemUnavailable(self.id));
        }

        if self.tracks_stock() && self.stock.unwrap_or(0) <= 0 {
            return Err(LoyaltyError::ItemUnavailable(self.id));
        }

        if balance < self.point_cost {
            return Err(LoyaltyError::InsufficientBalance {
                required: self.point_cost,
                available: balance,
            });
        }

        Ok(())
    }

    /// 扣减一件库存（不限量或服务类不变）
    pub fn take_one(&mut self) {
        if self.tracks_stock() {
            self.stock = self.stock.map(|s| s - 1);
        }
    }

    /// 取消兑换时退回一件库存
    pub fn restock_one(&mut self) {
        if self.tracks_stock() {
            self.stock = self.stock.map(|s| s + 1);
        }
    }
}

/// 兑换记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Redemption {
    pub id: i64,
    pub client_id: i64,
    pub catalog_item_id: i64,
    pub item_kind: ItemKind,
    pub points_spent: i64,
    pub status: RedemptionStatus,
    pub cancel_reason: Option<String>,
    pub workspace_page_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Redemption {
    /// 校验状态变更
    pub fn ensure_transition(&self, next: RedemptionStatus) -> Result<()> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(LoyaltyError::InvalidStatusTransition {
                redemption_id: self.id,
                from: self.status,
                to: next,
            })
        }
    }
}
