//! 服务层
//!
//! 协调存储层、同步唤醒与通知，实现积分业务逻辑。
//!
//! ## 模块结构
//!
//! - `dto`: 对外响应 DTO
//! - `ledger_service`: 积分变动、流水查询与账本审计
//! - `redemption_service`: 目录兑换与兑换生命周期
//! - `gift_service`: 礼品链接兑换与权益生命周期

pub mod dto;
pub mod gift_service;
pub mod ledger_service;
pub mod redemption_service;

pub use dto::*;
pub use gift_service::GiftService;
pub use ledger_service::LedgerService;
pub use redemption_service::RedemptionService;
