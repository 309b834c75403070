//! 积分账本服务
//!
//! 会员积分、目录兑换、礼品链接与工作台同步。
//!
//! ## 核心功能
//!
//! - **积分账本**：只追加的流水日志，余额是流水之和的物化视图
//! - **目录兑换**：行锁内校验库存与余额，扣减与记账在同一事务
//! - **礼品链接**：单人链接恰好兑换一次，活动链接按名额封顶
//! - **出站同步**：事务内写入同步出箱，Worker 退避重试，超限进入死信
//! - **Webhook**：工作台事件规范化、幂等回执与效果分派
//! - **对账**：批量关联工作台积分页面与本地客户
//!
//! ## 模块结构
//!
//! - `models`: 领域模型与状态机
//! - `error`: 错误类型定义
//! - `repository`: 存储抽象、Postgres 与内存实现
//! - `service`: 账本、兑换与礼品服务
//! - `sync`: 同步队列、操作与 Worker
//! - `webhook`: 入站事件处理
//! - `workspace`: 工作台平台客户端
//! - `reconcile`: 批量对账
//! - `notification`: 通知协作者
//! - `worker`: 后台维护任务
//! - `api`: HTTP 接口

pub mod api;
pub mod error;
pub mod models;
pub mod notification;
pub mod reconcile;
pub mod repository;
pub mod service;
pub mod sync;
pub mod webhook;
pub mod worker;
pub mod workspace;

pub use error::{LoyaltyError, Result};
