//! 工作台 Webhook 入站处理
//!
//! - `properties`: 多态属性解释器
//! - `normalizer`: 载荷规范化与回源补全
//! - `mapping`: 状态显示名映射与积分计算
//! - `ingestor`: 按数据库分派效果并保证幂等

pub mod ingestor;
pub mod mapping;
pub mod normalizer;
pub mod properties;

pub use ingestor::{IngestResult, IngestStatus, IngestorSettings, WebhookIngestor, WebhookReply};
pub use normalizer::{Normalized, PayloadNormalizer, is_challenge};
