//! HTTP 接口层
//!
//! - `state`: 服务装配与共享状态
//! - `auth`: 管理令牌与 Webhook 令牌校验
//! - `dto`: 请求与响应体
//! - `handlers`: 请求处理器
//! - `routes`: 路由与中间件

pub mod auth;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use routes::app;
pub use state::AppState;
