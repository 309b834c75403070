//! HTTP 请求与响应体
//!
//! 请求体在 handler 中先经 validator 校验，再交给服务层

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::RedemptionStatus;

/// API 统一响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: "操作成功".to_string(),
            data: Some(data),
        }
    }
}

/// 目录兑换请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RedeemRequest {
    #[validate(range(min = 1, message = "客户 ID 无效"))]
    pub client_id: i64,
    #[validate(range(min = 1, message = "目录项 ID 无效"))]
    pub catalog_item_id: i64,
}

/// 兑换状态变更请求
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub status: RedemptionStatus,
}

/// 兑换取消请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    #[validate(length(min = 1, max = 200, message = "取消原因长度必须在1-200个字符之间"))]
    pub reason: String,
}

/// 礼品链接兑换请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GiftRedeemRequest {
    #[validate(length(min = 1, max = 64, message = "礼品码长度必须在1-64个字符之间"))]
    pub code: String,
    #[validate(length(min = 7, max = 32, message = "手机号格式无效"))]
    pub phone: String,
}

/// 人工调整积分请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AdjustPointsRequest {
    pub delta: i64,
    #[validate(length(min = 1, max = 200, message = "调整原因长度必须在1-200个字符之间"))]
    pub reason: String,
}

/// 列表条数参数
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LimitQuery {
    #[validate(range(min = 1, max = 500, message = "limit 必须在1-500之间"))]
    pub limit: Option<i64>,
}
