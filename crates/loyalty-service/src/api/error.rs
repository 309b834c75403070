//! HTTP 层错误类型
//!
//! 业务错误返回 4xx 与具体原因；系统错误只返回通用提示，详细信息记录日志

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::LoyaltyError;

const GENERIC_MESSAGE: &str = "服务内部错误，请稍后重试";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("未授权: {0}")]
    Unauthorized(String),

    #[error("参数验证失败: {0}")]
    Validation(String),

    #[error(transparent)]
    Loyalty(#[from] LoyaltyError),
}

impl ApiError {
    /// 返回对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Loyalty(e) => loyalty_status(e),
        }
    }

    /// 返回错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Loyalty(e) => e.error_code(),
        }
    }
}

fn loyalty_status(err: &LoyaltyError) -> StatusCode {
    use LoyaltyError::*;

    match err {
        ClientNotFound(_)
        | ItemNotFound(_)
        | RedemptionNotFound(_)
        | GiftLinkNotFound(_)
        | BenefitNotFound(_)
        | SyncItemNotFound(_)
        | ClientNotRegistered(_) => StatusCode::NOT_FOUND,

        Validation(_) | InvalidMovement(_) => StatusCode::BAD_REQUEST,

        WrongRecipient(_) => StatusCode::FORBIDDEN,

        Expired(_) => StatusCode::GONE,

        InsufficientBalance { .. }
        | ItemUnavailable(_)
        | InvalidStatusTransition { .. }
        | AlreadyRedeemed(_)
        | CampaignExhausted(_)
        | AlreadyRedeemedByClient { .. }
        | BenefitNotUsable { .. }
        | SyncItemNotDeadLetter(_)
        | DuplicateEvent { .. } => StatusCode::CONFLICT,

        Integrity(_) => StatusCode::UNPROCESSABLE_ENTITY,

        Database(_)
        | Serialization(_)
        | Workspace { .. }
        | WorkspaceTimeout(_)
        | RedemptionFailed { .. }
        | Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = match &self {
            Self::Loyalty(e) if !e.is_business_error() => {
                tracing::error!(error = %e, code = e.error_code(), "请求处理失败");
                GENERIC_MESSAGE.to_string()
            }
            Self::Loyalty(e) => e.to_string(),
            other => other.to_string(),
        };

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
            "data": serde_json::Value::Null
        });

        (status, axum::Json(body)).into_response()
    }
}

/// 从 validator 错误转换
impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (LoyaltyError::ClientNotFound(1), StatusCode::NOT_FOUND),
            (
                LoyaltyError::InsufficientBalance {
                    required: 150,
                    available: 100,
                },
                StatusCode::CONFLICT,
            ),
            (LoyaltyError::Expired("X".into()), StatusCode::GONE),
            (LoyaltyError::WrongRecipient("X".into()), StatusCode::FORBIDDEN),
            (
                LoyaltyError::WorkspaceTimeout("fetch".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }
    }

    #[tokio::test]
    async fn test_system_error_body_is_generic() {
        let response = ApiError::from(LoyaltyError::Internal("pool exhausted".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "INTERNAL_ERROR");
        assert_eq!(body["message"], GENERIC_MESSAGE);
    }
}
