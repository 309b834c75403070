//! 管理接口与 Webhook 的令牌校验
//!
//! 管理端通过 X-Admin-Token 头传递令牌，比较 SHA256 摘要；
//! Webhook 的共享令牌通过 X-Webhook-Token 头传递，未配置时不校验

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::api::error::ApiError;
use crate::api::state::AppState;

pub const ADMIN_TOKEN_HEADER: &str = "X-Admin-Token";
pub const WEBHOOK_TOKEN_HEADER: &str = "X-Webhook-Token";

/// 令牌校验配置
#[derive(Clone)]
pub struct AuthSettings {
    admin_token_hash: String,
    webhook_token: Option<String>,
}

impl AuthSettings {
    pub fn new(admin_token: &str, webhook_token: Option<String>) -> Self {
        Self {
            admin_token_hash: hash_token(admin_token),
            webhook_token: webhook_token.filter(|t| !t.is_empty()),
        }
    }

    fn admin_token_matches(&self, presented: &str) -> bool {
        !presented.is_empty() && hash_token(presented) == self.admin_token_hash
    }

    /// Webhook 令牌校验；未配置令牌时总是通过
    pub fn webhook_token_matches(&self, headers: &HeaderMap) -> bool {
        match &self.webhook_token {
            None => true,
            Some(expected) => header_value(headers, WEBHOOK_TOKEN_HEADER)
                .is_some_and(|presented| hash_token(presented) == hash_token(expected)),
        }
    }
}

/// 计算令牌的 SHA256 摘要
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// 管理接口认证中间件
pub async fn admin_auth(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(token) = header_value(&headers, ADMIN_TOKEN_HEADER) else {
        return Err(ApiError::Unauthorized("缺少管理令牌".to_string()));
    };

    if !state.auth.admin_token_matches(token) {
        warn!(path = %request.uri().path(), "管理令牌校验失败");
        return Err(ApiError::Unauthorized("管理令牌无效".to_string()));
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_admin_token_compare() {
        let auth = AuthSettings::new("s3cret", None);
        assert!(auth.admin_token_matches("s3cret"));
        assert!(!auth.admin_token_matches("S3cret"));
        assert!(!auth.admin_token_matches(""));
    }

    #[test]
    fn test_webhook_token_optional() {
        let open = AuthSettings::new("x", None);
        assert!(open.webhook_token_matches(&HeaderMap::new()));

        let guarded = AuthSettings::new("x", Some("hook".to_string()));
        assert!(!guarded.webhook_token_matches(&HeaderMap::new()));

        let mut headers = HeaderMap::new();
        headers.insert(WEBHOOK_TOKEN_HEADER, HeaderValue::from_static("hook"));
        assert!(guarded.webhook_token_matches(&headers));
    }
}
