//! 工作台 Webhook 入口
//!
//! 校验请求不经令牌校验、原样回显；事件请求总是返回 200 与处理结论，
//! 无法解析的请求体也只返回 skipped

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use serde_json::Value;
use tracing::warn;

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::webhook::{IngestResult, WebhookReply, is_challenge};

/// POST /webhooks/workspace
pub async fn receive(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let parsed = serde_json::from_slice::<Value>(&body);

    // 订阅校验请求不带令牌头，先于令牌校验回显
    if let Ok(payload) = &parsed
        && is_challenge(payload)
    {
        return Ok(Json(payload.clone()));
    }

    if !state.auth.webhook_token_matches(&headers) {
        return Err(ApiError::Unauthorized("Webhook 令牌无效".to_string()));
    }

    let payload = match parsed {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Webhook 请求体不是合法 JSON");
            return Ok(Json(reply_json(&IngestResult::skipped("请求体不是合法 JSON"))));
        }
    };

    let reply = match state.ingestor.handle(&payload).await {
        WebhookReply::Challenge(raw) => raw,
        WebhookReply::Processed(result) => reply_json(&result),
    };
    Ok(Json(reply))
}

fn reply_json(result: &IngestResult) -> Value {
    serde_json::to_value(result).unwrap_or(Value::Null)
}
