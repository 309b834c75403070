//! 路由配置模块
//!
//! 定义所有 REST API 端点的路由映射

use axum::{
    Json, Router,
    extract::State,
    middleware,
    routing::{get, post},
};
use serde_json::{Value, json};

use loyalty_shared::observability::middleware as obs_middleware;

use crate::api::auth::admin_auth;
use crate::api::handlers;
use crate::api::state::AppState;

/// 客户、兑换与礼品路由
fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/clients/{id}", get(handlers::client::get_client))
        .route(
            "/clients/{id}/movements",
            get(handlers::client::list_movements),
        )
        .route("/redemptions", post(handlers::redemption::redeem))
        .route(
            "/redemptions/{id}/status",
            post(handlers::redemption::update_status),
        )
        .route(
            "/redemptions/{id}/cancel",
            post(handlers::redemption::cancel),
        )
        .route("/gifts/redeem", post(handlers::gift::redeem_gift))
        .route("/benefits/{id}/use", post(handlers::gift::use_benefit))
}

/// 管理路由（需要 X-Admin-Token）
fn admin_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/clients/{id}/adjust",
            post(handlers::admin::adjust_points),
        )
        .route("/clients/{id}/audit", get(handlers::admin::audit_client))
        .route("/reconcile", post(handlers::admin::reconcile))
        .route(
            "/sync/dead-letters",
            get(handlers::admin::list_dead_letters),
        )
        .route(
            "/sync/{id}/requeue",
            post(handlers::admin::requeue_dead_letter),
        )
        .layer(middleware::from_fn_with_state(state, admin_auth))
}

/// 构建完整应用路由
pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/api/admin", admin_routes(state.clone()))
        .nest("/api", public_routes())
        .route("/webhooks/workspace", post(handlers::webhook::receive))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        // 可观测性中间件：请求追踪和指标收集
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id))
        .with_state(state)
}

/// 存活探针：服务进程正常即返回 ok
async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "loyalty-service"
    }))
}

/// 就绪探针：检查数据库连接是否可用
async fn readiness_check(State(state): State<AppState>) -> Json<Value> {
    let (db_ok, pool) = match &state.database {
        Some(db) => (db.health_check().await.is_ok(), Some(db.stats())),
        None => (true, None),
    };

    Json(json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "service": "loyalty-service",
        "checks": {
            "database": if db_ok { "ok" } else { "fail" }
        },
        "pool": pool
    }))
}
