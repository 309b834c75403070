//! 管理接口：人工调整、审计、对账与死信处理

use axum::{
    Json,
    extract::{Path, Query, State},
};
use tracing::info;
use validator::Validate;

use crate::api::dto::{AdjustPointsRequest, ApiResponse, LimitQuery};
use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::models::{LedgerAudit, MovementKind, MovementRequest, MovementResult, SyncQueueItem};
use crate::reconcile::ReconcileReport;

/// 死信列表默认条数
const DEFAULT_DEAD_LETTER_LIMIT: i64 = 100;

/// POST /api/admin/clients/{id}/adjust
pub async fn adjust_points(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<AdjustPointsRequest>,
) -> ApiResult<Json<ApiResponse<MovementResult>>> {
    req.validate()?;

    let result = state
        .ledger
        .apply_movement(MovementRequest::new(
            id,
            req.delta,
            MovementKind::ManualAdjustment,
            req.reason.trim(),
        ))
        .await?;

    info!(client_id = id, delta = req.delta, "人工调整积分");
    Ok(Json(ApiResponse::success(result)))
}

/// GET /api/admin/clients/{id}/audit
pub async fn audit_client(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ApiResponse<LedgerAudit>>> {
    let audit = state.ledger.audit_client(id).await?;
    Ok(Json(ApiResponse::success(audit)))
}

/// POST /api/admin/reconcile
pub async fn reconcile(
    State(state): State<AppState>,
) -> ApiResult<Json<ApiResponse<ReconcileReport>>> {
    let report = state.reconciler.reconcile().await?;
    Ok(Json(ApiResponse::success(report)))
}

/// GET /api/admin/sync/dead-letters
pub async fn list_dead_letters(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<ApiResponse<Vec<SyncQueueItem>>>> {
    query.validate()?;

    let items = state
        .sync_queue
        .list_dead_letters(query.limit.unwrap_or(DEFAULT_DEAD_LETTER_LIMIT))
        .await?;
    Ok(Json(ApiResponse::success(items)))
}

/// POST /api/admin/sync/{id}/requeue
pub async fn requeue_dead_letter(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ApiResponse<SyncQueueItem>>> {
    let item = state.sync_queue.requeue(id).await?;
    state.sync_wake.notify_one();
    Ok(Json(ApiResponse::success(item)))
}
