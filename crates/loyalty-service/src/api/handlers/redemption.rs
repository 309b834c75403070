//! 目录兑换 API 处理器

use axum::{
    Json,
    extract::{Path, State},
};
use tracing::info;
use validator::Validate;

use crate::api::dto::{ApiResponse, CancelRequest, RedeemRequest, UpdateStatusRequest};
use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::models::Redemption;
use crate::repository::CancelOutcome;
use crate::service::RedeemResponse;

/// POST /api/redemptions
pub async fn redeem(
    State(state): State<AppState>,
    Json(req): Json<RedeemRequest>,
) -> ApiResult<Json<ApiResponse<RedeemResponse>>> {
    req.validate()?;

    let outcome = state
        .redemptions
        .redeem(req.client_id, req.catalog_item_id)
        .await?;
    Ok(Json(ApiResponse::success(RedeemResponse::from(&outcome))))
}

/// POST /api/redemptions/{id}/status
pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateStatusRequest>,
) -> ApiResult<Json<ApiResponse<Redemption>>> {
    let redemption = state.redemptions.update_status(id, req.status).await?;
    Ok(Json(ApiResponse::success(redemption)))
}

/// POST /api/redemptions/{id}/cancel
pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<CancelRequest>,
) -> ApiResult<Json<ApiResponse<CancelOutcome>>> {
    req.validate()?;

    let outcome = state.redemptions.cancel(id, &req.reason).await?;
    info!(redemption_id = id, "兑换已通过 API 取消");
    Ok(Json(ApiResponse::success(outcome)))
}
