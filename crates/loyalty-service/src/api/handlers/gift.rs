//! 礼品链接与权益 API 处理器

use axum::{
    Json,
    extract::{Path, State},
};
use validator::Validate;

use crate::api::dto::{ApiResponse, GiftRedeemRequest};
use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::models::GrantedBenefit;
use crate::service::GiftRedeemResponse;

/// POST /api/gifts/redeem
pub async fn redeem_gift(
    State(state): State<AppState>,
    Json(req): Json<GiftRedeemRequest>,
) -> ApiResult<Json<ApiResponse<GiftRedeemResponse>>> {
    req.validate()?;

    let grant = state.gifts.redeem_gift_link(req.code.trim(), &req.phone).await?;
    Ok(Json(ApiResponse::success(GiftRedeemResponse::from(&grant))))
}

/// POST /api/benefits/{id}/use
pub async fn use_benefit(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ApiResponse<GrantedBenefit>>> {
    let benefit = state.gifts.use_benefit(id).await?;
    Ok(Json(ApiResponse::success(benefit)))
}
