//! 客户余额与流水查询

use axum::{
    Json,
    extract::{Path, Query, State},
};
use validator::Validate;

use crate::api::dto::{ApiResponse, LimitQuery};
use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::models::LedgerMovement;
use crate::service::ClientBalanceDto;

/// GET /api/clients/{id}
pub async fn get_client(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ApiResponse<ClientBalanceDto>>> {
    let client = state.ledger.get_client(id).await?;
    Ok(Json(ApiResponse::success(ClientBalanceDto::from(&client))))
}

/// GET /api/clients/{id}/movements
pub async fn list_movements(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<ApiResponse<Vec<LedgerMovement>>>> {
    query.validate()?;
    let movements = state.ledger.list_movements(id, query.limit).await?;
    Ok(Json(ApiResponse::success(movements)))
}
