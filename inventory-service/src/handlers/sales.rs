use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use super::purchases::idempotency_key;
use crate::middleware::AuthUser;
use crate::models::CreateSaleRequest;
use crate::startup::AppState;

pub async fn list_sales(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let sales = state.db.list_sales(user.user_id()?).await?;
    Ok(Json(sales))
}

pub async fn create_sale(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Json(req): Json<CreateSaleRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let sale = state
        .db
        .create_sale(user.user_id()?, &req, idempotency_key(&headers))
        .await?;
    Ok((StatusCode::CREATED, Json(sale)))
}

pub async fn delete_sale(
    State(state): State<AppState>,
    user: AuthUser,
    Path(sale_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.db.delete_sale(user.user_id()?, sale_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
