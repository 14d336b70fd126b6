use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::middleware::AuthUser;
use crate::models::CreatePurchaseRequest;
use crate::startup::AppState;

pub(crate) const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Optional client-supplied key deduplicating retried create requests.
pub(crate) fn idempotency_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

pub async fn list_purchases(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let purchases = state.db.list_purchases(user.user_id()?).await?;
    Ok(Json(purchases))
}

pub async fn get_purchase(
    State(state): State<AppState>,
    user: AuthUser,
    Path(purchase_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let purchase = state
        .db
        .get_purchase(user.user_id()?, purchase_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Purchase {} not found", purchase_id)))?;
    Ok(Json(purchase))
}

pub async fn create_purchase(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Json(req): Json<CreatePurchaseRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let purchase = state
        .db
        .create_purchase(user.user_id()?, &req, idempotency_key(&headers))
        .await?;
    Ok((StatusCode::CREATED, Json(purchase)))
}

pub async fn update_purchase(
    State(state): State<AppState>,
    user: AuthUser,
    Path(purchase_id): Path<Uuid>,
    Json(req): Json<CreatePurchaseRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let purchase = state
        .db
        .update_purchase(user.user_id()?, purchase_id, &req)
        .await?;
    Ok(Json(purchase))
}

pub async fn delete_purchase(
    State(state): State<AppState>,
    user: AuthUser,
    Path(purchase_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state
        .db
        .delete_purchase(user.user_id()?, purchase_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
