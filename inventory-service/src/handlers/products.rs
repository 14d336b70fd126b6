use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::middleware::AuthUser;
use crate::models::{
    CreateProductRequest, NewVariantInput, UpdateProductRequest, UpdateVariantRequest,
};
use crate::startup::AppState;

pub async fn list_products(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let products = state.db.list_products(user.user_id()?).await?;
    Ok(Json(products))
}

pub async fn create_product(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateProductRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let product = state.db.create_product(user.user_id()?, &req).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn update_product(
    State(state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<Uuid>,
    Json(req): Json<UpdateProductRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let product = state
        .db
        .update_product(user.user_id()?, product_id, &req)
        .await?;
    Ok(Json(product))
}

pub async fn delete_product(
    State(state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.db.delete_product(user.user_id()?, product_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_variant(
    State(state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<Uuid>,
    Json(req): Json<NewVariantInput>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let variant = state
        .db
        .add_variant(user.user_id()?, product_id, &req)
        .await?;
    Ok((StatusCode::CREATED, Json(variant)))
}

pub async fn update_variant(
    State(state): State<AppState>,
    user: AuthUser,
    Path(variant_id): Path<Uuid>,
    Json(req): Json<UpdateVariantRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let variant = state
        .db
        .update_variant(user.user_id()?, variant_id, &req)
        .await?;
    Ok(Json(variant))
}

pub async fn delete_variant(
    State(state): State<AppState>,
    user: AuthUser,
    Path(variant_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.db.delete_variant(user.user_id()?, variant_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
