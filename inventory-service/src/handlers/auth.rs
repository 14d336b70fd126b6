use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::models::{LoginRequest, RegisterRequest};
use crate::services::TokenResponse;
use crate::startup::AppState;
use crate::utils::{hash_password, verify_password, Password};

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub message: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let password_hash = hash_password(&Password::new(req.password))?;

    let user = state
        .db
        .create_user(req.name.as_deref(), &req.email, &password_hash)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id: user.user_id,
            message: "User created successfully".to_string(),
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    // Same error for unknown email and wrong password: no account probing.
    let user = state
        .db
        .get_user_by_email(&req.email)
        .await?
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Invalid email or password")))?;

    verify_password(&Password::new(req.password), &user.password_hash)
        .map_err(|_| AppError::Unauthorized(anyhow::anyhow!("Invalid email or password")))?;

    let access_token = state.jwt.generate_access_token(user.user_id, &user.email)?;

    tracing::info!(user_id = %user.user_id, "User logged in");

    Ok(Json(TokenResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: state.jwt.expires_in_seconds(),
        user: user.profile(),
    }))
}
