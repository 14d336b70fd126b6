use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::services::AccessTokenClaims;
use crate::startup::AppState;

/// Middleware to require authentication on every data route.
///
/// Validates the bearer token and stores its claims in request extensions
/// so handlers can extract them with [`AuthUser`].
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Missing or invalid Authorization header"))
        })?;

    let claims = state.jwt.validate_access_token(token).map_err(|e| {
        tracing::debug!(error = %e, "Token validation failed");
        AppError::Unauthorized(anyhow::anyhow!("Invalid or expired token"))
    })?;

    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

/// Extractor to easily get the authenticated user's claims in handlers.
pub struct AuthUser(pub AccessTokenClaims);

impl AuthUser {
    /// The authenticated user id every operation is scoped by.
    pub fn user_id(&self) -> Result<Uuid, AppError> {
        self.0
            .user_id()
            .map_err(|e| AppError::Unauthorized(anyhow::anyhow!(e)))
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let claims = parts
            .extensions
            .get::<AccessTokenClaims>()
            .ok_or_else(|| {
                AppError::InternalError(anyhow::anyhow!("Auth claims missing from request extensions"))
            })?;

        Ok(AuthUser(claims.clone()))
    }
}
