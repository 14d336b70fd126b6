use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;

use crate::middleware::AuthUser;
use crate::startup::AppState;

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ReportResponse {
    pub total_sales: Decimal,
    pub total_purchases: Decimal,
}

/// Aggregate sales and purchase totals over a date range.
pub async fn report(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ReportQuery>,
) -> Result<impl IntoResponse, AppError> {
    if query.start_date > query.end_date {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "start_date must not be after end_date"
        )));
    }

    let (total_sales, total_purchases) = state
        .db
        .dashboard_report(user.user_id()?, query.start_date, query.end_date)
        .await?;

    Ok(Json(ReportResponse {
        total_sales,
        total_purchases,
    }))
}
