use axum::{
    extract::{Query, State},
    Json,
};
use chrono::Local;

use crate::dto::DateRangeQuery;
use crate::error::AppResult;
use crate::handlers::food_logs::load_window;
use crate::services::analytics::{self, Analytics};
use crate::AppState;

/// Streaks, meal distribution and averages over a window (default: last 30 days).
pub async fn get_analytics(
    State(state): State<AppState>,
    Query(query): Query<DateRangeQuery>,
) -> AppResult<Json<Analytics>> {
    let today = Local::now().date_naive();
    let (start, end) = query.resolve(today, 30)?;
    let logs = load_window(&state.store, start, end).await;
    Ok(Json(analytics::summarize(&logs, today)))
}
