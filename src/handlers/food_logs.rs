use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{Local, NaiveDate};

use crate::dto::{parse_path_date, DateRangeQuery, DeleteResponse, MetricRequest};
use crate::error::{AppError, AppResult};
use crate::models::daily_log::{
    date_key, DailyLog, DailyLogPatch, HealthMetric, MealPatch, MealType, SnackPatch, SnackType,
};
use crate::services::timeline::{self, TimelineEntry};
use crate::store::{FoodLogStore, LogView};
use crate::AppState;

/// Pull `[start, end]` into the cache. An unreachable remote store degrades
/// to whatever is cached.
pub(crate) async fn load_window(store: &FoodLogStore, start: NaiveDate, end: NaiveDate) -> Vec<DailyLog> {
    if let Err(e) = store.load_range(start, end).await {
        tracing::warn!(start = %start, end = %end, error = %e, "Range load failed; using cached records");
    }
    store.logs_in_range(start, end).await
}

pub async fn list_food_logs(
    State(state): State<AppState>,
    Query(query): Query<DateRangeQuery>,
) -> AppResult<Json<Vec<DailyLog>>> {
    let (start, end) = query.resolve(Local::now().date_naive(), 30)?;
    Ok(Json(load_window(&state.store, start, end).await))
}

async fn load(store: &FoodLogStore, date: NaiveDate) -> AppResult<LogView> {
    match store.load_food_log(date).await {
        Some(view) => Ok(view),
        None => Err(AppError::NotFound(format!(
            "Food log for {} is still loading",
            date_key(date)
        ))),
    }
}

pub async fn get_food_log(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> AppResult<Json<LogView>> {
    let date = parse_path_date(&date)?;
    state.store.set_current_date(date).await;
    Ok(Json(load(&state.store, date).await?))
}

pub async fn update_food_log(
    State(state): State<AppState>,
    Path(date): Path<String>,
    Json(patch): Json<DailyLogPatch>,
) -> AppResult<Json<DailyLog>> {
    let date = parse_path_date(&date)?;
    let log = state.store.update_food_log(date, &patch).await?;
    Ok(Json(log))
}

pub async fn delete_food_log(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> AppResult<Json<DeleteResponse>> {
    let date = parse_path_date(&date)?;
    let deleted = state.store.delete_food_log(date).await;
    if !deleted {
        return Err(AppError::NotFound(format!("No food log for {}", date_key(date))));
    }
    tracing::info!(date = %date, "Food log deleted");
    Ok(Json(DeleteResponse {
        deleted,
        date: date_key(date),
    }))
}

pub async fn update_meal(
    State(state): State<AppState>,
    Path((date, meal)): Path<(String, MealType)>,
    Json(patch): Json<MealPatch>,
) -> AppResult<Json<DailyLog>> {
    let date = parse_path_date(&date)?;
    Ok(Json(state.store.update_meal(date, meal, patch).await?))
}

pub async fn update_snack(
    State(state): State<AppState>,
    Path((date, snack)): Path<(String, SnackType)>,
    Json(patch): Json<SnackPatch>,
) -> AppResult<Json<DailyLog>> {
    let date = parse_path_date(&date)?;
    Ok(Json(state.store.update_snack(date, snack, patch).await?))
}

pub async fn update_metric(
    State(state): State<AppState>,
    Path((date, metric)): Path<(String, HealthMetric)>,
    Json(body): Json<MetricRequest>,
) -> AppResult<Json<DailyLog>> {
    let date = parse_path_date(&date)?;
    Ok(Json(
        state
            .store
            .update_health_metric(date, metric, &body.value)
            .await?,
    ))
}

pub async fn get_timeline(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> AppResult<Json<Vec<TimelineEntry>>> {
    let date = parse_path_date(&date)?;
    let view = load(&state.store, date).await?;
    Ok(Json(timeline::build(&view.log)))
}
