use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Local;

use crate::dto::ExportQuery;
use crate::error::{AppError, AppResult};
use crate::handlers::food_logs::load_window;
use crate::models::daily_log::date_key;
use crate::services::export::{self, ExportFormat};
use crate::AppState;

pub async fn export_logs(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> AppResult<Response> {
    let format: ExportFormat = query
        .format
        .as_deref()
        .unwrap_or("json")
        .parse()
        .map_err(AppError::Validation)?;
    let (start, end) = query.range.resolve(Local::now().date_naive(), 30)?;
    let logs = load_window(&state.store, start, end).await;

    tracing::info!(format = ?format, count = logs.len(), "Exporting food logs");
    let response = match format {
        ExportFormat::Json => Json(export::to_json(&logs, start, end)).into_response(),
        ExportFormat::Text => {
            let filename = format!(
                "attachment; filename=\"food-journal-{}-to-{}.txt\"",
                date_key(start),
                date_key(end)
            );
            (
                [
                    (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
                    (header::CONTENT_DISPOSITION, filename),
                ],
                export::to_text(&logs, start, end),
            )
                .into_response()
        }
    };
    Ok(response)
}
