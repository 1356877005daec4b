//! Request/Response DTOs for the journal API.
//!
//! Conventions:
//! - `*Request` / `*Query` are deserialized from client JSON bodies or query params
//! - `*Response` is serialized to client JSON
//! - Input checks are expressed via `validator` derive macros where they fit

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::auth::SessionUser;
use crate::error::{AppError, AppResult};
use crate::store::RecordReport;
use crate::validation::parse_date_key;

/// Longest window a single range request may cover.
pub const MAX_RANGE_DAYS: i64 = 366;
/// Error messages shown by a failed recovery before truncating.
pub const RECOVERY_ERROR_PREVIEW: usize = 3;

// ============================================================================
// Common
// ============================================================================

/// Path segment `:date`, accepted only in canonical `YYYY-MM-DD` form.
pub fn parse_path_date(raw: &str) -> AppResult<NaiveDate> {
    parse_date_key(raw)
        .ok_or_else(|| AppError::Validation(format!("'{raw}' is not a YYYY-MM-DD date")))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub deleted: bool,
    pub date: String,
}

/// `?start=YYYY-MM-DD&end=YYYY-MM-DD`; both optional.
#[derive(Debug, Default, Deserialize)]
pub struct DateRangeQuery {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRangeQuery {
    /// Fill missing bounds: `end` defaults to `today`, `start` to
    /// `default_days - 1` days before `end`.
    pub fn resolve(&self, today: NaiveDate, default_days: i64) -> AppResult<(NaiveDate, NaiveDate)> {
        let end = self.end.unwrap_or(today);
        let start = self
            .start
            .unwrap_or_else(|| end - Duration::days(default_days.max(1) - 1));
        if start > end {
            return Err(AppError::Validation("start must not be after end".into()));
        }
        if (end - start).num_days() >= MAX_RANGE_DAYS {
            return Err(AppError::Validation(format!(
                "range must cover at most {MAX_RANGE_DAYS} days"
            )));
        }
        Ok((start, end))
    }
}

// ============================================================================
// Session
// ============================================================================

/// POST /api/session
#[derive(Debug, Deserialize, Validate)]
pub struct SignInRequest {
    #[validate(length(min = 1, max = 4096, message = "token must be 1-4096 characters"))]
    pub token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub user: Option<SessionUser>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<RecordReport>,
}

// ============================================================================
// Food logs
// ============================================================================

/// PUT /api/food-logs/:date/metrics/:metric
#[derive(Debug, Deserialize)]
pub struct MetricRequest {
    pub value: Value,
}

// ============================================================================
// Export
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
    #[serde(flatten)]
    pub range: DateRangeQuery,
}

// ============================================================================
// Recovery
// ============================================================================

/// Result of one recovery remedy, shaped for the recovery dialog.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryResponse {
    pub action: String,
    pub success: bool,
    pub valid: usize,
    pub invalid: usize,
    pub errors: Vec<String>,
    /// Error messages left out of `errors`.
    pub truncated: usize,
    pub message: String,
}

impl RecoveryResponse {
    pub fn from_report(action: &str, report: RecordReport) -> Self {
        let success = report.invalid == 0;
        let message = if success {
            format!("{} record(s) OK", report.valid)
        } else {
            format!(
                "{} record(s) OK, {} could not be read",
                report.valid, report.invalid
            )
        };
        let truncated = report.errors.len().saturating_sub(RECOVERY_ERROR_PREVIEW);
        let mut errors = report.errors;
        errors.truncate(RECOVERY_ERROR_PREVIEW);
        Self {
            action: action.to_string(),
            success,
            valid: report.valid,
            invalid: report.invalid,
            errors,
            truncated,
            message,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryResponse {
    pub retried: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveResponse {
    pub resolved: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<usize>,
}
