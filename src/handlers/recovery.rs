use axum::{
    extract::{Query, State},
    Json,
};

use crate::dto::{AuditQuery, RecoveryResponse, ResolveResponse, RetryResponse};
use crate::error::AppResult;
use crate::models::audit::{AuditEntry, DataError};
use crate::store::StoreStatus;
use crate::AppState;

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryStatus {
    #[serde(flatten)]
    pub status: StoreStatus,
    pub errors: Vec<DataError>,
}

pub async fn get_status(State(state): State<AppState>) -> Json<RecoveryStatus> {
    Json(RecoveryStatus {
        status: state.store.status().await,
        errors: state.store.errors().await,
    })
}

pub async fn recover_local(State(state): State<AppState>) -> Json<RecoveryResponse> {
    let report = state.store.recover_from_local_storage().await;
    Json(RecoveryResponse::from_report("local", report))
}

pub async fn resync(State(state): State<AppState>) -> AppResult<Json<RecoveryResponse>> {
    let report = state.store.sync_all_data().await?;
    Ok(Json(RecoveryResponse::from_report("sync", report)))
}

pub async fn validate_all(State(state): State<AppState>) -> Json<RecoveryResponse> {
    let report = state.store.validate_all_data().await;
    Json(RecoveryResponse::from_report("validate", report))
}

pub async fn retry_failed(State(state): State<AppState>) -> Json<RetryResponse> {
    Json(RetryResponse {
        retried: state.store.retry_failed_saves().await,
    })
}

pub async fn resolve_errors(State(state): State<AppState>) -> Json<ResolveResponse> {
    Json(ResolveResponse {
        resolved: state.store.resolve_errors().await,
    })
}

/// Audit trail, newest last. `?limit=n` keeps the latest `n` entries.
pub async fn get_audit(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Json<Vec<AuditEntry>> {
    let mut trail = state.store.audit_trail().await;
    if let Some(limit) = query.limit {
        let skip = trail.len().saturating_sub(limit);
        trail.drain(..skip);
    }
    Json(trail)
}
