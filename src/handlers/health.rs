use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::AppState;

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "foodlog-api",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn readyz(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let Some(remote) = state.store.remote() else {
        return (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "checks": { "remote": "disabled" },
            })),
        );
    };

    match remote.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "checks": { "remote": "ok" },
            })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Remote store not reachable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "not_ready",
                    "checks": { "remote": "failed" },
                })),
            )
        }
    }
}
