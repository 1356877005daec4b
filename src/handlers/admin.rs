use axum::{extract::State, Extension, Json};

use crate::auth::SessionUser;
use crate::error::AppResult;
use crate::services::migration::{self, MigrationReport};
use crate::AppState;

pub async fn migrate_local(State(state): State<AppState>) -> Json<MigrationReport> {
    Json(migration::migrate_local_backup(&state.store).await)
}

/// Irreversible: rewrites the signed-in user's remote documents in place.
pub async fn migrate_remote(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
) -> AppResult<Json<MigrationReport>> {
    tracing::warn!(user_id = %user.id, "Starting remote migration");
    let report = migration::migrate_remote(&state.store, &user.id).await?;
    Ok(Json(report))
}
