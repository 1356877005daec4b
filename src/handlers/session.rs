use axum::{extract::State, Json};
use validator::Validate;

use crate::auth::jwt::verify_token;
use crate::auth::SessionUser;
use crate::dto::{SessionResponse, SignInRequest};
use crate::error::{AppError, AppResult};
use crate::AppState;

pub async fn get_session(State(state): State<AppState>) -> Json<SessionResponse> {
    Json(SessionResponse {
        user: state.session.current(),
        sync: None,
    })
}

/// Accept a session token from the auth provider and sync the user's recent
/// records. A failed sync does not fail the sign-in.
pub async fn sign_in(
    State(state): State<AppState>,
    Json(body): Json<SignInRequest>,
) -> AppResult<Json<SessionResponse>> {
    body.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let secret = state
        .config
        .jwt_secret
        .as_deref()
        .ok_or(AppError::Unauthorized)?;
    let claims = verify_token(&body.token, secret)?.claims;
    let user = SessionUser {
        id: claims.sub,
        email: claims.email,
    };

    let sync = match state.store.set_user_id(Some(user.id.clone())).await {
        Ok(report) => Some(report),
        Err(e) => {
            tracing::warn!(user_id = %user.id, error = %e, "Sign-in sync failed");
            None
        }
    };
    state.session.sign_in(user.clone());

    Ok(Json(SessionResponse {
        user: Some(user),
        sync,
    }))
}

/// Flush pending saves and forget the signed-in user's records.
pub async fn sign_out(State(state): State<AppState>) -> AppResult<Json<SessionResponse>> {
    if let Err(e) = state.store.set_user_id(None).await {
        tracing::warn!(error = %e, "Sign-out cleanup failed");
    }
    state.session.sign_out();
    Ok(Json(SessionResponse {
        user: None,
        sync: None,
    }))
}
