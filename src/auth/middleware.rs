use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};

use crate::auth::jwt::verify_token;
use crate::auth::session::SessionUser;
use crate::error::AppError;
use crate::AppState;

/// Guard for administrative routes: a signed-in session plus a bearer token
/// for that same user.
pub async fn require_session(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user = state.session.current().ok_or(AppError::Unauthorized)?;
    let secret = state
        .config
        .jwt_secret
        .as_deref()
        .ok_or(AppError::Unauthorized)?;

    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;

    let token_data = verify_token(token, secret)?;
    if token_data.claims.sub != user.id {
        tracing::warn!(session_user = %user.id, "Bearer token belongs to another user");
        return Err(AppError::Unauthorized);
    }

    req.extensions_mut().insert::<SessionUser>(user);
    Ok(next.run(req).await)
}
