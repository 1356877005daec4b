use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod config;
pub mod db;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod storage;
pub mod store;
pub mod validation;

use auth::AuthSession;
use config::Config;
use store::FoodLogStore;

#[derive(Clone)]
pub struct AppState {
    pub store: FoodLogStore,
    pub config: Arc<Config>,
    pub session: AuthSession,
}

pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/readyz", get(handlers::health::readyz))
        // Session
        .route(
            "/api/session",
            get(handlers::session::get_session)
                .post(handlers::session::sign_in)
                .delete(handlers::session::sign_out),
        )
        // Food logs
        .route("/api/food-logs", get(handlers::food_logs::list_food_logs))
        .route(
            "/api/food-logs/:date",
            get(handlers::food_logs::get_food_log)
                .patch(handlers::food_logs::update_food_log)
                .delete(handlers::food_logs::delete_food_log),
        )
        .route(
            "/api/food-logs/:date/meals/:meal",
            put(handlers::food_logs::update_meal),
        )
        .route(
            "/api/food-logs/:date/snacks/:snack",
            put(handlers::food_logs::update_snack),
        )
        .route(
            "/api/food-logs/:date/metrics/:metric",
            put(handlers::food_logs::update_metric),
        )
        .route(
            "/api/food-logs/:date/timeline",
            get(handlers::food_logs::get_timeline),
        )
        // Views
        .route("/api/analytics", get(handlers::insights::get_analytics))
        .route("/api/export", get(handlers::export::export_logs))
        // Recovery
        .route("/api/recovery/status", get(handlers::recovery::get_status))
        .route("/api/recovery/local", post(handlers::recovery::recover_local))
        .route("/api/recovery/sync", post(handlers::recovery::resync))
        .route("/api/recovery/validate", post(handlers::recovery::validate_all))
        .route("/api/recovery/retry", post(handlers::recovery::retry_failed))
        .route(
            "/api/recovery/errors/resolve",
            post(handlers::recovery::resolve_errors),
        )
        .route("/api/audit", get(handlers::recovery::get_audit));

    let admin_routes = Router::new()
        .route("/api/admin/migrate-local", post(handlers::admin::migrate_local))
        .route("/api/admin/migrate-remote", post(handlers::admin::migrate_remote))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::middleware::require_session,
        ));

    let mut origins = Vec::new();
    match state.config.frontend_url.parse::<HeaderValue>() {
        Ok(origin) => origins.push(origin),
        Err(e) => tracing::warn!(
            frontend_url = %state.config.frontend_url,
            error = %e,
            "Ignoring invalid FRONTEND_URL for CORS"
        ),
    }
    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .allow_credentials(true);

    Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
