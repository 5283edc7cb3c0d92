use super::handlers::{
    claim_handler, healthz_handler, lookup_handler, me_handler, provision_handler,
    widget_token_handler,
};
use crate::{
    auth::{login_handler, logout_app_handler, logout_handler, session_gate},
    AppState,
};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Every /api route runs behind the session gate; the gate itself exempts login
    let api = Router::new()
        .route("/api/login", post(login_handler))
        .route("/api/logout", post(logout_handler))
        .route("/api/logout/app", post(logout_app_handler))
        .route("/api/users", post(claim_handler))
        .route("/api/users/me", get(me_handler))
        .route("/api/users/me/workspace", post(provision_handler))
        .route("/api/users/{email}", get(lookup_handler))
        .route("/api/widget/token", post(widget_token_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), session_gate));

    Router::new()
        .route("/healthz", get(healthz_handler))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
