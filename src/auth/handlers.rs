//! Session handlers for login and the two logout flavours
//!
//! - `login_handler`: checks the shared application password, sets `appSecret`
//! - `logout_handler`: clears the identity cookie, keeps the application session
//! - `logout_app_handler`: clears both cookies

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header::SET_COOKIE, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use super::helpers::set_cookie_headers;
use crate::config::Config;
use crate::error::GatewayError;
use crate::gateway::{CookieChange, RequestContext};
use crate::AppState;

// =============================================================================
// Types
// =============================================================================

#[derive(Deserialize)]
pub struct LoginRequest {
    pub password: String,
}

// =============================================================================
// Internal Helpers
// =============================================================================

/// Build a response carrying `Set-Cookie` headers for every change.
///
/// Headers are rendered before the response exists, so a rendering failure
/// returns an error with no cookie mutation at all.
pub(crate) fn cookie_response(
    config: &Config,
    status: StatusCode,
    body: impl IntoResponse,
    changes: &[CookieChange],
) -> Result<Response, GatewayError> {
    let cookies = set_cookie_headers(config, changes)?;

    let mut response = (status, body).into_response();
    for cookie in cookies {
        response.headers_mut().append(SET_COOKIE, cookie);
    }
    Ok(response)
}

// =============================================================================
// Handlers
// =============================================================================

/// Login handler - validates the shared application password
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let Json(body) = payload?;
    let outcome = state.gateway.login(&body.password)?;

    cookie_response(
        &state.config,
        StatusCode::OK,
        Json(json!({ "success": true })),
        &outcome.cookies,
    )
}

/// Logout handler - ends the user session only
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
) -> Result<Response, GatewayError> {
    let outcome = state.gateway.logout(&ctx);

    cookie_response(
        &state.config,
        StatusCode::OK,
        Json(json!({ "success": true })),
        &outcome.cookies,
    )
}

/// App logout handler - ends the user and the application session
pub async fn logout_app_handler(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
) -> Result<Response, GatewayError> {
    let outcome = state.gateway.logout_app(&ctx);

    cookie_response(
        &state.config,
        StatusCode::OK,
        Json(json!({ "success": true })),
        &outcome.cookies,
    )
}
