use crate::{
    auth::handlers::cookie_response, directory::IdentityRecord, error::GatewayError,
    gateway::RequestContext, AppState,
};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

#[derive(Deserialize)]
pub struct ClaimRequest {
    pub email: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WidgetTokenRequest {
    pub allowed_origin: Option<String>,
}

#[derive(Serialize)]
pub struct ClaimResponse {
    pub user: IdentityRecord,
    pub created: bool,
}

/// Liveness check - always returns OK if the process is running
pub async fn healthz_handler() -> impl IntoResponse {
    StatusCode::OK
}

/// Claim a new identity or resume an existing one
///
/// Returns 201 when the identity was created, 200 when it already existed.
pub async fn claim_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ClaimRequest>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let Json(body) = payload?;
    let outcome = state.gateway.claim_or_resume(&body.email).await?;

    let status = if outcome.value.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    cookie_response(
        &state.config,
        status,
        Json(ClaimResponse {
            user: outcome.value.record,
            created: outcome.value.created,
        }),
        &outcome.cookies,
    )
}

pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
) -> Result<Json<serde_json::Value>, GatewayError> {
    let user = state.gateway.current_identity(&ctx)?;
    Ok(Json(json!({ "user": user })))
}

pub async fn lookup_handler(
    State(state): State<Arc<AppState>>,
    Path(email): Path<String>,
) -> Result<Json<serde_json::Value>, GatewayError> {
    let user = state.gateway.lookup(&email).await?;
    Ok(Json(json!({ "user": user })))
}

/// Mint a widget token for the calling identity
///
/// The body is optional; without one the token is scoped to the default origin.
pub async fn widget_token_handler(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    payload: Result<Option<Json<WidgetTokenRequest>>, JsonRejection>,
) -> Result<Json<serde_json::Value>, GatewayError> {
    let body = payload?.map(|Json(body)| body).unwrap_or_default();
    let token = state
        .gateway
        .mint_widget_token(&ctx, body.allowed_origin.as_deref())
        .await?;
    Ok(Json(json!({ "token": token })))
}

pub async fn provision_handler(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
) -> Result<Json<serde_json::Value>, GatewayError> {
    let user = state.gateway.provision_workspace(&ctx).await?;
    Ok(Json(json!({ "user": user })))
}
