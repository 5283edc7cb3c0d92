//! Session gate
//!
//! Runs in front of every `/api` handler:
//!
//! 1. Exempt routes (login) pass straight through with an empty context.
//! 2. The `appSecret` cookie must equal the configured application secret,
//!    otherwise the request is rejected before any lookup.
//! 3. An `identity` cookie is resolved through the user directory. An unknown
//!    email is not an error; the request continues without an identity.
//! 4. The resulting [`RequestContext`] is stored in the request extensions.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use super::helpers::{extract_session_cookie, secrets_match};
use crate::directory::UserDirectory;
use crate::error::GatewayError;
use crate::gateway::{RequestContext, SessionCookie};
use crate::AppState;

/// Routes reachable without the application secret
const EXEMPT_PATHS: &[&str] = &["/api/login"];

pub struct SessionGate {
    app_secret: String,
    directory: Arc<dyn UserDirectory>,
}

impl SessionGate {
    pub fn new(app_secret: String, directory: Arc<dyn UserDirectory>) -> Self {
        Self {
            app_secret,
            directory,
        }
    }

    /// Build the request context for `path`, or reject the request
    pub async fn evaluate(
        &self,
        path: &str,
        headers: &HeaderMap,
    ) -> Result<RequestContext, GatewayError> {
        if EXEMPT_PATHS.contains(&path) {
            return Ok(RequestContext::default());
        }

        let authorized = extract_session_cookie(headers, SessionCookie::AppSecret)
            .is_some_and(|presented| secrets_match(&presented, &self.app_secret));
        if !authorized {
            tracing::warn!(path = %path, "Rejected request without valid application secret");
            return Err(GatewayError::Unauthenticated("Unauthorized".to_string()));
        }

        let Some(email) = extract_session_cookie(headers, SessionCookie::Identity) else {
            return Ok(RequestContext::default());
        };

        let identity = self.directory.find(&email).await?;
        if identity.is_none() {
            tracing::debug!(email = %email, "Identity cookie does not match a known user");
        }

        Ok(RequestContext { identity })
    }
}

/// Middleware attaching the [`RequestContext`] to gated requests
pub async fn session_gate(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let ctx = state
        .gate
        .evaluate(request.uri().path(), request.headers())
        .await?;

    request.extensions_mut().insert(ctx);
    Ok(next.run(request).await)
}
