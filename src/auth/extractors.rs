use crate::error::GatewayError;
use crate::gateway::RequestContext;
use axum::{extract::FromRequestParts, http::request::Parts};

/// Request context extractor - reads what the session gate attached
///
/// Only valid on routes behind [`session_gate`](super::gate::session_gate).
/// A missing context means the route was wired without the gate and is
/// reported as an internal error rather than treated as anonymous.
///
/// Usage:
/// ```rust,ignore
/// async fn handler(ctx: RequestContext) {
///     if let Some(identity) = &ctx.identity {
///         println!("Caller: {}", identity.email);
///     }
/// }
/// ```
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or_else(|| GatewayError::Internal("Missing request context extension".to_string()))
    }
}
