//! Pure helper functions for authentication
//!
//! This module contains stateless helpers for cookie extraction and
//! rendering, secret comparison, and HTTP client construction.

use axum::http::{header::InvalidHeaderValue, HeaderMap, HeaderValue};
use std::time::Duration;
use subtle::ConstantTimeEq;

use crate::config::Config;
use crate::error::GatewayError;
use crate::gateway::{CookieChange, SessionCookie};

// =============================================================================
// HTTP Client Builders
// =============================================================================

/// Create a reqwest client for upstream requests using config timeouts
pub fn create_http_client(
    connect_timeout_secs: u64,
    request_timeout_secs: u64,
) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::ClientBuilder::new()
        .redirect(reqwest::redirect::Policy::none()) // Security: prevent SSRF
        .connect_timeout(Duration::from_secs(connect_timeout_secs))
        .timeout(Duration::from_secs(request_timeout_secs))
        .build()
}

// =============================================================================
// Secret Comparison
// =============================================================================

/// Compare a presented secret with the configured one in constant time.
///
/// Slices of different lengths compare unequal without inspecting contents.
pub fn secrets_match(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

// =============================================================================
// Cookie Extraction
// =============================================================================

/// Extract a cookie value from headers
///
/// Handles multiple Cookie headers (some proxies fold/duplicate headers).
/// Uses `get_all` to collect all Cookie header values.
pub fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let prefix = format!("{}=", name);

    // Iterate over all Cookie headers (proxies may send multiple)
    for header_value in headers.get_all("cookie") {
        if let Ok(cookie_str) = header_value.to_str() {
            if let Some(value) = cookie_str
                .split(';')
                .map(|c| c.trim())
                .find(|c| c.starts_with(&prefix))
                .and_then(|c| c.strip_prefix(&prefix))
            {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Extract and URL-decode a session cookie. Empty or undecodable values count as absent.
pub fn extract_session_cookie(headers: &HeaderMap, cookie: SessionCookie) -> Option<String> {
    let raw = extract_cookie(headers, cookie.name())?;
    match urlencoding::decode(&raw) {
        Ok(value) if !value.is_empty() => Some(value.into_owned()),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(
                cookie = cookie.name(),
                error = %e,
                "Ignoring cookie with invalid encoding"
            );
            None
        }
    }
}

// =============================================================================
// Cookie Rendering
// =============================================================================

/// Render a cookie change as a `Set-Cookie` header value
pub fn build_set_cookie(config: &Config, change: &CookieChange) -> String {
    match change {
        CookieChange::Set(cookie, value) => format!(
            "{}={}; HttpOnly; Path=/; Max-Age={}; SameSite=Strict{}{}",
            cookie.name(),
            urlencoding::encode(value),
            cookie.max_age_secs(),
            config.cookie_domain_attr(),
            config.cookie_secure_flag()
        ),
        CookieChange::Clear(cookie) => format!(
            "{}=; HttpOnly; Path=/; Max-Age=0; SameSite=Strict{}{}",
            cookie.name(),
            config.cookie_domain_attr(),
            config.cookie_secure_flag()
        ),
    }
}

/// Create a HeaderValue from a string.
/// This prevents panics from malformed cookie values.
pub fn header_value(s: &str) -> Result<HeaderValue, GatewayError> {
    HeaderValue::from_str(s).map_err(|e: InvalidHeaderValue| {
        tracing::error!(
            error = %e,
            value_len = s.len(),
            "Failed to create header value - possible malformed cookie"
        );
        GatewayError::Internal("Internal error setting response headers".to_string())
    })
}

/// Render all cookie changes up front so a failure leaves no partial set
pub fn set_cookie_headers(
    config: &Config,
    changes: &[CookieChange],
) -> Result<Vec<HeaderValue>, GatewayError> {
    changes
        .iter()
        .map(|change| header_value(&build_set_cookie(config, change)))
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
