//! External token broker
//!
//! Obtains a bearer token from the upstream client-credentials endpoint,
//! caches it until it expires, and attaches it to downstream calls.
//!
//! ## Token lifecycle
//!
//! `Empty → Valid → (expires_at passes) → Empty`, or
//! `Valid → (downstream 401/403) → Empty`.
//!
//! A downstream call rejected with 401/403 clears the cached token and is
//! retried once with a freshly issued one. A second rejection is returned as
//! [`BrokerError::UpstreamAuth`].

pub mod cache;
#[cfg(test)]
pub(crate) mod fake_upstream;

pub use cache::TokenCache;

use oauth2::{
    basic::BasicClient, AuthType, ClientId, ClientSecret, EndpointNotSet, EndpointSet,
    TokenResponse, TokenUrl,
};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

use crate::auth::helpers::create_http_client;
use crate::config::{DestinationConfig, UpstreamConfig};

/// Upstream definition id of the S3 destination connector
pub const S3_DESTINATION_DEFINITION_ID: &str = "4816b78f-1489-44c1-9060-4b19d5fa9362";

/// One original attempt plus one retry after invalidating the token
const MAX_AUTH_ATTEMPTS: usize = 2;

/// Client configured for the client-credentials grant only
type CredentialsClient =
    BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// Token issuance failed, or a downstream call was rejected twice.
    #[error("upstream authorization failed: {0}")]
    UpstreamAuth(String),

    /// Any other upstream failure (non-success status, transport, bad body).
    #[error("upstream request failed: {0}")]
    Upstream(String),
}

#[derive(Serialize)]
struct ScopedTokenRequest<'a> {
    external_user_id: &'a str,
    organization_id: &'a str,
    allowed_origin: &'a str,
}

#[derive(Deserialize)]
struct ScopedTokenResponse {
    token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkspaceRequest<'a> {
    name: String,
    organization_id: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkspaceResponse {
    workspace_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DestinationResponse {
    destination_id: String,
}

/// Short fingerprint for correlating a token in logs without exposing it
pub fn fingerprint(token: &str) -> String {
    format!("{:x}", md5::compute(token))
}

/// Workspace name derived from an email, e.g. `embedded-workspace_a_x_com`
pub fn workspace_name(email: &str) -> String {
    let sanitized: String = email
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("embedded-workspace_{}", sanitized)
}

/// Build a broker error from a non-success response, preferring the
/// upstream `message` field over the status text
async fn upstream_failure(context: &str, response: reqwest::Response) -> BrokerError {
    let status = response.status();
    let message = response
        .json::<serde_json::Value>()
        .await
        .ok()
        .and_then(|body| {
            body.get("message")
                .or_else(|| body.get("error"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unknown status")
                .to_string()
        });

    BrokerError::Upstream(format!("{} ({}): {}", context, status.as_u16(), message))
}

pub struct TokenBroker {
    oauth_client: CredentialsClient,
    http: reqwest::Client,
    cache: TokenCache,
    upstream: UpstreamConfig,
}

impl TokenBroker {
    /// Create a broker for the configured upstream
    ///
    /// Both the issuance and downstream calls share one HTTP client with the
    /// given timeouts.
    pub fn new(
        upstream: UpstreamConfig,
        connect_timeout_secs: u64,
        request_timeout_secs: u64,
    ) -> Result<Self, String> {
        let token_url = TokenUrl::new(upstream.token_url.clone())
            .map_err(|e| format!("Invalid token URL: {}", e))?;

        let oauth_client = BasicClient::new(ClientId::new(upstream.client_id.clone()))
            .set_client_secret(ClientSecret::new(upstream.client_secret.clone()))
            .set_auth_type(AuthType::RequestBody)
            .set_token_uri(token_url);

        let http = create_http_client(connect_timeout_secs, request_timeout_secs)
            .map_err(|e| format!("Failed to build upstream HTTP client: {}", e))?;

        tracing::info!(
            token_url = %upstream.token_url,
            scoped_token_url = %upstream.scoped_token_url,
            organization_id = %upstream.organization_id,
            default_token_lifetime_secs = upstream.default_token_lifetime_secs,
            "Token broker initialized"
        );

        Ok(Self {
            oauth_client,
            http,
            cache: TokenCache::new(),
            upstream,
        })
    }

    /// Return a valid access token, issuing a new one if the cache is empty or expired
    pub async fn access_token(&self) -> Result<String, BrokerError> {
        self.cache.get_or_refresh(|| self.issue_token()).await
    }

    /// Client-credentials exchange against the upstream token endpoint
    async fn issue_token(&self) -> Result<(String, Duration), BrokerError> {
        tracing::info!(event = "token_issue", "Requesting upstream access token");

        let response = self
            .oauth_client
            .exchange_client_credentials()
            .request_async(&self.http)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Upstream token issuance failed");
                BrokerError::UpstreamAuth(format!("Failed to get access token: {}", e))
            })?;

        let lifetime = response.expires_in().unwrap_or_else(|| {
            tracing::debug!(
                default_secs = self.upstream.default_token_lifetime_secs,
                "Token response has no expires_in, using default lifetime"
            );
            Duration::from_secs(self.upstream.default_token_lifetime_secs)
        });

        let token = response.access_token().secret().to_string();
        tracing::info!(
            event = "token_issued",
            token_hash = %fingerprint(&token),
            lifetime_secs = lifetime.as_secs(),
            "Upstream access token issued"
        );

        Ok((token, lifetime))
    }

    /// Send a bearer-authenticated request, retrying once on 401/403
    ///
    /// `build` is called once per attempt and must produce the same request
    /// each time; the bearer header is added here.
    pub async fn call_with_auth<F>(&self, build: F) -> Result<reqwest::Response, BrokerError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut last_status = None;

        for attempt in 1..=MAX_AUTH_ATTEMPTS {
            let token = self.access_token().await?;

            let response = build(&self.http)
                .bearer_auth(&token)
                .send()
                .await
                .map_err(|e| BrokerError::Upstream(format!("request failed: {}", e)))?;

            let status = response.status();
            if status != StatusCode::UNAUTHORIZED && status != StatusCode::FORBIDDEN {
                return Ok(response);
            }

            tracing::warn!(
                event = "upstream_auth_rejected",
                attempt = attempt,
                status = %status,
                token_hash = %fingerprint(&token),
                "Upstream rejected access token"
            );
            self.cache.invalidate(&token).await;
            last_status = Some(status);
        }

        Err(BrokerError::UpstreamAuth(format!(
            "request rejected after {} attempts (last status {})",
            MAX_AUTH_ATTEMPTS,
            last_status.map(|s| s.as_u16()).unwrap_or_default()
        )))
    }

    /// Mint a widget token scoped to one identity and origin
    pub async fn generate_widget_token(
        &self,
        external_user_id: &str,
        allowed_origin: &str,
    ) -> Result<String, BrokerError> {
        let body = ScopedTokenRequest {
            external_user_id,
            organization_id: &self.upstream.organization_id,
            allowed_origin,
        };

        let response = self
            .call_with_auth(|http| http.post(&self.upstream.scoped_token_url).json(&body))
            .await?;

        if !response.status().is_success() {
            return Err(upstream_failure("Failed to get widget token", response).await);
        }

        let data: ScopedTokenResponse = response
            .json()
            .await
            .map_err(|e| BrokerError::Upstream(format!("Invalid widget token response: {}", e)))?;

        tracing::info!(
            event = "widget_token_minted",
            external_user_id = %external_user_id,
            allowed_origin = %allowed_origin,
            token_hash = %fingerprint(&data.token),
            "Widget token minted"
        );

        Ok(data.token)
    }

    /// Create an upstream workspace for an identity, returning its id
    pub async fn create_workspace(&self, email: &str) -> Result<String, BrokerError> {
        let url = format!("{}/workspaces", self.upstream.api_url);
        let body = WorkspaceRequest {
            name: workspace_name(email),
            organization_id: &self.upstream.organization_id,
        };

        let response = self
            .call_with_auth(|http| http.post(&url).json(&body))
            .await?;

        if !response.status().is_success() {
            return Err(upstream_failure("Failed to create workspace", response).await);
        }

        let data: WorkspaceResponse = response
            .json()
            .await
            .map_err(|e| BrokerError::Upstream(format!("Invalid workspace response: {}", e)))?;

        tracing::info!(
            event = "workspace_created",
            email = %email,
            workspace_id = %data.workspace_id,
            "Upstream workspace created"
        );
        Ok(data.workspace_id)
    }

    /// Create an S3 destination inside a workspace, returning its id
    pub async fn create_destination(
        &self,
        workspace_id: &str,
        destination: &DestinationConfig,
    ) -> Result<String, BrokerError> {
        let url = format!("{}/destinations", self.upstream.api_url);
        let body = json!({
            "name": format!("destination_{}", chrono::Utc::now().timestamp_millis()),
            "workspaceId": workspace_id,
            "definitionId": S3_DESTINATION_DEFINITION_ID,
            "configuration": {
                "s3_bucket_name": destination.bucket,
                "s3_bucket_region": destination.region,
                "s3_bucket_path": destination.prefix,
                "access_key_id": destination.access_key_id,
                "secret_access_key": destination.secret_access_key,
                "format": { "format_type": "JSONL" }
            }
        });

        let response = self
            .call_with_auth(|http| http.post(&url).json(&body))
            .await?;

        if !response.status().is_success() {
            return Err(upstream_failure("Failed to create destination", response).await);
        }

        let data: DestinationResponse = response
            .json()
            .await
            .map_err(|e| BrokerError::Upstream(format!("Invalid destination response: {}", e)))?;

        tracing::info!(
            event = "destination_created",
            workspace_id = %workspace_id,
            destination_id = %data.destination_id,
            "Upstream destination created"
        );
        Ok(data.destination_id)
    }
}
