//! Gateway facade
//!
//! The operations the HTTP layer calls into. Each takes the request-scoped
//! [`RequestContext`] attached by the session gate where it needs to know
//! who is calling, and reports cookie mutations as [`CookieChange`] values
//! rather than touching the response itself. Failed operations return no
//! cookie changes.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::auth::helpers::secrets_match;
use crate::broker::TokenBroker;
use crate::config::Config;
use crate::directory::{DirectoryError, IdentityRecord, IdentityUpdate, UserDirectory};
use crate::error::GatewayError;

/// Session cookies owned by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCookie {
    /// Shared application secret, 24 hours
    AppSecret,
    /// Claimed identity email, 7 days
    Identity,
}

impl SessionCookie {
    pub fn name(&self) -> &'static str {
        match self {
            SessionCookie::AppSecret => "appSecret",
            SessionCookie::Identity => "identity",
        }
    }

    pub fn max_age_secs(&self) -> u64 {
        match self {
            SessionCookie::AppSecret => 24 * 60 * 60,
            SessionCookie::Identity => 7 * 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieChange {
    Set(SessionCookie, String),
    Clear(SessionCookie),
}

/// An operation result plus the cookie changes the response must carry
#[derive(Debug)]
pub struct WithCookies<T> {
    pub value: T,
    pub cookies: Vec<CookieChange>,
}

/// Per-request view of the caller, built by the session gate
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub identity: Option<IdentityRecord>,
}

/// Outcome of `claim_or_resume`
#[derive(Debug, Clone)]
pub struct Claim {
    pub record: IdentityRecord,
    pub created: bool,
}

pub struct Gateway {
    directory: Arc<dyn UserDirectory>,
    broker: Arc<TokenBroker>,
    config: Arc<Config>,
    /// Per-email locks serializing workspace provisioning
    provisioning: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Gateway {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        broker: Arc<TokenBroker>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            directory,
            broker,
            config,
            provisioning: Mutex::new(HashMap::new()),
        }
    }

    /// Check the shared application password and set the `appSecret` cookie
    pub fn login(&self, secret: &str) -> Result<WithCookies<()>, GatewayError> {
        if !secrets_match(secret, &self.config.app_secret) {
            tracing::warn!(event = "login_rejected", "Invalid application password");
            return Err(GatewayError::Unauthenticated("Invalid password".to_string()));
        }

        tracing::info!(event = "login", "Application password accepted");
        Ok(WithCookies {
            value: (),
            cookies: vec![CookieChange::Set(
                SessionCookie::AppSecret,
                self.config.app_secret.clone(),
            )],
        })
    }

    /// Resume the identity for `email`, creating it on first claim
    ///
    /// When two claims for a new email race, the directory lets one create
    /// win; the loser re-reads and reports `created = false`.
    pub async fn claim_or_resume(&self, email: &str) -> Result<WithCookies<Claim>, GatewayError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(GatewayError::InvalidRequest("Email is required".to_string()));
        }

        let claim = match self.directory.find(email).await? {
            Some(record) => Claim {
                record,
                created: false,
            },
            None => match self.directory.create(email).await {
                Ok(record) => Claim {
                    record,
                    created: true,
                },
                Err(DirectoryError::AlreadyExists(_)) => {
                    tracing::debug!(email = %email, "Lost create race, resuming existing identity");
                    let record = self
                        .directory
                        .find(email)
                        .await?
                        .ok_or_else(|| DirectoryError::NotFound(email.to_string()))?;
                    Claim {
                        record,
                        created: false,
                    }
                }
                Err(e) => return Err(e.into()),
            },
        };

        let event = if claim.created {
            "identity_created"
        } else {
            "identity_resumed"
        };
        tracing::info!(
            event = event,
            email = %email,
            "Identity claimed"
        );

        Ok(WithCookies {
            cookies: vec![CookieChange::Set(
                SessionCookie::Identity,
                claim.record.email.clone(),
            )],
            value: claim,
        })
    }

    /// Look up any identity by email
    pub async fn lookup(&self, email: &str) -> Result<IdentityRecord, GatewayError> {
        self.directory
            .find(email)
            .await?
            .ok_or_else(|| DirectoryError::NotFound(email.to_string()).into())
    }

    /// The identity resolved for this request
    pub fn current_identity(&self, ctx: &RequestContext) -> Result<IdentityRecord, GatewayError> {
        ctx.identity
            .clone()
            .ok_or_else(|| GatewayError::Unauthenticated("Not authenticated".to_string()))
    }

    /// Mint a widget token for the calling identity
    ///
    /// `allowed_origin` defaults to the first configured origin and must
    /// otherwise be on the allowlist.
    pub async fn mint_widget_token(
        &self,
        ctx: &RequestContext,
        allowed_origin: Option<&str>,
    ) -> Result<String, GatewayError> {
        let identity = ctx
            .identity
            .as_ref()
            .ok_or_else(|| GatewayError::Unauthenticated("User not authenticated".to_string()))?;

        let origin = self.config.resolve_origin(allowed_origin).ok_or_else(|| {
            tracing::warn!(
                email = %identity.email,
                requested_origin = ?allowed_origin,
                "Widget token requested for origin outside allowlist"
            );
            GatewayError::InvalidRequest("Origin not allowed".to_string())
        })?;

        Ok(self
            .broker
            .generate_widget_token(&identity.email, &origin)
            .await?)
    }

    /// Attach an upstream workspace (and destination, when configured) to the
    /// calling identity.
    ///
    /// Runs at most once at a time per email and re-reads the record under
    /// that lock, so concurrent calls create one workspace. Each step is saved
    /// as soon as it succeeds; a call after a partial failure only performs
    /// the missing steps. Fully provisioned identities are returned unchanged.
    pub async fn provision_workspace(
        &self,
        ctx: &RequestContext,
    ) -> Result<IdentityRecord, GatewayError> {
        let identity = self.current_identity(ctx)?;

        let lock = self.provisioning_lock(&identity.email).await;
        let result = {
            let _provisioning = lock.lock().await;
            self.provision_locked(&identity.email).await
        };
        self.release_provisioning_lock(&identity.email, lock).await;

        result
    }

    async fn provisioning_lock(&self, email: &str) -> Arc<Mutex<()>> {
        self.provisioning
            .lock()
            .await
            .entry(email.to_string())
            .or_default()
            .clone()
    }

    async fn release_provisioning_lock(&self, email: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.provisioning.lock().await;
        // Held by the map and this caller only: nobody is waiting on it
        if Arc::strong_count(&lock) == 2 {
            locks.remove(email);
        }
    }

    async fn provision_locked(&self, email: &str) -> Result<IdentityRecord, GatewayError> {
        let mut record = self
            .directory
            .find(email)
            .await?
            .ok_or_else(|| DirectoryError::NotFound(email.to_string()))?;

        let workspace_id = match record.external_workspace_ref.clone() {
            Some(workspace_id) => workspace_id,
            None => {
                let workspace_id = self.broker.create_workspace(email).await?;
                record = self
                    .directory
                    .update(
                        email,
                        IdentityUpdate {
                            external_workspace_ref: Some(workspace_id.clone()),
                            ..Default::default()
                        },
                    )
                    .await?;
                workspace_id
            }
        };

        match (
            &self.config.upstream.destination,
            &record.external_destination_ref,
        ) {
            (Some(destination), None) => {
                let destination_id = self
                    .broker
                    .create_destination(&workspace_id, destination)
                    .await?;
                record = self
                    .directory
                    .update(
                        email,
                        IdentityUpdate {
                            external_destination_ref: Some(destination_id),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
            (None, _) => {
                tracing::debug!(email = %email, "No destination configured");
            }
            (Some(_), Some(_)) => {}
        }

        tracing::info!(
            event = "workspace_provisioned",
            email = %record.email,
            workspace_id = ?record.external_workspace_ref,
            destination_id = ?record.external_destination_ref,
            "Identity provisioned"
        );
        Ok(record)
    }

    /// End the user session; the application session stays
    pub fn logout(&self, ctx: &RequestContext) -> WithCookies<()> {
        tracing::info!(
            event = "logout",
            email = ?ctx.identity.as_ref().map(|i| i.email.as_str()),
            "Identity cookie cleared"
        );
        WithCookies {
            value: (),
            cookies: vec![CookieChange::Clear(SessionCookie::Identity)],
        }
    }

    /// End both the user and the application session
    pub fn logout_app(&self, ctx: &RequestContext) -> WithCookies<()> {
        tracing::info!(
            event = "logout_app",
            email = ?ctx.identity.as_ref().map(|i| i.email.as_str()),
            "Identity and application cookies cleared"
        );
        WithCookies {
            value: (),
            cookies: vec![
                CookieChange::Clear(SessionCookie::Identity),
                CookieChange::Clear(SessionCookie::AppSecret),
            ],
        }
    }
}
