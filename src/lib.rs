//! Session and external-token gateway
//!
//! Gates a browser app behind a shared application password, lets visitors
//! claim an identity by email, and exchanges that identity for a short-lived
//! widget token minted by the upstream embedding API.

#![deny(dead_code)]

pub mod auth;
pub mod broker;
pub mod config;
pub mod directory;
pub mod error;
pub mod gateway;
pub mod web;

use auth::SessionGate;
use broker::TokenBroker;
use config::Config;
use directory::UserDirectory;
use gateway::Gateway;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub gate: Arc<SessionGate>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wire the gate and the facade around one directory and one broker
    pub fn new(
        config: Arc<Config>,
        directory: Arc<dyn UserDirectory>,
        broker: Arc<TokenBroker>,
    ) -> Self {
        let gate = Arc::new(SessionGate::new(
            config.app_secret.clone(),
            directory.clone(),
        ));
        let gateway = Arc::new(Gateway::new(directory, broker, config.clone()));

        Self {
            gateway,
            gate,
            config,
        }
    }
}
