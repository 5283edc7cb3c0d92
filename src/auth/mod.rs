//! Authentication module
//!
//! Shared-secret session handling for the gateway.
//!
//! ## Structure
//!
//! - `gate`: the session gate middleware run before every `/api` handler
//! - `extractors`: Axum extractor for the request context the gate attaches
//! - `helpers`: Pure helper functions (cookie extraction and rendering, secret comparison)
//! - `handlers`: HTTP handlers for login and logout
//!
//! ## Session Flow
//!
//! 1. Browser posts the application password to `/api/login` → `appSecret` cookie
//! 2. Browser claims an email at `/api/users` → `identity` cookie
//! 3. Every later `/api` request passes the gate with both cookies
//! 4. `/api/logout` drops `identity`; `/api/logout/app` drops both

pub mod extractors;
pub mod gate;
pub mod handlers;
pub mod helpers;

// Re-export handlers for convenient routing
pub use gate::{session_gate, SessionGate};
pub use handlers::{login_handler, logout_app_handler, logout_handler};
