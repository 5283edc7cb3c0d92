//! HTTP surface: routes and the identity/token handlers

pub mod handlers;
pub mod routes;

pub use routes::create_router;
