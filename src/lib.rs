//! Campus SDK - client library for the Campus e-learning API
//!
//! The core is session token management: an observable [`auth::TokenStore`],
//! a [`auth::SessionManager`] that refreshes tokens single-flight, and an
//! [`auth::AuthHeaderResolver`] consumed by the [`api::ApiClient`].

pub mod api;
pub mod auth;
pub mod config;

pub use api::{ApiClient, ClientConfig, Credentials};
pub use auth::{AuthError, AuthHeaderResolver, SessionManager, TokenSet, TokenStore};
pub use config::Config;
