//! Authline core - client-side session and network resilience.
//!
//! An HTTP request engine with retry, backoff and cancellation, plus a
//! session manager that logs a user in, persists the session and keeps the
//! access token fresh in the background.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiError, AuthApi, HttpClient, Reply, RequestEvent, RequestHandle, RetryPolicy};
pub use auth::{AuthState, SessionEvent, SessionManager};
pub use config::Config;
pub use models::{Credential, UserProfile};
