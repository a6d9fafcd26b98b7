//! Network layer.
//!
//! This module provides the `HttpClient` request engine, the `RetryPolicy`
//! applied to idempotent reads, cancellable `RequestHandle`s and the
//! `AuthApi` client for the remote auth service.
//!
//! Reads retry transient failures with exponential backoff; writes are sent
//! once. Authenticated requests carry a JWT bearer token set on the engine.

pub mod auth;
pub mod client;
pub mod error;
pub mod handle;
pub mod reply;
pub mod retry;

pub use auth::{AuthApi, LoginResult};
pub use client::HttpClient;
pub use error::ApiError;
pub use handle::{AbortHandle, RequestEvent, RequestHandle};
pub use reply::Reply;
pub use retry::{AttemptOutcome, RetryDecision, RetryPolicy};
