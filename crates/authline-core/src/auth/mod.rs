//! Session management for an authenticated user.
//!
//! This module provides:
//! - `SessionManager`: login/logout/auto-login state machine
//! - `RefreshScheduler`: single-shot deadline for the silent token refresh
//! - `TokenStorage`: persistence backends (file, OS keychain, memory)
//! - `PermissionSet`: role and permission lookup for the current session
//!
//! Access tokens are refreshed 60 seconds before they expire. A failed
//! refresh ends the session.

pub mod credentials;
pub mod manager;
pub mod permissions;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod storage;

pub use credentials::KeyringTokenStorage;
pub use manager::{bind_bearer_token, SessionManager, SessionManagerBuilder};
pub use permissions::{PermissionSet, PermissionSink};
pub use scheduler::{refresh_delay, RefreshDue, RefreshScheduler};
pub use session::FileTokenStorage;
pub use state::{AuthState, SessionEvent};
pub use storage::{MemoryTokenStorage, SessionBackend, StoredSession, TokenStorage};
