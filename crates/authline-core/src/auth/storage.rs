//! Persistence of the session between runs.
//!
//! The session manager treats every call here as fire-and-forget: backends
//! log their own failures and never report them upward.

use std::sync::{Mutex, PoisonError};

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::{Credential, UserProfile};

/// Token/session storage consumed by the session manager
pub trait TokenStorage: Send + Sync {
    fn save_tokens(&self, credential: &Credential);
    /// Stored credential, empty if none
    fn load_tokens(&self) -> Credential;
    fn save_user_session(&self, user: &UserProfile);
    /// Stored profile, empty if none
    fn load_user_session(&self) -> UserProfile;
    /// True when a non-empty refresh token is stored
    fn has_stored_tokens(&self) -> bool;
    fn clear_all(&self);
    /// Absolute expiry of the stored access token, if it expires
    fn load_expires_at(&self) -> Option<DateTime<Utc>>;
}

/// Everything a backend persists, written as one JSON document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    #[serde(default)]
    pub credential: Credential,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

impl StoredSession {
    fn set_credential(&mut self, credential: &Credential) {
        self.credential = credential.clone();
        // Lifetimes past the representable range are stored without an expiry
        self.expires_at = (credential.expires_in_seconds > 0)
            .then(|| Duration::try_seconds(credential.expires_in_seconds))
            .flatten()
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime));
    }
}

/// Raw document store behind a [`TokenStorage`]
pub trait SessionBackend: Send + Sync {
    fn name(&self) -> &'static str;
    fn read(&self) -> Result<Option<StoredSession>>;
    fn write(&self, session: &StoredSession) -> Result<()>;
    fn remove(&self) -> Result<()>;
}

fn read_or_default<B: SessionBackend + ?Sized>(backend: &B) -> StoredSession {
    match backend.read() {
        Ok(session) => session.unwrap_or_default(),
        Err(e) => {
            warn!(backend = backend.name(), error = %e, "Failed to read stored session");
            StoredSession::default()
        }
    }
}

fn update<B: SessionBackend + ?Sized>(backend: &B, apply: impl FnOnce(&mut StoredSession)) {
    let mut session = read_or_default(backend);
    apply(&mut session);
    if let Err(e) = backend.write(&session) {
        warn!(backend = backend.name(), error = %e, "Failed to save session");
    }
}

impl<B: SessionBackend> TokenStorage for B {
    fn save_tokens(&self, credential: &Credential) {
        update(self, |s| s.set_credential(credential));
    }

    fn load_tokens(&self) -> Credential {
        read_or_default(self).credential
    }

    fn save_user_session(&self, user: &UserProfile) {
        update(self, |s| s.user = Some(user.clone()));
    }

    fn load_user_session(&self) -> UserProfile {
        read_or_default(self).user.unwrap_or_default()
    }

    fn has_stored_tokens(&self) -> bool {
        !read_or_default(self).credential.refresh_token.is_empty()
    }

    fn clear_all(&self) {
        if let Err(e) = self.remove() {
            warn!(backend = self.name(), error = %e, "Failed to clear stored session");
        }
    }

    fn load_expires_at(&self) -> Option<DateTime<Utc>> {
        read_or_default(self).expires_at
    }
}

/// Process-local storage; nothing survives a restart
#[derive(Debug, Default)]
pub struct MemoryTokenStorage {
    session: Mutex<Option<StoredSession>>,
}

impl MemoryTokenStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionBackend for MemoryTokenStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn read(&self) -> Result<Option<StoredSession>> {
        Ok(self.session.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn write(&self, session: &StoredSession) -> Result<()> {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}
