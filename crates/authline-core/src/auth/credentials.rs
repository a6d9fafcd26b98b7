use anyhow::{Context, Result};
use keyring::Entry;

use super::storage::{SessionBackend, StoredSession};
use crate::config::APP_NAME;

/// Keychain account used when none is given
const DEFAULT_ACCOUNT: &str = "session";

/// Session stored as one JSON secret in the OS keychain.
/// The entry is resolved once and every read and write goes through it.
#[derive(Debug)]
pub struct KeyringTokenStorage {
    entry: Entry,
}

impl KeyringTokenStorage {
    pub fn new() -> Result<Self> {
        Self::for_account(DEFAULT_ACCOUNT)
    }

    pub fn for_account(account: &str) -> Result<Self> {
        let entry = Entry::new(APP_NAME, account).context("Failed to create keyring entry")?;
        Ok(Self { entry })
    }
}

impl SessionBackend for KeyringTokenStorage {
    fn name(&self) -> &'static str {
        "keyring"
    }

    fn read(&self) -> Result<Option<StoredSession>> {
        match self.entry.get_password() {
            Ok(secret) => {
                let session = serde_json::from_str(&secret)
                    .context("Failed to parse session stored in keychain")?;
                Ok(Some(session))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve session from keychain"),
        }
    }

    fn write(&self, session: &StoredSession) -> Result<()> {
        let secret = serde_json::to_string(session)?;
        self.entry
            .set_password(&secret)
            .context("Failed to store session in keychain")
    }

    fn remove(&self) -> Result<()> {
        match self.entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete session from keychain"),
        }
    }
}
