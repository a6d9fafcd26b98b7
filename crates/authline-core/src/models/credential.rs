use serde::{Deserialize, Serialize};

/// Access/refresh token pair and its declared lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    /// Lifetime in seconds; zero or less means the token does not expire
    pub expires_in_seconds: i64,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>, expires_in_seconds: i64) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_in_seconds,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.access_token.is_empty()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
