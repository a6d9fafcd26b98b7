use serde::{Deserialize, Serialize};

/// Profile of the authenticated user as delivered by the auth service.
///
/// Roles and permissions are set-like: order is preserved as received but
/// callers should not rely on it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(rename = "id")]
    pub user_id: String,
    pub username: String,
    #[serde(rename = "displayName", default)]
    pub display_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl UserProfile {
    pub fn is_valid(&self) -> bool {
        !self.user_id.is_empty() && !self.username.is_empty()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Display name, falling back to the username
    pub fn name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.username
        } else {
            &self.display_name
        }
    }
}
