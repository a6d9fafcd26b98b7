//! Session data models.
//!
//! - `Credential`: access/refresh token pair with its lifetime
//! - `UserProfile`: the authenticated user, roles and permissions

pub mod credential;
pub mod user;

pub use credential::Credential;
pub use user::UserProfile;
