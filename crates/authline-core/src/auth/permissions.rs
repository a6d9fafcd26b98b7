use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

/// Receives the roles and permissions of each acquired session
pub trait PermissionSink: Send + Sync {
    fn load_from_session(&self, roles: &[String], permissions: &[String]);
    fn clear(&self);
}

#[derive(Debug, Default)]
struct Grants {
    roles: HashSet<String>,
    permissions: HashSet<String>,
    revision: u64,
}

/// Role and permission lookup for the current session.
/// `revision` changes on every load or clear so views can tell when to re-check.
#[derive(Debug, Default)]
pub struct PermissionSet {
    grants: RwLock<Grants>,
}

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.read(|g| g.permissions.contains(permission))
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.read(|g| g.roles.contains(role))
    }

    pub fn has_any_permission<S: AsRef<str>>(&self, permissions: &[S]) -> bool {
        self.read(|g| permissions.iter().any(|p| g.permissions.contains(p.as_ref())))
    }

    pub fn revision(&self) -> u64 {
        self.read(|g| g.revision)
    }

    fn read<T>(&self, f: impl FnOnce(&Grants) -> T) -> T {
        f(&self.grants.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write(&self, f: impl FnOnce(&mut Grants)) {
        let mut grants = self.grants.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut grants);
        grants.revision += 1;
    }
}

impl PermissionSink for PermissionSet {
    fn load_from_session(&self, roles: &[String], permissions: &[String]) {
        self.write(|g| {
            g.roles = roles.iter().cloned().collect();
            g.permissions = permissions.iter().cloned().collect();
        });
    }

    fn clear(&self) {
        self.write(|g| {
            g.roles.clear();
            g.permissions.clear();
        });
    }
}
