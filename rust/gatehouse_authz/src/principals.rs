//! Principals as the engine sees them.
//!
//! [`PrincipalProvider`] is the seam to whatever owns identity; the engine
//! only ever reads through it. [`PrincipalDirectory`] is the store-backed
//! implementation used by the admin binary and by tests.

use std::sync::Arc;

use gatehouse_store::{IndexedStore, KvStore};

use crate::error::{AuthzError, Result};
use crate::keyspace;
use crate::types::{PermissionId, Principal, PrincipalId, RoleId};

/// Read-only source of principal records.
pub trait PrincipalProvider: Send + Sync {
    /// Look up one principal. `Ok(None)` means it does not exist.
    fn principal(&self, id: &PrincipalId) -> Result<Option<Principal>>;
}

#[derive(Clone)]
pub struct PrincipalDirectory {
    records: IndexedStore<Principal>,
}

impl PrincipalDirectory {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            records: IndexedStore::new(kv),
        }
    }

    /// Insert or overwrite a principal.
    pub fn upsert(&self, principal: &Principal) -> Result<()> {
        if principal.id.as_str().is_empty() {
            return Err(AuthzError::InvalidArgument(
                "principal id must not be empty".to_string(),
            ));
        }
        self.records
            .put(&keyspace::principal(&principal.id), principal, &[])?;
        tracing::debug!(principal = %principal.id, "stored principal");
        Ok(())
    }

    pub fn get(&self, id: &PrincipalId) -> Result<Option<Principal>> {
        Ok(self.records.get(&keyspace::principal(id))?)
    }

    pub fn delete(&self, id: &PrincipalId) -> Result<bool> {
        Ok(self
            .records
            .remove(&keyspace::principal(id), |_| Vec::new())?
            .is_some())
    }

    /// All principals ordered by id.
    pub fn list(&self) -> Result<Vec<Principal>> {
        Ok(self.records.scan_prefix(keyspace::PRINCIPAL_PREFIX)?)
    }

    /// Add a role membership. Assigning an existing membership is a no-op.
    pub fn assign_role(&self, id: &PrincipalId, role_id: RoleId) -> Result<Principal> {
        self.update(id, |p| {
            if !p.group_ids.contains(&role_id) {
                p.group_ids.push(role_id);
            }
        })
    }

    pub fn revoke_role(&self, id: &PrincipalId, role_id: RoleId) -> Result<Principal> {
        self.update(id, |p| p.group_ids.retain(|r| *r != role_id))
    }

    /// Add a direct grant. Granting an existing permission is a no-op.
    pub fn grant_permission(&self, id: &PrincipalId, permission_id: PermissionId) -> Result<Principal> {
        self.update(id, |p| {
            if !p.direct_permissions.contains(&permission_id) {
                p.direct_permissions.push(permission_id);
            }
        })
    }

    pub fn revoke_permission(&self, id: &PrincipalId, permission_id: PermissionId) -> Result<Principal> {
        self.update(id, |p| p.direct_permissions.retain(|d| *d != permission_id))
    }

    /// Drop `permission_id` from every principal's direct grants.
    ///
    /// Returns the number of principals that held it.
    pub fn strip_permission_everywhere(&self, permission_id: PermissionId) -> Result<usize> {
        let mut stripped = 0;
        for principal in self.list()? {
            if !principal.direct_permissions.contains(&permission_id) {
                continue;
            }
            let updated = self
                .records
                .modify(&keyspace::principal(&principal.id), |p| {
                    p.direct_permissions.retain(|d| *d != permission_id)
                })?;
            if updated.is_some() {
                stripped += 1;
            }
        }
        Ok(stripped)
    }

    fn update<F>(&self, id: &PrincipalId, f: F) -> Result<Principal>
    where
        F: FnMut(&mut Principal),
    {
        self.records
            .modify(&keyspace::principal(id), f)?
            .ok_or_else(|| AuthzError::not_found("principal", id))
    }
}

impl PrincipalProvider for PrincipalDirectory {
    fn principal(&self, id: &PrincipalId) -> Result<Option<Principal>> {
        self.get(id)
    }
}
