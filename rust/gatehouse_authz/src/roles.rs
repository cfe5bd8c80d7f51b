//! Role Store: named, toggle-able bundles of permission ids.
//!
//! Names are unique case-insensitively through the `role_name/` index. A
//! rename swaps the index entry and rewrites the record in one
//! transaction, guarded on the record bytes that were read, so two
//! concurrent renames can never both win.

use std::sync::Arc;

use gatehouse_store::{IndexedStore, KvStore, WriteOutcome};

use crate::error::{AuthzError, Result};
use crate::keyspace;
use crate::types::{normalize_role_name, now_millis, PermissionId, Role, RoleId, RoleUpdate};

const NAME_TAKEN: &str = "Role with this name already exists";

#[derive(Clone)]
pub struct RoleStore {
    records: IndexedStore<Role>,
}

impl RoleStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            records: IndexedStore::new(kv),
        }
    }

    /// Create an active role. Fails with `Conflict` if the name is taken.
    pub fn create(
        &self,
        name: &str,
        description: Option<&str>,
        permission_ids: Vec<PermissionId>,
    ) -> Result<Role> {
        let name = normalize_role_name(name)?;
        let name_key = keyspace::role_by_name(&name);
        if self.records.resolve(&name_key)?.is_some() {
            return Err(AuthzError::Conflict(NAME_TAKEN.to_string()));
        }

        let id = RoleId(self.records.kv().next_id(keyspace::ROLE_SEQUENCE)?);
        let now = now_millis();
        let role = Role {
            id,
            name,
            description: description.map(str::to_string),
            permission_ids,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        match self
            .records
            .insert_unique(&keyspace::role(id), &role, &[name_key])?
        {
            WriteOutcome::Written => {
                tracing::debug!(id = %role.id, name = %role.name, "created role");
                Ok(role)
            }
            WriteOutcome::Conflict { .. } => Err(AuthzError::Conflict(NAME_TAKEN.to_string())),
        }
    }

    pub fn find_by_id(&self, id: RoleId) -> Result<Option<Role>> {
        Ok(self.records.get(&keyspace::role(id))?)
    }

    /// Case-insensitive lookup.
    pub fn find_by_name(&self, name: &str) -> Result<Option<Role>> {
        Ok(self.records.get_by_index(&keyspace::role_by_name(name))?)
    }

    /// All roles in creation order.
    pub fn list(&self) -> Result<Vec<Role>> {
        Ok(self.records.scan_prefix(keyspace::ROLE_PREFIX)?)
    }

    /// Merge `update` over the stored role.
    ///
    /// Fails with `NotFound` for an unknown id and `Conflict` if the new
    /// name belongs to another role. A concurrent edit of the same role
    /// only causes the merge to be redone on the fresh record.
    pub fn update(&self, id: RoleId, update: RoleUpdate) -> Result<Role> {
        let new_name = update.name.as_deref().map(normalize_role_name).transpose()?;
        let primary_key = keyspace::role(id);

        loop {
            let Some(snapshot) = self.records.snapshot(&primary_key)? else {
                return Err(AuthzError::not_found("role", id));
            };
            let current = &snapshot.record;

            let mut next = current.clone();
            let mut removed = Vec::new();
            let mut added = Vec::new();
            if let Some(name) = &new_name {
                let old_key = keyspace::role_by_name(&current.name);
                let new_key = keyspace::role_by_name(name);
                if new_key != old_key {
                    match self.records.resolve(&new_key)? {
                        Some(owner) if owner != primary_key => {
                            return Err(AuthzError::Conflict(NAME_TAKEN.to_string()));
                        }
                        _ => {}
                    }
                    removed.push(old_key);
                    added.push(new_key);
                }
                next.name = name.clone();
            }
            if let Some(description) = &update.description {
                next.description = Some(description.clone());
            }
            if let Some(permission_ids) = &update.permission_ids {
                next.permission_ids = permission_ids.clone();
            }
            if let Some(is_active) = update.is_active {
                next.is_active = is_active;
            }
            next.updated_at = now_millis();

            match self
                .records
                .replace(&primary_key, &snapshot, &next, &removed, &added)?
            {
                WriteOutcome::Written => {
                    tracing::debug!(id = %id, name = %next.name, active = next.is_active, "updated role");
                    return Ok(next);
                }
                WriteOutcome::Conflict { key } if added.contains(&key) => {
                    return Err(AuthzError::Conflict(NAME_TAKEN.to_string()));
                }
                WriteOutcome::Conflict { key } => {
                    tracing::debug!(id = %id, key, "role changed concurrently, retrying update");
                }
            }
        }
    }

    /// Remove a role and its name index entry.
    pub fn delete(&self, id: RoleId) -> Result<bool> {
        let removed = self
            .records
            .remove(&keyspace::role(id), |r| vec![keyspace::role_by_name(&r.name)])?;
        if let Some(role) = &removed {
            tracing::debug!(id = %id, name = %role.name, "deleted role");
        }
        Ok(removed.is_some())
    }

    /// Drop `permission_id` from a role's bundle. Returns true if it was present.
    pub fn strip_permission(&self, id: RoleId, permission_id: PermissionId) -> Result<bool> {
        let mut stripped = false;
        self.records.modify(&keyspace::role(id), |role| {
            let before = role.permission_ids.len();
            role.permission_ids.retain(|p| *p != permission_id);
            stripped = role.permission_ids.len() != before;
            if stripped {
                role.updated_at = now_millis();
            }
        })?;
        Ok(stripped)
    }
}
