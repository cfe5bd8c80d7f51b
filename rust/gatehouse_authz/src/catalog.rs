//! Permission Catalog: one stored grant per `(resource_key, action)` pair.

use std::sync::Arc;

use gatehouse_store::{IndexedStore, KvStore};

use crate::error::Result;
use crate::keyspace;
use crate::types::{now_millis, validate_resource_key, Action, Permission, PermissionId, ResourceType};

#[derive(Clone)]
pub struct PermissionCatalog {
    records: IndexedStore<Permission>,
}

impl PermissionCatalog {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            records: IndexedStore::new(kv),
        }
    }

    /// Get or create the permission for `(resource_key, action)`.
    ///
    /// A pair that already exists returns the stored permission, including
    /// its original `resource_type`.
    pub fn create(
        &self,
        resource_key: &str,
        resource_type: ResourceType,
        action: Action,
    ) -> Result<Permission> {
        validate_resource_key(resource_key)?;

        let index_key = keyspace::permission_pair(resource_key, action);
        let kv = Arc::clone(self.records.kv());
        let (permission, created) = self.records.get_or_insert_with(&index_key, || {
            let id = PermissionId(kv.next_id(keyspace::PERMISSION_SEQUENCE)?);
            let permission = Permission {
                id,
                resource_key: resource_key.to_string(),
                resource_type,
                action,
                created_at: now_millis(),
            };
            Ok((keyspace::permission(id), permission))
        })?;

        if created {
            tracing::debug!(
                id = %permission.id,
                resource_key,
                action = %action,
                "created permission"
            );
        }
        Ok(permission)
    }

    pub fn find_by_id(&self, id: PermissionId) -> Result<Option<Permission>> {
        Ok(self.records.get(&keyspace::permission(id))?)
    }

    pub fn find_by_resource_and_action(
        &self,
        resource_key: &str,
        action: Action,
    ) -> Result<Option<Permission>> {
        Ok(self
            .records
            .get_by_index(&keyspace::permission_pair(resource_key, action))?)
    }

    /// Every permission on one resource, ordered by action name.
    pub fn find_all_for_resource(&self, resource_key: &str) -> Result<Vec<Permission>> {
        let entries = self
            .records
            .scan_index(&keyspace::permission_pairs_of(resource_key))?;
        let mut permissions = Vec::with_capacity(entries.len());
        for (index_key, primary_key) in entries {
            match self.records.get(&primary_key)? {
                Some(permission) => permissions.push(permission),
                None => tracing::warn!(index_key, primary_key, "dangling permission pair entry"),
            }
        }
        Ok(permissions)
    }

    /// All permissions in creation order.
    pub fn list(&self) -> Result<Vec<Permission>> {
        Ok(self.records.scan_prefix(keyspace::PERMISSION_PREFIX)?)
    }

    /// Remove a permission and its pair index entry.
    ///
    /// Roles and principals that still reference the id are not touched;
    /// readers skip ids that no longer resolve.
    pub fn delete(&self, id: PermissionId) -> Result<bool> {
        let removed = self.records.remove(&keyspace::permission(id), |p| {
            vec![keyspace::permission_pair(&p.resource_key, p.action)]
        })?;
        if removed.is_some() {
            tracing::debug!(id = %id, "deleted permission");
        }
        Ok(removed.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_store::MemoryStore;

    fn catalog() -> PermissionCatalog {
        PermissionCatalog::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_create_is_idempotent_per_pair() {
        let catalog = catalog();
        let p1 = catalog
            .create("dashboard.users", ResourceType::Module, Action::Manage)
            .unwrap();
        let again = catalog
            .create("dashboard.users", ResourceType::Module, Action::Manage)
            .unwrap();
        assert_eq!(p1.id, again.id);
        assert_eq!(p1.created_at, again.created_at);

        let p2 = catalog
            .create("dashboard.users", ResourceType::Module, Action::Read)
            .unwrap();
        assert_ne!(p1.id, p2.id);
        assert_eq!(catalog.list().unwrap().len(), 2);
    }

    #[test]
    fn test_lookups() {
        let catalog = catalog();
        let read = catalog
            .create("courses", ResourceType::Page, Action::Read)
            .unwrap();

        assert_eq!(catalog.find_by_id(read.id).unwrap(), Some(read.clone()));
        assert_eq!(
            catalog
                .find_by_resource_and_action("courses", Action::Read)
                .unwrap(),
            Some(read)
        );
        assert!(catalog
            .find_by_resource_and_action("courses", Action::Write)
            .unwrap()
            .is_none());
        assert!(catalog.find_by_id(PermissionId(404)).unwrap().is_none());
    }

    #[test]
    fn test_find_all_for_resource_is_scoped() {
        let catalog = catalog();
        catalog
            .create("courses", ResourceType::Page, Action::Write)
            .unwrap();
        catalog
            .create("courses", ResourceType::Page, Action::Read)
            .unwrap();
        catalog
            .create("courses.enrollments", ResourceType::Entity, Action::Read)
            .unwrap();
        catalog
            .create("courses2", ResourceType::Page, Action::Read)
            .unwrap();

        let actions: Vec<Action> = catalog
            .find_all_for_resource("courses")
            .unwrap()
            .into_iter()
            .map(|p| p.action)
            .collect();
        // Ordered by action name within the pair index
        assert_eq!(actions, vec![Action::Read, Action::Write]);
        assert!(catalog.find_all_for_resource("attendance").unwrap().is_empty());
    }

    #[test]
    fn test_delete_frees_the_pair() {
        let catalog = catalog();
        let p1 = catalog
            .create("dashboard.users", ResourceType::Module, Action::Manage)
            .unwrap();

        assert!(catalog.delete(p1.id).unwrap());
        assert!(!catalog.delete(p1.id).unwrap());
        assert!(catalog.find_by_id(p1.id).unwrap().is_none());
        assert!(catalog
            .find_by_resource_and_action("dashboard.users", Action::Manage)
            .unwrap()
            .is_none());

        let recreated = catalog
            .create("dashboard.users", ResourceType::Module, Action::Manage)
            .unwrap();
        assert_ne!(recreated.id, p1.id);
    }

    #[test]
    fn test_rejects_invalid_resource_key() {
        let catalog = catalog();
        assert!(catalog
            .create("a#read", ResourceType::Page, Action::Read)
            .is_err());
        assert!(catalog.list().unwrap().is_empty());
    }
}
