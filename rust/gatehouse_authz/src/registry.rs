//! Resource Registry: catalog of gate-able resource keys.

use std::sync::Arc;

use gatehouse_store::{IndexedStore, KvStore};

use crate::error::Result;
use crate::keyspace;
use crate::types::{now_millis, validate_resource_key, Resource, ResourceId, ResourceSpec};

#[derive(Clone)]
pub struct ResourceRegistry {
    records: IndexedStore<Resource>,
}

impl ResourceRegistry {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            records: IndexedStore::new(kv),
        }
    }

    /// Register a resource, or return the existing record for its key.
    ///
    /// Registration never patches an existing record: a repeat call with
    /// different metadata returns the original unchanged.
    pub fn register(&self, spec: ResourceSpec) -> Result<Resource> {
        validate_resource_key(&spec.key)?;
        if let Some(parent) = &spec.parent_key {
            validate_resource_key(parent)?;
        }

        let index_key = keyspace::resource_by_key(&spec.key);
        let kv = Arc::clone(self.records.kv());
        let (resource, created) = self.records.get_or_insert_with(&index_key, || {
            let id = ResourceId(kv.next_id(keyspace::RESOURCE_SEQUENCE)?);
            let resource = Resource {
                id,
                key: spec.key.clone(),
                resource_type: spec.resource_type,
                display_name_key: spec.display_name_key.clone(),
                default_actions: spec.default_actions.iter().copied().collect(),
                parent_key: spec.parent_key.clone(),
                created_at: now_millis(),
            };
            Ok((keyspace::resource(id), resource))
        })?;

        if created {
            tracing::debug!(key = %resource.key, id = %resource.id, "registered resource");
        } else if resource.resource_type != spec.resource_type
            || resource.display_name_key != spec.display_name_key
        {
            tracing::debug!(key = %resource.key, "resource already registered; metadata left unchanged");
        }
        Ok(resource)
    }

    /// Register resources one by one, stopping at the first error.
    pub fn register_all(&self, specs: impl IntoIterator<Item = ResourceSpec>) -> Result<Vec<Resource>> {
        specs.into_iter().map(|spec| self.register(spec)).collect()
    }

    pub fn find_by_key(&self, key: &str) -> Result<Option<Resource>> {
        Ok(self.records.get_by_index(&keyspace::resource_by_key(key))?)
    }

    pub fn find_by_id(&self, id: ResourceId) -> Result<Option<Resource>> {
        Ok(self.records.get(&keyspace::resource(id))?)
    }

    /// All resources in registration order.
    pub fn list(&self) -> Result<Vec<Resource>> {
        Ok(self.records.scan_prefix(keyspace::RESOURCE_PREFIX)?)
    }

    /// Remove a resource and its key index entry.
    ///
    /// Permissions referencing the key are left in place.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let Some(primary_key) = self.records.resolve(&keyspace::resource_by_key(key))? else {
            return Ok(false);
        };
        let removed = self
            .records
            .remove(&primary_key, |r| vec![keyspace::resource_by_key(&r.key)])?;
        if removed.is_some() {
            tracing::debug!(key, "deleted resource");
        }
        Ok(removed.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, ResourceType};
    use gatehouse_store::MemoryStore;

    fn registry() -> ResourceRegistry {
        ResourceRegistry::new(Arc::new(MemoryStore::new()))
    }

    fn users_spec() -> ResourceSpec {
        ResourceSpec::new("dashboard.users", ResourceType::Module, "nav.users").with_actions([
            Action::Read,
            Action::Write,
            Action::Manage,
            Action::Create,
            Action::Delete,
        ])
    }

    #[test]
    fn test_register_and_find() {
        let registry = registry();
        let resource = registry.register(users_spec()).unwrap();
        assert_eq!(resource.key, "dashboard.users");
        assert_eq!(resource.default_actions.len(), 5);

        let found = registry.find_by_key("dashboard.users").unwrap().unwrap();
        assert_eq!(found, resource);
        assert_eq!(registry.find_by_id(resource.id).unwrap(), Some(resource));
        assert!(registry.find_by_key("dashboard.courses").unwrap().is_none());
    }

    #[test]
    fn test_register_is_idempotent_and_never_patches() {
        let registry = registry();
        let first = registry.register(users_spec()).unwrap();

        let changed = ResourceSpec::new("dashboard.users", ResourceType::Page, "nav.people")
            .with_actions([Action::Read]);
        let second = registry.register(changed).unwrap();

        assert_eq!(second, first);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(registry.list().unwrap().len(), 1);
    }

    #[test]
    fn test_register_rejects_invalid_keys() {
        let registry = registry();
        let err = registry
            .register(ResourceSpec::new("bad key", ResourceType::Page, "x"))
            .unwrap_err();
        assert!(matches!(err, crate::AuthzError::InvalidArgument(_)));

        let err = registry
            .register(ResourceSpec::new("ok", ResourceType::Page, "x").with_parent("../up"))
            .unwrap_err();
        assert!(matches!(err, crate::AuthzError::InvalidArgument(_)));
        assert!(registry.list().unwrap().is_empty());
    }

    #[test]
    fn test_list_in_registration_order() {
        let registry = registry();
        let specs = ["courses", "attendance", "dashboard"]
            .map(|key| ResourceSpec::new(key, ResourceType::Page, format!("nav.{key}")));
        registry.register_all(specs).unwrap();

        let keys: Vec<String> = registry.list().unwrap().into_iter().map(|r| r.key).collect();
        assert_eq!(keys, vec!["courses", "attendance", "dashboard"]);
    }

    #[test]
    fn test_delete_removes_record_and_index() {
        let registry = registry();
        let resource = registry.register(users_spec()).unwrap();

        assert!(registry.delete("dashboard.users").unwrap());
        assert!(registry.find_by_key("dashboard.users").unwrap().is_none());
        assert!(registry.find_by_id(resource.id).unwrap().is_none());
        assert!(!registry.delete("dashboard.users").unwrap());

        // Re-registering after delete allocates a fresh id
        let again = registry.register(users_spec()).unwrap();
        assert_ne!(again.id, resource.id);
    }
}
