//! Gatehouse: role-based authorization over an embedded ordered store.
//!
//! This crate provides:
//!
//! 1. **Resource Registry** ([`ResourceRegistry`]): gate-able resource keys
//!    such as `dashboard.users`, registered idempotently at bootstrap.
//!
//! 2. **Permission Catalog** ([`PermissionCatalog`]): one stable permission
//!    per `(resource_key, action)` pair.
//!
//! 3. **Role Store** ([`RoleStore`]): named, case-insensitively unique
//!    bundles of permissions that can be switched off.
//!
//! 4. **Authorization Engine** ([`AuthzEngine`]): aggregates a principal's
//!    direct and role-derived grants and answers decisions. `manage` on a
//!    resource satisfies every action on it. Decisions fail closed.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Gatehouse                            │
//! │                                                             │
//! │  ResourceRegistry  PermissionCatalog  RoleStore  Directory  │
//! │         │                 │               │          │      │
//! │         └─────── IndexedStore<T> (gatehouse_store) ──┘      │
//! │                           │                                 │
//! │                  Arc<dyn KvStore> (redb / memory)           │
//! │                                                             │
//! │  AuthzEngine ── reads catalog + roles + PrincipalProvider   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use gatehouse_authz::{Action, Gatehouse, Principal, ResourceSpec, ResourceType};
//!
//! let gate = Gatehouse::in_memory();
//! gate.register_resource(
//!     ResourceSpec::new("dashboard.users", ResourceType::Module, "nav.users")
//!         .with_actions(Action::ALL),
//! )?;
//! let manage = gate.create_permission("dashboard.users", ResourceType::Module, Action::Manage)?;
//! let admin = gate.create_role("admin", None, vec![manage.id])?;
//! gate.principals().upsert(&Principal::new("u1").with_roles([admin.id]))?;
//!
//! assert!(gate.can_perform(&"u1".into(), "dashboard.users", Action::Delete));
//! # Ok::<(), gatehouse_authz::AuthzError>(())
//! ```

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod keyspace;
pub mod principals;
pub mod registry;
pub mod roles;
pub mod types;

use std::collections::BTreeSet;
use std::sync::Arc;

use gatehouse_store::{KvStore, MemoryStore, RedbStore, StorageError};
use serde::Serialize;

pub use catalog::PermissionCatalog;
pub use config::{EngineConfig, GatehouseConfig};
pub use engine::{AuthzEngine, DecisionMetrics, MetricsSnapshot};
pub use error::{AuthzError, Result};
pub use principals::{PrincipalDirectory, PrincipalProvider};
pub use registry::ResourceRegistry;
pub use roles::RoleStore;
pub use types::{
    Action, AggregatedPermissions, Permission, PermissionId, Principal, PrincipalId, Resource,
    ResourceId, ResourceSpec, ResourceType, Role, RoleId, RoleUpdate,
};

/// What [`Gatehouse::revoke_permission_everywhere`] touched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevocationReport {
    pub permission_deleted: bool,
    pub roles_updated: usize,
    pub principals_updated: usize,
}

/// One store handle with every component wired to it.
pub struct Gatehouse {
    kv: Arc<dyn KvStore>,
    /// Kept so `close` can release the database file deterministically.
    redb: Option<RedbStore>,
    registry: ResourceRegistry,
    catalog: PermissionCatalog,
    roles: RoleStore,
    principals: PrincipalDirectory,
    engine: AuthzEngine,
}

impl Gatehouse {
    /// Open (or create) the database under `config.data_dir`.
    pub fn open(config: &GatehouseConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir).map_err(StorageError::from)?;
        let store = RedbStore::open(config.db_path())?;
        let mut gate = Self::with_store(Arc::new(store.clone()), config.engine.clone());
        gate.redb = Some(store);
        Ok(gate)
    }

    /// A fresh in-memory instance with default engine settings.
    pub fn in_memory() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), EngineConfig::default())
    }

    /// Wire every component to `kv`, with principals read from the built-in directory.
    pub fn with_store(kv: Arc<dyn KvStore>, engine_config: EngineConfig) -> Self {
        let registry = ResourceRegistry::new(Arc::clone(&kv));
        let catalog = PermissionCatalog::new(Arc::clone(&kv));
        let roles = RoleStore::new(Arc::clone(&kv));
        let principals = PrincipalDirectory::new(Arc::clone(&kv));
        let engine = AuthzEngine::new(
            catalog.clone(),
            roles.clone(),
            Arc::new(principals.clone()),
            engine_config,
        );
        Self {
            kv,
            redb: None,
            registry,
            catalog,
            roles,
            principals,
            engine,
        }
    }

    /// Read principals from an external source instead of the built-in directory.
    ///
    /// Decision counters start from zero.
    pub fn with_provider(mut self, provider: Arc<dyn PrincipalProvider>) -> Self {
        self.engine = AuthzEngine::new(
            self.catalog.clone(),
            self.roles.clone(),
            provider,
            self.engine.config().clone(),
        );
        self
    }

    /// Release the store. Component clones handed out earlier keep it alive.
    pub fn close(self) -> Result<()> {
        let Self {
            kv,
            redb,
            registry,
            catalog,
            roles,
            principals,
            engine,
        } = self;
        drop((engine, principals, roles, catalog, registry, kv));
        if let Some(store) = redb {
            store.close()?;
        }
        Ok(())
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &PermissionCatalog {
        &self.catalog
    }

    pub fn roles(&self) -> &RoleStore {
        &self.roles
    }

    pub fn principals(&self) -> &PrincipalDirectory {
        &self.principals
    }

    pub fn engine(&self) -> &AuthzEngine {
        &self.engine
    }

    // Bootstrap

    pub fn register_resource(&self, spec: ResourceSpec) -> Result<Resource> {
        self.registry.register(spec)
    }

    /// Register in order, stopping at the first error.
    pub fn register_resources(&self, specs: Vec<ResourceSpec>) -> Result<Vec<Resource>> {
        self.registry.register_all(specs)
    }

    // Admin

    pub fn create_permission(
        &self,
        resource_key: &str,
        resource_type: ResourceType,
        action: Action,
    ) -> Result<Permission> {
        self.catalog.create(resource_key, resource_type, action)
    }

    pub fn create_role(
        &self,
        name: &str,
        description: Option<&str>,
        permission_ids: Vec<PermissionId>,
    ) -> Result<Role> {
        self.roles.create(name, description, permission_ids)
    }

    pub fn update_role(&self, id: RoleId, update: RoleUpdate) -> Result<Role> {
        self.roles.update(id, update)
    }

    pub fn delete_role(&self, id: RoleId) -> Result<bool> {
        self.roles.delete(id)
    }

    /// Delete a permission without touching roles or principals that reference it.
    pub fn delete_permission(&self, id: PermissionId) -> Result<bool> {
        self.catalog.delete(id)
    }

    pub fn delete_resource(&self, key: &str) -> Result<bool> {
        self.registry.delete(key)
    }

    pub fn list_resources(&self) -> Result<Vec<Resource>> {
        self.registry.list()
    }

    pub fn list_permissions(&self) -> Result<Vec<Permission>> {
        self.catalog.list()
    }

    pub fn list_roles(&self) -> Result<Vec<Role>> {
        self.roles.list()
    }

    /// Delete a permission and strip its id from every role and directory principal.
    pub fn revoke_permission_everywhere(&self, id: PermissionId) -> Result<RevocationReport> {
        let mut report = RevocationReport {
            permission_deleted: self.catalog.delete(id)?,
            ..Default::default()
        };
        for role in self.roles.list()? {
            if role.permission_ids.contains(&id) && self.roles.strip_permission(role.id, id)? {
                report.roles_updated += 1;
            }
        }
        report.principals_updated = self.principals.strip_permission_everywhere(id)?;
        tracing::info!(
            permission = %id,
            deleted = report.permission_deleted,
            roles = report.roles_updated,
            principals = report.principals_updated,
            "revoked permission everywhere"
        );
        Ok(report)
    }

    // Runtime decisions

    pub fn can_perform(&self, principal_id: &PrincipalId, resource_key: &str, action: Action) -> bool {
        self.engine.can_perform(principal_id, resource_key, action)
    }

    /// True if any of `actions` is allowed. An empty `actions` denies.
    pub fn can_perform_any(&self, principal_id: &PrincipalId, resource_key: &str, actions: &[Action]) -> bool {
        self.engine.can_perform_any(principal_id, resource_key, actions)
    }

    /// True if every one of `actions` is allowed.
    ///
    /// An empty `actions` denies rather than being vacuously allowed, so a
    /// guard built from an empty requirement list never opens.
    pub fn can_perform_all(&self, principal_id: &PrincipalId, resource_key: &str, actions: &[Action]) -> bool {
        self.engine.can_perform_all(principal_id, resource_key, actions)
    }

    pub fn aggregated_permissions(&self, principal_id: &PrincipalId) -> Result<AggregatedPermissions> {
        self.engine.aggregated_permissions(principal_id)
    }

    pub fn accessible_resources(&self, principal_id: &PrincipalId) -> BTreeSet<String> {
        self.engine.accessible_resources(principal_id)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.engine.metrics()
    }
}
