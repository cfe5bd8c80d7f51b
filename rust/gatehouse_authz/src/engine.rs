//! Authorization Engine: aggregation and fail-closed decisions.
//!
//! Nothing is cached. Every decision re-reads the principal, its roles and
//! their permissions, so a revoked grant stops working on the next call.
//!
//! Decision calls return plain `bool`. Any error met while aggregating
//! (missing principal, storage failure, corrupt record) is logged at `warn`,
//! counted in [`DecisionMetrics::failed_closed`] and reported as a denial.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ahash::AHashSet;
use serde::Serialize;

use crate::catalog::PermissionCatalog;
use crate::config::EngineConfig;
use crate::error::{AuthzError, Result};
use crate::principals::PrincipalProvider;
use crate::roles::RoleStore;
use crate::types::{Action, AggregatedPermissions, Permission, PermissionId, Principal, PrincipalId};

/// Decision counters, shared by every clone of an engine.
#[derive(Debug, Default)]
pub struct DecisionMetrics {
    allowed: AtomicU64,
    denied: AtomicU64,
    failed_closed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub allowed: u64,
    pub denied: u64,
    /// Denials caused by an error rather than a missing grant.
    pub failed_closed: u64,
}

impl DecisionMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            allowed: self.allowed.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            failed_closed: self.failed_closed.load(Ordering::Relaxed),
        }
    }

    fn record(&self, allowed: bool) {
        let counter = if allowed { &self.allowed } else { &self.denied };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failed_closed.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Clone)]
pub struct AuthzEngine {
    catalog: PermissionCatalog,
    roles: RoleStore,
    principals: Arc<dyn PrincipalProvider>,
    config: EngineConfig,
    metrics: Arc<DecisionMetrics>,
}

impl AuthzEngine {
    pub fn new(
        catalog: PermissionCatalog,
        roles: RoleStore,
        principals: Arc<dyn PrincipalProvider>,
        config: EngineConfig,
    ) -> Self {
        Self {
            catalog,
            roles,
            principals,
            config,
            metrics: Arc::new(DecisionMetrics::default()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Direct and role-derived grants of a principal.
    ///
    /// Direct grants come first. A permission reachable more than once is
    /// listed once, under the source scanned first. Ids that no longer
    /// resolve and inactive or missing roles are skipped.
    pub fn aggregated_permissions(&self, principal_id: &PrincipalId) -> Result<AggregatedPermissions> {
        let principal = self.load_principal(principal_id)?;
        self.aggregate(&principal)
    }

    /// Whether the principal holds `action` (or `manage`) on `resource_key`.
    pub fn can_perform(&self, principal_id: &PrincipalId, resource_key: &str, action: Action) -> bool {
        match self.effective_grants(principal_id) {
            Ok(grants) => {
                let allowed = grants.grants(resource_key, action);
                self.metrics.record(allowed);
                tracing::trace!(
                    principal = %principal_id,
                    resource_key,
                    action = %action,
                    allowed,
                    "authorization decision"
                );
                allowed
            }
            Err(e) => {
                self.fail_closed(principal_id, &e);
                false
            }
        }
    }

    /// True on the first satisfied action. An empty `actions` denies.
    pub fn can_perform_any(&self, principal_id: &PrincipalId, resource_key: &str, actions: &[Action]) -> bool {
        // TODO: aggregate once per call instead of once per action
        actions
            .iter()
            .any(|action| self.can_perform(principal_id, resource_key, *action))
    }

    /// False on the first unsatisfied action. An empty `actions` denies.
    pub fn can_perform_all(&self, principal_id: &PrincipalId, resource_key: &str, actions: &[Action]) -> bool {
        !actions.is_empty()
            && actions
                .iter()
                .all(|action| self.can_perform(principal_id, resource_key, *action))
    }

    /// Distinct resource keys the principal holds any grant on.
    ///
    /// Empty when aggregation fails.
    pub fn accessible_resources(&self, principal_id: &PrincipalId) -> BTreeSet<String> {
        match self.effective_grants(principal_id) {
            Ok(grants) => grants.resource_keys(),
            Err(e) => {
                self.fail_closed(principal_id, &e);
                BTreeSet::new()
            }
        }
    }

    fn load_principal(&self, principal_id: &PrincipalId) -> Result<Principal> {
        self.principals
            .principal(principal_id)?
            .ok_or_else(|| AuthzError::not_found("principal", principal_id))
    }

    /// Grants that count for decisions, honouring `deny_inactive_principals`.
    fn effective_grants(&self, principal_id: &PrincipalId) -> Result<AggregatedPermissions> {
        let principal = self.load_principal(principal_id)?;
        if !principal.is_active && self.config.deny_inactive_principals {
            tracing::debug!(principal = %principal_id, "inactive principal denied");
            return Ok(AggregatedPermissions::default());
        }
        self.aggregate(&principal)
    }

    fn aggregate(&self, principal: &Principal) -> Result<AggregatedPermissions> {
        let mut seen: AHashSet<PermissionId> = AHashSet::new();
        let mut aggregated = AggregatedPermissions::default();

        for id in &principal.direct_permissions {
            if let Some(permission) = self.resolve(principal, *id, &mut seen)? {
                aggregated.direct.push(permission);
            }
        }

        for role_id in &principal.group_ids {
            let Some(role) = self.roles.find_by_id(*role_id)? else {
                tracing::debug!(principal = %principal.id, role = %role_id, "skipping missing role");
                continue;
            };
            if !role.is_active {
                continue;
            }
            for id in &role.permission_ids {
                if let Some(permission) = self.resolve(principal, *id, &mut seen)? {
                    aggregated.role_derived.push(permission);
                }
            }
        }

        aggregated.all = aggregated
            .direct
            .iter()
            .chain(aggregated.role_derived.iter())
            .cloned()
            .collect();
        Ok(aggregated)
    }

    /// Resolve a permission id not seen before in this aggregation.
    fn resolve(
        &self,
        principal: &Principal,
        id: PermissionId,
        seen: &mut AHashSet<PermissionId>,
    ) -> Result<Option<Permission>> {
        if !seen.insert(id) {
            return Ok(None);
        }
        let permission = self.catalog.find_by_id(id)?;
        if permission.is_none() {
            tracing::debug!(principal = %principal.id, permission = %id, "skipping dangling permission id");
        }
        Ok(permission)
    }

    fn fail_closed(&self, principal_id: &PrincipalId, error: &AuthzError) {
        self.metrics.record_failure();
        tracing::warn!(principal = %principal_id, error = %error, "authorization failed closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principals::PrincipalDirectory;
    use crate::types::{ResourceType, RoleUpdate};
    use gatehouse_store::{KvStore, MemoryStore, StorageError};

    struct Fixture {
        catalog: PermissionCatalog,
        roles: RoleStore,
        directory: PrincipalDirectory,
        engine: AuthzEngine,
    }

    fn fixture_with(config: EngineConfig) -> Fixture {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let catalog = PermissionCatalog::new(Arc::clone(&kv));
        let roles = RoleStore::new(Arc::clone(&kv));
        let directory = PrincipalDirectory::new(Arc::clone(&kv));
        let engine = AuthzEngine::new(
            catalog.clone(),
            roles.clone(),
            Arc::new(directory.clone()),
            config,
        );
        Fixture {
            catalog,
            roles,
            directory,
            engine,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(EngineConfig::default())
    }

    struct BrokenProvider;

    impl PrincipalProvider for BrokenProvider {
        fn principal(&self, _id: &PrincipalId) -> Result<Option<Principal>> {
            Err(StorageError::Corrupt {
                key: "principal/u1".to_string(),
                reason: "truncated record".to_string(),
            }
            .into())
        }
    }

    #[test]
    fn test_deny_by_default() {
        let f = fixture();
        f.directory.upsert(&Principal::new("u0")).unwrap();
        let u0 = PrincipalId::from("u0");
        for action in Action::ALL {
            assert!(!f.engine.can_perform(&u0, "dashboard.users", action));
        }
        assert!(f.engine.accessible_resources(&u0).is_empty());
        assert!(f.engine.aggregated_permissions(&u0).unwrap().is_empty());
    }

    #[test]
    fn test_direct_exact_match() {
        let f = fixture();
        let read = f
            .catalog
            .create("courses", ResourceType::Page, Action::Read)
            .unwrap();
        f.directory
            .upsert(&Principal::new("u2").with_permissions([read.id]))
            .unwrap();
        let u2 = PrincipalId::from("u2");

        assert!(f.engine.can_perform(&u2, "courses", Action::Read));
        assert!(!f.engine.can_perform(&u2, "courses", Action::Write));
        assert!(!f.engine.can_perform(&u2, "courses.enrollments", Action::Read));
    }

    #[test]
    fn test_manage_is_wildcard_through_role() {
        let f = fixture();
        let manage = f
            .catalog
            .create("dashboard.users", ResourceType::Module, Action::Manage)
            .unwrap();
        let admin = f.roles.create("admin", None, vec![manage.id]).unwrap();
        f.directory
            .upsert(&Principal::new("u1").with_roles([admin.id]))
            .unwrap();
        let u1 = PrincipalId::from("u1");

        for action in Action::ALL {
            assert!(f.engine.can_perform(&u1, "dashboard.users", action), "{action}");
        }
        assert!(!f.engine.can_perform(&u1, "dashboard", Action::Read));
    }

    fn ids(permissions: &[Permission]) -> Vec<PermissionId> {
        permissions.iter().map(|p| p.id).collect()
    }

    #[test]
    fn test_aggregation_order_and_dedup() {
        let f = fixture();
        let a = f.catalog.create("a", ResourceType::Page, Action::Read).unwrap();
        let b = f.catalog.create("b", ResourceType::Page, Action::Read).unwrap();
        let c = f.catalog.create("c", ResourceType::Page, Action::Read).unwrap();
        let role = f.roles.create("mixed", None, vec![c.id, a.id, c.id]).unwrap();
        f.directory
            .upsert(
                &Principal::new("u")
                    .with_permissions([b.id, a.id, b.id])
                    .with_roles([role.id, role.id]),
            )
            .unwrap();

        let agg = f.engine.aggregated_permissions(&"u".into()).unwrap();
        assert_eq!(ids(&agg.direct), vec![b.id, a.id]);
        assert_eq!(ids(&agg.role_derived), vec![c.id]);
        assert_eq!(ids(&agg.all), vec![b.id, a.id, c.id]);
    }

    #[test]
    fn test_dangling_ids_and_missing_roles_are_skipped() {
        let f = fixture();
        let read = f.catalog.create("courses", ResourceType::Page, Action::Read).unwrap();
        let gone = f.catalog.create("gone", ResourceType::Page, Action::Read).unwrap();
        f.catalog.delete(gone.id).unwrap();
        f.directory
            .upsert(
                &Principal::new("u")
                    .with_permissions([PermissionId(999), gone.id, read.id])
                    .with_roles([crate::types::RoleId(42)]),
            )
            .unwrap();

        let agg = f.engine.aggregated_permissions(&"u".into()).unwrap();
        assert_eq!(agg.all.len(), 1);
        assert!(f.engine.can_perform(&"u".into(), "courses", Action::Read));
        assert_eq!(f.engine.metrics().failed_closed, 0);
    }

    #[test]
    fn test_inactive_role_contributes_nothing() {
        let f = fixture();
        let direct = f.catalog.create("attendance", ResourceType::Page, Action::Read).unwrap();
        let via_role = f.catalog.create("courses", ResourceType::Page, Action::Write).unwrap();
        let coach = f.roles.create("coach", None, vec![via_role.id]).unwrap();
        f.directory
            .upsert(
                &Principal::new("u")
                    .with_permissions([direct.id])
                    .with_roles([coach.id]),
            )
            .unwrap();
        let u = PrincipalId::from("u");
        assert!(f.engine.can_perform(&u, "courses", Action::Write));

        f.roles
            .update(coach.id, RoleUpdate::default().active(false))
            .unwrap();
        assert!(!f.engine.can_perform(&u, "courses", Action::Write));
        assert!(f.engine.can_perform(&u, "attendance", Action::Read));
        assert_eq!(
            f.engine.accessible_resources(&u),
            BTreeSet::from(["attendance".to_string()])
        );
    }

    #[test]
    fn test_missing_principal_fails_closed() {
        let f = fixture();
        let ghost = PrincipalId::from("ghost");
        assert!(f.engine.aggregated_permissions(&ghost).unwrap_err().is_not_found());
        assert!(!f.engine.can_perform(&ghost, "courses", Action::Read));
        assert!(f.engine.accessible_resources(&ghost).is_empty());
        assert_eq!(f.engine.metrics().failed_closed, 2);
    }

    #[test]
    fn test_storage_failure_fails_closed() {
        let f = fixture();
        let engine = AuthzEngine::new(
            f.catalog.clone(),
            f.roles.clone(),
            Arc::new(BrokenProvider),
            EngineConfig::default(),
        );
        let u1 = PrincipalId::from("u1");
        assert!(!engine.can_perform(&u1, "courses", Action::Manage));
        assert!(!engine.can_perform_any(&u1, "courses", &Action::ALL));
        assert_eq!(
            engine.metrics(),
            MetricsSnapshot {
                allowed: 0,
                denied: 0,
                failed_closed: 6,
            }
        );
    }

    #[test]
    fn test_any_and_all() {
        let f = fixture();
        let read = f.catalog.create("courses", ResourceType::Page, Action::Read).unwrap();
        let write = f.catalog.create("courses", ResourceType::Page, Action::Write).unwrap();
        f.directory
            .upsert(&Principal::new("u").with_permissions([read.id, write.id]))
            .unwrap();
        let u = PrincipalId::from("u");

        assert!(f.engine.can_perform_any(&u, "courses", &[Action::Delete, Action::Read]));
        assert!(!f.engine.can_perform_any(&u, "courses", &[Action::Delete, Action::Create]));
        assert!(f.engine.can_perform_all(&u, "courses", &[Action::Read, Action::Write]));
        assert!(!f.engine.can_perform_all(&u, "courses", &[Action::Read, Action::Delete]));
        assert!(!f.engine.can_perform_any(&u, "courses", &[]));
        assert!(!f.engine.can_perform_all(&u, "courses", &[]));
    }

    #[test]
    fn test_inactive_principal_policy() {
        for deny in [false, true] {
            let f = fixture_with(EngineConfig {
                deny_inactive_principals: deny,
            });
            let read = f.catalog.create("courses", ResourceType::Page, Action::Read).unwrap();
            f.directory
                .upsert(&Principal::new("u").with_permissions([read.id]).inactive())
                .unwrap();
            let u = PrincipalId::from("u");
            assert_eq!(f.engine.can_perform(&u, "courses", Action::Read), !deny);
            // Aggregation itself reports stored grants regardless of policy
            assert_eq!(f.engine.aggregated_permissions(&u).unwrap().all.len(), 1);
        }
    }

    #[test]
    fn test_metrics_count_decisions() {
        let f = fixture();
        let read = f.catalog.create("courses", ResourceType::Page, Action::Read).unwrap();
        f.directory
            .upsert(&Principal::new("u").with_permissions([read.id]))
            .unwrap();
        let u = PrincipalId::from("u");
        f.engine.can_perform(&u, "courses", Action::Read);
        f.engine.can_perform(&u, "courses", Action::Write);
        f.engine.can_perform(&u, "courses", Action::Delete);

        let snapshot = f.engine.metrics();
        assert_eq!(snapshot.allowed, 1);
        assert_eq!(snapshot.denied, 2);
        assert_eq!(snapshot.failed_closed, 0);
    }
}
