//! Domain types: ids, actions, resources, permissions, roles and principals.
//!
//! Records are stored with bincode; the serde attributes only shape the JSON
//! the admin binary reads and prints.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AuthzError, Result};

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = AuthzError;

            fn from_str(s: &str) -> Result<Self> {
                s.trim().parse::<u64>().map($name).map_err(|_| {
                    AuthzError::InvalidArgument(format!(
                        "invalid {}: {s:?}",
                        stringify!($name)
                    ))
                })
            }
        }
    };
}

numeric_id!(
    /// Internal id of a registered resource.
    ResourceId
);
numeric_id!(
    /// Stable id of a `(resource, action)` grant.
    PermissionId
);
numeric_id!(
    /// Id of a role.
    RoleId
);

/// Identity of the actor being checked. Owned by the session layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(pub String);

impl PrincipalId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PrincipalId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PrincipalId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Operation kinds a principal may be granted on a resource.
///
/// `Manage` is the wildcard: it satisfies a check for any action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Write,
    Manage,
    Delete,
    Create,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::Read,
        Action::Write,
        Action::Manage,
        Action::Delete,
        Action::Create,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Manage => "manage",
            Self::Delete => "delete",
            Self::Create => "create",
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::Manage)
    }

    /// Whether holding `self` satisfies a check for `requested`.
    pub fn satisfies(&self, requested: Action) -> bool {
        *self == requested || self.is_wildcard()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "manage" => Ok(Self::Manage),
            "delete" => Ok(Self::Delete),
            "create" => Ok(Self::Create),
            _ => Err(AuthzError::InvalidArgument(format!("unknown action: {s:?}"))),
        }
    }
}

/// Kind of gate-able resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Page,
    Module,
    Entity,
    Action,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Module => "module",
            Self::Entity => "entity",
            Self::Action => "action",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "page" => Ok(Self::Page),
            "module" => Ok(Self::Module),
            "entity" => Ok(Self::Entity),
            "action" => Ok(Self::Action),
            _ => Err(AuthzError::InvalidArgument(format!(
                "unknown resource type: {s:?}"
            ))),
        }
    }
}

/// A registered, gate-able resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: ResourceId,
    pub key: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub display_name_key: String,
    pub default_actions: BTreeSet<Action>,
    /// Soft reference to another resource key; never checked.
    pub parent_key: Option<String>,
    pub created_at: u64,
}

/// Registration input for a resource. Deserializable from a JSON manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    pub key: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub display_name_key: String,
    #[serde(default)]
    pub default_actions: Vec<Action>,
    #[serde(default)]
    pub parent_key: Option<String>,
}

impl ResourceSpec {
    pub fn new(
        key: impl Into<String>,
        resource_type: ResourceType,
        display_name_key: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            resource_type,
            display_name_key: display_name_key.into(),
            default_actions: Vec::new(),
            parent_key: None,
        }
    }

    pub fn with_actions(mut self, actions: impl IntoIterator<Item = Action>) -> Self {
        self.default_actions = actions.into_iter().collect();
        self
    }

    pub fn with_parent(mut self, parent_key: impl Into<String>) -> Self {
        self.parent_key = Some(parent_key.into());
        self
    }
}

/// A concrete `(resource, action)` grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    pub id: PermissionId,
    pub resource_key: String,
    pub resource_type: ResourceType,
    pub action: Action,
    pub created_at: u64,
}

impl Permission {
    /// Whether this grant satisfies `action` on `resource_key`.
    pub fn grants(&self, resource_key: &str, action: Action) -> bool {
        self.resource_key == resource_key && self.action.satisfies(action)
    }
}

/// A named bundle of permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub description: Option<String>,
    pub permission_ids: Vec<PermissionId>,
    /// Inactive roles contribute nothing to aggregation.
    pub is_active: bool,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Partial update for a role. `None` fields are preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub permission_ids: Option<Vec<PermissionId>>,
    pub is_active: Option<bool>,
}

impl RoleUpdate {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn permissions(mut self, permission_ids: Vec<PermissionId>) -> Self {
        self.permission_ids = Some(permission_ids);
        self
    }

    pub fn active(mut self, is_active: bool) -> Self {
        self.is_active = Some(is_active);
        self
    }
}

/// Read-only view of an actor as the engine consumes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: PrincipalId,
    pub is_active: bool,
    pub group_ids: Vec<RoleId>,
    pub direct_permissions: Vec<PermissionId>,
}

impl Principal {
    /// An active principal with no grants.
    pub fn new(id: impl Into<PrincipalId>) -> Self {
        Self {
            id: id.into(),
            is_active: true,
            group_ids: Vec::new(),
            direct_permissions: Vec::new(),
        }
    }

    pub fn with_roles(mut self, role_ids: impl IntoIterator<Item = RoleId>) -> Self {
        self.group_ids = role_ids.into_iter().collect();
        self
    }

    pub fn with_permissions(mut self, permission_ids: impl IntoIterator<Item = PermissionId>) -> Self {
        self.direct_permissions = permission_ids.into_iter().collect();
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// A principal's effective grants, recomputed per decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedPermissions {
    pub direct: Vec<Permission>,
    pub role_derived: Vec<Permission>,
    /// `direct` followed by `role_derived`, each permission once.
    pub all: Vec<Permission>,
}

impl AggregatedPermissions {
    pub fn grants(&self, resource_key: &str, action: Action) -> bool {
        self.all.iter().any(|p| p.grants(resource_key, action))
    }

    /// Distinct resource keys across all grants.
    pub fn resource_keys(&self) -> BTreeSet<String> {
        self.all.iter().map(|p| p.resource_key.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }
}

/// Validate a hierarchical dot-path resource key such as `dashboard.users`.
pub fn validate_resource_key(key: &str) -> Result<()> {
    static PATTERN: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+(\.[A-Za-z0-9_-]+)*$"))
        .as_ref()
        .map_err(|e| AuthzError::InvalidArgument(format!("resource key pattern: {e}")))?;
    if pattern.is_match(key) {
        Ok(())
    } else {
        Err(AuthzError::InvalidArgument(format!(
            "invalid resource key: {key:?}"
        )))
    }
}

/// Trim a role name and reject empty names.
pub fn normalize_role_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AuthzError::InvalidArgument(
            "role name must not be empty".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_parse_and_display() {
        for action in Action::ALL {
            assert_eq!(action.as_str().parse::<Action>().unwrap(), action);
            assert_eq!(action.to_string(), action.as_str());
        }
        assert_eq!(" MANAGE ".parse::<Action>().unwrap(), Action::Manage);
        assert!("admin".parse::<Action>().is_err());
    }

    #[test]
    fn test_manage_satisfies_everything() {
        for requested in Action::ALL {
            assert!(Action::Manage.satisfies(requested));
        }
        assert!(Action::Read.satisfies(Action::Read));
        assert!(!Action::Read.satisfies(Action::Write));
        assert!(!Action::Write.satisfies(Action::Manage));
    }

    #[test]
    fn test_resource_key_validation() {
        assert!(validate_resource_key("dashboard").is_ok());
        assert!(validate_resource_key("dashboard.users").is_ok());
        assert!(validate_resource_key("player_profiles.stats-v2").is_ok());

        for bad in ["", ".", "dashboard.", ".users", "a..b", "a#b", "a/b", "a b"] {
            assert!(validate_resource_key(bad).is_err(), "{bad:?} accepted");
        }
    }

    #[test]
    fn test_role_name_normalization() {
        assert_eq!(normalize_role_name("  Coach ").unwrap(), "Coach");
        assert!(normalize_role_name("   ").is_err());
    }

    #[test]
    fn test_id_parsing() {
        assert_eq!("42".parse::<RoleId>().unwrap(), RoleId(42));
        assert_eq!(PermissionId(7).to_string(), "7");
        assert!("x".parse::<ResourceId>().is_err());
    }

    #[test]
    fn test_manifest_json_shape() {
        let json = r#"[
            {"key":"dashboard","type":"page","displayNameKey":"nav.dashboard"},
            {"key":"dashboard.users","type":"module","displayNameKey":"nav.users",
             "defaultActions":["read","write","manage"],"parentKey":"dashboard"}
        ]"#;
        let specs: Vec<ResourceSpec> = serde_json::from_str(json).unwrap();
        assert_eq!(specs.len(), 2);
        assert!(specs[0].default_actions.is_empty());
        assert_eq!(specs[1].resource_type, ResourceType::Module);
        assert_eq!(specs[1].parent_key.as_deref(), Some("dashboard"));
        assert_eq!(specs[1].default_actions[2], Action::Manage);
    }

    #[test]
    fn test_aggregated_grants() {
        let perm = |id, key: &str, action| Permission {
            id: PermissionId(id),
            resource_key: key.to_string(),
            resource_type: ResourceType::Module,
            action,
            created_at: 0,
        };
        let agg = AggregatedPermissions {
            direct: vec![perm(1, "a", Action::Read)],
            role_derived: vec![perm(2, "b", Action::Manage)],
            all: vec![perm(1, "a", Action::Read), perm(2, "b", Action::Manage)],
        };
        assert!(agg.grants("a", Action::Read));
        assert!(!agg.grants("a", Action::Delete));
        assert!(agg.grants("b", Action::Delete));
        assert!(!agg.grants("c", Action::Read));
        assert_eq!(
            agg.resource_keys().into_iter().collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }
}
