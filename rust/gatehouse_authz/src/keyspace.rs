//! Key layout of the single ordered keyspace.
//!
//! | Key | Value |
//! |---|---|
//! | `resource/{id:020}` | Resource |
//! | `resource_key/{key}` | primary key of the resource |
//! | `permission/{id:020}` | Permission |
//! | `permission_pair/{resource_key}#{action}` | primary key of the permission |
//! | `role/{id:020}` | Role |
//! | `role_name/{lowercase name}` | primary key of the role |
//! | `principal/{id}` | Principal |
//!
//! Ids are zero-padded so key order equals allocation order. Resource keys
//! never contain `#` (see [`crate::types::validate_resource_key`]), which
//! keeps the pair-index prefix of one resource disjoint from another's.

use crate::types::{Action, PermissionId, PrincipalId, ResourceId, RoleId};

pub const RESOURCE_PREFIX: &str = "resource/";
pub const PERMISSION_PREFIX: &str = "permission/";
pub const ROLE_PREFIX: &str = "role/";
pub const PRINCIPAL_PREFIX: &str = "principal/";

pub const RESOURCE_SEQUENCE: &str = "resource";
pub const PERMISSION_SEQUENCE: &str = "permission";
pub const ROLE_SEQUENCE: &str = "role";

pub fn resource(id: ResourceId) -> String {
    format!("{RESOURCE_PREFIX}{:020}", id.0)
}

pub fn resource_by_key(key: &str) -> String {
    format!("resource_key/{key}")
}

pub fn permission(id: PermissionId) -> String {
    format!("{PERMISSION_PREFIX}{:020}", id.0)
}

pub fn permission_pair(resource_key: &str, action: Action) -> String {
    format!("{}{}", permission_pairs_of(resource_key), action.as_str())
}

/// Prefix of every pair-index entry of one resource.
pub fn permission_pairs_of(resource_key: &str) -> String {
    format!("permission_pair/{resource_key}#")
}

pub fn role(id: RoleId) -> String {
    format!("{ROLE_PREFIX}{:020}", id.0)
}

/// Case-insensitive name index entry.
pub fn role_by_name(name: &str) -> String {
    format!("role_name/{}", name.trim().to_lowercase())
}

pub fn principal(id: &PrincipalId) -> String {
    format!("{PRINCIPAL_PREFIX}{}", id.as_str())
}
