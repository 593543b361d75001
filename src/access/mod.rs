//! Attribute-based access control: the permission catalog, the canonical
//! key codec, and the static route permission table.
//!
//! Permission tuples are a closed enumeration compiled into the binary.
//! The database `permissions` table mirrors [`CATALOG`]; anything outside
//! it is rejected at the boundary where it appears.

mod gate;
mod resolver;

pub use gate::{AccessDecision, AccessGate};
pub use resolver::{EffectivePermission, PermissionResolver};

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
}

impl Action {
    pub const fn as_str(self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "create" => Some(Action::Create),
            "read" => Some(Action::Read),
            "update" => Some(Action::Update),
            "delete" => Some(Action::Delete),
            _ => None,
        }
    }
}

/// Breadth of a permission: the caller's own records, any record in the
/// caller's organization, or a binary grant (e.g. dashboard visibility).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessScope {
    Own,
    Organization,
    Granted,
}

impl AccessScope {
    pub const fn as_str(self) -> &'static str {
        match self {
            AccessScope::Own => "own",
            AccessScope::Organization => "organization",
            AccessScope::Granted => "granted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "own" => Some(AccessScope::Own),
            "organization" => Some(AccessScope::Organization),
            "granted" => Some(AccessScope::Granted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Entity {
    User,
    Organization,
    Avatar,
    Role,
    Session,
    Dashboard,
}

impl Entity {
    pub const fn as_str(self) -> &'static str {
        match self {
            Entity::User => "user",
            Entity::Organization => "organization",
            Entity::Avatar => "avatar",
            Entity::Role => "role",
            Entity::Session => "session",
            Entity::Dashboard => "dashboard",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Entity::User),
            "organization" => Some(Entity::Organization),
            "avatar" => Some(Entity::Avatar),
            "role" => Some(Entity::Role),
            "session" => Some(Entity::Session),
            "dashboard" => Some(Entity::Dashboard),
            _ => None,
        }
    }
}

/// One permission tuple. The canonical key string is a derived projection;
/// keys are compared as opaque atoms and never parsed back into tuples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    pub action: Action,
    pub scope: AccessScope,
    pub entity: Entity,
}

impl Permission {
    pub const fn new(action: Action, scope: AccessScope, entity: Entity) -> Self {
        Self { action, scope, entity }
    }

    /// Canonical key, `action:scope:entity`.
    pub fn key(&self) -> String {
        self.to_string()
    }

    pub fn in_catalog(&self) -> bool {
        CATALOG.contains(self)
    }

    /// Rebuild a tuple from its database columns, validating against the
    /// catalog. Returns `None` for unknown values or uncataloged tuples.
    pub fn from_columns(action: &str, scope: &str, entity: &str) -> Option<Self> {
        let permission = Permission::new(
            Action::parse(action)?,
            AccessScope::parse(scope)?,
            Entity::parse(entity)?,
        );
        permission.in_catalog().then_some(permission)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.action.as_str(),
            self.scope.as_str(),
            self.entity.as_str()
        )
    }
}

/// Every valid permission tuple. Single source of truth; the database
/// table is seeded from this list and reconciled by `cli sync-catalog`.
pub const CATALOG: &[Permission] = &[
    Permission::new(Action::Read, AccessScope::Own, Entity::User),
    Permission::new(Action::Update, AccessScope::Own, Entity::User),
    Permission::new(Action::Delete, AccessScope::Own, Entity::User),
    Permission::new(Action::Create, AccessScope::Organization, Entity::User),
    Permission::new(Action::Read, AccessScope::Organization, Entity::User),
    Permission::new(Action::Update, AccessScope::Organization, Entity::User),
    Permission::new(Action::Delete, AccessScope::Organization, Entity::User),
    Permission::new(Action::Read, AccessScope::Organization, Entity::Organization),
    Permission::new(Action::Update, AccessScope::Organization, Entity::Organization),
    Permission::new(Action::Delete, AccessScope::Organization, Entity::Organization),
    Permission::new(Action::Create, AccessScope::Own, Entity::Avatar),
    Permission::new(Action::Read, AccessScope::Own, Entity::Avatar),
    Permission::new(Action::Update, AccessScope::Own, Entity::Avatar),
    Permission::new(Action::Delete, AccessScope::Own, Entity::Avatar),
    Permission::new(Action::Create, AccessScope::Organization, Entity::Role),
    Permission::new(Action::Read, AccessScope::Organization, Entity::Role),
    Permission::new(Action::Update, AccessScope::Organization, Entity::Role),
    Permission::new(Action::Delete, AccessScope::Organization, Entity::Role),
    Permission::new(Action::Read, AccessScope::Own, Entity::Session),
    Permission::new(Action::Delete, AccessScope::Own, Entity::Session),
    Permission::new(Action::Read, AccessScope::Organization, Entity::Session),
    Permission::new(Action::Delete, AccessScope::Organization, Entity::Session),
    Permission::new(Action::Read, AccessScope::Granted, Entity::Dashboard),
];

/// Well-known permissions referenced by handlers and the route table.
pub mod keys {
    use super::{AccessScope, Action, Entity, Permission};

    pub const READ_OWN_USER: Permission =
        Permission::new(Action::Read, AccessScope::Own, Entity::User);
    pub const READ_ORG_USER: Permission =
        Permission::new(Action::Read, AccessScope::Organization, Entity::User);
    pub const UPDATE_ORG_USER: Permission =
        Permission::new(Action::Update, AccessScope::Organization, Entity::User);
    pub const READ_ORG_ORGANIZATION: Permission =
        Permission::new(Action::Read, AccessScope::Organization, Entity::Organization);
    pub const UPDATE_ORG_ORGANIZATION: Permission =
        Permission::new(Action::Update, AccessScope::Organization, Entity::Organization);
    pub const CREATE_ORG_ROLE: Permission =
        Permission::new(Action::Create, AccessScope::Organization, Entity::Role);
    pub const READ_ORG_ROLE: Permission =
        Permission::new(Action::Read, AccessScope::Organization, Entity::Role);
    pub const UPDATE_ORG_ROLE: Permission =
        Permission::new(Action::Update, AccessScope::Organization, Entity::Role);
    pub const DELETE_ORG_ROLE: Permission =
        Permission::new(Action::Delete, AccessScope::Organization, Entity::Role);
    pub const READ_OWN_SESSION: Permission =
        Permission::new(Action::Read, AccessScope::Own, Entity::Session);
    pub const DELETE_OWN_SESSION: Permission =
        Permission::new(Action::Delete, AccessScope::Own, Entity::Session);
    pub const DELETE_ORG_SESSION: Permission =
        Permission::new(Action::Delete, AccessScope::Organization, Entity::Session);
    pub const READ_GRANTED_DASHBOARD: Permission =
        Permission::new(Action::Read, AccessScope::Granted, Entity::Dashboard);
}

/// One row of the route permission table: holding any listed permission
/// makes the route navigable.
#[derive(Debug, Clone, Copy)]
pub struct RouteAccess {
    pub route: &'static str,
    pub any_of: &'static [Permission],
}

/// Deployment-time artifact mapping navigable routes to the permissions
/// that unlock them.
pub const ROUTE_TABLE: &[RouteAccess] = &[
    RouteAccess {
        route: "/dashboard",
        any_of: &[keys::READ_GRANTED_DASHBOARD],
    },
    RouteAccess {
        route: "/account",
        any_of: &[keys::READ_OWN_USER],
    },
    RouteAccess {
        route: "/organization",
        any_of: &[keys::READ_ORG_ORGANIZATION, keys::UPDATE_ORG_ORGANIZATION],
    },
    RouteAccess {
        route: "/organization/members",
        any_of: &[keys::READ_ORG_USER],
    },
    RouteAccess {
        route: "/organization/roles",
        any_of: &[keys::READ_ORG_ROLE],
    },
    RouteAccess {
        route: "/sessions",
        any_of: &[keys::READ_OWN_SESSION],
    },
];
