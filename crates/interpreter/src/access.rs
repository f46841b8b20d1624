//! Role-based access control
//!
//! Privileges are granted to roles, either globally or on one namespace.
//! Users hold roles. Two roles are special:
//!
//! - [`DEFAULT_ROLE`] is implicitly held by every user
//! - [`OWNER_ROLE`] holds every privilege everywhere
//!
//! A namespace-scoped grant only takes effect while the namespace is
//! registered. Registration is explicit: the interpreter registers
//! namespaces as it loads or deploys them and unregisters them on removal.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use nsql_core::Error;

/// Role every user holds
pub const DEFAULT_ROLE: &str = "default";

/// Role holding every privilege
pub const OWNER_ROLE: &str = "owner";

/// An operation that can be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privilege {
    /// Read tables
    Select,
    /// Insert rows
    Insert,
    /// Update rows
    Update,
    /// Delete rows
    Delete,
    /// Create objects
    Create,
    /// Drop objects
    Drop,
    /// Alter objects
    Alter,
    /// Call mutating actions
    Call,
    /// Manage roles and grants
    Roles,
    /// Attach extensions
    Use,
}

impl Privilege {
    /// Every privilege
    pub const ALL: [Privilege; 10] = [
        Privilege::Select,
        Privilege::Insert,
        Privilege::Update,
        Privilege::Delete,
        Privilege::Create,
        Privilege::Drop,
        Privilege::Alter,
        Privilege::Call,
        Privilege::Roles,
        Privilege::Use,
    ];

    /// Lower-case name
    pub fn name(&self) -> &'static str {
        match self {
            Privilege::Select => "select",
            Privilege::Insert => "insert",
            Privilege::Update => "update",
            Privilege::Delete => "delete",
            Privilege::Create => "create",
            Privilege::Drop => "drop",
            Privilege::Alter => "alter",
            Privilege::Call => "call",
            Privilege::Roles => "roles",
            Privilege::Use => "use",
        }
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Privilege {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Privilege::ALL
            .into_iter()
            .find(|p| p.name() == lowered)
            .ok_or_else(|| Error::invalid_input(format!("unknown privilege: {}", s)))
    }
}

#[derive(Debug, Clone, Default)]
struct RolePrivileges {
    global: HashSet<Privilege>,
    namespaced: HashMap<String, HashSet<Privilege>>,
}

/// Grants, role memberships and the set of registered namespaces.
#[derive(Debug, Clone, Default)]
pub struct AccessController {
    roles: HashMap<String, RolePrivileges>,
    user_roles: HashMap<String, BTreeSet<String>>,
    namespaces: HashSet<String>,
}

impl AccessController {
    /// Empty controller: no grants, no registered namespaces.
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant `privilege` to `role`, globally or on one namespace.
    pub fn grant(&mut self, role: &str, namespace: Option<&str>, privilege: Privilege) {
        let entry = self.roles.entry(role.to_lowercase()).or_default();
        match namespace {
            None => {
                entry.global.insert(privilege);
            }
            Some(ns) => {
                entry
                    .namespaced
                    .entry(ns.to_lowercase())
                    .or_default()
                    .insert(privilege);
            }
        }
    }

    /// Revoke a grant made with [`grant`](Self::grant). Returns whether it
    /// existed.
    pub fn revoke(&mut self, role: &str, namespace: Option<&str>, privilege: Privilege) -> bool {
        let Some(entry) = self.roles.get_mut(&role.to_lowercase()) else {
            return false;
        };
        match namespace {
            None => entry.global.remove(&privilege),
            Some(ns) => entry
                .namespaced
                .get_mut(&ns.to_lowercase())
                .is_some_and(|set| set.remove(&privilege)),
        }
    }

    /// Give `user` the role `role`.
    pub fn assign_role(&mut self, user: &str, role: &str) {
        self.user_roles
            .entry(user.to_string())
            .or_default()
            .insert(role.to_lowercase());
    }

    /// Make namespace-scoped grants on `namespace` effective.
    pub fn register_namespace(&mut self, namespace: &str) {
        self.namespaces.insert(namespace.to_lowercase());
    }

    /// Forget `namespace` and every grant scoped to it.
    pub fn unregister_namespace(&mut self, namespace: &str) {
        let namespace = namespace.to_lowercase();
        self.namespaces.remove(&namespace);
        for role in self.roles.values_mut() {
            role.namespaced.remove(&namespace);
        }
    }

    /// Whether `namespace` is registered.
    pub fn is_registered(&self, namespace: &str) -> bool {
        self.namespaces.contains(&namespace.to_lowercase())
    }

    /// Whether `user` holds the owner role.
    pub fn is_owner(&self, user: &str) -> bool {
        self.user_roles
            .get(user)
            .is_some_and(|roles| roles.contains(OWNER_ROLE))
    }

    /// Roles held by `user`, the default role included.
    pub fn roles_of(&self, user: &str) -> Vec<String> {
        let mut roles = vec![DEFAULT_ROLE.to_string()];
        if let Some(held) = self.user_roles.get(user) {
            roles.extend(held.iter().filter(|r| *r != DEFAULT_ROLE).cloned());
        }
        roles
    }

    /// Whether `user` may perform `privilege`, globally (`namespace` None)
    /// or within `namespace`.
    pub fn has_privilege(&self, user: &str, namespace: Option<&str>, privilege: Privilege) -> bool {
        if self.is_owner(user) {
            return true;
        }

        let namespace = namespace
            .map(str::to_lowercase)
            .filter(|ns| self.namespaces.contains(ns));

        self.roles_of(user).iter().any(|role| {
            let Some(grants) = self.roles.get(role) else {
                return false;
            };
            if grants.global.contains(&privilege) {
                return true;
            }
            namespace.as_ref().is_some_and(|ns| {
                grants
                    .namespaced
                    .get(ns)
                    .is_some_and(|set| set.contains(&privilege))
            })
        })
    }
}
