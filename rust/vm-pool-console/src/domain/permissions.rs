//! Roles, privileges and permission grants.
//!
//! A grant gives one user a [`Role`] over a pool. The grant applies to that
//! pool and to every pool below it in the tree, so the effective privileges
//! of a user on a pool are the union of the roles granted on the pool and
//! all of its ancestors.

use serde::{Deserialize, Serialize};

use super::pools::PoolId;

/// Database identifier of a permission grant.
pub type PermissionId = i64;

/// A single capability checked by the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privilege {
    /// Grant and revoke permissions.
    SetPerms,
    /// See who holds permissions.
    ViewPerms,
    /// Create, edit and delete pools.
    Modify,
    /// Start, stop and otherwise control VMs.
    VmControl,
    /// See the pool and its contents.
    View,
}

impl Privilege {
    const fn bit(self) -> u8 {
        match self {
            Self::SetPerms => 1,
            Self::ViewPerms => 1 << 1,
            Self::Modify => 1 << 2,
            Self::VmControl => 1 << 3,
            Self::View => 1 << 4,
        }
    }
}

/// Named bundle of privileges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "Super Admin")]
    SuperAdmin,
    #[serde(rename = "Administrator")]
    Administrator,
    #[serde(rename = "User")]
    User,
    #[serde(rename = "Monitor")]
    Monitor,
}

impl Role {
    /// Every role, strongest first.
    pub const ALL: [Self; 4] = [Self::SuperAdmin, Self::Administrator, Self::User, Self::Monitor];

    /// Role key as stored and displayed.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SuperAdmin => "Super Admin",
            Self::Administrator => "Administrator",
            Self::User => "User",
            Self::Monitor => "Monitor",
        }
    }

    /// Privileges carried by this role.
    pub fn privileges(self) -> &'static [Privilege] {
        use Privilege::{Modify, SetPerms, View, ViewPerms, VmControl};
        match self {
            Self::SuperAdmin => &[SetPerms, ViewPerms, Modify, VmControl, View],
            Self::Administrator => &[Modify, VmControl, View],
            Self::User => &[VmControl, View],
            Self::Monitor => &[View],
        }
    }

    /// Whether this role carries `privilege`.
    pub fn grants(self, privilege: Privilege) -> bool {
        self.privileges().contains(&privilege)
    }

    /// Keys of every role, for role pickers.
    pub fn keys() -> Vec<&'static str> {
        Self::ALL.iter().map(|r| r.as_str()).collect()
    }

    /// Roles that carry `privilege`.
    pub fn with_privilege(privilege: Privilege) -> Vec<Self> {
        Self::ALL.into_iter().filter(|r| r.grants(privilege)).collect()
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

/// Role key that is not one of [`Role::ALL`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown role '{0}'")]
pub struct UnknownRole(pub String);

/// A role granted to a user over a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    /// Login of the user holding the grant.
    pub uid: String,
    pub user_role: Role,
    pub pool_id: PoolId,
}

/// Effective privileges of one user on one pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrivilegeSet(u8);

impl PrivilegeSet {
    /// No privileges at all.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Union of the privileges of `roles`.
    pub fn from_roles(roles: impl IntoIterator<Item = Role>) -> Self {
        let mut set = Self::empty();
        for role in roles {
            for privilege in role.privileges() {
                set.0 |= privilege.bit();
            }
        }
        set
    }

    pub const fn has(self, privilege: Privilege) -> bool {
        self.0 & privilege.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Permission flags exposed to views.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolPermissions {
    pub can_view: bool,
    pub can_control_vms: bool,
    pub can_modify: bool,
    pub can_view_perms: bool,
    pub can_set_perms: bool,
}

impl From<PrivilegeSet> for PoolPermissions {
    fn from(set: PrivilegeSet) -> Self {
        Self {
            can_view: set.has(Privilege::View),
            can_control_vms: set.has(Privilege::VmControl),
            can_modify: set.has(Privilege::Modify),
            can_view_perms: set.has(Privilege::ViewPerms),
            can_set_perms: set.has(Privilege::SetPerms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_keys_order() {
        assert_eq!(Role::keys(), ["Super Admin", "Administrator", "User", "Monitor"]);
    }

    #[test]
    fn test_role_round_trip_through_key() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("Operator".parse::<Role>().is_err());
    }

    #[test]
    fn test_role_serde_uses_display_keys() {
        let json = serde_json::to_string(&Role::SuperAdmin).unwrap();
        assert_eq!(json, "\"Super Admin\"");
    }

    #[test]
    fn test_privilege_set_union() {
        let set = PrivilegeSet::from_roles([Role::Monitor, Role::User]);
        assert!(set.has(Privilege::View));
        assert!(set.has(Privilege::VmControl));
        assert!(!set.has(Privilege::Modify));
        assert!(PrivilegeSet::empty().is_empty());
    }

    #[test]
    fn test_pool_permissions_flags() {
        let flags = PoolPermissions::from(PrivilegeSet::from_roles([Role::Administrator]));
        assert!(flags.can_view && flags.can_control_vms && flags.can_modify);
        assert!(!flags.can_view_perms && !flags.can_set_perms);
    }

    #[test]
    fn test_with_privilege() {
        assert_eq!(Role::with_privilege(Privilege::Modify), [Role::SuperAdmin, Role::Administrator]);
        assert_eq!(Role::with_privilege(Privilege::View).len(), 4);
    }
}
