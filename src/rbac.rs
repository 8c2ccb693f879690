//! Scope/Role engine — tenant-scoped role resolution and the closed scope set.

use std::cmp::Ordering;
use std::collections::HashSet;

/// The closed set of permission strings. Nothing outside this list is a
/// valid scope; handlers must compare against these constants, never raw
/// strings, so a typo can't silently grant/deny access.
pub const ALL_SCOPES: &[&str] = &[
    "config:read",
    "config:write",
    "config:watch",
    "status:read",
    "status:write",
    "credential:read",
    "credential:write",
    "member:read",
    "member:write",
    "audit:read",
    "admin:users",
    "namespace:read",
    "namespace:write",
];

pub fn is_valid_scope(s: &str) -> bool {
    ALL_SCOPES.contains(&s)
}

/// `owner, editor, viewer`, ordered by priority for group-binding resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum Role {
    Owner,
    Editor,
    Viewer,
}

impl Role {
    pub fn priority(self) -> u8 {
        match self {
            Role::Owner => 3,
            Role::Editor => 2,
            Role::Viewer => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Editor => "editor",
            Role::Viewer => "viewer",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "owner" => Some(Role::Owner),
            "editor" => Some(Role::Editor),
            "viewer" => Some(Role::Viewer),
            _ => None,
        }
    }
}

impl PartialOrd for Role {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Role {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority().cmp(&other.priority())
    }
}

/// Maps a role to its granted scopes. `is_admin` callers bypass this
/// entirely and receive every scope in [`ALL_SCOPES`] — see
/// [`admin_scopes`].
pub fn role_to_scopes(role: Role) -> HashSet<String> {
    let base: &[&str] = match role {
        Role::Owner => &[
            "config:read",
            "config:write",
            "config:watch",
            "status:read",
            "status:write",
            "credential:read",
            "credential:write",
            "member:read",
            "member:write",
            "audit:read",
            "namespace:read",
            "namespace:write",
        ],
        Role::Editor => &[
            "config:read",
            "config:write",
            "status:read",
            "credential:read",
            "credential:write",
            "member:read",
            "member:write",
            "audit:read",
            "namespace:read",
        ],
        Role::Viewer => &[
            "config:read",
            "status:read",
            "credential:read",
            "member:read",
            "audit:read",
            "namespace:read",
        ],
    };
    base.iter().map(|s| s.to_string()).collect()
}

/// `is_admin=true` always yields the full scope set, regardless of role.
pub fn admin_scopes() -> HashSet<String> {
    ALL_SCOPES.iter().map(|s| s.to_string()).collect()
}

/// Effective role resolution (§4.2): the higher of direct membership and
/// the best group-binding role, by priority. Ties resolve to direct.
pub fn effective_role(direct: Option<Role>, group_roles: &[Role]) -> Option<Role> {
    let group_best = group_roles.iter().copied().max();
    match (direct, group_best) {
        (Some(d), Some(g)) => {
            if g > d {
                Some(g)
            } else {
                Some(d)
            }
        }
        (Some(d), None) => Some(d),
        (None, Some(g)) => Some(g),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_order() {
        assert!(Role::Owner > Role::Editor);
        assert!(Role::Editor > Role::Viewer);
    }

    #[test]
    fn effective_role_group_wins_when_higher() {
        let r = effective_role(Some(Role::Viewer), &[Role::Owner]);
        assert_eq!(r, Some(Role::Owner));
    }

    #[test]
    fn effective_role_tie_resolves_to_direct() {
        let r = effective_role(Some(Role::Editor), &[Role::Editor]);
        assert_eq!(r, Some(Role::Editor));
    }

    #[test]
    fn effective_role_direct_only() {
        assert_eq!(effective_role(Some(Role::Owner), &[]), Some(Role::Owner));
    }

    #[test]
    fn effective_role_group_only() {
        assert_eq!(effective_role(None, &[Role::Viewer]), Some(Role::Viewer));
    }

    #[test]
    fn effective_role_none() {
        assert_eq!(effective_role(None, &[]), None);
    }

    #[test]
    fn owner_scopes_include_write_and_watch() {
        let scopes = role_to_scopes(Role::Owner);
        assert!(scopes.contains("config:write"));
        assert!(scopes.contains("config:watch"));
        assert!(scopes.contains("namespace:write"));
    }

    #[test]
    fn viewer_scopes_are_read_only() {
        let scopes = role_to_scopes(Role::Viewer);
        assert!(scopes.contains("config:read"));
        assert!(!scopes.contains("config:write"));
        assert!(!scopes.contains("namespace:write"));
    }

    #[test]
    fn editor_cannot_write_namespace() {
        let scopes = role_to_scopes(Role::Editor);
        assert!(scopes.contains("config:write"));
        assert!(!scopes.contains("namespace:write"));
    }

    #[test]
    fn admin_scopes_cover_everything() {
        let scopes = admin_scopes();
        for s in ALL_SCOPES {
            assert!(scopes.contains(*s));
        }
    }
}
