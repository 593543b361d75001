use std::collections::HashSet;

use uuid::Uuid;

use super::{Permission, PermissionResolver, ROUTE_TABLE};
use crate::errors::{AppError, AppResult};

/// Outcome of an authorization check. Denial carries no resolved data so a
/// rejected caller learns nothing about the protected surface.
#[derive(Debug)]
pub enum AccessDecision {
    Granted {
        user_id: Uuid,
        permissions: HashSet<Permission>,
    },
    Denied,
}

impl AccessDecision {
    pub fn granted(&self) -> bool {
        matches!(self, AccessDecision::Granted { .. })
    }
}

/// Per-request permission gate over the resolver. Action gating is logical
/// AND across the required keys; route filtering is logical OR per row.
#[derive(Clone)]
pub struct AccessGate {
    resolver: PermissionResolver,
}

impl AccessGate {
    pub fn new(resolver: PermissionResolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &PermissionResolver {
        &self.resolver
    }

    pub async fn authorize(&self, user_id: Uuid, required: &[Permission]) -> AppResult<AccessDecision> {
        let permissions = self.resolver.resolve(user_id).await?;
        if satisfies_all(&permissions, required) {
            Ok(AccessDecision::Granted { user_id, permissions })
        } else {
            tracing::debug!(%user_id, ?required, "permission denied");
            Ok(AccessDecision::Denied)
        }
    }

    /// Handler-side helper: denial becomes the Forbidden error kind.
    pub async fn require(&self, user_id: Uuid, required: &[Permission]) -> AppResult<HashSet<Permission>> {
        match self.authorize(user_id, required).await? {
            AccessDecision::Granted { permissions, .. } => Ok(permissions),
            AccessDecision::Denied => Err(AppError::forbidden("insufficient permissions")),
        }
    }

    /// Routes from the static table the user can navigate to.
    pub async fn navigable_routes(&self, user_id: Uuid) -> AppResult<Vec<&'static str>> {
        let permissions = self.resolver.resolve(user_id).await?;
        Ok(ROUTE_TABLE
            .iter()
            .filter(|row| satisfies_any(&permissions, row.any_of))
            .map(|row| row.route)
            .collect())
    }
}

fn satisfies_all(resolved: &HashSet<Permission>, required: &[Permission]) -> bool {
    required.iter().all(|permission| resolved.contains(permission))
}

fn satisfies_any(resolved: &HashSet<Permission>, any_of: &[Permission]) -> bool {
    any_of.iter().any(|permission| resolved.contains(permission))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::keys;

    fn resolved(perms: &[Permission]) -> HashSet<Permission> {
        perms.iter().copied().collect()
    }

    #[test]
    fn all_required_keys_must_be_present() {
        let set = resolved(&[keys::READ_ORG_ROLE, keys::UPDATE_ORG_ROLE]);
        assert!(satisfies_all(&set, &[keys::READ_ORG_ROLE, keys::UPDATE_ORG_ROLE]));
        assert!(!satisfies_all(&set, &[keys::READ_ORG_ROLE, keys::DELETE_ORG_ROLE]));
    }

    #[test]
    fn empty_requirement_always_satisfied() {
        assert!(satisfies_all(&resolved(&[]), &[]));
    }

    #[test]
    fn any_single_match_unlocks_a_route() {
        let set = resolved(&[keys::UPDATE_ORG_ORGANIZATION]);
        assert!(satisfies_any(
            &set,
            &[keys::READ_ORG_ORGANIZATION, keys::UPDATE_ORG_ORGANIZATION]
        ));
        assert!(!satisfies_any(&set, &[keys::READ_GRANTED_DASHBOARD]));
    }

    #[test]
    fn empty_resolved_set_unlocks_nothing() {
        let set = resolved(&[]);
        for row in ROUTE_TABLE {
            assert!(!satisfies_any(&set, row.any_of));
        }
    }
}
