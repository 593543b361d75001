use std::collections::HashSet;

use serde::Serialize;
use sqlx::{Row, SqlitePool};
use utoipa::ToSchema;
use uuid::Uuid;

use super::Permission;
use crate::errors::AppResult;

/// Flattens a user's role assignments into their effective permission set.
#[derive(Clone)]
pub struct PermissionResolver {
    pool: SqlitePool,
}

/// One resolved permission together with the role that supplies it.
#[derive(Debug, Serialize, ToSchema)]
pub struct EffectivePermission {
    #[schema(example = "read:organization:organization")]
    pub key: String,
    pub role_name: String,
}

impl PermissionResolver {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Union of permissions across all of the user's roles. A user with no
    /// roles resolves to the empty set.
    pub async fn resolve(&self, user_id: Uuid) -> AppResult<HashSet<Permission>> {
        let rows = sqlx::query(
            "SELECT p.action, p.scope, p.entity \
             FROM user_roles ur \
             JOIN role_permissions rp ON rp.role_id = ur.role_id \
             JOIN permissions p ON p.key = rp.permission_key \
             WHERE ur.user_id = ?",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut permissions = HashSet::new();
        for row in &rows {
            let action: String = row.get("action");
            let scope: String = row.get("scope");
            let entity: String = row.get("entity");
            match Permission::from_columns(&action, &scope, &entity) {
                Some(permission) => {
                    permissions.insert(permission);
                }
                None => {
                    // Catalog invariant violated by a stale row; skip it.
                    tracing::warn!(
                        %user_id,
                        action,
                        scope,
                        entity,
                        "ignoring permission row outside the catalog"
                    );
                }
            }
        }

        Ok(permissions)
    }

    /// Names of the roles assigned to the user, ordered for stable output.
    pub async fn role_names(&self, user_id: Uuid) -> AppResult<Vec<String>> {
        let rows = sqlx::query(
            "SELECT r.name FROM user_roles ur \
             JOIN roles r ON r.id = ur.role_id \
             WHERE ur.user_id = ? ORDER BY r.name",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get("name")).collect())
    }

    /// Per-role breakdown used by the effective-permissions admin view.
    pub async fn effective(&self, user_id: Uuid) -> AppResult<Vec<EffectivePermission>> {
        let rows = sqlx::query(
            "SELECT rp.permission_key, r.name AS role_name \
             FROM user_roles ur \
             JOIN roles r ON r.id = ur.role_id \
             JOIN role_permissions rp ON rp.role_id = r.id \
             WHERE ur.user_id = ? \
             ORDER BY rp.permission_key, r.name",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| EffectivePermission {
                key: row.get("permission_key"),
                role_name: row.get("role_name"),
            })
            .collect())
    }
}
