//! RBAC admin endpoints: roles, role-permission assignment, and user-role
//! assignment, all scoped to the caller's organization.
//!
//! Every mutation is logged to the activity log with Critical severity.
//! Permission keys are validated against the compiled catalog; nothing
//! outside it can be assigned.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, get};
use axum::{Json, Router};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::access::{keys, CATALOG};
use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, RequestContext};
use crate::models::rbac::{
    AssignPermissionRequest, AssignRoleRequest, CatalogEntry, DbRole, EffectivePermissions, Role,
    RoleCreateRequest, RolePermission, UserRole,
};
use crate::routes::auth::fetch_user_by_id;
use crate::session::CurrentUser;
use crate::utils::utc_now;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/permissions", get(list_catalog))
        .route("/roles", get(list_roles).post(create_role))
        .route("/roles/:role_id", get(get_role).delete(delete_role))
        .route(
            "/roles/:role_id/permissions",
            get(get_role_permissions).post(assign_permission_to_role),
        )
        .route(
            "/roles/:role_id/permissions/:key",
            delete(remove_permission_from_role),
        )
        .route("/users/:user_id/roles", get(get_user_roles).post(assign_role_to_user))
        .route("/users/:user_id/roles/:role_id", delete(remove_role_from_user))
        .route("/users/:user_id/effective-permissions", get(get_effective_permissions))
}

// =============================================================================
// CATALOG
// =============================================================================

/// List the permission catalog
#[utoipa::path(
    get,
    path = "/rbac/permissions",
    tag = "RBAC",
    responses((status = 200, description = "The closed permission catalog", body = Vec<CatalogEntry>))
)]
pub(crate) async fn list_catalog(_auth: CurrentUser) -> Json<Vec<CatalogEntry>> {
    let entries = CATALOG
        .iter()
        .map(|permission| CatalogEntry {
            key: permission.key(),
            action: permission.action.as_str(),
            scope: permission.scope.as_str(),
            entity: permission.entity.as_str(),
        })
        .collect();

    Json(entries)
}

// =============================================================================
// ROLES
// =============================================================================

/// List the organization's roles
#[utoipa::path(
    get,
    path = "/rbac/roles",
    tag = "RBAC",
    responses((status = 200, description = "Roles in the caller's organization", body = Vec<Role>))
)]
pub(crate) async fn list_roles(State(state): State<AppState>, auth: CurrentUser) -> AppResult<Json<Vec<Role>>> {
    state.gate.require(auth.user_id, &[keys::READ_ORG_ROLE]).await?;
    let org_id = caller_org(&state.pool, auth.user_id).await?;

    let rows = sqlx::query_as::<_, DbRole>(
        "SELECT id, organization_id, name, description, created_at, updated_at \
         FROM roles WHERE organization_id = ? ORDER BY name",
    )
    .bind(&org_id)
    .fetch_all(&state.pool)
    .await?;

    rows.into_iter()
        .map(|row| row.try_into())
        .collect::<Result<Vec<Role>, _>>()
        .map(Json)
}

/// Create a role
#[utoipa::path(
    post,
    path = "/rbac/roles",
    tag = "RBAC",
    request_body = RoleCreateRequest,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 409, description = "Role name already exists"),
    )
)]
pub(crate) async fn create_role(
    State(state): State<AppState>,
    auth: CurrentUser,
    headers: HeaderMap,
    Json(req): Json<RoleCreateRequest>,
) -> AppResult<(StatusCode, Json<Role>)> {
    state.gate.require(auth.user_id, &[keys::CREATE_ORG_ROLE]).await?;
    let org_id = caller_org(&state.pool, auth.user_id).await?;

    let taken: i64 =
        sqlx::query_scalar("SELECT COUNT(1) FROM roles WHERE organization_id = ? AND name = ?")
            .bind(&org_id)
            .bind(&req.name)
            .fetch_one(&state.pool)
            .await?;
    if taken > 0 {
        return Err(AppError::conflict("role name already exists"));
    }

    let id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        "INSERT INTO roles (id, organization_id, name, description, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(&org_id)
    .bind(&req.name)
    .bind(&req.description)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let role = Role {
        id,
        organization_id: Uuid::parse_str(&org_id).map_err(|_| AppError::internal("corrupt organization id"))?,
        name: req.name,
        description: req.description,
        created_at: now,
        updated_at: now,
    };

    log_activity_with_context(
        &state.event_bus,
        "created",
        Some(auth.user_id),
        &role,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(role)))
}

/// Get a role by ID
#[utoipa::path(
    get,
    path = "/rbac/roles/{role_id}",
    tag = "RBAC",
    params(("role_id" = Uuid, Path, description = "Role ID")),
    responses(
        (status = 200, description = "Role details", body = Role),
        (status = 404, description = "Role not found"),
    )
)]
pub(crate) async fn get_role(
    State(state): State<AppState>,
    auth: CurrentUser,
    Path(role_id): Path<Uuid>,
) -> AppResult<Json<Role>> {
    state.gate.require(auth.user_id, &[keys::READ_ORG_ROLE]).await?;
    let org_id = caller_org(&state.pool, auth.user_id).await?;

    let role = fetch_role_in_org(&state.pool, role_id, &org_id).await?;
    Ok(Json(role.try_into()?))
}

/// Delete a role
#[utoipa::path(
    delete,
    path = "/rbac/roles/{role_id}",
    tag = "RBAC",
    params(("role_id" = Uuid, Path, description = "Role ID")),
    responses(
        (status = 204, description = "Role deleted"),
        (status = 404, description = "Role not found"),
    )
)]
pub(crate) async fn delete_role(
    State(state): State<AppState>,
    auth: CurrentUser,
    headers: HeaderMap,
    Path(role_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.gate.require(auth.user_id, &[keys::DELETE_ORG_ROLE]).await?;
    let org_id = caller_org(&state.pool, auth.user_id).await?;

    let role: Role = fetch_role_in_org(&state.pool, role_id, &org_id).await?.try_into()?;

    sqlx::query("DELETE FROM roles WHERE id = ?")
        .bind(role_id.to_string())
        .execute(&state.pool)
        .await?;

    log_activity_with_context(
        &state.event_bus,
        "deleted",
        Some(auth.user_id),
        &role,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// ROLE-PERMISSION ASSIGNMENT
// =============================================================================

/// List a role's permission keys
#[utoipa::path(
    get,
    path = "/rbac/roles/{role_id}/permissions",
    tag = "RBAC",
    params(("role_id" = Uuid, Path, description = "Role ID")),
    responses((status = 200, description = "Permission keys assigned to the role", body = Vec<String>))
)]
pub(crate) async fn get_role_permissions(
    State(state): State<AppState>,
    auth: CurrentUser,
    Path(role_id): Path<Uuid>,
) -> AppResult<Json<Vec<String>>> {
    state.gate.require(auth.user_id, &[keys::READ_ORG_ROLE]).await?;
    let org_id = caller_org(&state.pool, auth.user_id).await?;
    fetch_role_in_org(&state.pool, role_id, &org_id).await?;

    let permission_keys: Vec<String> = sqlx::query_scalar(
        "SELECT permission_key FROM role_permissions WHERE role_id = ? ORDER BY permission_key",
    )
    .bind(role_id.to_string())
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(permission_keys))
}

/// Assign a permission to a role
#[utoipa::path(
    post,
    path = "/rbac/roles/{role_id}/permissions",
    tag = "RBAC",
    params(("role_id" = Uuid, Path, description = "Role ID")),
    request_body = AssignPermissionRequest,
    responses(
        (status = 201, description = "Permission assigned", body = RolePermission),
        (status = 400, description = "Key not in the permission catalog"),
        (status = 404, description = "Role not found"),
    )
)]
pub(crate) async fn assign_permission_to_role(
    State(state): State<AppState>,
    auth: CurrentUser,
    headers: HeaderMap,
    Path(role_id): Path<Uuid>,
    Json(req): Json<AssignPermissionRequest>,
) -> AppResult<(StatusCode, Json<RolePermission>)> {
    state.gate.require(auth.user_id, &[keys::UPDATE_ORG_ROLE]).await?;
    let org_id = caller_org(&state.pool, auth.user_id).await?;
    fetch_role_in_org(&state.pool, role_id, &org_id).await?;

    // Keys are opaque atoms; membership in the catalog is the whole check.
    let cataloged = CATALOG.iter().any(|permission| permission.key() == req.key);
    if !cataloged {
        return Err(AppError::bad_request("unknown permission key"));
    }

    let now = utc_now();
    sqlx::query(
        "INSERT OR IGNORE INTO role_permissions (role_id, permission_key, created_at) VALUES (?, ?, ?)",
    )
    .bind(role_id.to_string())
    .bind(&req.key)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let assignment = RolePermission {
        role_id,
        permission_key: req.key,
        created_at: now,
    };

    log_activity_with_context(
        &state.event_bus,
        "created",
        Some(auth.user_id),
        &assignment,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(assignment)))
}

/// Remove a permission from a role
#[utoipa::path(
    delete,
    path = "/rbac/roles/{role_id}/permissions/{key}",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
        ("key" = String, Path, description = "Canonical permission key"),
    ),
    responses((status = 204, description = "Permission removed"))
)]
pub(crate) async fn remove_permission_from_role(
    State(state): State<AppState>,
    auth: CurrentUser,
    headers: HeaderMap,
    Path((role_id, key)): Path<(Uuid, String)>,
) -> AppResult<StatusCode> {
    state.gate.require(auth.user_id, &[keys::UPDATE_ORG_ROLE]).await?;
    let org_id = caller_org(&state.pool, auth.user_id).await?;
    fetch_role_in_org(&state.pool, role_id, &org_id).await?;

    sqlx::query("DELETE FROM role_permissions WHERE role_id = ? AND permission_key = ?")
        .bind(role_id.to_string())
        .bind(&key)
        .execute(&state.pool)
        .await?;

    let assignment = RolePermission {
        role_id,
        permission_key: key,
        created_at: utc_now(),
    };
    log_activity_with_context(
        &state.event_bus,
        "deleted",
        Some(auth.user_id),
        &assignment,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// USER-ROLE ASSIGNMENT
// =============================================================================

/// List a user's roles
#[utoipa::path(
    get,
    path = "/rbac/users/{user_id}/roles",
    tag = "RBAC",
    params(("user_id" = Uuid, Path, description = "User ID")),
    responses((status = 200, description = "Roles assigned to the user", body = Vec<Role>))
)]
pub(crate) async fn get_user_roles(
    State(state): State<AppState>,
    auth: CurrentUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<Vec<Role>>> {
    state.gate.require(auth.user_id, &[keys::READ_ORG_USER]).await?;
    let org_id = caller_org(&state.pool, auth.user_id).await?;
    ensure_user_in_org(&state.pool, user_id, &org_id).await?;

    let rows = sqlx::query_as::<_, DbRole>(
        "SELECT r.id, r.organization_id, r.name, r.description, r.created_at, r.updated_at \
         FROM user_roles ur JOIN roles r ON r.id = ur.role_id \
         WHERE ur.user_id = ? ORDER BY r.name",
    )
    .bind(user_id.to_string())
    .fetch_all(&state.pool)
    .await?;

    rows.into_iter()
        .map(|row| row.try_into())
        .collect::<Result<Vec<Role>, _>>()
        .map(Json)
}

/// Assign a role to a user
#[utoipa::path(
    post,
    path = "/rbac/users/{user_id}/roles",
    tag = "RBAC",
    params(("user_id" = Uuid, Path, description = "User ID")),
    request_body = AssignRoleRequest,
    responses(
        (status = 201, description = "Role assigned", body = UserRole),
        (status = 404, description = "User or role not found"),
    )
)]
pub(crate) async fn assign_role_to_user(
    State(state): State<AppState>,
    auth: CurrentUser,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
    Json(req): Json<AssignRoleRequest>,
) -> AppResult<(StatusCode, Json<UserRole>)> {
    state.gate.require(auth.user_id, &[keys::UPDATE_ORG_USER]).await?;
    let org_id = caller_org(&state.pool, auth.user_id).await?;
    ensure_user_in_org(&state.pool, user_id, &org_id).await?;
    fetch_role_in_org(&state.pool, req.role_id, &org_id).await?;

    let now = utc_now();
    sqlx::query("INSERT OR IGNORE INTO user_roles (user_id, role_id, created_at) VALUES (?, ?, ?)")
        .bind(user_id.to_string())
        .bind(req.role_id.to_string())
        .bind(now)
        .execute(&state.pool)
        .await?;

    let assignment = UserRole {
        user_id,
        role_id: req.role_id,
        created_at: now,
    };

    log_activity_with_context(
        &state.event_bus,
        "created",
        Some(auth.user_id),
        &assignment,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(assignment)))
}

/// Remove a role from a user
#[utoipa::path(
    delete,
    path = "/rbac/users/{user_id}/roles/{role_id}",
    tag = "RBAC",
    params(
        ("user_id" = Uuid, Path, description = "User ID"),
        ("role_id" = Uuid, Path, description = "Role ID"),
    ),
    responses((status = 204, description = "Role removed from user"))
)]
pub(crate) async fn remove_role_from_user(
    State(state): State<AppState>,
    auth: CurrentUser,
    headers: HeaderMap,
    Path((user_id, role_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    state.gate.require(auth.user_id, &[keys::UPDATE_ORG_USER]).await?;
    let org_id = caller_org(&state.pool, auth.user_id).await?;
    ensure_user_in_org(&state.pool, user_id, &org_id).await?;

    sqlx::query("DELETE FROM user_roles WHERE user_id = ? AND role_id = ?")
        .bind(user_id.to_string())
        .bind(role_id.to_string())
        .execute(&state.pool)
        .await?;

    let assignment = UserRole {
        user_id,
        role_id,
        created_at: utc_now(),
    };
    log_activity_with_context(
        &state.event_bus,
        "deleted",
        Some(auth.user_id),
        &assignment,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}

/// Computed effective permissions for a user
#[utoipa::path(
    get,
    path = "/rbac/users/{user_id}/effective-permissions",
    tag = "RBAC",
    params(("user_id" = Uuid, Path, description = "User ID")),
    responses((status = 200, description = "Union of permissions across the user's roles", body = EffectivePermissions))
)]
pub(crate) async fn get_effective_permissions(
    State(state): State<AppState>,
    auth: CurrentUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<EffectivePermissions>> {
    state.gate.require(auth.user_id, &[keys::READ_ORG_USER]).await?;
    let org_id = caller_org(&state.pool, auth.user_id).await?;
    ensure_user_in_org(&state.pool, user_id, &org_id).await?;

    let resolver = state.gate.resolver();
    let roles = resolver.role_names(user_id).await?;
    let permissions = resolver.effective(user_id).await?;

    Ok(Json(EffectivePermissions { user_id, roles, permissions }))
}

// =============================================================================
// HELPERS
// =============================================================================

/// The caller's organization id as stored text; RBAC administration is
/// meaningless without one.
pub(crate) async fn caller_org(pool: &SqlitePool, user_id: Uuid) -> AppResult<String> {
    fetch_user_by_id(pool, user_id)
        .await?
        .organization_id
        .ok_or_else(|| AppError::forbidden("caller has no organization"))
}

pub(crate) async fn fetch_role_in_org(pool: &SqlitePool, role_id: Uuid, org_id: &str) -> AppResult<DbRole> {
    sqlx::query_as::<_, DbRole>(
        "SELECT id, organization_id, name, description, created_at, updated_at \
         FROM roles WHERE id = ? AND organization_id = ?",
    )
    .bind(role_id.to_string())
    .bind(org_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("role not found"))
}

pub(crate) async fn ensure_user_in_org(pool: &SqlitePool, user_id: Uuid, org_id: &str) -> AppResult<()> {
    let user = fetch_user_by_id(pool, user_id).await?;
    if user.organization_id.as_deref() == Some(org_id) {
        Ok(())
    } else {
        Err(AppError::not_found("user not found"))
    }
}
