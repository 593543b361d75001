use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::access::keys;
use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, RequestContext};
use crate::models::organization::{DbOrganization, Organization, OrganizationUpdateRequest};
use crate::models::user::User;
use crate::routes::auth::fetch_user_by_id;
use crate::session::CurrentUser;
use crate::utils::utc_now;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_organization).put(update_organization))
        .route("/members", get(list_members))
}

/// Get the caller's organization
#[utoipa::path(
    get,
    path = "/organization",
    tag = "Organization",
    responses(
        (status = 200, description = "Organization details", body = Organization),
        (status = 403, description = "Caller has no organization or lacks access"),
    )
)]
pub(crate) async fn get_organization(
    State(state): State<AppState>,
    auth: CurrentUser,
) -> AppResult<Json<Organization>> {
    state.gate.require(auth.user_id, &[keys::READ_ORG_ORGANIZATION]).await?;

    let org = fetch_caller_org(&state.pool, auth.user_id).await?;
    Ok(Json(org.try_into()?))
}

/// Rename the caller's organization
#[utoipa::path(
    put,
    path = "/organization",
    tag = "Organization",
    request_body = OrganizationUpdateRequest,
    responses((status = 200, description = "Organization updated", body = Organization))
)]
pub(crate) async fn update_organization(
    State(state): State<AppState>,
    auth: CurrentUser,
    headers: HeaderMap,
    Json(req): Json<OrganizationUpdateRequest>,
) -> AppResult<Json<Organization>> {
    state.gate.require(auth.user_id, &[keys::UPDATE_ORG_ORGANIZATION]).await?;

    let previous: Organization = fetch_caller_org(&state.pool, auth.user_id).await?.try_into()?;

    let now = utc_now();
    sqlx::query("UPDATE organizations SET name = ?, updated_at = ? WHERE id = ?")
        .bind(&req.name)
        .bind(now)
        .bind(previous.id.to_string())
        .execute(&state.pool)
        .await?;

    let updated = Organization {
        name: req.name,
        updated_at: now,
        ..previous.clone()
    };

    log_activity_with_context(
        &state.event_bus,
        "updated",
        Some(auth.user_id),
        &updated,
        Some(&previous),
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(updated))
}

/// List the organization's members
#[utoipa::path(
    get,
    path = "/organization/members",
    tag = "Organization",
    responses((status = 200, description = "Users in the caller's organization", body = Vec<User>))
)]
pub(crate) async fn list_members(
    State(state): State<AppState>,
    auth: CurrentUser,
) -> AppResult<Json<Vec<User>>> {
    state.gate.require(auth.user_id, &[keys::READ_ORG_USER]).await?;

    let caller = fetch_user_by_id(&state.pool, auth.user_id).await?;
    let org_id = caller
        .organization_id
        .ok_or_else(|| AppError::forbidden("caller has no organization"))?;

    let rows = sqlx::query_as::<_, crate::models::user::DbUser>(
        "SELECT id, organization_id, name, email, password_hash, provider, provider_id, last_login_at, created_at, updated_at, deleted_at \
         FROM users WHERE organization_id = ? AND deleted_at IS NULL ORDER BY name",
    )
    .bind(&org_id)
    .fetch_all(&state.pool)
    .await?;

    rows.into_iter()
        .map(|row| row.try_into())
        .collect::<Result<Vec<User>, _>>()
        .map(Json)
}

pub(crate) async fn fetch_caller_org(pool: &SqlitePool, user_id: Uuid) -> AppResult<DbOrganization> {
    let caller = fetch_user_by_id(pool, user_id).await?;
    let org_id = caller
        .organization_id
        .ok_or_else(|| AppError::forbidden("caller has no organization"))?;

    sqlx::query_as::<_, DbOrganization>(
        "SELECT id, name, slug, created_at, updated_at, deleted_at \
         FROM organizations WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(&org_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("organization not found"))
}
