//! Session management endpoints: listing devices, revoking by id, and
//! bulk "sign out other devices".

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use axum_extra::extract::cookie::CookieJar;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::access::keys;
use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, RequestContext};
use crate::models::session::{RevokeResponse, Session};
use crate::routes::auth::fetch_user_by_id;
use crate::session::CurrentUser;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_sessions))
        .route("/revoke-others", post(revoke_others))
        .route("/:session_id", delete(revoke_session))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RevokedCountResponse {
    pub revoked_count: u64,
}

/// List the caller's active sessions
#[utoipa::path(
    get,
    path = "/sessions",
    tag = "Sessions",
    responses((status = 200, description = "Active sessions, newest first", body = Vec<Session>))
)]
pub(crate) async fn list_sessions(
    State(state): State<AppState>,
    auth: CurrentUser,
) -> AppResult<Json<Vec<Session>>> {
    state.gate.require(auth.user_id, &[keys::READ_OWN_SESSION]).await?;

    let sessions = state.sessions.store().list_for_user(auth.user_id).await?;
    Ok(Json(sessions))
}

/// Revoke a session by id
///
/// Callers may always revoke their own sessions. Revoking another user's
/// session requires `delete:organization:session` and a shared
/// organization. The response signals logout when the caller revoked the
/// session behind their own request.
#[utoipa::path(
    delete,
    path = "/sessions/{session_id}",
    tag = "Sessions",
    params(("session_id" = Uuid, Path, description = "Session ID")),
    responses(
        (status = 200, description = "Session revoked", body = RevokeResponse),
        (status = 404, description = "Session not found"),
    )
)]
pub(crate) async fn revoke_session(
    State(state): State<AppState>,
    auth: CurrentUser,
    jar: CookieJar,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
) -> AppResult<(CookieJar, Json<RevokeResponse>)> {
    let target = state
        .sessions
        .store()
        .find_by_id(session_id)
        .await?
        .ok_or_else(|| AppError::not_found("session not found"))?;

    if target.user_id != auth.user_id {
        state.gate.require(auth.user_id, &[keys::DELETE_ORG_SESSION]).await?;
        ensure_same_organization(&state, auth.user_id, target.user_id).await?;
    }

    let (jar, outcome) = state.sessions.revoke_session(jar, session_id).await?;

    log_activity_with_context(
        &state.event_bus,
        "revoked",
        Some(auth.user_id),
        &target,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((jar, Json(RevokeResponse { revoked: true, logout: outcome.logout })))
}

/// Sign out every other device
#[utoipa::path(
    post,
    path = "/sessions/revoke-others",
    tag = "Sessions",
    responses((status = 200, description = "Other sessions revoked", body = RevokedCountResponse))
)]
pub(crate) async fn revoke_others(
    State(state): State<AppState>,
    auth: CurrentUser,
    jar: CookieJar,
) -> AppResult<Json<RevokedCountResponse>> {
    state.gate.require(auth.user_id, &[keys::DELETE_OWN_SESSION]).await?;

    let revoked_count = state.sessions.revoke_other_sessions(&jar, auth.user_id).await?;
    Ok(Json(RevokedCountResponse { revoked_count }))
}

pub(crate) async fn ensure_same_organization(state: &AppState, caller: Uuid, target: Uuid) -> AppResult<()> {
    let caller_org = fetch_user_by_id(&state.pool, caller).await?.org_id()?;
    let target_org = fetch_user_by_id(&state.pool, target).await?.org_id()?;

    match (caller_org, target_org) {
        (Some(a), Some(b)) if a == b => Ok(()),
        _ => Err(AppError::forbidden("session belongs to another organization")),
    }
}
