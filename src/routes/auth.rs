use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::cookie::CookieJar;
use serde::Serialize;
use sqlx::SqlitePool;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::access::{keys, AccessScope, Action, Entity, Permission};
use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity, log_activity_with_context, RequestContext};
use crate::models::session::SessionContext;
use crate::models::user::{
    DbUser, LoginRequest, MeResponse, OauthCallbackRequest, RegisterRequest, User,
};
use crate::session::CurrentUser;
use crate::utils::{hash_password, slugify, utc_now, verify_password};

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    message: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/oauth", post(oauth))
        .route("/me", get(me))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
}

/// Permissions granted to the default `member` role of a fresh
/// organization. The `owner` role receives the entire catalog.
const MEMBER_DEFAULTS: &[Permission] = &[
    keys::READ_OWN_USER,
    Permission::new(Action::Update, AccessScope::Own, Entity::User),
    Permission::new(Action::Create, AccessScope::Own, Entity::Avatar),
    Permission::new(Action::Read, AccessScope::Own, Entity::Avatar),
    Permission::new(Action::Update, AccessScope::Own, Entity::Avatar),
    Permission::new(Action::Delete, AccessScope::Own, Entity::Avatar),
    keys::READ_OWN_SESSION,
    keys::DELETE_OWN_SESSION,
    keys::READ_GRANTED_DASHBOARD,
];

#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "Auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered; session cookie set", body = User),
        (status = 409, description = "Email already in use")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, CookieJar, Json<User>)> {
    ensure_email_available(&state.pool, &payload.email).await?;

    let password_hash = hash_password(&payload.password)?;
    let now = utc_now();
    let user_id = Uuid::new_v4();

    let org_setup = match payload.organization.as_deref() {
        Some(name) => Some(create_organization_with_defaults(&state.pool, name, now).await?),
        None => None,
    };

    sqlx::query(
        "INSERT INTO users (id, organization_id, name, email, password_hash, provider, provider_id, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(user_id.to_string())
    .bind(org_setup.as_ref().map(|(org_id, _)| org_id.clone()))
    .bind(&payload.name)
    .bind(&payload.email)
    .bind(password_hash)
    .bind("local")
    .bind(Option::<String>::None)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    // The registering user owns the organization they created.
    if let Some((_, owner_role_id)) = &org_setup {
        sqlx::query("INSERT INTO user_roles (user_id, role_id, created_at) VALUES (?, ?, ?)")
            .bind(user_id.to_string())
            .bind(owner_role_id)
            .bind(now)
            .execute(&state.pool)
            .await?;
    }

    let db_user = fetch_user_by_id(&state.pool, user_id).await?;
    let user: User = db_user.try_into()?;

    log_activity(&state.event_bus, "registered", Some(user.id), &user);

    let meta = RequestContext::from_headers(&headers);
    let (jar, session) = state
        .sessions
        .create_session(jar, user.id, SessionContext::Signup, &meta, None, None)
        .await?;
    log_activity_with_context(&state.event_bus, "created", Some(user.id), &session, None, Some(meta));

    Ok((StatusCode::CREATED, jar, Json(user)))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful; session cookie set", body = User),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(CookieJar, Json<User>)> {
    let db_user = fetch_user_by_email(&state.pool, &payload.email)
        .await?
        .ok_or_else(|| AppError::unauthorized("invalid credentials"))?;

    let password_ok = verify_password(&payload.password, &db_user.password_hash)?;
    if !password_ok {
        return Err(AppError::unauthorized("invalid credentials"));
    }

    let user: User = db_user.try_into()?;

    let meta = RequestContext::from_headers(&headers);
    let (jar, session) = state
        .sessions
        .create_session(jar, user.id, SessionContext::Login, &meta, None, None)
        .await?;

    log_activity(&state.event_bus, "login", Some(user.id), &user);
    log_activity_with_context(&state.event_bus, "created", Some(user.id), &session, None, Some(meta));

    Ok((jar, Json(user)))
}

#[utoipa::path(
    post,
    path = "/auth/oauth",
    tag = "Auth",
    request_body = OauthCallbackRequest,
    responses(
        (status = 200, description = "Identity recorded; session cookie set", body = User)
    )
)]
pub async fn oauth(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    Json(payload): Json<OauthCallbackRequest>,
) -> AppResult<(CookieJar, Json<User>)> {
    let now = utc_now();

    let existing = sqlx::query_as::<_, DbUser>(
        "SELECT id, organization_id, name, email, password_hash, provider, provider_id, last_login_at, created_at, updated_at, deleted_at \
         FROM users WHERE provider = ? AND provider_id = ? AND deleted_at IS NULL",
    )
    .bind(&payload.provider)
    .bind(&payload.provider_id)
    .fetch_optional(&state.pool)
    .await?;

    let db_user = match existing {
        Some(user) => user,
        None => match fetch_user_by_email(&state.pool, &payload.email).await? {
            // Same mailbox, new provider: link the identity.
            Some(user) => {
                sqlx::query("UPDATE users SET provider = ?, provider_id = ?, updated_at = ? WHERE id = ?")
                    .bind(&payload.provider)
                    .bind(&payload.provider_id)
                    .bind(now)
                    .bind(&user.id)
                    .execute(&state.pool)
                    .await?;
                fetch_user_by_id(&state.pool, user.user_id()?).await?
            }
            None => {
                let user_id = Uuid::new_v4();
                // No password login for provider-created accounts; store an
                // unguessable hash.
                let placeholder = hash_password(&Uuid::new_v4().to_string())?;
                sqlx::query(
                    "INSERT INTO users (id, organization_id, name, email, password_hash, provider, provider_id, created_at, updated_at) \
                     VALUES (?, NULL, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(user_id.to_string())
                .bind(&payload.name)
                .bind(&payload.email)
                .bind(placeholder)
                .bind(&payload.provider)
                .bind(&payload.provider_id)
                .bind(now)
                .bind(now)
                .execute(&state.pool)
                .await?;

                let created = fetch_user_by_id(&state.pool, user_id).await?;
                let user: User = created.clone().try_into()?;
                log_activity(&state.event_bus, "registered", Some(user.id), &user);
                created
            }
        },
    };

    let user: User = db_user.try_into()?;

    let meta = RequestContext::from_headers(&headers);
    let (jar, session) = state
        .sessions
        .create_session(
            jar,
            user.id,
            SessionContext::Oauth,
            &meta,
            Some(serde_json::json!({ "provider": payload.provider })),
            None,
        )
        .await?;
    log_activity_with_context(&state.event_bus, "created", Some(user.id), &session, None, Some(meta));

    Ok((jar, Json(user)))
}

#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "Auth",
    responses((status = 200, description = "Current user with roles and permission keys", body = MeResponse))
)]
pub async fn me(State(state): State<AppState>, auth: CurrentUser) -> AppResult<Json<MeResponse>> {
    let db_user = fetch_user_by_id(&state.pool, auth.user_id).await?;
    let user: User = db_user.try_into()?;

    let resolver = state.gate.resolver();
    let roles = resolver.role_names(auth.user_id).await?;
    let mut permissions: Vec<String> = resolver
        .resolve(auth.user_id)
        .await?
        .iter()
        .map(|permission| permission.key())
        .collect();
    permissions.sort();

    Ok(Json(MeResponse { user, roles, permissions }))
}

#[utoipa::path(
    post,
    path = "/auth/refresh",
    tag = "Auth",
    responses((status = 200, description = "Session expiry extended when a valid session exists"))
)]
pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<MessageResponse>)> {
    let jar = state
        .sessions
        .renew_session(jar, state.sessions.default_expiry())
        .await?;

    Ok((jar, Json(MessageResponse { message: "session renewed".to_string() })))
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "Auth",
    responses((status = 200, description = "Session revoked and cookie cleared"))
)]
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<MessageResponse>)> {
    if let Some(session) = state.sessions.read_session(&jar).await? {
        log_activity(&state.event_bus, "revoked", Some(session.user_id), &session);
    }

    let jar = state.sessions.revoke_current(jar).await?;

    Ok((jar, Json(MessageResponse { message: "logged out".to_string() })))
}

/// Create an organization plus its default roles. Returns the
/// organization id and the owner role id, both as stored text.
async fn create_organization_with_defaults(
    pool: &SqlitePool,
    name: &str,
    now: chrono::DateTime<chrono::Utc>,
) -> AppResult<(String, String)> {
    let slug = slugify(name);
    if slug.is_empty() {
        return Err(AppError::bad_request("organization name must contain letters or digits"));
    }

    let taken: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM organizations WHERE slug = ?")
        .bind(&slug)
        .fetch_one(pool)
        .await?;
    if taken > 0 {
        return Err(AppError::conflict("organization name already in use"));
    }

    let org_id = Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO organizations (id, name, slug, created_at, updated_at) VALUES (?, ?, ?, ?, ?)")
        .bind(&org_id)
        .bind(name)
        .bind(&slug)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;

    let owner_role_id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO roles (id, organization_id, name, description, created_at, updated_at) \
         VALUES (?, ?, 'owner', 'Full access to the organization', ?, ?)",
    )
    .bind(&owner_role_id)
    .bind(&org_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    // Owner gets every cataloged permission.
    sqlx::query(
        "INSERT INTO role_permissions (role_id, permission_key, created_at) \
         SELECT ?, key, ? FROM permissions",
    )
    .bind(&owner_role_id)
    .bind(now)
    .execute(pool)
    .await?;

    let member_role_id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO roles (id, organization_id, name, description, created_at, updated_at) \
         VALUES (?, ?, 'member', 'Self-service access', ?, ?)",
    )
    .bind(&member_role_id)
    .bind(&org_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    for permission in MEMBER_DEFAULTS {
        sqlx::query(
            "INSERT INTO role_permissions (role_id, permission_key, created_at) VALUES (?, ?, ?)",
        )
        .bind(&member_role_id)
        .bind(permission.key())
        .bind(now)
        .execute(pool)
        .await?;
    }

    Ok((org_id, owner_role_id))
}

async fn ensure_email_available(pool: &SqlitePool, email: &str) -> AppResult<()> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE email = ? AND deleted_at IS NULL")
            .bind(email)
            .fetch_one(pool)
            .await?;

    if count > 0 {
        return Err(AppError::conflict("email already in use"));
    }

    Ok(())
}

async fn fetch_user_by_email(pool: &SqlitePool, email: &str) -> AppResult<Option<DbUser>> {
    Ok(sqlx::query_as::<_, DbUser>(
        "SELECT id, organization_id, name, email, password_hash, provider, provider_id, last_login_at, created_at, updated_at, deleted_at \
         FROM users WHERE email = ? AND deleted_at IS NULL",
    )
    .bind(email)
    .fetch_optional(pool)
    .await?)
}

pub(crate) async fn fetch_user_by_id(pool: &SqlitePool, user_id: Uuid) -> AppResult<DbUser> {
    sqlx::query_as::<_, DbUser>(
        "SELECT id, organization_id, name, email, password_hash, provider, provider_id, last_login_at, created_at, updated_at, deleted_at \
         FROM users WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(user_id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("user not found"))
}
