use anyhow::Context;
use anyhow::Result;
use axum::body::{self, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::util::ServiceExt;

use opshub::create_app;

async fn setup() -> Result<(TempDir, SqlitePool, Router)> {
    let dir = tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test_rbac.db");
    use sqlx::sqlite::SqliteConnectOptions;
    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    )
    .await?;
    migrator.run(&pool).await?;

    std::env::set_var("SESSION_SECRET", "test-secret");
    let app = create_app(pool.clone()).await?;

    Ok((dir, pool, app))
}

/// Fire one request; returns status, parsed JSON body (Null when empty)
/// and the session cookie if one was set.
async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    cookie: Option<&str>,
    payload: Option<Value>,
) -> Result<(StatusCode, Value, Option<String>)> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    let request = match payload {
        Some(payload) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload.to_string()))?,
        None => builder.body(Body::empty())?,
    };

    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let set_cookie = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| value.starts_with("opshub_session="))
        .map(|value| value.split(';').next().unwrap_or(value).to_string());

    let bytes = body::to_bytes(response.into_body(), 10_485_760).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };

    Ok((status, body, set_cookie))
}

async fn register(
    app: &Router,
    name: &str,
    email: &str,
    organization: Option<&str>,
) -> Result<(String, Value)> {
    let mut payload = json!({
        "name": name,
        "email": email,
        "password": "password123"
    });
    if let Some(org) = organization {
        payload["organization"] = json!(org);
    }

    let (status, body, cookie) = send(app, "POST", "/auth/register", None, Some(payload)).await?;
    assert_eq!(status, StatusCode::CREATED, "register failed: {body}");
    Ok((cookie.context("register must set a session cookie")?, body))
}

fn route_set(body: &Value) -> Vec<String> {
    body.get("routes")
        .and_then(|v| v.as_array())
        .map(|routes| {
            routes
                .iter()
                .filter_map(|r| r.as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn rbac_administration_and_navigation() -> Result<()> {
    let (_dir, pool, app) = setup().await?;

    let (owner_cookie, owner) = register(&app, "Owner", "owner@acme.test", Some("Acme Rockets")).await?;
    let owner_id = owner.get("id").and_then(|v| v.as_str()).context("owner id")?.to_string();

    // The owner role carries the full catalog: every route is navigable.
    let (status, nav, _) = send(&app, "GET", "/navigation", Some(&owner_cookie), None).await?;
    assert_eq!(status, StatusCode::OK);
    let routes = route_set(&nav);
    for expected in [
        "/dashboard",
        "/account",
        "/organization",
        "/organization/members",
        "/organization/roles",
        "/sessions",
    ] {
        assert!(routes.contains(&expected.to_string()), "missing {expected} in {routes:?}");
    }

    // Default roles were seeded with the organization.
    let (status, roles, _) = send(&app, "GET", "/rbac/roles", Some(&owner_cookie), None).await?;
    assert_eq!(status, StatusCode::OK);
    let role_names: Vec<&str> = roles
        .as_array()
        .context("roles array")?
        .iter()
        .filter_map(|r| r.pointer("/name").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(role_names, vec!["member", "owner"]);
    let member_role_id = roles
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r.pointer("/name").and_then(|v| v.as_str()) == Some("member"))
        .and_then(|r| r.pointer("/id").and_then(|v| v.as_str()))
        .context("member role id")?
        .to_string();

    // Create a custom role and grant it a cataloged key.
    let (status, role, _) = send(
        &app,
        "POST",
        "/rbac/roles",
        Some(&owner_cookie),
        Some(json!({"name": "auditor", "description": "Read-only reviews"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let auditor_id = role.get("id").and_then(|v| v.as_str()).context("auditor id")?.to_string();

    let (status, _, _) = send(
        &app,
        "POST",
        &format!("/rbac/roles/{auditor_id}/permissions"),
        Some(&owner_cookie),
        Some(json!({"key": "read:organization:session"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    // Keys outside the catalog are rejected, malformed or well-formed alike.
    for bogus in ["fly:me:moon", "create:granted:dashboard", "read"] {
        let (status, _, _) = send(
            &app,
            "POST",
            &format!("/rbac/roles/{auditor_id}/permissions"),
            Some(&owner_cookie),
            Some(json!({"key": bogus})),
        )
        .await?;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{bogus} must be rejected");
    }

    let (status, perms, _) = send(
        &app,
        "GET",
        &format!("/rbac/roles/{auditor_id}/permissions"),
        Some(&owner_cookie),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(perms, json!(["read:organization:session"]));

    // Bring a second user into the organization and hand them the member role.
    let (member_cookie, member) = register(&app, "Member", "member@acme.test", None).await?;
    let member_id = member.get("id").and_then(|v| v.as_str()).context("member id")?.to_string();

    let (status, org, _) = send(&app, "GET", "/organization", Some(&owner_cookie), None).await?;
    assert_eq!(status, StatusCode::OK);
    let org_id = org.get("id").and_then(|v| v.as_str()).context("org id")?;
    sqlx::query("UPDATE users SET organization_id = ? WHERE id = ?")
        .bind(org_id)
        .bind(&member_id)
        .execute(&pool)
        .await?;

    let (status, _, _) = send(
        &app,
        "POST",
        &format!("/rbac/users/{member_id}/roles"),
        Some(&owner_cookie),
        Some(json!({"role_id": member_role_id})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    // The member sees only the self-service routes.
    let (status, nav, _) = send(&app, "GET", "/navigation", Some(&member_cookie), None).await?;
    assert_eq!(status, StatusCode::OK);
    let mut routes = route_set(&nav);
    routes.sort();
    assert_eq!(routes, vec!["/account", "/dashboard", "/sessions"]);

    // Organization pages stay off-limits: a clean authorization denial.
    let (status, _, _) = send(&app, "GET", "/organization", Some(&member_cookie), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _, _) = send(
        &app,
        "GET",
        &format!("/rbac/users/{owner_id}/effective-permissions"),
        Some(&member_cookie),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // The owner can inspect the member's effective permissions.
    let (status, effective, _) = send(
        &app,
        "GET",
        &format!("/rbac/users/{member_id}/effective-permissions"),
        Some(&owner_cookie),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(effective.get("roles"), Some(&json!(["member"])));
    let supplied_by_member_role = effective
        .get("permissions")
        .and_then(|v| v.as_array())
        .map(|perms| {
            perms
                .iter()
                .all(|p| p.get("role_name").and_then(|v| v.as_str()) == Some("member"))
        })
        .unwrap_or(false);
    assert!(supplied_by_member_role);

    // Removing the role takes the routes away again.
    let (status, _, _) = send(
        &app,
        "DELETE",
        &format!("/rbac/users/{member_id}/roles/{member_role_id}"),
        Some(&owner_cookie),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, nav, _) = send(&app, "GET", "/navigation", Some(&member_cookie), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(route_set(&nav).is_empty());

    Ok(())
}

#[tokio::test]
async fn session_revocation_across_users() -> Result<()> {
    let (_dir, pool, app) = setup().await?;

    let (owner_cookie, _) = register(&app, "Owner", "owner@acme.test", Some("Acme Rockets")).await?;
    let (member_cookie, member) = register(&app, "Member", "member@acme.test", None).await?;
    let member_id = member.get("id").and_then(|v| v.as_str()).context("member id")?.to_string();

    // Put the member into the owner's organization with the member role.
    let (_, org, _) = send(&app, "GET", "/organization", Some(&owner_cookie), None).await?;
    let org_id = org.get("id").and_then(|v| v.as_str()).context("org id")?;
    sqlx::query("UPDATE users SET organization_id = ? WHERE id = ?")
        .bind(org_id)
        .bind(&member_id)
        .execute(&pool)
        .await?;
    let (_, roles, _) = send(&app, "GET", "/rbac/roles", Some(&owner_cookie), None).await?;
    let member_role_id = roles
        .as_array()
        .context("roles array")?
        .iter()
        .find(|r| r.pointer("/name").and_then(|v| v.as_str()) == Some("member"))
        .and_then(|r| r.pointer("/id").and_then(|v| v.as_str()))
        .context("member role id")?
        .to_string();
    let (status, _, _) = send(
        &app,
        "POST",
        &format!("/rbac/users/{member_id}/roles"),
        Some(&owner_cookie),
        Some(json!({"role_id": member_role_id})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    // The member finds their own session id.
    let (status, sessions, _) = send(&app, "GET", "/sessions", Some(&member_cookie), None).await?;
    assert_eq!(status, StatusCode::OK);
    let member_session_id = sessions
        .as_array()
        .and_then(|list| list.first())
        .and_then(|session| session.get("id"))
        .and_then(|v| v.as_str())
        .context("member session id")?
        .to_string();

    // An admin from another organization cannot reach across tenants.
    let (outsider_cookie, _) = register(&app, "Rival", "rival@other.test", Some("Other Org")).await?;
    let (status, _, _) = send(
        &app,
        "DELETE",
        &format!("/sessions/{member_session_id}"),
        Some(&outsider_cookie),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // The same-org owner can: no logout signal, member logged out.
    let (status, outcome, _) = send(
        &app,
        "DELETE",
        &format!("/sessions/{member_session_id}"),
        Some(&owner_cookie),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome.get("revoked"), Some(&json!(true)));
    assert_eq!(outcome.get("logout"), Some(&json!(false)));

    let (status, _, _) = send(&app, "GET", "/auth/me", Some(&member_cookie), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED, "revoked member must be logged out");
    let (status, _, _) = send(&app, "GET", "/auth/me", Some(&owner_cookie), None).await?;
    assert_eq!(status, StatusCode::OK, "owner session stays intact");

    // Revoking one's own session flips the logout flag and kills the session.
    let (status, sessions, _) = send(&app, "GET", "/sessions", Some(&owner_cookie), None).await?;
    assert_eq!(status, StatusCode::OK);
    let own_session_id = sessions
        .as_array()
        .and_then(|list| list.first())
        .and_then(|session| session.get("id"))
        .and_then(|v| v.as_str())
        .context("owner session id")?
        .to_string();

    let (status, outcome, _) = send(
        &app,
        "DELETE",
        &format!("/sessions/{own_session_id}"),
        Some(&owner_cookie),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome.get("logout"), Some(&json!(true)));

    let (status, _, _) = send(&app, "GET", "/auth/me", Some(&owner_cookie), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    Ok(())
}
