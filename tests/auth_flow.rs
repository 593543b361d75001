use anyhow::Context;
use anyhow::Result;
use axum::body::{self, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use serde_json::json;
use sqlx::SqlitePool;
use tempfile::tempdir;
use tower::util::ServiceExt;

use opshub::create_app;

fn session_cookie(resp: &Response) -> Option<String> {
    resp.headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| value.starts_with("opshub_session="))
        .map(|value| value.split(';').next().unwrap_or(value).to_string())
}

#[tokio::test]
async fn register_login_logout_flow() -> Result<()> {
    let dir = tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test_flow.db");
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

    // Register: session cookie is set with the transport attributes.
    let register_body = json!({
        "name": "Flow User",
        "email": "flow@example.com",
        "password": "password123"
    });
    let req = Request::builder()
        .method("POST")
        .uri("/auth/register")
        .header("content-type", "application/json")
        .header("user-agent", "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) Chrome/120.0.0.0 Safari/537.36")
        .body(Body::from(register_body.to_string()))?;
    let resp: Response = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let raw_cookie = resp
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| value.starts_with("opshub_session="))
        .context("missing session cookie")?
        .to_string();
    assert!(raw_cookie.contains("HttpOnly"), "cookie must be HttpOnly: {raw_cookie}");
    assert!(raw_cookie.contains("SameSite=Strict"), "cookie must be SameSite=Strict: {raw_cookie}");
    assert!(raw_cookie.contains("Path=/"), "cookie must be path-wide: {raw_cookie}");

    let cookie = session_cookie(&resp).context("missing session cookie")?;

    // Authenticated profile read
    let req = Request::builder()
        .method("GET")
        .uri("/auth/me")
        .header("cookie", &cookie)
        .body(Body::empty())?;
    let resp: Response = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), 1_048_576).await?;
    let me: serde_json::Value = serde_json::from_slice(&bytes)?;
    assert_eq!(
        me.pointer("/user/email").and_then(|v| v.as_str()),
        Some("flow@example.com")
    );
    // No organization at signup means no roles and no permissions.
    assert_eq!(me.get("roles").and_then(|v| v.as_array()).map(Vec::len), Some(0));
    assert_eq!(me.get("permissions").and_then(|v| v.as_array()).map(Vec::len), Some(0));

    // Fresh login issues a second, independent session
    let req = Request::builder()
        .method("POST")
        .uri("/auth/login")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"email": "flow@example.com", "password": "password123"}).to_string(),
        ))?;
    let resp: Response = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let login_cookie = session_cookie(&resp).context("missing login cookie")?;
    assert_ne!(cookie, login_cookie, "each authentication event gets its own session");

    // Logout revokes the store record behind the first cookie.
    let req = Request::builder()
        .method("POST")
        .uri("/auth/logout")
        .header("cookie", &cookie)
        .body(Body::empty())?;
    let resp: Response = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::OK);

    // The old token is still validly signed, but the session is gone.
    let req = Request::builder()
        .method("GET")
        .uri("/auth/me")
        .header("cookie", &cookie)
        .body(Body::empty())?;
    let resp: Response = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // The second session is unaffected.
    let req = Request::builder()
        .method("GET")
        .uri("/auth/me")
        .header("cookie", &login_cookie)
        .body(Body::empty())?;
    let resp: Response = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn oauth_callback_creates_user_and_session() -> Result<()> {
    let dir = tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test_oauth.db");
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

    let callback = json!({
        "provider": "github",
        "provider_id": "8675309",
        "email": "octo@example.com",
        "name": "Octo Cat"
    });
    let req = Request::builder()
        .method("POST")
        .uri("/auth/oauth")
        .header("content-type", "application/json")
        .body(Body::from(callback.to_string()))?;
    let resp: Response = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let cookie = session_cookie(&resp).context("missing session cookie")?;

    let req = Request::builder()
        .method("GET")
        .uri("/sessions")
        .header("cookie", &cookie)
        .body(Body::empty())?;
    let resp: Response = app.clone().oneshot(req).await?;
    // No roles yet, so even listing own sessions is denied by the gate.
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // But the session itself authenticates.
    let req = Request::builder()
        .method("GET")
        .uri("/auth/me")
        .header("cookie", &cookie)
        .body(Body::empty())?;
    let resp: Response = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), 1_048_576).await?;
    let me: serde_json::Value = serde_json::from_slice(&bytes)?;
    assert_eq!(me.pointer("/user/provider").and_then(|v| v.as_str()), Some("github"));

    // The same provider identity maps back onto the same user.
    let req = Request::builder()
        .method("POST")
        .uri("/auth/oauth")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "provider": "github",
                "provider_id": "8675309",
                "email": "octo@example.com",
                "name": "Octo Cat"
            })
            .to_string(),
        ))?;
    let resp: Response = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE email = 'octo@example.com'")
        .fetch_one(&pool)
        .await?;
    assert_eq!(count, 1);

    Ok(())
}
