use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::errors::AppResult;
use crate::models::session::{DbSession, Session, SessionContext};
use crate::session::agent::ClientInfo;
use crate::session::geo::GeoInfo;
use crate::utils::utc_now;

pub const DEFAULT_SESSION_TTL_DAYS: i64 = 30;

/// Input for a session insert. The store assigns the id and creation time.
#[derive(Debug, Default)]
pub struct NewSession {
    pub user_id: Uuid,
    pub context: Option<SessionContext>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub client: ClientInfo,
    pub geo: Option<GeoInfo>,
    pub metadata: Option<Value>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Thin persistence layer over the sessions table. Sessions are never
/// physically deleted here; revocation stamps `revoked_at` exactly once.
#[derive(Clone)]
pub struct SessionStore {
    pool: SqlitePool,
}

const SESSION_COLUMNS: &str = "id, user_id, context, ip, user_agent, browser, os, device, \
     geo_hostname, geo_city, geo_region, geo_country, geo_loc, geo_org, geo_postal, geo_timezone, \
     metadata, created_at, expires_at, revoked_at";

impl SessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, new: NewSession) -> AppResult<Session> {
        let id = Uuid::new_v4();
        let now = utc_now();
        let expires_at = new
            .expires_at
            .unwrap_or_else(|| now + chrono::Duration::days(DEFAULT_SESSION_TTL_DAYS));
        let geo = new.geo.unwrap_or_default();
        let metadata = new.metadata.as_ref().map(|value| value.to_string());
        let context = new.context.unwrap_or(SessionContext::Login);

        sqlx::query(
            "INSERT INTO sessions (id, user_id, context, ip, user_agent, browser, os, device, \
             geo_hostname, geo_city, geo_region, geo_country, geo_loc, geo_org, geo_postal, geo_timezone, \
             metadata, created_at, expires_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(new.user_id.to_string())
        .bind(context.as_str())
        .bind(&new.ip)
        .bind(&new.user_agent)
        .bind(&new.client.browser)
        .bind(&new.client.os)
        .bind(&new.client.device)
        .bind(&geo.hostname)
        .bind(&geo.city)
        .bind(&geo.region)
        .bind(&geo.country)
        .bind(&geo.loc)
        .bind(&geo.org)
        .bind(&geo.postal)
        .bind(&geo.timezone)
        .bind(&metadata)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(Session {
            id,
            user_id: new.user_id,
            context: context.as_str().to_string(),
            ip: new.ip,
            user_agent: new.user_agent,
            browser: new.client.browser,
            os: new.client.os,
            device: new.client.device,
            geo,
            metadata: new.metadata,
            created_at: now,
            expires_at,
            revoked_at: None,
        })
    }

    /// Fetch a session iff it is currently valid. Absent, revoked and
    /// expired records are all the same `None`; callers never re-check.
    pub async fn find_active(&self, id: Uuid) -> AppResult<Option<Session>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE id = ? AND revoked_at IS NULL AND expires_at > ?"
        );
        let row = sqlx::query_as::<_, DbSession>(&sql)
            .bind(id.to_string())
            .bind(utc_now())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Session::try_from).transpose()
    }

    /// Fetch regardless of validity; used for administrative checks.
    pub async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Session>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?");
        let row = sqlx::query_as::<_, DbSession>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Session::try_from).transpose()
    }

    /// Active sessions for a user, newest first.
    pub async fn list_for_user(&self, user_id: Uuid) -> AppResult<Vec<Session>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE user_id = ? AND revoked_at IS NULL AND expires_at > ? \
             ORDER BY created_at DESC"
        );
        let rows = sqlx::query_as::<_, DbSession>(&sql)
            .bind(user_id.to_string())
            .bind(utc_now())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Session::try_from).collect()
    }

    pub async fn update_expiry(&self, id: Uuid, expires_at: DateTime<Utc>) -> AppResult<()> {
        sqlx::query("UPDATE sessions SET expires_at = ? WHERE id = ? AND revoked_at IS NULL")
            .bind(expires_at)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Idempotent: the revocation timestamp is set once and never moved.
    pub async fn revoke(&self, id: Uuid) -> AppResult<()> {
        sqlx::query("UPDATE sessions SET revoked_at = COALESCE(revoked_at, ?) WHERE id = ?")
            .bind(utc_now())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Bulk device sign-out: revoke every active session of the user except
    /// the one named. Returns the number of sessions revoked.
    pub async fn revoke_all_for_user_except(&self, user_id: Uuid, keep: Uuid) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE sessions SET revoked_at = ? \
             WHERE user_id = ? AND id != ? AND revoked_at IS NULL",
        )
        .bind(utc_now())
        .bind(user_id.to_string())
        .bind(keep.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Stamp the user's last-login marker alongside session creation.
    pub async fn touch_user_login(&self, user_id: Uuid, at: DateTime<Utc>) -> AppResult<()> {
        sqlx::query("UPDATE users SET last_login_at = ?, updated_at = ? WHERE id = ?")
            .bind(at)
            .bind(at)
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
