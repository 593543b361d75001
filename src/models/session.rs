use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;
use crate::events::{Loggable, Severity};
use crate::session::geo::GeoInfo;

/// One authenticated browser/device context. The record, not the token
/// referencing it, is the source of truth for validity.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    #[schema(example = "login")]
    pub context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    pub geo: GeoInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Session {
    /// A session is valid iff it has not been revoked and has not expired.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && now < self.expires_at
    }
}

impl Loggable for Session {
    fn entity_type() -> &'static str { "session" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Important }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbSession {
    pub id: String,
    pub user_id: String,
    pub context: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub device: Option<String>,
    pub geo_hostname: Option<String>,
    pub geo_city: Option<String>,
    pub geo_region: Option<String>,
    pub geo_country: Option<String>,
    pub geo_loc: Option<String>,
    pub geo_org: Option<String>,
    pub geo_postal: Option<String>,
    pub geo_timezone: Option<String>,
    pub metadata: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbSession> for Session {
    type Error = AppError;

    fn try_from(value: DbSession) -> Result<Self, Self::Error> {
        Ok(Session {
            id: Uuid::parse_str(&value.id).map_err(|_| AppError::internal("corrupt session id"))?,
            user_id: Uuid::parse_str(&value.user_id)
                .map_err(|_| AppError::internal("corrupt session user id"))?,
            context: value.context,
            ip: value.ip,
            user_agent: value.user_agent,
            browser: value.browser,
            os: value.os,
            device: value.device,
            geo: GeoInfo {
                hostname: value.geo_hostname,
                city: value.geo_city,
                region: value.geo_region,
                country: value.geo_country,
                loc: value.geo_loc,
                org: value.geo_org,
                postal: value.geo_postal,
                timezone: value.geo_timezone,
            },
            metadata: value
                .metadata
                .as_deref()
                .and_then(|raw| serde_json::from_str(raw).ok()),
            created_at: value.created_at,
            expires_at: value.expires_at,
            revoked_at: value.revoked_at,
        })
    }
}

/// Authentication event that produced a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionContext {
    Login,
    Signup,
    Oauth,
}

impl SessionContext {
    pub const fn as_str(self) -> &'static str {
        match self {
            SessionContext::Login => "login",
            SessionContext::Signup => "signup",
            SessionContext::Oauth => "oauth",
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RevokeResponse {
    pub revoked: bool,
    /// Set when the caller revoked their own current session and must be
    /// logged out client-side.
    pub logout: bool,
}
