use std::sync::Arc;

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::errors::AppResult;
use crate::events::RequestContext;
use crate::models::session::{Session, SessionContext};
use crate::session::agent::parse_user_agent;
use crate::session::geo::GeoLookup;
use crate::session::store::{NewSession, SessionStore, DEFAULT_SESSION_TTL_DAYS};
use crate::session::token::TokenConfig;
use crate::utils::utc_now;

/// Name of the HTTP-only transport cookie.
pub const SESSION_COOKIE: &str = "opshub_session";

/// Result of revoking a session by id. `logout` is set when the caller
/// revoked the session backing their own current request.
#[derive(Debug, Clone, Copy)]
pub struct RevokeOutcome {
    pub logout: bool,
}

/// Orchestrates the session lifecycle: enrichment, persistence, token
/// issuance, cookie transport, renewal and revocation.
///
/// A session moves from active to invalid exactly once (expiry or
/// revocation); a "new" session is always a distinct record.
#[derive(Clone)]
pub struct SessionManager {
    store: SessionStore,
    tokens: Arc<TokenConfig>,
    geo: Arc<dyn GeoLookup>,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(store: SessionStore, tokens: Arc<TokenConfig>, geo: Arc<dyn GeoLookup>) -> Self {
        Self {
            store,
            tokens,
            geo,
            ttl: Duration::days(session_ttl_days()),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn default_expiry(&self) -> DateTime<Utc> {
        utc_now() + self.ttl
    }

    /// Create a session for an authenticated user and set the transport
    /// cookie. Enrichment (user-agent classification, geolocation) is
    /// best-effort: each field is independently optional and a failed
    /// lookup only omits its fields.
    pub async fn create_session(
        &self,
        jar: CookieJar,
        user_id: Uuid,
        context: SessionContext,
        meta: &RequestContext,
        metadata: Option<Value>,
        expires_at: Option<DateTime<Utc>>,
    ) -> AppResult<(CookieJar, Session)> {
        let client = meta
            .user_agent
            .as_deref()
            .map(parse_user_agent)
            .unwrap_or_default();

        let geo = match meta.ip.as_deref() {
            Some(ip) => self.geo.lookup(ip).await,
            None => None,
        };

        let session = self
            .store
            .create(NewSession {
                user_id,
                context: Some(context),
                ip: meta.ip.clone(),
                user_agent: meta.user_agent.clone(),
                client,
                geo,
                metadata,
                expires_at: Some(expires_at.unwrap_or_else(|| self.default_expiry())),
            })
            .await
            .map_err(|err| {
                tracing::error!(%user_id, error = %err, "failed to persist session");
                err
            })?;

        self.store.touch_user_login(user_id, session.created_at).await?;

        let token = self.tokens.issue(session.id, session.expires_at)?;
        let jar = jar.add(session_cookie(token, session.expires_at));

        Ok((jar, session))
    }

    /// Session id from the cookie, if the token verifies. Never touches
    /// the store.
    pub fn read_session_id(&self, jar: &CookieJar) -> Option<Uuid> {
        let cookie = jar.get(SESSION_COOKIE)?;
        self.tokens.verify(cookie.value())
    }

    /// Primary authentication check: cookie -> token -> active store
    /// record. Store-level validity always wins over token trust.
    pub async fn read_session(&self, jar: &CookieJar) -> AppResult<Option<Session>> {
        let Some(id) = self.read_session_id(jar) else {
            return Ok(None);
        };
        self.store.find_active(id).await
    }

    /// Sliding-expiry renewal. No-op without a valid cookie/token pair.
    pub async fn renew_session(&self, jar: CookieJar, expires_at: DateTime<Utc>) -> AppResult<CookieJar> {
        let Some(session) = self.read_session(&jar).await? else {
            return Ok(jar);
        };

        self.store.update_expiry(session.id, expires_at).await?;
        let token = self.tokens.issue(session.id, expires_at)?;
        Ok(jar.add(session_cookie(token, expires_at)))
    }

    /// Logout: revoke the session named by the current cookie and clear it.
    pub async fn revoke_current(&self, jar: CookieJar) -> AppResult<CookieJar> {
        if let Some(id) = self.read_session_id(&jar) {
            self.store.revoke(id).await?;
        }
        Ok(jar.remove(removal_cookie()))
    }

    /// Revoke a session by id. When the id names the caller's own current
    /// session the cookie is cleared and the outcome signals logout, so a
    /// bulk revoke can force-logout exactly when the caller hit themselves.
    pub async fn revoke_session(
        &self,
        jar: CookieJar,
        session_id: Uuid,
    ) -> AppResult<(CookieJar, RevokeOutcome)> {
        self.store.revoke(session_id).await?;

        let own = self.read_session_id(&jar) == Some(session_id);
        let jar = if own { jar.remove(removal_cookie()) } else { jar };

        Ok((jar, RevokeOutcome { logout: own }))
    }

    /// Sign out every other device, keeping the current session.
    pub async fn revoke_other_sessions(&self, jar: &CookieJar, user_id: Uuid) -> AppResult<u64> {
        match self.read_session_id(jar) {
            Some(current) => self.store.revoke_all_for_user_except(user_id, current).await,
            None => Ok(0),
        }
    }
}

fn session_ttl_days() -> i64 {
    std::env::var("SESSION_TTL_DAYS")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(DEFAULT_SESSION_TTL_DAYS)
}

fn session_cookie(token: String, expires_at: DateTime<Utc>) -> Cookie<'static> {
    let mut cookie = Cookie::new(SESSION_COOKIE, token);
    cookie.set_http_only(true);
    cookie.set_secure(true);
    cookie.set_same_site(SameSite::Strict);
    cookie.set_path("/");
    if let Ok(expires) = OffsetDateTime::from_unix_timestamp(expires_at.timestamp()) {
        cookie.set_expires(expires);
    }
    cookie
}

fn removal_cookie() -> Cookie<'static> {
    let mut cookie = Cookie::new(SESSION_COOKIE, "");
    cookie.set_path("/");
    cookie
}
