//! Session authentication: token codec, persisted session store, and the
//! lifecycle manager that ties them to the transport cookie.

pub mod agent;
pub mod geo;
pub mod manager;
pub mod store;
pub mod token;

pub use manager::{RevokeOutcome, SessionManager, SESSION_COOKIE};
pub use store::SessionStore;
pub use token::TokenConfig;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::extract::cookie::CookieJar;
use uuid::Uuid;

use crate::app::AppState;
use crate::errors::AppError;

/// Authenticated caller, extracted from the transport cookie. Every
/// failure mode (missing cookie, bad token, revoked or expired session)
/// is the same rejection; callers learn only "no session".
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user_id: Uuid,
    pub session_id: Uuid,
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_request_parts(parts, state)
            .await
            .map_err(|_| AppError::unauthorized("authentication required"))?;

        let session = state.sessions.read_session(&jar).await?;

        session
            .map(|session| CurrentUser {
                user_id: session.user_id,
                session_id: session.id,
            })
            .ok_or_else(|| AppError::unauthorized("authentication required"))
    }
}
