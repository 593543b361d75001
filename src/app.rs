use std::sync::Arc;

use axum::http::Method;
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::access::{AccessGate, PermissionResolver};
use crate::errors::AppError;
use crate::events::{self, EventBus};
use crate::routes::{auth, health, navigation, organizations, rbac, sessions as session_routes};
use crate::session::{geo, SessionManager, SessionStore, TokenConfig};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub sessions: SessionManager,
    pub gate: AccessGate,
    pub event_bus: EventBus,
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    // Boot-time invariant: a missing signing secret aborts startup.
    let tokens = Arc::new(TokenConfig::from_env()?);
    let sessions = SessionManager::new(SessionStore::new(pool.clone()), tokens, geo::from_env());
    let gate = AccessGate::new(PermissionResolver::new(pool.clone()));

    let (event_bus, rx) = events::init_event_bus();
    tokio::spawn(events::start_activity_listener(rx, pool.clone()));

    let state = AppState {
        pool,
        sessions,
        gate,
        event_bus,
    };

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let router = Router::new()
        .nest("/auth", auth::routes())
        .nest("/sessions", session_routes::routes())
        .nest("/rbac", rbac::routes())
        .nest("/organization", organizations::routes())
        .merge(navigation::routes())
        .merge(health::routes())
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
