use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use utoipa::ToSchema;

use crate::app::AppState;
use crate::errors::AppResult;
use crate::session::CurrentUser;

pub fn routes() -> Router<AppState> {
    Router::new().route("/navigation", get(navigable_routes))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct NavigationResponse {
    /// Routes from the static table the caller can navigate to.
    #[schema(example = json!(["/dashboard", "/account"]))]
    pub routes: Vec<String>,
}

/// Navigable routes for the current user
#[utoipa::path(
    get,
    path = "/navigation",
    tag = "Navigation",
    responses((status = 200, description = "Routes unlocked by the caller's permissions", body = NavigationResponse))
)]
pub(crate) async fn navigable_routes(
    State(state): State<AppState>,
    auth: CurrentUser,
) -> AppResult<Json<NavigationResponse>> {
    let routes = state
        .gate
        .navigable_routes(auth.user_id)
        .await?
        .into_iter()
        .map(str::to_string)
        .collect();

    Ok(Json(NavigationResponse { routes }))
}
