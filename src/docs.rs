use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::access;
use crate::models;
use crate::routes;
use crate::session::SESSION_COOKIE;

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::auth::register,
        routes::auth::login,
        routes::auth::oauth,
        routes::auth::me,
        routes::auth::refresh,
        routes::auth::logout,
        routes::sessions::list_sessions,
        routes::sessions::revoke_session,
        routes::sessions::revoke_others,
        routes::rbac::list_catalog,
        routes::rbac::list_roles,
        routes::rbac::create_role,
        routes::rbac::get_role,
        routes::rbac::delete_role,
        routes::rbac::get_role_permissions,
        routes::rbac::assign_permission_to_role,
        routes::rbac::remove_permission_from_role,
        routes::rbac::get_user_roles,
        routes::rbac::assign_role_to_user,
        routes::rbac::remove_role_from_user,
        routes::rbac::get_effective_permissions,
        routes::organizations::get_organization,
        routes::organizations::update_organization,
        routes::organizations::list_members,
        routes::navigation::navigable_routes,
        routes::health::health,
    ),
    components(
        schemas(
            models::user::User,
            models::user::RegisterRequest,
            models::user::LoginRequest,
            models::user::OauthCallbackRequest,
            models::user::MeResponse,
            models::organization::Organization,
            models::organization::OrganizationUpdateRequest,
            models::rbac::Role,
            models::rbac::RoleCreateRequest,
            models::rbac::RolePermission,
            models::rbac::AssignPermissionRequest,
            models::rbac::UserRole,
            models::rbac::AssignRoleRequest,
            models::rbac::CatalogEntry,
            models::rbac::EffectivePermissions,
            models::session::Session,
            models::session::RevokeResponse,
            access::EffectivePermission,
            crate::session::geo::GeoInfo,
            routes::auth::MessageResponse,
            routes::sessions::RevokedCountResponse,
            routes::navigation::NavigationResponse,
            routes::health::HealthResponse
        )
    ),
    tags(
        (name = "Auth", description = "Authentication and session issuance"),
        (name = "Sessions", description = "Session management"),
        (name = "RBAC", description = "Roles and permission assignment"),
        (name = "Organization", description = "Organization management"),
        (name = "Navigation", description = "Route visibility"),
        (name = "Health", description = "Service health")
    )
)]
pub struct ApiDoc;

pub fn build_openapi(port: u16) -> anyhow::Result<utoipa::openapi::OpenApi> {
    let mut doc = serde_json::to_value(ApiDoc::openapi())?;

    ensure_security_components(&mut doc);
    ensure_servers(&mut doc, port);

    Ok(serde_json::from_value(doc)?)
}

pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> Router {
    let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
        .try_it_out_enabled(true)
        .with_credentials(true)
        .persist_authorization(true);

    let doc_json = Arc::new(serde_json::to_value(&doc).expect("OpenAPI serialization must succeed"));

    let json_route = {
        let doc_json = Arc::clone(&doc_json);
        get(move || {
            let doc_json = Arc::clone(&doc_json);
            async move { Json((*doc_json).clone()) }
        })
    };

    Router::new()
        .route("/api-docs/openapi.json", json_route)
        .merge(SwaggerUi::new("/docs").config(swagger_config))
}

/// Authentication is a cookie, not a bearer header; register the matching
/// apiKey scheme so Try-it-out sends credentials.
fn ensure_security_components(doc: &mut Value) {
    if doc.get("components").is_none() {
        doc["components"] = json!({});
    }
    if let Some(components) = doc.get_mut("components").and_then(Value::as_object_mut) {
        components
            .entry("securitySchemes")
            .or_insert_with(|| json!({}));
    }
    if let Some(schemes) = doc
        .pointer_mut("/components/securitySchemes")
        .and_then(Value::as_object_mut)
    {
        schemes.insert(
            "cookieAuth".to_string(),
            json!({
                "type": "apiKey",
                "in": "cookie",
                "name": SESSION_COOKIE
            }),
        );
    }
    if doc.get("security").is_none() {
        doc["security"] = json!([{ "cookieAuth": [] }]);
    }
}

fn ensure_servers(doc: &mut Value, port: u16) {
    if doc.get("servers").is_none() {
        doc["servers"] = json!([
            { "url": format!("http://localhost:{}", port) }
        ]);
    }
}
