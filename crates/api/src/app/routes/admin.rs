//! Administrative routes over identities, roles, permissions and pages.
//!
//! Mounted behind authentication and the admin role guard. Every mutation
//! responds with the ids of the audit entries it produced.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get},
};
use serde::Serialize;

use gatehouse_auth::AuditAction;
use gatehouse_core::{DomainError, IdentityId, PageId, PermissionId, RoleId};
use gatehouse_infra::admin::{CreateIdentity, CreatePage, CreatePermission, CreateRole, UpdateIdentity, UpdatePage, UpdateRole};
use gatehouse_infra::{Actor, AdminError, AuditQuery, Audited};

use crate::app::dto::{
    AssignRoleRequest, AuditParams, AuditedResponse, GrantPageRequest, GrantPermissionRequest, IdentityView,
    SetPagesRequest,
};
use crate::app::errors::{admin_error_response, json_error};
use crate::app::services::AppServices;
use crate::context::{PrincipalContext, client_meta};

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

pub fn router() -> Router {
    Router::new()
        .route("/identities", get(list_identities).post(create_identity))
        .route("/identities/:id", get(get_identity).patch(update_identity))
        .route("/identities/:id/roles", get(identity_roles).post(assign_role))
        .route("/identities/:id/roles/:role_id", delete(unassign_role))
        .route("/roles", get(list_roles).post(create_role))
        .route("/roles/:id", get(get_role).patch(update_role).delete(delete_role))
        .route("/roles/:id/permissions", get(role_permissions).post(grant_permission))
        .route("/roles/:id/permissions/:permission_id", delete(revoke_permission))
        .route("/roles/:id/pages", get(role_pages).post(grant_page).put(set_role_pages))
        .route("/roles/:id/pages/:page_id", delete(revoke_page))
        .route("/permissions", get(list_permissions).post(create_permission))
        .route("/permissions/:id", delete(delete_permission))
        .route("/pages", get(list_pages).post(create_page))
        .route("/pages/:id", get(get_page).patch(update_page).delete(delete_page))
        .route("/audit", get(audit_log))
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

type Response = axum::response::Response;

fn actor(principal: &PrincipalContext, headers: &HeaderMap) -> Actor {
    Actor::new(principal.identity_id(), client_meta(headers))
}

fn parse_id<T>(raw: &str) -> Result<T, Response>
where
    T: FromStr<Err = DomainError>,
{
    raw.parse::<T>()
        .map_err(|e| json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string()))
}

fn listed<T: Serialize>(result: Result<T, AdminError>) -> Response {
    match result {
        Ok(value) => (StatusCode::OK, Json(serde_json::json!({ "data": value }))).into_response(),
        Err(err) => admin_error_response(err),
    }
}

fn mutated<T, U: Serialize>(status: StatusCode, result: Result<Audited<T>, AdminError>, f: impl FnOnce(T) -> U) -> Response {
    match result {
        Ok(audited) => (status, Json(AuditedResponse::map(audited, f))).into_response(),
        Err(err) => admin_error_response(err),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Identities
// ─────────────────────────────────────────────────────────────────────────────

/// GET /admin/identities
pub async fn list_identities(Extension(services): Extension<Arc<AppServices>>) -> Response {
    let result = services.auth.admin.list_identities().await;
    listed(result.map(|ids| ids.into_iter().map(IdentityView::from).collect::<Vec<_>>()))
}

/// POST /admin/identities
pub async fn create_identity(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    headers: HeaderMap,
    Json(body): Json<CreateIdentity>,
) -> Response {
    let result = services.auth.admin.create_identity(&actor(&principal, &headers), body).await;
    mutated(StatusCode::CREATED, result, IdentityView::from)
}

/// GET /admin/identities/:id
pub async fn get_identity(Extension(services): Extension<Arc<AppServices>>, Path(id): Path<String>) -> Response {
    let id: IdentityId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    listed(services.auth.admin.get_identity(id).await.map(IdentityView::from))
}

/// PATCH /admin/identities/:id
pub async fn update_identity(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<UpdateIdentity>,
) -> Response {
    let id: IdentityId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let result = services
        .auth
        .admin
        .update_identity(&actor(&principal, &headers), id, body)
        .await;
    mutated(StatusCode::OK, result, IdentityView::from)
}

/// GET /admin/identities/:id/roles
pub async fn identity_roles(Extension(services): Extension<Arc<AppServices>>, Path(id): Path<String>) -> Response {
    let id: IdentityId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    listed(services.auth.admin.roles_of(id).await)
}

/// POST /admin/identities/:id/roles
pub async fn assign_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<AssignRoleRequest>,
) -> Response {
    let (id, role_id): (IdentityId, RoleId) = match (parse_id(&id), parse_id(&body.role_id)) {
        (Ok(id), Ok(role_id)) => (id, role_id),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };
    let result = services
        .auth
        .admin
        .assign_role(&actor(&principal, &headers), id, role_id)
        .await;
    mutated(StatusCode::CREATED, result, |()| serde_json::json!({ "identity_id": id, "role_id": role_id }))
}

/// DELETE /admin/identities/:id/roles/:role_id
pub async fn unassign_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    headers: HeaderMap,
    Path((id, role_id)): Path<(String, String)>,
) -> Response {
    let (id, role_id): (IdentityId, RoleId) = match (parse_id(&id), parse_id(&role_id)) {
        (Ok(id), Ok(role_id)) => (id, role_id),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };
    let result = services
        .auth
        .admin
        .unassign_role(&actor(&principal, &headers), id, role_id)
        .await;
    mutated(StatusCode::OK, result, |()| serde_json::Value::Null)
}

// ─────────────────────────────────────────────────────────────────────────────
// Roles
// ─────────────────────────────────────────────────────────────────────────────

/// GET /admin/roles
pub async fn list_roles(Extension(services): Extension<Arc<AppServices>>) -> Response {
    listed(services.auth.admin.list_roles().await)
}

/// POST /admin/roles
pub async fn create_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    headers: HeaderMap,
    Json(body): Json<CreateRole>,
) -> Response {
    let result = services.auth.admin.create_role(&actor(&principal, &headers), body).await;
    mutated(StatusCode::CREATED, result, |role| role)
}

/// GET /admin/roles/:id
pub async fn get_role(Extension(services): Extension<Arc<AppServices>>, Path(id): Path<String>) -> Response {
    let id: RoleId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    listed(services.auth.admin.get_role(id).await)
}

/// PATCH /admin/roles/:id
pub async fn update_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<UpdateRole>,
) -> Response {
    let id: RoleId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let result = services.auth.admin.update_role(&actor(&principal, &headers), id, body).await;
    mutated(StatusCode::OK, result, |role| role)
}

/// DELETE /admin/roles/:id
pub async fn delete_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let id: RoleId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let result = services.auth.admin.delete_role(&actor(&principal, &headers), id).await;
    mutated(StatusCode::OK, result, |()| serde_json::Value::Null)
}

/// GET /admin/roles/:id/permissions
pub async fn role_permissions(Extension(services): Extension<Arc<AppServices>>, Path(id): Path<String>) -> Response {
    let id: RoleId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    listed(services.auth.admin.permissions_of(id).await)
}

/// POST /admin/roles/:id/permissions
pub async fn grant_permission(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<GrantPermissionRequest>,
) -> Response {
    let (id, permission_id): (RoleId, PermissionId) = match (parse_id(&id), parse_id(&body.permission_id)) {
        (Ok(id), Ok(permission_id)) => (id, permission_id),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };
    let result = services
        .auth
        .admin
        .grant_permission(&actor(&principal, &headers), id, permission_id)
        .await;
    mutated(StatusCode::CREATED, result, |()| {
        serde_json::json!({ "role_id": id, "permission_id": permission_id })
    })
}

/// DELETE /admin/roles/:id/permissions/:permission_id
pub async fn revoke_permission(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    headers: HeaderMap,
    Path((id, permission_id)): Path<(String, String)>,
) -> Response {
    let (id, permission_id): (RoleId, PermissionId) = match (parse_id(&id), parse_id(&permission_id)) {
        (Ok(id), Ok(permission_id)) => (id, permission_id),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };
    let result = services
        .auth
        .admin
        .revoke_permission(&actor(&principal, &headers), id, permission_id)
        .await;
    mutated(StatusCode::OK, result, |()| serde_json::Value::Null)
}

/// GET /admin/roles/:id/pages
pub async fn role_pages(Extension(services): Extension<Arc<AppServices>>, Path(id): Path<String>) -> Response {
    let id: RoleId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    listed(services.auth.admin.pages_of(id).await)
}

/// POST /admin/roles/:id/pages
pub async fn grant_page(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<GrantPageRequest>,
) -> Response {
    let (id, page_id): (RoleId, PageId) = match (parse_id(&id), parse_id(&body.page_id)) {
        (Ok(id), Ok(page_id)) => (id, page_id),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };
    let result = services
        .auth
        .admin
        .grant_page(&actor(&principal, &headers), id, page_id)
        .await;
    mutated(StatusCode::CREATED, result, |()| serde_json::json!({ "role_id": id, "page_id": page_id }))
}

/// PUT /admin/roles/:id/pages - replace the role's page set
pub async fn set_role_pages(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<SetPagesRequest>,
) -> Response {
    let id: RoleId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let result = services
        .auth
        .admin
        .set_role_pages(&actor(&principal, &headers), id, body.page_ids.clone())
        .await;
    mutated(StatusCode::OK, result, |()| body.page_ids)
}

/// DELETE /admin/roles/:id/pages/:page_id
pub async fn revoke_page(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    headers: HeaderMap,
    Path((id, page_id)): Path<(String, String)>,
) -> Response {
    let (id, page_id): (RoleId, PageId) = match (parse_id(&id), parse_id(&page_id)) {
        (Ok(id), Ok(page_id)) => (id, page_id),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };
    let result = services
        .auth
        .admin
        .revoke_page(&actor(&principal, &headers), id, page_id)
        .await;
    mutated(StatusCode::OK, result, |()| serde_json::Value::Null)
}

// ─────────────────────────────────────────────────────────────────────────────
// Permissions
// ─────────────────────────────────────────────────────────────────────────────

/// GET /admin/permissions
pub async fn list_permissions(Extension(services): Extension<Arc<AppServices>>) -> Response {
    listed(services.auth.admin.list_permissions().await)
}

/// POST /admin/permissions
pub async fn create_permission(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    headers: HeaderMap,
    Json(body): Json<CreatePermission>,
) -> Response {
    let result = services
        .auth
        .admin
        .create_permission(&actor(&principal, &headers), body)
        .await;
    mutated(StatusCode::CREATED, result, |permission| permission)
}

/// DELETE /admin/permissions/:id
pub async fn delete_permission(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let id: PermissionId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let result = services
        .auth
        .admin
        .delete_permission(&actor(&principal, &headers), id)
        .await;
    mutated(StatusCode::OK, result, |()| serde_json::Value::Null)
}

// ─────────────────────────────────────────────────────────────────────────────
// Pages
// ─────────────────────────────────────────────────────────────────────────────

/// GET /admin/pages
pub async fn list_pages(Extension(services): Extension<Arc<AppServices>>) -> Response {
    listed(services.auth.admin.list_pages().await)
}

/// POST /admin/pages
pub async fn create_page(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    headers: HeaderMap,
    Json(body): Json<CreatePage>,
) -> Response {
    let result = services.auth.admin.create_page(&actor(&principal, &headers), body).await;
    mutated(StatusCode::CREATED, result, |page| page)
}

/// GET /admin/pages/:id
pub async fn get_page(Extension(services): Extension<Arc<AppServices>>, Path(id): Path<String>) -> Response {
    let id: PageId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    listed(services.auth.admin.get_page(id).await)
}

/// PATCH /admin/pages/:id
pub async fn update_page(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<UpdatePage>,
) -> Response {
    let id: PageId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let result = services.auth.admin.update_page(&actor(&principal, &headers), id, body).await;
    mutated(StatusCode::OK, result, |page| page)
}

/// DELETE /admin/pages/:id
pub async fn delete_page(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let id: PageId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let result = services.auth.admin.delete_page(&actor(&principal, &headers), id).await;
    mutated(StatusCode::OK, result, |()| serde_json::Value::Null)
}

// ─────────────────────────────────────────────────────────────────────────────
// Audit
// ─────────────────────────────────────────────────────────────────────────────

/// GET /admin/audit?identity_id=..&action=..&limit=..
pub async fn audit_log(Extension(services): Extension<Arc<AppServices>>, Query(params): Query<AuditParams>) -> Response {
    let identity_id = match params.identity_id.as_deref().map(parse_id::<IdentityId>).transpose() {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let action = match params.action.as_deref() {
        None => None,
        Some(raw) => match AuditAction::parse(raw) {
            Some(action) => Some(action),
            None => {
                return json_error(StatusCode::BAD_REQUEST, "invalid_action", format!("unknown audit action '{raw}'"));
            }
        },
    };
    listed(
        services
            .auth
            .admin
            .audit_log(AuditQuery {
                identity_id,
                action,
                limit: params.limit.unwrap_or_default(),
            })
            .await,
    )
}
