//! Route guards over the resolved entitlement set.
//!
//! Both guards run after [`crate::middleware::require_authenticated`]; a
//! request without a principal is treated as unauthenticated.

use std::sync::Arc;

use axum::{extract::State, middleware::Next, response::Response};

use gatehouse_auth::{AuthError, AuthzError, PageName, RoleName};

use crate::app::errors::auth_error_response;
use crate::context::PrincipalContext;

pub fn require_page_access(principal: &PrincipalContext, page: &PageName) -> Result<(), AuthzError> {
    gatehouse_auth::require_page_access(principal.principal(), page)
}

pub fn require_role(principal: &PrincipalContext, roles: &[RoleName]) -> Result<(), AuthzError> {
    gatehouse_auth::require_role(principal.principal(), roles)
}

/// Roles any one of which admits the request.
#[derive(Debug, Clone)]
pub struct RoleGuard(Arc<[RoleName]>);

impl RoleGuard {
    pub fn any_of(roles: impl IntoIterator<Item = RoleName>) -> Self {
        Self(roles.into_iter().collect())
    }

    pub fn admin() -> Self {
        Self::any_of([RoleName::admin()])
    }
}

pub async fn role_guard(
    State(guard): State<RoleGuard>,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(principal) = req.extensions().get::<PrincipalContext>() else {
        return auth_error_response(AuthError::AuthMissing);
    };
    if let Err(err) = require_role(principal, &guard.0) {
        tracing::info!(identity_id = %principal.identity_id(), error = %err, "role guard denied request");
        return auth_error_response(err.into());
    }
    next.run(req).await
}

pub async fn page_guard(
    State(page): State<PageName>,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(principal) = req.extensions().get::<PrincipalContext>() else {
        return auth_error_response(AuthError::AuthMissing);
    };
    if let Err(err) = require_page_access(principal, &page) {
        tracing::info!(identity_id = %principal.identity_id(), error = %err, "page guard denied request");
        return auth_error_response(err.into());
    }
    next.run(req).await
}
