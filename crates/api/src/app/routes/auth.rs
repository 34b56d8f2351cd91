//! Login, refresh, logout, password change and the current-identity view.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, HeaderValue, StatusCode, header::SET_COOKIE},
    response::IntoResponse,
};
use serde_json::json;

use gatehouse_auth::{AuthError, PageName};
use gatehouse_infra::LoginOutcome;

use crate::app::cookies::{self, REFRESH_COOKIE};
use crate::app::dto::{ChangePasswordRequest, EntitlementsView, LoginRequest, LoginResponse, MeResponse};
use crate::app::errors::auth_error_response;
use crate::app::services::AppServices;
use crate::authz;
use crate::context::{PrincipalContext, client_meta};

/// POST /auth/login
pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> axum::response::Response {
    match services
        .auth
        .orchestrator
        .login(&body.handle, &body.password, body.remember_me, client_meta(&headers))
        .await
    {
        Ok(outcome) => issue(&services, &outcome),
        Err(err) => auth_error_response(err),
    }
}

/// POST /auth/refresh
pub async fn refresh(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
) -> axum::response::Response {
    let Some(token) = cookies::read_cookie(&headers, REFRESH_COOKIE) else {
        return auth_error_response(AuthError::AuthMissing);
    };
    match services.auth.orchestrator.refresh(&token, client_meta(&headers)).await {
        Ok(outcome) => issue(&services, &outcome),
        Err(err) => auth_error_response(err),
    }
}

/// POST /auth/logout
///
/// Always succeeds for absent or stale credentials and always clears cookies.
pub async fn logout(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
) -> axum::response::Response {
    let access = cookies::access_token(&headers);
    let refresh = cookies::read_cookie(&headers, REFRESH_COOKIE);
    if let Err(err) = services
        .auth
        .orchestrator
        .logout(access.as_deref(), refresh.as_deref(), client_meta(&headers))
        .await
    {
        return auth_error_response(err);
    }
    cleared(&services)
}

/// POST /auth/password
pub async fn change_password(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    headers: HeaderMap,
    Json(body): Json<ChangePasswordRequest>,
) -> axum::response::Response {
    match services
        .auth
        .orchestrator
        .change_password(
            principal.identity_id(),
            &body.current_password,
            &body.new_password,
            client_meta(&headers),
        )
        .await
    {
        Ok(()) => cleared(&services),
        Err(err) => auth_error_response(err),
    }
}

/// GET /auth/me
pub async fn me(Extension(principal): Extension<PrincipalContext>) -> axum::response::Response {
    let body = MeResponse {
        identity_id: principal.identity_id(),
        handle: principal.handle().clone(),
        session_id: principal.session_id(),
        entitlements: EntitlementsView::from(principal.entitlements()),
    };
    (StatusCode::OK, Json(body)).into_response()
}

/// GET /auth/pages/:name - visibility check for a single page
pub async fn page_access(
    Extension(principal): Extension<PrincipalContext>,
    Path(name): Path<String>,
) -> axum::response::Response {
    let page = match PageName::parse(name) {
        Ok(page) => page,
        Err(e) => return auth_error_response(e.into()),
    };
    let granted = authz::require_page_access(&principal, &page).is_ok();
    (StatusCode::OK, Json(json!({ "page": page, "granted": granted }))).into_response()
}

fn issue(services: &AppServices, outcome: &LoginOutcome) -> axum::response::Response {
    let mut values = vec![services.cookies.access(&outcome.access.token)];
    if let Some(refresh) = &outcome.refresh {
        values.push(services.cookies.refresh(&refresh.token));
    }
    match values.into_iter().collect::<Result<Vec<_>, _>>() {
        Ok(values) => (StatusCode::OK, set_cookies(values), Json(LoginResponse::from(outcome))).into_response(),
        Err(e) => auth_error_response(AuthError::internal(format!("cookie header: {e}"))),
    }
}

fn cleared(services: &AppServices) -> axum::response::Response {
    match services.cookies.cleared() {
        Ok(values) => (StatusCode::NO_CONTENT, set_cookies(values)).into_response(),
        Err(e) => auth_error_response(AuthError::internal(format!("cookie header: {e}"))),
    }
}

fn set_cookies(values: impl IntoIterator<Item = HeaderValue>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for value in values {
        headers.append(SET_COOKIE, value);
    }
    headers
}
