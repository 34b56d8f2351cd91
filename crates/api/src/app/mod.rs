//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store selection, service construction, seeding
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs
//! - `cookies.rs`: token cookie transport
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router};
use tower::ServiceBuilder;

use crate::authz::{self, RoleGuard};
use crate::middleware;

pub mod cookies;
pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<AppServices>) -> Router {
    build_app_with(services, Router::new())
}

/// Like [`build_app`], mounting `protected` behind authentication.
///
/// Routes in `protected` see a `PrincipalContext` extension and can be
/// further restricted with [`authz::page_guard`] or [`authz::role_guard`].
pub fn build_app_with(services: Arc<AppServices>, protected: Router) -> Router {
    let admin = routes::admin::router().layer(axum::middleware::from_fn_with_state(
        RoleGuard::admin(),
        authz::role_guard,
    ));

    let authenticated = routes::authenticated_router()
        .nest("/admin", admin)
        .merge(protected)
        .layer(axum::middleware::from_fn_with_state(
            services.clone(),
            middleware::require_authenticated,
        ));

    Router::new()
        .merge(routes::public_router())
        .merge(authenticated)
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
