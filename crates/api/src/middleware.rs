use std::sync::Arc;

use axum::{extract::State, middleware::Next, response::Response};

use gatehouse_auth::{AuthError, token_fingerprint};

use crate::app::cookies;
use crate::app::errors::auth_error_response;
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

/// Authenticate the request and attach a [`PrincipalContext`].
///
/// Token verification, session touch and entitlement resolution all happen
/// before the handler runs.
pub async fn require_authenticated(
    State(services): State<Arc<AppServices>>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(token) = cookies::access_token(req.headers()) else {
        return auth_error_response(AuthError::AuthMissing);
    };

    match services.auth.orchestrator.authenticate(&token).await {
        Ok(principal) => {
            req.extensions_mut().insert(PrincipalContext::new(principal));
            next.run(req).await
        }
        Err(err) => {
            tracing::debug!(fingerprint = %token_fingerprint(&token), error = %err, "authentication rejected");
            auth_error_response(err)
        }
    }
}
