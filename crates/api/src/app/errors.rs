use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use gatehouse_auth::{AuthError, TokenError};
use gatehouse_infra::AdminError;

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn auth_status(err: &AuthError) -> StatusCode {
    match err {
        AuthError::AuthMissing
        | AuthError::InvalidCredentials
        | AuthError::Refresh(_)
        | AuthError::Session(_) => StatusCode::UNAUTHORIZED,
        AuthError::Token(TokenError::Signing(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        AuthError::Token(_) => StatusCode::UNAUTHORIZED,
        AuthError::UserLocked { .. } => StatusCode::LOCKED,
        AuthError::Forbidden(_) => StatusCode::FORBIDDEN,
        AuthError::Validation { .. } => StatusCode::BAD_REQUEST,
        AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn auth_error_response(err: AuthError) -> axum::response::Response {
    let status = auth_status(&err);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %err, "request failed");
    }

    let mut body = json!({
        "error": err.code(),
        "message": err.public_message(),
    });
    match &err {
        AuthError::UserLocked { locked_until } => {
            body["locked_until"] = json!(locked_until);
        }
        AuthError::Validation { violations, .. } if !violations.is_empty() => {
            body["violations"] = json!(violations);
        }
        _ => {}
    }
    (status, axum::Json(body)).into_response()
}

pub fn admin_error_response(err: AdminError) -> axum::response::Response {
    match err {
        AdminError::NotFound(what) => json_error(StatusCode::NOT_FOUND, "NOT_FOUND", format!("{what} not found")),
        AdminError::Conflict(msg) => json_error(StatusCode::CONFLICT, "CONFLICT", msg),
        AdminError::Protected(msg) => json_error(StatusCode::CONFLICT, "PROTECTED", msg),
        AdminError::Validation { message, violations } => auth_error_response(AuthError::Validation { message, violations }),
        AdminError::Internal(msg) => auth_error_response(AuthError::Internal(msg)),
    }
}

#[cfg(test)]
mod tests {
    use gatehouse_auth::{RefreshError, SessionError};

    use super::*;

    #[test]
    fn credential_failures_are_unauthorized() {
        for err in [
            AuthError::AuthMissing,
            AuthError::InvalidCredentials,
            AuthError::Token(TokenError::Expired),
            AuthError::Refresh(RefreshError::Revoked),
            AuthError::Session(SessionError::SessionExpired),
        ] {
            assert_eq!(auth_status(&err), StatusCode::UNAUTHORIZED, "{err:?}");
        }
    }

    #[test]
    fn lock_and_infrastructure_statuses() {
        let locked = AuthError::UserLocked {
            locked_until: chrono::Utc::now(),
        };
        assert_eq!(auth_status(&locked), StatusCode::LOCKED);
        assert_eq!(auth_status(&AuthError::internal("db down")), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
