//! Error taxonomy at the authentication boundary.
//!
//! Expected outcomes (bad credentials, lockout, policy violations) are typed
//! values. Infrastructure failures collapse into `Internal`, whose message is
//! for server-side logs only.

use chrono::{DateTime, Utc};
use thiserror::Error;

use gatehouse_core::DomainError;

use crate::{AuthzError, PasswordError, PolicyViolation, RefreshError, SessionError, TokenError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("no credential presented")]
    AuthMissing,

    /// Unknown handle and wrong secret are deliberately indistinguishable.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("access token rejected: {0}")]
    Token(#[from] TokenError),

    #[error("refresh token rejected: {0}")]
    Refresh(#[from] RefreshError),

    #[error("session rejected: {0}")]
    Session(#[from] SessionError),

    #[error("account locked until {locked_until}")]
    UserLocked { locked_until: DateTime<Utc> },

    #[error("{0}")]
    Forbidden(#[from] AuthzError),

    #[error("validation failed: {message}")]
    Validation {
        message: String,
        violations: Vec<PolicyViolation>,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            violations: Vec::new(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Stable, caller-facing code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthMissing => "AUTH_MISSING",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::Token(TokenError::Expired) => "TOKEN_EXPIRED",
            Self::Token(TokenError::Signing(_)) => "INTERNAL_ERROR",
            Self::Token(_) => "AUTH_INVALID",
            Self::Refresh(RefreshError::Expired) => "TOKEN_EXPIRED",
            Self::Refresh(_) => "AUTH_INVALID",
            Self::Session(SessionError::SessionExpired) => "SESSION_EXPIRED",
            Self::Session(SessionError::SessionNotFound) => "AUTH_INVALID",
            Self::UserLocked { .. } => "USER_LOCKED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to show callers. Never includes internal detail.
    pub fn public_message(&self) -> String {
        match self {
            Self::AuthMissing => "authentication required".to_string(),
            Self::InvalidCredentials => "invalid handle or password".to_string(),
            Self::Token(TokenError::Expired) | Self::Refresh(RefreshError::Expired) => {
                "credential has expired".to_string()
            }
            Self::Token(TokenError::Signing(_)) | Self::Internal(_) => {
                "internal error".to_string()
            }
            Self::Token(_) | Self::Refresh(_) | Self::Session(SessionError::SessionNotFound) => {
                "invalid credential".to_string()
            }
            Self::Session(SessionError::SessionExpired) => "session has expired".to_string(),
            Self::UserLocked { locked_until } => {
                format!("account locked until {}", locked_until.to_rfc3339())
            }
            Self::Forbidden(e) => e.to_string(),
            Self::Validation { message, .. } => message.clone(),
        }
    }
}

impl From<DomainError> for AuthError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => Self::validation(msg),
            DomainError::InvariantViolation(msg) => Self::validation(msg),
        }
    }
}

impl From<PasswordError> for AuthError {
    fn from(value: PasswordError) -> Self {
        Self::Internal(value.to_string())
    }
}
