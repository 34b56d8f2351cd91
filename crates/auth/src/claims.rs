use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use gatehouse_core::{IdentityId, SessionId};

use crate::{HandleName, PermissionName, RoleName};

/// Access-token claims.
///
/// Self-contained: verification needs only the signing secret and the clock.
/// `sid` points at the session record that stays authoritative for whether
/// the login is still good.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject / identity identifier.
    pub sub: IdentityId,

    pub handle: HandleName,

    pub roles: Vec<RoleName>,

    pub permissions: Vec<PermissionName>,

    /// Session identifier.
    pub sid: SessionId,

    /// Issued-at (seconds since epoch).
    pub iat: i64,

    /// Expiration (seconds since epoch).
    pub exp: i64,
}

impl AccessClaims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token has expired")]
    Expired,

    #[error("token signature is invalid")]
    InvalidSignature,

    #[error("token is malformed")]
    Malformed,

    #[error("token signing failed: {0}")]
    Signing(String),
}

/// Deterministically validate the claim time window.
///
/// Signature verification happens before this in `AccessTokenIssuer::verify`.
pub fn validate_claims(claims: &AccessClaims, now: DateTime<Utc>) -> Result<(), TokenError> {
    if claims.exp <= claims.iat {
        return Err(TokenError::Malformed);
    }
    if now.timestamp() >= claims.exp {
        return Err(TokenError::Expired);
    }
    Ok(())
}
