use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use gatehouse_core::{IdentityId, RefreshTokenId, SessionId};

use crate::ClientMeta;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RefreshError {
    #[error("refresh token has expired")]
    Expired,

    #[error("refresh token has been revoked")]
    Revoked,

    #[error("refresh token not found")]
    NotFound,
}

/// Persisted refresh token. `token_hash` is a one-way digest of the value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub id: RefreshTokenId,
    pub identity_id: IdentityId,
    /// Session opened alongside this token; logout of that session revokes it.
    pub session_id: Option<SessionId>,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub client: ClientMeta,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl RefreshTokenRecord {
    pub fn new(
        identity_id: IdentityId,
        token_hash: String,
        ttl: Duration,
        client: ClientMeta,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RefreshTokenId::new(),
            identity_id,
            session_id: None,
            token_hash,
            expires_at: now + ttl,
            created_at: now,
            last_used_at: None,
            client,
            revoked: false,
            revoked_at: None,
        }
    }

    pub fn for_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Revocation wins over expiry so replay of a rotated token reports `Revoked`.
    pub fn check_redeemable(&self, now: DateTime<Utc>) -> Result<(), RefreshError> {
        if self.revoked {
            return Err(RefreshError::Revoked);
        }
        if now >= self.expires_at {
            return Err(RefreshError::Expired);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revoked_takes_precedence_over_expired() {
        let now = Utc::now();
        let mut record = RefreshTokenRecord::new(
            IdentityId::new(),
            "digest".into(),
            Duration::days(30),
            ClientMeta::default(),
            now,
        );
        assert!(record.check_redeemable(now).is_ok());
        assert_eq!(
            record.check_redeemable(now + Duration::days(30)),
            Err(RefreshError::Expired)
        );

        record.revoked = true;
        assert_eq!(
            record.check_redeemable(now + Duration::days(31)),
            Err(RefreshError::Revoked)
        );
    }
}
