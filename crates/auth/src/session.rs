//! Sliding-window session activity.
//!
//! The session record, not the access token, decides whether a login is still
//! good: it enforces the inactivity window and the absolute ceiling, and it
//! disappears on logout or password change.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use gatehouse_core::{IdentityId, SessionId};

use crate::ClientMeta;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    #[error("session has expired")]
    SessionExpired,

    #[error("session not found")]
    SessionNotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    /// Maximum gap between authenticated requests.
    pub idle_timeout: Duration,
    /// Absolute lifetime from login; never extended by activity.
    pub max_lifetime: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::minutes(60),
            max_lifetime: Duration::hours(24),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub identity_id: IdentityId,
    /// Digest of the access token currently bound to this session.
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub client: ClientMeta,
}

impl SessionPolicy {
    /// Open a session. The caller binds the access token hash once minted.
    pub fn open(
        &self,
        id: SessionId,
        identity_id: IdentityId,
        token_hash: String,
        client: ClientMeta,
        now: DateTime<Utc>,
    ) -> SessionRecord {
        SessionRecord {
            id,
            identity_id,
            token_hash,
            created_at: now,
            last_activity_at: now,
            expires_at: now + self.max_lifetime,
            client,
        }
    }

    /// Evaluate a request against the session. On success returns the new
    /// `last_activity_at`; `expires_at` is left untouched.
    pub fn touch(&self, session: &SessionRecord, now: DateTime<Utc>) -> Result<DateTime<Utc>, SessionError> {
        if now > session.expires_at {
            return Err(SessionError::SessionExpired);
        }
        if now - session.last_activity_at > self.idle_timeout {
            return Err(SessionError::SessionExpired);
        }
        Ok(now.max(session.last_activity_at))
    }
}
