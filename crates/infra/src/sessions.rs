//! Session activity tracking.
//!
//! The stored session, not the access token, is authoritative for whether a
//! login is still good. A token whose session has gone is rejected even while
//! its signature and expiry still verify.

use std::sync::Arc;

use gatehouse_auth::{AuthError, ClientMeta, SessionError, SessionPolicy, SessionRecord};
use gatehouse_core::{Clock, IdentityId, SessionId};

use crate::store::{SessionStore, StoreError};

#[derive(Clone)]
pub struct SessionTracker {
    sessions: Arc<dyn SessionStore>,
    policy: SessionPolicy,
    clock: Arc<dyn Clock>,
}

impl SessionTracker {
    pub fn new(sessions: Arc<dyn SessionStore>, policy: SessionPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions,
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    /// Persist a new session bound to the hash of its access token.
    pub async fn open(
        &self,
        session_id: SessionId,
        identity_id: IdentityId,
        token_hash: String,
        client: ClientMeta,
    ) -> Result<SessionRecord, StoreError> {
        let session = self
            .policy
            .open(session_id, identity_id, token_hash, client, self.clock.now());
        self.sessions.insert(session.clone()).await?;
        Ok(session)
    }

    /// Check a request against its session and slide the idle window.
    ///
    /// The session must exist, belong to `identity_id` and be bound to
    /// `token_hash`. An expired session is deleted before the error is returned.
    pub async fn touch(
        &self,
        session_id: SessionId,
        identity_id: IdentityId,
        token_hash: &str,
    ) -> Result<SessionRecord, AuthError> {
        let now = self.clock.now();
        let mut session = self
            .sessions
            .get(session_id)
            .await?
            .filter(|s| s.identity_id == identity_id && s.token_hash == token_hash)
            .ok_or(SessionError::SessionNotFound)?;

        match self.policy.touch(&session, now) {
            Ok(last_activity_at) => {
                self.sessions.record_activity(session_id, last_activity_at).await?;
                session.last_activity_at = last_activity_at;
                Ok(session)
            }
            Err(err) => {
                self.sessions.delete(session_id).await?;
                tracing::info!(session_id = %session_id, identity_id = %identity_id, "session expired");
                Err(err.into())
            }
        }
    }

    /// Idempotent: revoking a session that is already gone is not an error.
    pub async fn revoke(&self, session_id: SessionId) -> Result<bool, StoreError> {
        self.sessions.delete(session_id).await
    }

    pub async fn revoke_all_for(&self, identity_id: IdentityId) -> Result<u64, StoreError> {
        self.sessions.delete_all_for(identity_id).await
    }

    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        self.sessions
            .purge_expired(self.clock.now(), self.policy.idle_timeout)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use gatehouse_core::ManualClock;

    use crate::store::InMemoryStore;

    fn tracker(clock: Arc<ManualClock>) -> SessionTracker {
        SessionTracker::new(
            Arc::new(InMemoryStore::new()),
            SessionPolicy {
                idle_timeout: Duration::minutes(60),
                max_lifetime: Duration::hours(24),
            },
            clock,
        )
    }

    #[tokio::test]
    async fn activity_keeps_session_alive_until_absolute_cap() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let sessions = tracker(clock.clone());
        let identity = IdentityId::new();
        let opened = sessions
            .open(SessionId::new(), identity, "hash".into(), ClientMeta::default())
            .await
            .unwrap();

        for _ in 0..24 {
            clock.advance(Duration::minutes(59));
            sessions.touch(opened.id, identity, "hash").await.unwrap();
        }
        // 24 * 59 minutes is inside the 24h cap; one more step crosses it.
        clock.advance(Duration::minutes(59));
        let err = sessions.touch(opened.id, identity, "hash").await.unwrap_err();
        assert_eq!(err, AuthError::Session(SessionError::SessionExpired));

        let gone = sessions.touch(opened.id, identity, "hash").await.unwrap_err();
        assert_eq!(gone, AuthError::Session(SessionError::SessionNotFound));
    }

    #[tokio::test]
    async fn idle_session_expires() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let sessions = tracker(clock.clone());
        let identity = IdentityId::new();
        let opened = sessions
            .open(SessionId::new(), identity, "hash".into(), ClientMeta::default())
            .await
            .unwrap();

        clock.advance(Duration::minutes(61));
        assert_eq!(
            sessions.touch(opened.id, identity, "hash").await.unwrap_err(),
            AuthError::Session(SessionError::SessionExpired)
        );
    }

    #[tokio::test]
    async fn mismatched_token_or_owner_is_not_found() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let sessions = tracker(clock);
        let identity = IdentityId::new();
        let opened = sessions
            .open(SessionId::new(), identity, "hash".into(), ClientMeta::default())
            .await
            .unwrap();

        assert!(sessions.touch(opened.id, identity, "other").await.is_err());
        assert!(sessions.touch(opened.id, IdentityId::new(), "hash").await.is_err());
        assert!(sessions.touch(opened.id, identity, "hash").await.is_ok());
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let sessions = tracker(clock);
        let opened = sessions
            .open(SessionId::new(), IdentityId::new(), "hash".into(), ClientMeta::default())
            .await
            .unwrap();

        assert!(sessions.revoke(opened.id).await.unwrap());
        assert!(!sessions.revoke(opened.id).await.unwrap());
    }
}
