//! Access-token issuance plus the stateful half of refresh tokens.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use gatehouse_auth::{
    AccessClaims, AccessTokenIssuer, AuthError, ClientMeta, Entitlements, Identity,
    IssuedAccessToken, OpaqueToken, RefreshError, RefreshTokenRecord, TokenError, hash_token,
    token_fingerprint,
};
use gatehouse_core::{Clock, IdentityId, SessionId};

use crate::store::{RefreshTokenStore, StoreError};

/// Refresh token plaintext as handed to the client. Never persisted.
#[derive(Clone)]
pub struct IssuedRefreshToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl core::fmt::Debug for IssuedRefreshToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IssuedRefreshToken")
            .field("fingerprint", &token_fingerprint(&self.token))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Clone)]
pub struct TokenService {
    issuer: Arc<AccessTokenIssuer>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    refresh_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    pub fn new(
        issuer: AccessTokenIssuer,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        refresh_ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            issuer: Arc::new(issuer),
            refresh_tokens,
            refresh_ttl,
            clock,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.issuer.ttl()
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Mint an access token carrying the identity's current role/permission names.
    pub fn issue_access(
        &self,
        identity: &Identity,
        entitlements: &Entitlements,
        session_id: SessionId,
    ) -> Result<IssuedAccessToken, TokenError> {
        self.issuer.issue(
            identity.id,
            identity.handle.clone(),
            entitlements.roles.clone(),
            entitlements.permissions.clone(),
            session_id,
            self.clock.now(),
        )
    }

    /// Stateless: signature and expiry only.
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        self.issuer.verify(token, self.clock.now())
    }

    /// Mint a refresh token bound to `session_id`.
    pub async fn issue_refresh(
        &self,
        identity_id: IdentityId,
        session_id: SessionId,
        client: ClientMeta,
    ) -> Result<IssuedRefreshToken, StoreError> {
        let opaque = OpaqueToken::generate();
        let record = RefreshTokenRecord::new(identity_id, opaque.hash, self.refresh_ttl, client, self.clock.now())
            .for_session(session_id);
        let expires_at = record.expires_at;
        self.refresh_tokens.insert(record).await?;
        Ok(IssuedRefreshToken {
            token: opaque.plaintext,
            expires_at,
        })
    }

    /// Look up a presented refresh token and stamp `last_used_at` on success.
    pub async fn verify_refresh(&self, token: &str) -> Result<RefreshTokenRecord, AuthError> {
        let now = self.clock.now();
        let mut record = self
            .refresh_tokens
            .find_by_hash(&hash_token(token))
            .await?
            .ok_or(RefreshError::NotFound)?;
        record.check_redeemable(now)?;

        self.refresh_tokens.mark_used(record.id, now).await?;
        record.last_used_at = Some(now);
        Ok(record)
    }

    /// Revoke `presented` and mint its replacement, bound to `session_id`, in
    /// one unit. Losing a concurrent race for the same token yields `Revoked`.
    pub async fn rotate(
        &self,
        presented: &RefreshTokenRecord,
        session_id: SessionId,
        client: ClientMeta,
    ) -> Result<IssuedRefreshToken, AuthError> {
        let now = self.clock.now();
        let opaque = OpaqueToken::generate();
        let replacement = RefreshTokenRecord::new(presented.identity_id, opaque.hash, self.refresh_ttl, client, now)
            .for_session(session_id);
        let expires_at = replacement.expires_at;

        if !self.refresh_tokens.rotate(presented.id, replacement, now).await? {
            tracing::warn!(
                identity_id = %presented.identity_id,
                refresh_token_id = %presented.id,
                "refresh token replayed after rotation"
            );
            return Err(RefreshError::Revoked.into());
        }

        Ok(IssuedRefreshToken {
            token: opaque.plaintext,
            expires_at,
        })
    }

    /// Idempotent; unknown tokens are ignored.
    pub async fn revoke_refresh(&self, token: &str) -> Result<(), StoreError> {
        if let Some(record) = self.refresh_tokens.find_by_hash(&hash_token(token)).await? {
            self.refresh_tokens.revoke(record.id, self.clock.now()).await?;
        }
        Ok(())
    }

    pub async fn revoke_for_session(&self, session_id: SessionId) -> Result<u64, StoreError> {
        self.refresh_tokens.revoke_for_session(session_id, self.clock.now()).await
    }

    pub async fn revoke_all_for(&self, identity_id: IdentityId) -> Result<u64, StoreError> {
        self.refresh_tokens.revoke_all_for(identity_id, self.clock.now()).await
    }

    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        self.refresh_tokens.purge_expired(self.clock.now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_auth::HandleName;
    use gatehouse_core::ManualClock;

    use crate::store::InMemoryStore;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn service(clock: Arc<ManualClock>) -> TokenService {
        TokenService::new(
            AccessTokenIssuer::new(SECRET, Duration::hours(24)),
            Arc::new(InMemoryStore::new()),
            Duration::days(30),
            clock,
        )
    }

    #[tokio::test]
    async fn refresh_token_redeems_once() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let tokens = service(clock);
        let issued = tokens.issue_refresh(IdentityId::new(), SessionId::new(), ClientMeta::default()).await.unwrap();

        let record = tokens.verify_refresh(&issued.token).await.unwrap();
        assert!(record.last_used_at.is_some());
        let replacement = tokens.rotate(&record, SessionId::new(), ClientMeta::default()).await.unwrap();
        assert_ne!(replacement.token, issued.token);

        let replay = tokens.verify_refresh(&issued.token).await.unwrap_err();
        assert_eq!(replay, AuthError::Refresh(RefreshError::Revoked));
        assert!(tokens.verify_refresh(&replacement.token).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_rotation_has_one_winner() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let tokens = service(clock);
        let issued = tokens.issue_refresh(IdentityId::new(), SessionId::new(), ClientMeta::default()).await.unwrap();
        let record = tokens.verify_refresh(&issued.token).await.unwrap();

        let (a, b) = tokio::join!(
            tokens.rotate(&record, SessionId::new(), ClientMeta::default()),
            tokens.rotate(&record, SessionId::new(), ClientMeta::default())
        );
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    }

    #[tokio::test]
    async fn expired_and_unknown_refresh_tokens_fail() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let tokens = service(clock.clone());
        let issued = tokens.issue_refresh(IdentityId::new(), SessionId::new(), ClientMeta::default()).await.unwrap();

        clock.advance(Duration::days(31));
        assert_eq!(
            tokens.verify_refresh(&issued.token).await.unwrap_err(),
            AuthError::Refresh(RefreshError::Expired)
        );
        assert_eq!(
            tokens.verify_refresh("not-a-token").await.unwrap_err(),
            AuthError::Refresh(RefreshError::NotFound)
        );
        assert_eq!(tokens.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn revoking_a_session_revokes_its_refresh_tokens() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let tokens = service(clock);
        let owner = IdentityId::new();
        let (ended, kept) = (SessionId::new(), SessionId::new());
        let bound = tokens.issue_refresh(owner, ended, ClientMeta::default()).await.unwrap();
        let other = tokens.issue_refresh(owner, kept, ClientMeta::default()).await.unwrap();

        assert_eq!(tokens.revoke_for_session(ended).await.unwrap(), 1);
        assert_eq!(tokens.revoke_for_session(ended).await.unwrap(), 0);
        assert_eq!(
            tokens.verify_refresh(&bound.token).await.unwrap_err(),
            AuthError::Refresh(RefreshError::Revoked)
        );
        assert_eq!(tokens.verify_refresh(&other.token).await.unwrap().session_id, Some(kept));
    }

    #[test]
    fn access_token_follows_clock() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let tokens = service(clock.clone());
        let identity = Identity::new(HandleName::parse("alice").unwrap(), "h".into(), clock.now());
        let issued = tokens
            .issue_access(&identity, &Entitlements::default(), SessionId::new())
            .unwrap();

        assert_eq!(tokens.verify_access(&issued.token).unwrap().sub, identity.id);
        clock.advance(Duration::hours(25));
        assert_eq!(tokens.verify_access(&issued.token).unwrap_err(), TokenError::Expired);
    }
}
