//! Authentication orchestrator: login, refresh, per-request authentication,
//! logout and password change.
//!
//! Per request the order is fixed: token verification, then session touch,
//! then entitlement resolution.

use std::sync::Arc;

use serde_json::json;

use gatehouse_auth::{
    AuditAction, AuthError, ClientMeta, Entitlements, EntityKind, HandleName, Identity,
    IssuedAccessToken, NewAuditEntry, PasswordPolicy, PasswordService, Principal, RefreshError,
    hash_token, token_fingerprint,
};
use gatehouse_core::{Clock, IdentityId, SessionId};

use crate::audit::AuditRecorder;
use crate::entitlements::EntitlementResolver;
use crate::lockout::LockoutTracker;
use crate::sessions::SessionTracker;
use crate::store::IdentityStore;
use crate::tokens::{IssuedRefreshToken, TokenService};

/// Credentials and context produced by a successful login or refresh.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub identity_id: IdentityId,
    pub handle: HandleName,
    pub session_id: SessionId,
    pub access: IssuedAccessToken,
    pub refresh: Option<IssuedRefreshToken>,
    pub entitlements: Entitlements,
}

#[derive(Clone)]
pub struct AuthOrchestrator {
    identities: Arc<dyn IdentityStore>,
    passwords: PasswordService,
    password_policy: PasswordPolicy,
    lockout: LockoutTracker,
    tokens: TokenService,
    sessions: SessionTracker,
    entitlements: EntitlementResolver,
    audit: AuditRecorder,
    clock: Arc<dyn Clock>,
    /// Verified against when the handle is unknown so both paths cost one hash.
    decoy_hash: Arc<str>,
}

pub struct OrchestratorParts {
    pub identities: Arc<dyn IdentityStore>,
    pub passwords: PasswordService,
    pub password_policy: PasswordPolicy,
    pub lockout: LockoutTracker,
    pub tokens: TokenService,
    pub sessions: SessionTracker,
    pub entitlements: EntitlementResolver,
    pub audit: AuditRecorder,
    pub clock: Arc<dyn Clock>,
}

impl AuthOrchestrator {
    pub fn new(parts: OrchestratorParts) -> Result<Self, AuthError> {
        let decoy_hash = parts.passwords.hash("decoy-password-never-issued")?;
        Ok(Self {
            identities: parts.identities,
            passwords: parts.passwords,
            password_policy: parts.password_policy,
            lockout: parts.lockout,
            tokens: parts.tokens,
            sessions: parts.sessions,
            entitlements: parts.entitlements,
            audit: parts.audit,
            clock: parts.clock,
            decoy_hash: decoy_hash.into(),
        })
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    pub fn entitlements(&self) -> &EntitlementResolver {
        &self.entitlements
    }

    /// Password login.
    ///
    /// Unknown handle, inactive identity and wrong password all yield
    /// `InvalidCredentials`. A locked identity yields `UserLocked` before the
    /// password is looked at.
    #[tracing::instrument(skip(self, password, client), fields(handle = %handle), err)]
    pub async fn login(
        &self,
        handle: &str,
        password: &str,
        remember_me: bool,
        client: ClientMeta,
    ) -> Result<LoginOutcome, AuthError> {
        let identity = match HandleName::parse(handle) {
            Ok(handle) => self.identities.find_by_handle(&handle).await?,
            Err(_) => None,
        };

        let Some(identity) = identity else {
            verify_password(&self.passwords, password, &self.decoy_hash).await?;
            self.audit
                .record(
                    NewAuditEntry::new(AuditAction::LoginFailed, EntityKind::Identity)
                        .new_value(json!({ "reason": "unknown_handle" }))
                        .client(client),
                )
                .await?;
            tracing::info!(outcome = "invalid_credentials", "login rejected");
            return Err(AuthError::InvalidCredentials);
        };

        if let Some(locked_until) = identity.locked_until.filter(|_| self.lockout.is_locked(&identity)) {
            tracing::info!(identity_id = %identity.id, outcome = "locked", "login rejected");
            return Err(AuthError::UserLocked { locked_until });
        }

        let password_ok = verify_password(&self.passwords, password, &identity.password_hash).await?;
        if !password_ok || !identity.active {
            return Err(self.register_failure(&identity, password_ok, client).await?);
        }

        self.lockout.record_success(identity.id).await?;
        let outcome = self
            .establish(&identity, SessionId::new(), remember_me, client.clone())
            .await?;

        self.audit
            .record(
                NewAuditEntry::new(AuditAction::LoginSucceeded, EntityKind::Identity)
                    .concerning(identity.id)
                    .entity(identity.id)
                    .performed_by(Some(identity.id))
                    .new_value(json!({
                        "session_id": outcome.session_id,
                        "remember_me": remember_me,
                    }))
                    .client(client),
            )
            .await?;

        tracing::info!(
            identity_id = %identity.id,
            session_id = %outcome.session_id,
            outcome = "success",
            "login succeeded"
        );
        Ok(outcome)
    }

    /// Count a failed login and decide which error the caller sees.
    async fn register_failure(
        &self,
        identity: &Identity,
        password_ok: bool,
        client: ClientMeta,
    ) -> Result<AuthError, AuthError> {
        // A deactivated identity with the right password is not counted.
        if password_ok {
            tracing::info!(identity_id = %identity.id, outcome = "inactive", "login rejected");
            return Ok(AuthError::InvalidCredentials);
        }

        let transition = self.lockout.record_failure(identity.id).await?;
        self.audit
            .record(
                NewAuditEntry::new(AuditAction::LoginFailed, EntityKind::Identity)
                    .concerning(identity.id)
                    .entity(identity.id)
                    .new_value(json!({ "failed_attempts": transition.state.failed_attempts }))
                    .client(client.clone()),
            )
            .await?;

        if transition.newly_locked {
            self.audit
                .record(
                    NewAuditEntry::new(AuditAction::AccountLocked, EntityKind::Identity)
                        .concerning(identity.id)
                        .entity(identity.id)
                        .new_value(json!({ "locked_until": transition.state.locked_until }))
                        .client(client),
                )
                .await?;
        }

        tracing::info!(
            identity_id = %identity.id,
            failed_attempts = transition.state.failed_attempts,
            outcome = "invalid_credentials",
            "login rejected"
        );

        match transition.state.locked_until {
            Some(locked_until) if transition.is_locked(self.clock.now()) => {
                Ok(AuthError::UserLocked { locked_until })
            }
            _ => Ok(AuthError::InvalidCredentials),
        }
    }

    /// Open a session, mint its access token and optionally a refresh token
    /// bound to it.
    async fn establish(
        &self,
        identity: &Identity,
        session_id: SessionId,
        with_refresh: bool,
        client: ClientMeta,
    ) -> Result<LoginOutcome, AuthError> {
        let entitlements = self.entitlements.resolve(identity.id).await?;
        let access = self.tokens.issue_access(identity, &entitlements, session_id)?;
        self.sessions
            .open(session_id, identity.id, hash_token(&access.token), client.clone())
            .await?;

        let refresh = if with_refresh {
            Some(self.tokens.issue_refresh(identity.id, session_id, client).await?)
        } else {
            None
        };

        Ok(LoginOutcome {
            identity_id: identity.id,
            handle: identity.handle.clone(),
            session_id,
            access,
            refresh,
            entitlements,
        })
    }

    /// Redeem a refresh token: rotate it and open a fresh session.
    #[tracing::instrument(skip_all, fields(fingerprint = %token_fingerprint(refresh_token)), err)]
    pub async fn refresh(&self, refresh_token: &str, client: ClientMeta) -> Result<LoginOutcome, AuthError> {
        let record = self.tokens.verify_refresh(refresh_token).await?;
        let identity = self
            .identities
            .get(record.identity_id)
            .await?
            .ok_or(RefreshError::NotFound)?;

        if !identity.active {
            self.tokens.revoke_refresh(refresh_token).await?;
            return Err(AuthError::InvalidCredentials);
        }
        if let Some(locked_until) = identity.locked_until.filter(|_| self.lockout.is_locked(&identity)) {
            return Err(AuthError::UserLocked { locked_until });
        }

        let session_id = SessionId::new();
        let rotated = self.tokens.rotate(&record, session_id, client.clone()).await?;
        let mut outcome = self.establish(&identity, session_id, false, client.clone()).await?;
        outcome.refresh = Some(rotated);

        self.audit
            .record(
                NewAuditEntry::new(AuditAction::TokenRefreshed, EntityKind::Identity)
                    .concerning(identity.id)
                    .entity(identity.id)
                    .performed_by(Some(identity.id))
                    .new_value(json!({ "session_id": outcome.session_id }))
                    .client(client),
            )
            .await?;

        tracing::info!(identity_id = %identity.id, session_id = %outcome.session_id, "refresh token rotated");
        Ok(outcome)
    }

    /// Resolve a bearer token into a principal for the current request.
    pub async fn authenticate(&self, access_token: &str) -> Result<Principal, AuthError> {
        let claims = self.tokens.verify_access(access_token)?;
        self.sessions
            .touch(claims.sid, claims.sub, &hash_token(access_token))
            .await?;

        let identity = match self.identities.get(claims.sub).await? {
            Some(identity) if identity.active => identity,
            _ => {
                self.sessions.revoke(claims.sid).await?;
                return Err(AuthError::InvalidCredentials);
            }
        };

        let entitlements = self.entitlements.resolve(identity.id).await?;
        Ok(Principal {
            identity_id: identity.id,
            handle: identity.handle,
            session_id: claims.sid,
            entitlements,
        })
    }

    /// End the session behind `access_token`, revoking the refresh token bound
    /// to that session, and revoke `refresh_token` when the client presents one.
    ///
    /// Idempotent: absent, unknown or already-revoked credentials are ignored.
    pub async fn logout(
        &self,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
        client: ClientMeta,
    ) -> Result<(), AuthError> {
        let mut ended: Option<(IdentityId, SessionId)> = None;
        if let Some(claims) = access_token.and_then(|t| self.tokens.verify_access(t).ok()) {
            if self.sessions.revoke(claims.sid).await? {
                ended = Some((claims.sub, claims.sid));
            }
            self.tokens.revoke_for_session(claims.sid).await?;
        }
        if let Some(token) = refresh_token {
            self.tokens.revoke_refresh(token).await?;
        }

        if let Some((identity_id, session_id)) = ended {
            self.audit
                .record(
                    NewAuditEntry::new(AuditAction::Logout, EntityKind::Identity)
                        .concerning(identity_id)
                        .entity(identity_id)
                        .performed_by(Some(identity_id))
                        .new_value(json!({ "session_id": session_id }))
                        .client(client),
                )
                .await?;
            tracing::info!(identity_id = %identity_id, session_id = %session_id, "logged out");
        }
        Ok(())
    }

    /// Re-verify the current password, apply the new one and end every
    /// session and refresh token the identity holds.
    #[tracing::instrument(skip(self, current, new_password, client), fields(identity_id = %identity_id), err)]
    pub async fn change_password(
        &self,
        identity_id: IdentityId,
        current: &str,
        new_password: &str,
        client: ClientMeta,
    ) -> Result<(), AuthError> {
        let identity = self
            .identities
            .get(identity_id)
            .await?
            .filter(|i| i.active)
            .ok_or(AuthError::InvalidCredentials)?;

        if !verify_password(&self.passwords, current, &identity.password_hash).await? {
            return Err(AuthError::InvalidCredentials);
        }

        check_policy(&self.password_policy, new_password)?;
        if new_password == current {
            return Err(AuthError::validation("new password must differ from the current one"));
        }
        let new_hash = hash_password(&self.passwords, new_password).await?;

        let sessions = self.sessions.revoke_all_for(identity_id).await?;
        let refresh_tokens = self.tokens.revoke_all_for(identity_id).await?;

        let audit = self.audit.prepare(
            NewAuditEntry::new(AuditAction::PasswordChanged, EntityKind::Identity)
                .concerning(identity_id)
                .entity(identity_id)
                .performed_by(Some(identity_id))
                .new_value(json!({
                    "sessions_revoked": sessions,
                    "refresh_tokens_revoked": refresh_tokens,
                }))
                .client(client),
        );
        self.identities
            .set_password_hash(identity_id, new_hash, self.clock.now(), audit)
            .await?;

        tracing::info!(identity_id = %identity_id, sessions, refresh_tokens, "password changed");
        Ok(())
    }
}

/// Reject `plaintext` with the full list of policy violations.
pub(crate) fn check_policy(policy: &PasswordPolicy, plaintext: &str) -> Result<(), AuthError> {
    let result = policy.validate(plaintext);
    if result.valid {
        return Ok(());
    }
    Err(AuthError::Validation {
        message: "password does not satisfy the password policy".to_string(),
        violations: result.violations,
    })
}

/// Argon2 is CPU-bound; keep it off the async worker threads.
pub(crate) async fn hash_password(passwords: &PasswordService, plaintext: &str) -> Result<String, AuthError> {
    let passwords = passwords.clone();
    let plaintext = plaintext.to_string();
    tokio::task::spawn_blocking(move || passwords.hash(&plaintext))
        .await
        .map_err(|e| AuthError::internal(format!("hashing task failed: {e}")))?
        .map_err(AuthError::from)
}

pub(crate) async fn verify_password(
    passwords: &PasswordService,
    plaintext: &str,
    hash: &str,
) -> Result<bool, AuthError> {
    let passwords = passwords.clone();
    let plaintext = plaintext.to_string();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || passwords.verify(&plaintext, &hash))
        .await
        .map_err(|e| AuthError::internal(format!("verification task failed: {e}")))
}
