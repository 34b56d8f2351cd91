//! Wiring: build every service from configuration, stores and a clock.

use std::sync::Arc;

use gatehouse_auth::{AccessTokenIssuer, AuthError, PasswordService};
use gatehouse_core::{Clock, SystemClock};

use crate::admin::{AdminParts, AdminService};
use crate::audit::AuditRecorder;
use crate::config::AuthConfig;
use crate::entitlements::EntitlementResolver;
use crate::lockout::LockoutTracker;
use crate::orchestrator::{AuthOrchestrator, OrchestratorParts};
use crate::sessions::SessionTracker;
use crate::store::Stores;
use crate::tokens::TokenService;

#[derive(Clone)]
pub struct AuthServices {
    pub orchestrator: AuthOrchestrator,
    pub admin: AdminService,
    pub entitlements: EntitlementResolver,
    pub audit: AuditRecorder,
    pub stores: Stores,
    pub clock: Arc<dyn Clock>,
}

impl AuthServices {
    pub fn new(config: &AuthConfig, stores: Stores, clock: Arc<dyn Clock>) -> Result<Self, AuthError> {
        let passwords = PasswordService::new(config.hash_cost)?;
        let audit = AuditRecorder::new(stores.audit.clone(), clock.clone());
        let lockout = LockoutTracker::new(stores.identities.clone(), config.lockout, clock.clone());
        let tokens = TokenService::new(
            AccessTokenIssuer::new(&config.jwt_secret, config.access_ttl),
            stores.refresh_tokens.clone(),
            config.refresh_ttl,
            clock.clone(),
        );
        let sessions = SessionTracker::new(stores.sessions.clone(), config.session, clock.clone());
        let entitlements = EntitlementResolver::new(stores.rbac.clone());

        let orchestrator = AuthOrchestrator::new(OrchestratorParts {
            identities: stores.identities.clone(),
            passwords: passwords.clone(),
            password_policy: config.password_policy.clone(),
            lockout,
            tokens: tokens.clone(),
            sessions: sessions.clone(),
            entitlements: entitlements.clone(),
            audit: audit.clone(),
            clock: clock.clone(),
        })?;

        let admin = AdminService::new(AdminParts {
            identities: stores.identities.clone(),
            rbac: stores.rbac.clone(),
            passwords,
            password_policy: config.password_policy.clone(),
            default_password: config.default_password.clone(),
            sessions,
            tokens,
            audit: audit.clone(),
            clock: clock.clone(),
        });

        Ok(Self {
            orchestrator,
            admin,
            entitlements,
            audit,
            stores,
            clock,
        })
    }

    /// Wall-clock services over in-memory stores.
    pub fn in_memory(config: &AuthConfig) -> Result<Self, AuthError> {
        Self::new(config, Stores::in_memory(), Arc::new(SystemClock))
    }

    /// Drop expired sessions and refresh tokens. Returns `(sessions, refresh_tokens)`.
    pub async fn purge_expired(&self) -> Result<(u64, u64), AuthError> {
        let sessions = self.orchestrator.sessions().purge_expired().await?;
        let tokens = self.orchestrator.tokens().purge_expired().await?;
        if sessions + tokens > 0 {
            tracing::info!(sessions, refresh_tokens = tokens, "purged expired credentials");
        }
        Ok((sessions, tokens))
    }
}
