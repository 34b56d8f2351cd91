//! Storage boundary for the authentication core.
//!
//! Traits are storage-agnostic: in-memory implementations serve tests/dev,
//! Postgres serves production. Invariants every implementation must uphold:
//!
//! - failed-attempt recording is one atomic read-modify-write
//! - refresh-token rotation revokes the presented row and inserts its
//!   replacement atomically; a row can be rotated at most once
//! - every identity/RBAC mutation is persisted together with its audit entry,
//!   or not at all
//! - audit entries are append-only

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use gatehouse_auth::{
    AuditAction, AuditEntry, AuthError, HandleName, Identity, LockoutPolicy, LockoutTransition,
    Page, PageName, Permission, RefreshTokenRecord, Role, RoleName, SessionRecord,
};
use gatehouse_core::{IdentityId, PageId, PermissionId, RefreshTokenId, RoleId, SessionId};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

/// Storage operation error.
///
/// These are **infrastructure errors**. None of them may be read as success or
/// as "not found" by callers on the authentication path.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("datastore operation '{0}' timed out")]
    Timeout(&'static str),

    #[error("datastore unavailable: {0}")]
    Unavailable(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("record not found")]
    NotFound,

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<StoreError> for AuthError {
    fn from(value: StoreError) -> Self {
        AuthError::Internal(value.to_string())
    }
}

/// Run a datastore future with a bounded timeout.
pub(crate) async fn bounded<T, F>(
    timeout: Duration,
    operation: &'static str,
    fut: F,
) -> Result<T, StoreError>
where
    F: core::future::Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(operation)),
    }
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn get(&self, id: IdentityId) -> Result<Option<Identity>, StoreError>;

    async fn find_by_handle(&self, handle: &HandleName) -> Result<Option<Identity>, StoreError>;

    async fn list(&self) -> Result<Vec<Identity>, StoreError>;

    /// Insert a new identity. Fails with `Conflict` on a duplicate handle.
    async fn create(&self, identity: Identity, audit: AuditEntry) -> Result<(), StoreError>;

    /// Persist handle/active changes.
    async fn update(&self, identity: Identity, audit: AuditEntry) -> Result<(), StoreError>;

    async fn set_password_hash(
        &self,
        id: IdentityId,
        password_hash: String,
        now: DateTime<Utc>,
        audit: AuditEntry,
    ) -> Result<(), StoreError>;

    /// Apply `policy.register_failure` atomically against the stored counter.
    async fn record_failed_attempt(
        &self,
        id: IdentityId,
        policy: LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<LockoutTransition, StoreError>;

    /// Reset the counter, clear the lock and stamp `last_login_at`.
    async fn record_successful_login(&self, id: IdentityId, now: DateTime<Utc>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn insert(&self, record: RefreshTokenRecord) -> Result<(), StoreError>;

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>, StoreError>;

    async fn mark_used(&self, id: RefreshTokenId, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// Revoke `presented` and insert `replacement` in one unit.
    ///
    /// Returns `false` (and inserts nothing) when `presented` was already revoked.
    async fn rotate(
        &self,
        presented: RefreshTokenId,
        replacement: RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Idempotent.
    async fn revoke(&self, id: RefreshTokenId, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// Revoke every live token bound to `session_id`.
    async fn revoke_for_session(&self, session_id: SessionId, now: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn revoke_all_for(&self, identity_id: IdentityId, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Delete rows whose expiry has passed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: SessionRecord) -> Result<(), StoreError>;

    async fn get(&self, id: SessionId) -> Result<Option<SessionRecord>, StoreError>;

    /// Advance `last_activity_at`; never moves it backwards.
    async fn record_activity(&self, id: SessionId, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Returns whether a row was removed.
    async fn delete(&self, id: SessionId) -> Result<bool, StoreError>;

    async fn delete_all_for(&self, identity_id: IdentityId) -> Result<u64, StoreError>;

    /// Delete sessions past their absolute expiry or idle window.
    async fn purge_expired(
        &self,
        now: DateTime<Utc>,
        idle_timeout: chrono::Duration,
    ) -> Result<u64, StoreError>;
}

/// Role, permission and page catalog plus the three join relations.
#[async_trait]
pub trait RbacStore: Send + Sync {
    async fn list_roles(&self) -> Result<Vec<Role>, StoreError>;
    async fn get_role(&self, id: RoleId) -> Result<Option<Role>, StoreError>;
    async fn find_role_by_name(&self, name: &RoleName) -> Result<Option<Role>, StoreError>;
    async fn create_role(&self, role: Role, audit: AuditEntry) -> Result<(), StoreError>;
    async fn update_role(&self, role: Role, audit: AuditEntry) -> Result<(), StoreError>;
    /// Removes the role and cascades its assignment rows.
    async fn delete_role(&self, id: RoleId, audit: AuditEntry) -> Result<(), StoreError>;

    async fn list_permissions(&self) -> Result<Vec<Permission>, StoreError>;
    async fn get_permission(&self, id: PermissionId) -> Result<Option<Permission>, StoreError>;
    async fn create_permission(&self, permission: Permission, audit: AuditEntry) -> Result<(), StoreError>;
    async fn delete_permission(&self, id: PermissionId, audit: AuditEntry) -> Result<(), StoreError>;

    async fn list_pages(&self) -> Result<Vec<Page>, StoreError>;
    async fn get_page(&self, id: PageId) -> Result<Option<Page>, StoreError>;
    async fn find_page_by_name(&self, name: &PageName) -> Result<Option<Page>, StoreError>;
    async fn create_page(&self, page: Page, audit: AuditEntry) -> Result<(), StoreError>;
    async fn update_page(&self, page: Page, audit: AuditEntry) -> Result<(), StoreError>;
    /// Fails with `Conflict` while child pages reference it.
    async fn delete_page(&self, id: PageId, audit: AuditEntry) -> Result<(), StoreError>;

    async fn roles_for_identity(&self, identity_id: IdentityId) -> Result<Vec<Role>, StoreError>;
    async fn permissions_for_role(&self, role_id: RoleId) -> Result<Vec<Permission>, StoreError>;
    async fn page_ids_for_role(&self, role_id: RoleId) -> Result<Vec<PageId>, StoreError>;

    /// `Conflict` when the pair already exists.
    async fn assign_role(&self, identity_id: IdentityId, role_id: RoleId, audit: AuditEntry) -> Result<(), StoreError>;
    /// `NotFound` when the pair does not exist.
    async fn unassign_role(&self, identity_id: IdentityId, role_id: RoleId, audit: AuditEntry) -> Result<(), StoreError>;
    async fn grant_permission(&self, role_id: RoleId, permission_id: PermissionId, audit: AuditEntry) -> Result<(), StoreError>;
    async fn revoke_permission(&self, role_id: RoleId, permission_id: PermissionId, audit: AuditEntry) -> Result<(), StoreError>;
    async fn grant_page(&self, role_id: RoleId, page_id: PageId, audit: AuditEntry) -> Result<(), StoreError>;
    async fn revoke_page(&self, role_id: RoleId, page_id: PageId, audit: AuditEntry) -> Result<(), StoreError>;

    /// Apply a batch of page grants/revocations for one role atomically.
    /// Each change carries its own audit entry.
    async fn apply_page_changes(
        &self,
        role_id: RoleId,
        grants: Vec<(PageId, AuditEntry)>,
        revocations: Vec<(PageId, AuditEntry)>,
    ) -> Result<(), StoreError>;
}

/// Filter for reading the audit trail.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub identity_id: Option<IdentityId>,
    pub action: Option<AuditAction>,
    pub limit: usize,
}

/// Append-only audit storage. There is no update or delete.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> Result<(), StoreError>;

    /// Newest first.
    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>, StoreError>;
}

/// The complete set of stores the services need.
#[derive(Clone)]
pub struct Stores {
    pub identities: Arc<dyn IdentityStore>,
    pub refresh_tokens: Arc<dyn RefreshTokenStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub rbac: Arc<dyn RbacStore>,
    pub audit: Arc<dyn AuditStore>,
}

impl Stores {
    /// Use one backend for every store.
    pub fn shared<S>(backend: Arc<S>) -> Self
    where
        S: IdentityStore + RefreshTokenStore + SessionStore + RbacStore + AuditStore + 'static,
    {
        Self {
            identities: backend.clone(),
            refresh_tokens: backend.clone(),
            sessions: backend.clone(),
            rbac: backend.clone(),
            audit: backend,
        }
    }

    pub fn in_memory() -> Self {
        Self::shared(Arc::new(InMemoryStore::new()))
    }
}
