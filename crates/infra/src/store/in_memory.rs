use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use gatehouse_auth::{
    AuditEntry, HandleName, Identity, LockoutPolicy, LockoutTransition, Page, PageName, Permission,
    RefreshTokenRecord, Role, RoleName, SessionRecord,
};
use gatehouse_core::{IdentityId, PageId, PermissionId, RefreshTokenId, RoleId, SessionId};

use super::{
    AuditQuery, AuditStore, IdentityStore, RbacStore, RefreshTokenStore, SessionStore, StoreError,
};

#[derive(Debug, Default)]
struct State {
    identities: HashMap<IdentityId, Identity>,
    refresh_tokens: HashMap<RefreshTokenId, RefreshTokenRecord>,
    sessions: HashMap<SessionId, SessionRecord>,
    roles: HashMap<RoleId, Role>,
    permissions: HashMap<PermissionId, Permission>,
    pages: HashMap<PageId, Page>,
    identity_roles: BTreeSet<(IdentityId, RoleId)>,
    role_permissions: BTreeSet<(RoleId, PermissionId)>,
    role_pages: BTreeSet<(RoleId, PageId)>,
    audit: Vec<AuditEntry>,
}

/// In-memory implementation of every store trait.
///
/// Intended for tests/dev. A single lock guards all state, so each mutation and
/// its audit entry commit together.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
    fail_audit_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent audit write fail with `Unavailable`.
    pub fn set_fail_audit_writes(&self, fail: bool) {
        self.fail_audit_writes.store(fail, Ordering::SeqCst);
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }

    /// Check that an audit entry could be written, before any mutation happens.
    fn ensure_audit_writable(&self) -> Result<(), StoreError> {
        if self.fail_audit_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("audit log unavailable".to_string()));
        }
        Ok(())
    }

    /// Run `mutate` and push the audit entries only if it succeeds.
    fn audited<T>(
        &self,
        audit: Vec<AuditEntry>,
        mutate: impl FnOnce(&mut State) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.ensure_audit_writable()?;
        let mut state = self.write()?;
        let out = mutate(&mut state)?;
        state.audit.extend(audit);
        Ok(out)
    }
}

#[async_trait]
impl IdentityStore for InMemoryStore {
    async fn get(&self, id: IdentityId) -> Result<Option<Identity>, StoreError> {
        Ok(self.read()?.identities.get(&id).cloned())
    }

    async fn find_by_handle(&self, handle: &HandleName) -> Result<Option<Identity>, StoreError> {
        Ok(self
            .read()?
            .identities
            .values()
            .find(|i| &i.handle == handle)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<Identity>, StoreError> {
        let mut all: Vec<Identity> = self.read()?.identities.values().cloned().collect();
        all.sort_by(|a, b| a.handle.cmp(&b.handle));
        Ok(all)
    }

    async fn create(&self, identity: Identity, audit: AuditEntry) -> Result<(), StoreError> {
        self.audited(vec![audit], |state| {
            if state.identities.values().any(|i| i.handle == identity.handle) {
                return Err(StoreError::Conflict(format!(
                    "handle '{}' already exists",
                    identity.handle
                )));
            }
            state.identities.insert(identity.id, identity);
            Ok(())
        })
    }

    async fn update(&self, identity: Identity, audit: AuditEntry) -> Result<(), StoreError> {
        self.audited(vec![audit], |state| {
            if state
                .identities
                .values()
                .any(|i| i.id != identity.id && i.handle == identity.handle)
            {
                return Err(StoreError::Conflict(format!(
                    "handle '{}' already exists",
                    identity.handle
                )));
            }
            let existing = state.identities.get_mut(&identity.id).ok_or(StoreError::NotFound)?;
            existing.handle = identity.handle;
            existing.active = identity.active;
            existing.updated_at = identity.updated_at;
            Ok(())
        })
    }

    async fn set_password_hash(
        &self,
        id: IdentityId,
        password_hash: String,
        now: DateTime<Utc>,
        audit: AuditEntry,
    ) -> Result<(), StoreError> {
        self.audited(vec![audit], |state| {
            let identity = state.identities.get_mut(&id).ok_or(StoreError::NotFound)?;
            identity.password_hash = password_hash;
            identity.password_changed_at = Some(now);
            identity.updated_at = now;
            Ok(())
        })
    }

    async fn record_failed_attempt(
        &self,
        id: IdentityId,
        policy: LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<LockoutTransition, StoreError> {
        let mut state = self.write()?;
        let identity = state.identities.get_mut(&id).ok_or(StoreError::NotFound)?;
        let transition = policy.register_failure(identity.lockout_state(), now);
        identity.failed_login_attempts = transition.state.failed_attempts;
        identity.locked_until = transition.state.locked_until;
        identity.updated_at = now;
        Ok(transition)
    }

    async fn record_successful_login(&self, id: IdentityId, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let identity = state.identities.get_mut(&id).ok_or(StoreError::NotFound)?;
        identity.failed_login_attempts = 0;
        identity.locked_until = None;
        identity.last_login_at = Some(now);
        identity.updated_at = now;
        Ok(())
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryStore {
    async fn insert(&self, record: RefreshTokenRecord) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if state.refresh_tokens.values().any(|r| r.token_hash == record.token_hash) {
            return Err(StoreError::Conflict("refresh token hash collision".to_string()));
        }
        state.refresh_tokens.insert(record.id, record);
        Ok(())
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>, StoreError> {
        Ok(self
            .read()?
            .refresh_tokens
            .values()
            .find(|r| r.token_hash == token_hash)
            .cloned())
    }

    async fn mark_used(&self, id: RefreshTokenId, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let record = state.refresh_tokens.get_mut(&id).ok_or(StoreError::NotFound)?;
        record.last_used_at = Some(now);
        Ok(())
    }

    async fn rotate(
        &self,
        presented: RefreshTokenId,
        replacement: RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.write()?;
        let record = state.refresh_tokens.get_mut(&presented).ok_or(StoreError::NotFound)?;
        if record.revoked {
            return Ok(false);
        }
        record.revoked = true;
        record.revoked_at = Some(now);
        state.refresh_tokens.insert(replacement.id, replacement);
        Ok(true)
    }

    async fn revoke(&self, id: RefreshTokenId, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if let Some(record) = state.refresh_tokens.get_mut(&id) {
            if !record.revoked {
                record.revoked = true;
                record.revoked_at = Some(now);
            }
        }
        Ok(())
    }

    async fn revoke_for_session(&self, session_id: SessionId, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.write()?;
        let mut count = 0;
        for record in state
            .refresh_tokens
            .values_mut()
            .filter(|r| r.session_id == Some(session_id) && !r.revoked)
        {
            record.revoked = true;
            record.revoked_at = Some(now);
            count += 1;
        }
        Ok(count)
    }

    async fn revoke_all_for(&self, identity_id: IdentityId, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.write()?;
        let mut count = 0;
        for record in state
            .refresh_tokens
            .values_mut()
            .filter(|r| r.identity_id == identity_id && !r.revoked)
        {
            record.revoked = true;
            record.revoked_at = Some(now);
            count += 1;
        }
        Ok(count)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.write()?;
        let before = state.refresh_tokens.len();
        state.refresh_tokens.retain(|_, r| r.expires_at > now);
        Ok((before - state.refresh_tokens.len()) as u64)
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn insert(&self, session: SessionRecord) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if state.sessions.contains_key(&session.id) {
            return Err(StoreError::Conflict("session already exists".to_string()));
        }
        state.sessions.insert(session.id, session);
        Ok(())
    }

    async fn get(&self, id: SessionId) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.read()?.sessions.get(&id).cloned())
    }

    async fn record_activity(&self, id: SessionId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let session = state.sessions.get_mut(&id).ok_or(StoreError::NotFound)?;
        session.last_activity_at = session.last_activity_at.max(at);
        Ok(())
    }

    async fn delete(&self, id: SessionId) -> Result<bool, StoreError> {
        Ok(self.write()?.sessions.remove(&id).is_some())
    }

    async fn delete_all_for(&self, identity_id: IdentityId) -> Result<u64, StoreError> {
        let mut state = self.write()?;
        let before = state.sessions.len();
        state.sessions.retain(|_, s| s.identity_id != identity_id);
        Ok((before - state.sessions.len()) as u64)
    }

    async fn purge_expired(
        &self,
        now: DateTime<Utc>,
        idle_timeout: chrono::Duration,
    ) -> Result<u64, StoreError> {
        let mut state = self.write()?;
        let before = state.sessions.len();
        state
            .sessions
            .retain(|_, s| s.expires_at >= now && now - s.last_activity_at <= idle_timeout);
        Ok((before - state.sessions.len()) as u64)
    }
}

#[async_trait]
impl RbacStore for InMemoryStore {
    async fn list_roles(&self) -> Result<Vec<Role>, StoreError> {
        let mut roles: Vec<Role> = self.read()?.roles.values().cloned().collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn get_role(&self, id: RoleId) -> Result<Option<Role>, StoreError> {
        Ok(self.read()?.roles.get(&id).cloned())
    }

    async fn find_role_by_name(&self, name: &RoleName) -> Result<Option<Role>, StoreError> {
        Ok(self.read()?.roles.values().find(|r| &r.name == name).cloned())
    }

    async fn create_role(&self, role: Role, audit: AuditEntry) -> Result<(), StoreError> {
        self.audited(vec![audit], |state| {
            if state.roles.values().any(|r| r.name == role.name) {
                return Err(StoreError::Conflict(format!("role '{}' already exists", role.name)));
            }
            state.roles.insert(role.id, role);
            Ok(())
        })
    }

    async fn update_role(&self, role: Role, audit: AuditEntry) -> Result<(), StoreError> {
        self.audited(vec![audit], |state| {
            if state.roles.values().any(|r| r.id != role.id && r.name == role.name) {
                return Err(StoreError::Conflict(format!("role '{}' already exists", role.name)));
            }
            let existing = state.roles.get_mut(&role.id).ok_or(StoreError::NotFound)?;
            *existing = role;
            Ok(())
        })
    }

    async fn delete_role(&self, id: RoleId, audit: AuditEntry) -> Result<(), StoreError> {
        self.audited(vec![audit], |state| {
            state.roles.remove(&id).ok_or(StoreError::NotFound)?;
            state.identity_roles.retain(|(_, r)| *r != id);
            state.role_permissions.retain(|(r, _)| *r != id);
            state.role_pages.retain(|(r, _)| *r != id);
            Ok(())
        })
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>, StoreError> {
        let mut all: Vec<Permission> = self.read()?.permissions.values().cloned().collect();
        all.sort_by(|a, b| a.name.to_string().cmp(&b.name.to_string()));
        Ok(all)
    }

    async fn get_permission(&self, id: PermissionId) -> Result<Option<Permission>, StoreError> {
        Ok(self.read()?.permissions.get(&id).cloned())
    }

    async fn create_permission(&self, permission: Permission, audit: AuditEntry) -> Result<(), StoreError> {
        self.audited(vec![audit], |state| {
            if state.permissions.values().any(|p| p.name == permission.name) {
                return Err(StoreError::Conflict(format!(
                    "permission '{}' already exists",
                    permission.name
                )));
            }
            state.permissions.insert(permission.id, permission);
            Ok(())
        })
    }

    async fn delete_permission(&self, id: PermissionId, audit: AuditEntry) -> Result<(), StoreError> {
        self.audited(vec![audit], |state| {
            state.permissions.remove(&id).ok_or(StoreError::NotFound)?;
            state.role_permissions.retain(|(_, p)| *p != id);
            Ok(())
        })
    }

    async fn list_pages(&self) -> Result<Vec<Page>, StoreError> {
        let mut pages: Vec<Page> = self.read()?.pages.values().cloned().collect();
        pages.sort_by(|a, b| (a.sort_order, &a.name).cmp(&(b.sort_order, &b.name)));
        Ok(pages)
    }

    async fn get_page(&self, id: PageId) -> Result<Option<Page>, StoreError> {
        Ok(self.read()?.pages.get(&id).cloned())
    }

    async fn find_page_by_name(&self, name: &PageName) -> Result<Option<Page>, StoreError> {
        Ok(self.read()?.pages.values().find(|p| &p.name == name).cloned())
    }

    async fn create_page(&self, page: Page, audit: AuditEntry) -> Result<(), StoreError> {
        self.audited(vec![audit], |state| {
            if state.pages.values().any(|p| p.name == page.name) {
                return Err(StoreError::Conflict(format!("page '{}' already exists", page.name)));
            }
            if let Some(parent) = page.parent_id {
                if !state.pages.contains_key(&parent) {
                    return Err(StoreError::NotFound);
                }
            }
            state.pages.insert(page.id, page);
            Ok(())
        })
    }

    async fn update_page(&self, page: Page, audit: AuditEntry) -> Result<(), StoreError> {
        self.audited(vec![audit], |state| {
            if state.pages.values().any(|p| p.id != page.id && p.name == page.name) {
                return Err(StoreError::Conflict(format!("page '{}' already exists", page.name)));
            }
            let existing = state.pages.get_mut(&page.id).ok_or(StoreError::NotFound)?;
            *existing = page;
            Ok(())
        })
    }

    async fn delete_page(&self, id: PageId, audit: AuditEntry) -> Result<(), StoreError> {
        self.audited(vec![audit], |state| {
            if !state.pages.contains_key(&id) {
                return Err(StoreError::NotFound);
            }
            if state.pages.values().any(|p| p.parent_id == Some(id)) {
                return Err(StoreError::Conflict("page still has child pages".to_string()));
            }
            state.pages.remove(&id);
            state.role_pages.retain(|(_, p)| *p != id);
            Ok(())
        })
    }

    async fn roles_for_identity(&self, identity_id: IdentityId) -> Result<Vec<Role>, StoreError> {
        let state = self.read()?;
        let mut roles: Vec<Role> = state
            .identity_roles
            .iter()
            .filter(|(i, _)| *i == identity_id)
            .filter_map(|(_, r)| state.roles.get(r).cloned())
            .collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn permissions_for_role(&self, role_id: RoleId) -> Result<Vec<Permission>, StoreError> {
        let state = self.read()?;
        Ok(state
            .role_permissions
            .iter()
            .filter(|(r, _)| *r == role_id)
            .filter_map(|(_, p)| state.permissions.get(p).cloned())
            .collect())
    }

    async fn page_ids_for_role(&self, role_id: RoleId) -> Result<Vec<PageId>, StoreError> {
        Ok(self
            .read()?
            .role_pages
            .iter()
            .filter(|(r, _)| *r == role_id)
            .map(|(_, p)| *p)
            .collect())
    }

    async fn assign_role(&self, identity_id: IdentityId, role_id: RoleId, audit: AuditEntry) -> Result<(), StoreError> {
        self.audited(vec![audit], |state| {
            if !state.identities.contains_key(&identity_id) || !state.roles.contains_key(&role_id) {
                return Err(StoreError::NotFound);
            }
            if !state.identity_roles.insert((identity_id, role_id)) {
                return Err(StoreError::Conflict("role already assigned".to_string()));
            }
            Ok(())
        })
    }

    async fn unassign_role(&self, identity_id: IdentityId, role_id: RoleId, audit: AuditEntry) -> Result<(), StoreError> {
        self.audited(vec![audit], |state| {
            if !state.identity_roles.remove(&(identity_id, role_id)) {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
    }

    async fn grant_permission(&self, role_id: RoleId, permission_id: PermissionId, audit: AuditEntry) -> Result<(), StoreError> {
        self.audited(vec![audit], |state| {
            if !state.roles.contains_key(&role_id) || !state.permissions.contains_key(&permission_id) {
                return Err(StoreError::NotFound);
            }
            if !state.role_permissions.insert((role_id, permission_id)) {
                return Err(StoreError::Conflict("permission already granted".to_string()));
            }
            Ok(())
        })
    }

    async fn revoke_permission(&self, role_id: RoleId, permission_id: PermissionId, audit: AuditEntry) -> Result<(), StoreError> {
        self.audited(vec![audit], |state| {
            if !state.role_permissions.remove(&(role_id, permission_id)) {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
    }

    async fn grant_page(&self, role_id: RoleId, page_id: PageId, audit: AuditEntry) -> Result<(), StoreError> {
        self.audited(vec![audit], |state| {
            if !state.roles.contains_key(&role_id) || !state.pages.contains_key(&page_id) {
                return Err(StoreError::NotFound);
            }
            if !state.role_pages.insert((role_id, page_id)) {
                return Err(StoreError::Conflict("page already granted".to_string()));
            }
            Ok(())
        })
    }

    async fn revoke_page(&self, role_id: RoleId, page_id: PageId, audit: AuditEntry) -> Result<(), StoreError> {
        self.audited(vec![audit], |state| {
            if !state.role_pages.remove(&(role_id, page_id)) {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
    }

    async fn apply_page_changes(
        &self,
        role_id: RoleId,
        grants: Vec<(PageId, AuditEntry)>,
        revocations: Vec<(PageId, AuditEntry)>,
    ) -> Result<(), StoreError> {
        let (grant_ids, mut entries): (Vec<PageId>, Vec<AuditEntry>) = grants.into_iter().unzip();
        let (revoke_ids, revoke_entries): (Vec<PageId>, Vec<AuditEntry>) = revocations.into_iter().unzip();
        entries.extend(revoke_entries);

        self.audited(entries, |state| {
            if !state.roles.contains_key(&role_id) {
                return Err(StoreError::NotFound);
            }
            if grant_ids.iter().any(|p| !state.pages.contains_key(p)) {
                return Err(StoreError::NotFound);
            }
            for page_id in &revoke_ids {
                state.role_pages.remove(&(role_id, *page_id));
            }
            for page_id in grant_ids {
                state.role_pages.insert((role_id, page_id));
            }
            Ok(())
        })
    }
}

#[async_trait]
impl AuditStore for InMemoryStore {
    async fn append(&self, entry: AuditEntry) -> Result<(), StoreError> {
        self.audited(vec![entry], |_| Ok(()))
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>, StoreError> {
        let state = self.read()?;
        let limit = if query.limit == 0 { usize::MAX } else { query.limit };
        Ok(state
            .audit
            .iter()
            .rev()
            .filter(|e| query.identity_id.is_none_or(|id| e.identity_id == Some(id)))
            .filter(|e| query.action.is_none_or(|a| e.action == a))
            .take(limit)
            .cloned()
            .collect())
    }
}
