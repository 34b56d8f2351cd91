//! Administrative surface over identities and the RBAC catalog.
//!
//! Every mutation is persisted together with its audit entry, and returns the
//! ids of the entries it wrote.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use gatehouse_auth::{
    AuditAction, AuditEntry, AuthError, ClientMeta, EntityKind, HandleName, Identity,
    NewAuditEntry, Page, PageName, PasswordPolicy, PasswordService, Permission, PermissionName,
    PolicyViolation, Role, RoleName, ensure_acyclic,
};
use gatehouse_core::{AuditEntryId, Clock, DomainError, IdentityId, PageId, PermissionId, RoleId};

use crate::audit::AuditRecorder;
use crate::orchestrator::{check_policy, hash_password};
use crate::sessions::SessionTracker;
use crate::store::{AuditQuery, IdentityStore, RbacStore, StoreError};
use crate::tokens::TokenService;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdminError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{0}")]
    Protected(String),

    #[error("validation failed: {message}")]
    Validation {
        message: String,
        violations: Vec<PolicyViolation>,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl AdminError {
    fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            violations: Vec::new(),
        }
    }
}

impl From<StoreError> for AdminError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound => Self::NotFound("record"),
            StoreError::Conflict(msg) => Self::Conflict(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<DomainError> for AdminError {
    fn from(value: DomainError) -> Self {
        Self::validation(value.to_string())
    }
}

impl From<AuthError> for AdminError {
    fn from(value: AuthError) -> Self {
        match value {
            AuthError::Validation { message, violations } => Self::Validation { message, violations },
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Who is performing an administrative change. `identity_id` is `None` for
/// system bootstrap.
#[derive(Debug, Clone, Default)]
pub struct Actor {
    pub identity_id: Option<IdentityId>,
    pub client: ClientMeta,
}

impl Actor {
    pub fn new(identity_id: IdentityId, client: ClientMeta) -> Self {
        Self {
            identity_id: Some(identity_id),
            client,
        }
    }

    pub fn system() -> Self {
        Self::default()
    }
}

/// Result of a mutation plus the audit entries it produced.
#[derive(Debug, Clone)]
pub struct Audited<T> {
    pub value: T,
    pub audit_ids: Vec<AuditEntryId>,
}

impl<T> Audited<T> {
    fn one(value: T, entry: &AuditEntry) -> Self {
        Self {
            value,
            audit_ids: vec![entry.id],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateIdentity {
    pub handle: String,
    /// Falls back to the configured default password.
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateIdentity {
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRole {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRole {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePermission {
    pub resource: String,
    pub action: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePage {
    pub name: String,
    pub label: String,
    #[serde(default)]
    pub route: Option<String>,
    #[serde(default)]
    pub parent_id: Option<PageId>,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default)]
    pub system_defined: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePage {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub route: Option<String>,
    #[serde(default)]
    pub parent_id: Option<PageId>,
    /// Move the page to the root. Takes precedence over `parent_id`.
    #[serde(default)]
    pub clear_parent: bool,
    #[serde(default)]
    pub sort_order: Option<i32>,
}

#[derive(Clone)]
pub struct AdminService {
    identities: Arc<dyn IdentityStore>,
    rbac: Arc<dyn RbacStore>,
    passwords: PasswordService,
    password_policy: PasswordPolicy,
    default_password: Option<String>,
    sessions: SessionTracker,
    tokens: TokenService,
    audit: AuditRecorder,
    clock: Arc<dyn Clock>,
}

pub struct AdminParts {
    pub identities: Arc<dyn IdentityStore>,
    pub rbac: Arc<dyn RbacStore>,
    pub passwords: PasswordService,
    pub password_policy: PasswordPolicy,
    pub default_password: Option<String>,
    pub sessions: SessionTracker,
    pub tokens: TokenService,
    pub audit: AuditRecorder,
    pub clock: Arc<dyn Clock>,
}

impl AdminService {
    pub fn new(parts: AdminParts) -> Self {
        Self {
            identities: parts.identities,
            rbac: parts.rbac,
            passwords: parts.passwords,
            password_policy: parts.password_policy,
            default_password: parts.default_password,
            sessions: parts.sessions,
            tokens: parts.tokens,
            audit: parts.audit,
            clock: parts.clock,
        }
    }

    fn entry(&self, actor: &Actor, action: AuditAction, kind: EntityKind) -> NewAuditEntry {
        NewAuditEntry::new(action, kind)
            .performed_by(actor.identity_id)
            .client(actor.client.clone())
    }

    // ── identities ──────────────────────────────────────────────────────────

    pub async fn list_identities(&self) -> Result<Vec<Identity>, AdminError> {
        Ok(self.identities.list().await?)
    }

    pub async fn get_identity(&self, id: IdentityId) -> Result<Identity, AdminError> {
        self.identities.get(id).await?.ok_or(AdminError::NotFound("identity"))
    }

    pub async fn create_identity(&self, actor: &Actor, input: CreateIdentity) -> Result<Audited<Identity>, AdminError> {
        let handle = HandleName::parse(&input.handle)?;
        let password = input
            .password
            .or_else(|| self.default_password.clone())
            .ok_or_else(|| AdminError::validation("password is required when no default password is configured"))?;
        check_policy(&self.password_policy, &password)?;
        let hash = hash_password(&self.passwords, &password).await?;

        let identity = Identity::new(handle, hash, self.clock.now());
        let audit = self.audit.prepare(
            self.entry(actor, AuditAction::IdentityCreated, EntityKind::Identity)
                .concerning(identity.id)
                .entity(identity.id)
                .new_value(identity.audit_snapshot()),
        );
        self.identities.create(identity.clone(), audit.clone()).await?;
        tracing::info!(identity_id = %identity.id, handle = %identity.handle, "identity created");
        Ok(Audited::one(identity, &audit))
    }

    /// Deactivating an identity also ends all of its sessions and refresh tokens.
    pub async fn update_identity(
        &self,
        actor: &Actor,
        id: IdentityId,
        input: UpdateIdentity,
    ) -> Result<Audited<Identity>, AdminError> {
        let before = self.get_identity(id).await?;
        let mut after = before.clone();
        if let Some(handle) = input.handle {
            after.handle = HandleName::parse(&handle)?;
        }
        if let Some(active) = input.active {
            after.active = active;
        }
        after.updated_at = self.clock.now();

        let deactivated = before.active && !after.active;
        let action = if deactivated {
            AuditAction::IdentityDeactivated
        } else {
            AuditAction::IdentityUpdated
        };
        let audit = self.audit.prepare(
            self.entry(actor, action, EntityKind::Identity)
                .concerning(id)
                .entity(id)
                .old_value(before.audit_snapshot())
                .new_value(after.audit_snapshot()),
        );
        self.identities.update(after.clone(), audit.clone()).await?;

        if deactivated {
            self.sessions.revoke_all_for(id).await?;
            self.tokens.revoke_all_for(id).await?;
            tracing::info!(identity_id = %id, "identity deactivated");
        }
        Ok(Audited::one(after, &audit))
    }

    pub async fn roles_of(&self, identity_id: IdentityId) -> Result<Vec<Role>, AdminError> {
        self.get_identity(identity_id).await?;
        Ok(self.rbac.roles_for_identity(identity_id).await?)
    }

    pub async fn assign_role(
        &self,
        actor: &Actor,
        identity_id: IdentityId,
        role_id: RoleId,
    ) -> Result<Audited<()>, AdminError> {
        let identity = self.get_identity(identity_id).await?;
        let role = self.get_role(role_id).await?;
        let audit = self.audit.prepare(
            self.entry(actor, AuditAction::RoleAssigned, EntityKind::IdentityRole)
                .concerning(identity_id)
                .entity(role_id)
                .new_value(json!({ "identity": identity.handle, "role": role.name })),
        );
        self.rbac.assign_role(identity_id, role_id, audit.clone()).await?;
        Ok(Audited::one((), &audit))
    }

    pub async fn unassign_role(
        &self,
        actor: &Actor,
        identity_id: IdentityId,
        role_id: RoleId,
    ) -> Result<Audited<()>, AdminError> {
        let role = self.get_role(role_id).await?;
        let audit = self.audit.prepare(
            self.entry(actor, AuditAction::RoleUnassigned, EntityKind::IdentityRole)
                .concerning(identity_id)
                .entity(role_id)
                .old_value(json!({ "identity_id": identity_id, "role": role.name })),
        );
        self.rbac
            .unassign_role(identity_id, role_id, audit.clone())
            .await
            .map_err(|e| match e {
                StoreError::NotFound => AdminError::NotFound("role assignment"),
                other => other.into(),
            })?;
        Ok(Audited::one((), &audit))
    }

    // ── roles ───────────────────────────────────────────────────────────────

    pub async fn list_roles(&self) -> Result<Vec<Role>, AdminError> {
        Ok(self.rbac.list_roles().await?)
    }

    pub async fn get_role(&self, id: RoleId) -> Result<Role, AdminError> {
        self.rbac.get_role(id).await?.ok_or(AdminError::NotFound("role"))
    }

    pub async fn create_role(&self, actor: &Actor, input: CreateRole) -> Result<Audited<Role>, AdminError> {
        let name = RoleName::parse(input.name)?;
        if self.rbac.find_role_by_name(&name).await?.is_some() {
            return Err(AdminError::Conflict(format!("role '{name}' already exists")));
        }
        let now = self.clock.now();
        let role = Role {
            id: RoleId::new(),
            name,
            description: input.description,
            system_defined: false,
            created_at: now,
            updated_at: now,
        };
        let audit = self.audit.prepare(
            self.entry(actor, AuditAction::RoleCreated, EntityKind::Role)
                .entity(role.id)
                .new_value(json!(role)),
        );
        self.rbac.create_role(role.clone(), audit.clone()).await?;
        Ok(Audited::one(role, &audit))
    }

    /// System roles keep their name; only the description may change.
    pub async fn update_role(&self, actor: &Actor, id: RoleId, input: UpdateRole) -> Result<Audited<Role>, AdminError> {
        let before = self.get_role(id).await?;
        let mut after = before.clone();
        if let Some(name) = input.name {
            let name = RoleName::parse(name)?;
            if before.system_defined && name != before.name {
                return Err(AdminError::Protected(format!(
                    "role '{}' is system-defined and cannot be renamed",
                    before.name
                )));
            }
            after.name = name;
        }
        if input.description.is_some() {
            after.description = input.description;
        }
        after.updated_at = self.clock.now();

        let audit = self.audit.prepare(
            self.entry(actor, AuditAction::RoleUpdated, EntityKind::Role)
                .entity(id)
                .old_value(json!(before))
                .new_value(json!(after)),
        );
        self.rbac.update_role(after.clone(), audit.clone()).await?;
        Ok(Audited::one(after, &audit))
    }

    pub async fn delete_role(&self, actor: &Actor, id: RoleId) -> Result<Audited<()>, AdminError> {
        let role = self.get_role(id).await?;
        role.ensure_deletable()
            .map_err(|e| AdminError::Protected(e.to_string()))?;

        let audit = self.audit.prepare(
            self.entry(actor, AuditAction::RoleDeleted, EntityKind::Role)
                .entity(id)
                .old_value(json!(role)),
        );
        self.rbac.delete_role(id, audit.clone()).await?;
        Ok(Audited::one((), &audit))
    }

    // ── permissions ─────────────────────────────────────────────────────────

    pub async fn list_permissions(&self) -> Result<Vec<Permission>, AdminError> {
        Ok(self.rbac.list_permissions().await?)
    }

    pub async fn permissions_of(&self, role_id: RoleId) -> Result<Vec<Permission>, AdminError> {
        self.get_role(role_id).await?;
        Ok(self.rbac.permissions_for_role(role_id).await?)
    }

    pub async fn create_permission(
        &self,
        actor: &Actor,
        input: CreatePermission,
    ) -> Result<Audited<Permission>, AdminError> {
        let permission = Permission {
            id: PermissionId::new(),
            name: PermissionName::new(&input.resource, &input.action)?,
            description: input.description,
        };
        let audit = self.audit.prepare(
            self.entry(actor, AuditAction::PermissionCreated, EntityKind::Permission)
                .entity(permission.id)
                .new_value(json!(permission)),
        );
        self.rbac.create_permission(permission.clone(), audit.clone()).await?;
        Ok(Audited::one(permission, &audit))
    }

    pub async fn delete_permission(&self, actor: &Actor, id: PermissionId) -> Result<Audited<()>, AdminError> {
        let permission = self
            .rbac
            .get_permission(id)
            .await?
            .ok_or(AdminError::NotFound("permission"))?;
        let audit = self.audit.prepare(
            self.entry(actor, AuditAction::PermissionDeleted, EntityKind::Permission)
                .entity(id)
                .old_value(json!(permission)),
        );
        self.rbac.delete_permission(id, audit.clone()).await?;
        Ok(Audited::one((), &audit))
    }

    pub async fn grant_permission(
        &self,
        actor: &Actor,
        role_id: RoleId,
        permission_id: PermissionId,
    ) -> Result<Audited<()>, AdminError> {
        let role = self.get_role(role_id).await?;
        let permission = self
            .rbac
            .get_permission(permission_id)
            .await?
            .ok_or(AdminError::NotFound("permission"))?;
        let audit = self.audit.prepare(
            self.entry(actor, AuditAction::PermissionGranted, EntityKind::RolePermission)
                .entity(role_id)
                .new_value(json!({ "role": role.name, "permission": permission.name })),
        );
        self.rbac.grant_permission(role_id, permission_id, audit.clone()).await?;
        Ok(Audited::one((), &audit))
    }

    pub async fn revoke_permission(
        &self,
        actor: &Actor,
        role_id: RoleId,
        permission_id: PermissionId,
    ) -> Result<Audited<()>, AdminError> {
        let audit = self.audit.prepare(
            self.entry(actor, AuditAction::PermissionRevoked, EntityKind::RolePermission)
                .entity(role_id)
                .old_value(json!({ "role_id": role_id, "permission_id": permission_id })),
        );
        self.rbac
            .revoke_permission(role_id, permission_id, audit.clone())
            .await
            .map_err(|e| match e {
                StoreError::NotFound => AdminError::NotFound("permission grant"),
                other => other.into(),
            })?;
        Ok(Audited::one((), &audit))
    }

    // ── pages ───────────────────────────────────────────────────────────────

    pub async fn list_pages(&self) -> Result<Vec<Page>, AdminError> {
        Ok(self.rbac.list_pages().await?)
    }

    pub async fn get_page(&self, id: PageId) -> Result<Page, AdminError> {
        self.rbac.get_page(id).await?.ok_or(AdminError::NotFound("page"))
    }

    pub async fn create_page(&self, actor: &Actor, input: CreatePage) -> Result<Audited<Page>, AdminError> {
        if let Some(parent) = input.parent_id {
            self.rbac
                .get_page(parent)
                .await?
                .ok_or(AdminError::NotFound("parent page"))?;
        }
        let name = PageName::parse(input.name)?;
        if self.rbac.find_page_by_name(&name).await?.is_some() {
            return Err(AdminError::Conflict(format!("page '{name}' already exists")));
        }
        let now = self.clock.now();
        let page = Page {
            id: PageId::new(),
            name,
            label: non_blank("label", input.label)?,
            route: input.route,
            parent_id: input.parent_id,
            system_defined: input.system_defined,
            sort_order: input.sort_order,
            created_at: now,
            updated_at: now,
        };
        let audit = self.audit.prepare(
            self.entry(actor, AuditAction::PageCreated, EntityKind::Page)
                .entity(page.id)
                .new_value(json!(page)),
        );
        self.rbac.create_page(page.clone(), audit.clone()).await?;
        Ok(Audited::one(page, &audit))
    }

    pub async fn update_page(&self, actor: &Actor, id: PageId, input: UpdatePage) -> Result<Audited<Page>, AdminError> {
        let before = self.get_page(id).await?;
        let mut after = before.clone();
        if let Some(name) = input.name {
            after.name = PageName::parse(name)?;
        }
        if let Some(label) = input.label {
            after.label = non_blank("label", label)?;
        }
        if input.route.is_some() {
            after.route = input.route;
        }
        if let Some(order) = input.sort_order {
            after.sort_order = order;
        }

        let new_parent = if input.clear_parent {
            None
        } else {
            input.parent_id.or(before.parent_id)
        };
        if new_parent != before.parent_id {
            let pages = self.rbac.list_pages().await?;
            if let Some(parent) = new_parent {
                if !pages.iter().any(|p| p.id == parent) {
                    return Err(AdminError::NotFound("parent page"));
                }
            }
            ensure_acyclic(&pages, id, new_parent)?;
            after.parent_id = new_parent;
        }
        after.updated_at = self.clock.now();

        let audit = self.audit.prepare(
            self.entry(actor, AuditAction::PageUpdated, EntityKind::Page)
                .entity(id)
                .old_value(json!(before))
                .new_value(json!(after)),
        );
        self.rbac.update_page(after.clone(), audit.clone()).await?;
        Ok(Audited::one(after, &audit))
    }

    pub async fn delete_page(&self, actor: &Actor, id: PageId) -> Result<Audited<()>, AdminError> {
        let page = self.get_page(id).await?;
        page.ensure_deletable()
            .map_err(|e| AdminError::Protected(e.to_string()))?;

        let audit = self.audit.prepare(
            self.entry(actor, AuditAction::PageDeleted, EntityKind::Page)
                .entity(id)
                .old_value(json!(page)),
        );
        self.rbac.delete_page(id, audit.clone()).await?;
        Ok(Audited::one((), &audit))
    }

    pub async fn pages_of(&self, role_id: RoleId) -> Result<Vec<PageId>, AdminError> {
        self.get_role(role_id).await?;
        Ok(self.rbac.page_ids_for_role(role_id).await?)
    }

    pub async fn grant_page(&self, actor: &Actor, role_id: RoleId, page_id: PageId) -> Result<Audited<()>, AdminError> {
        let role = self.get_role(role_id).await?;
        let page = self.get_page(page_id).await?;
        let audit = self.audit.prepare(self.page_grant_entry(actor, &role, &page));
        self.rbac.grant_page(role_id, page_id, audit.clone()).await?;
        Ok(Audited::one((), &audit))
    }

    pub async fn revoke_page(&self, actor: &Actor, role_id: RoleId, page_id: PageId) -> Result<Audited<()>, AdminError> {
        let role = self.get_role(role_id).await?;
        let page = self.get_page(page_id).await?;
        let audit = self.audit.prepare(self.page_revoke_entry(actor, &role, &page));
        self.rbac
            .revoke_page(role_id, page_id, audit.clone())
            .await
            .map_err(|e| match e {
                StoreError::NotFound => AdminError::NotFound("page grant"),
                other => other.into(),
            })?;
        Ok(Audited::one((), &audit))
    }

    /// Replace a role's full page set. One audit entry per page actually
    /// granted or revoked; unchanged pages produce none.
    pub async fn set_role_pages(
        &self,
        actor: &Actor,
        role_id: RoleId,
        page_ids: Vec<PageId>,
    ) -> Result<Audited<()>, AdminError> {
        let role = self.get_role(role_id).await?;
        let catalog = self.rbac.list_pages().await?;
        let current: BTreeSet<PageId> = self.rbac.page_ids_for_role(role_id).await?.into_iter().collect();
        let wanted: BTreeSet<PageId> = page_ids.into_iter().collect();

        let page = |id: &PageId| catalog.iter().find(|p| p.id == *id);

        let mut grants = Vec::new();
        for id in wanted.difference(&current) {
            let page = page(id).ok_or(AdminError::NotFound("page"))?;
            grants.push((*id, self.audit.prepare(self.page_grant_entry(actor, &role, page))));
        }
        let mut revocations = Vec::new();
        for id in current.difference(&wanted) {
            let entry = match page(id) {
                Some(page) => self.page_revoke_entry(actor, &role, page),
                None => self
                    .entry(actor, AuditAction::PageRevoked, EntityKind::RolePage)
                    .entity(role_id)
                    .old_value(json!({ "role": role.name, "page_id": id })),
            };
            revocations.push((*id, self.audit.prepare(entry)));
        }

        let audit_ids = grants
            .iter()
            .chain(revocations.iter())
            .map(|(_, entry)| entry.id)
            .collect();
        if !grants.is_empty() || !revocations.is_empty() {
            self.rbac.apply_page_changes(role_id, grants, revocations).await?;
        }
        Ok(Audited {
            value: (),
            audit_ids,
        })
    }

    fn page_grant_entry(&self, actor: &Actor, role: &Role, page: &Page) -> NewAuditEntry {
        self.entry(actor, AuditAction::PageGranted, EntityKind::RolePage)
            .entity(role.id)
            .new_value(json!({ "role": role.name, "page": page.name, "page_id": page.id }))
    }

    fn page_revoke_entry(&self, actor: &Actor, role: &Role, page: &Page) -> NewAuditEntry {
        self.entry(actor, AuditAction::PageRevoked, EntityKind::RolePage)
            .entity(role.id)
            .old_value(json!({ "role": role.name, "page": page.name, "page_id": page.id }))
    }

    // ── audit ───────────────────────────────────────────────────────────────

    pub async fn audit_log(&self, query: AuditQuery) -> Result<Vec<AuditEntry>, AdminError> {
        Ok(self.audit.query(query).await?)
    }

    // ── bootstrap ───────────────────────────────────────────────────────────

    /// Ensure the system `admin` role exists and holds the `*:*` permission.
    pub async fn seed_system_roles(&self) -> Result<Role, AdminError> {
        let actor = Actor::system();
        let role = match self.rbac.find_role_by_name(&RoleName::admin()).await? {
            Some(role) => role,
            None => {
                let now = self.clock.now();
                let role = Role {
                    id: RoleId::new(),
                    name: RoleName::admin(),
                    description: Some("Full administrative access".to_string()),
                    system_defined: true,
                    created_at: now,
                    updated_at: now,
                };
                let audit = self.audit.prepare(
                    self.entry(&actor, AuditAction::RoleCreated, EntityKind::Role)
                        .entity(role.id)
                        .new_value(json!(role)),
                );
                self.rbac.create_role(role.clone(), audit).await?;
                tracing::info!(role_id = %role.id, "seeded system admin role");
                role
            }
        };

        let wildcard = PermissionName::wildcard();
        let permission = match self
            .rbac
            .list_permissions()
            .await?
            .into_iter()
            .find(|p| p.name == wildcard)
        {
            Some(p) => p,
            None => {
                self.create_permission(
                    &actor,
                    CreatePermission {
                        resource: wildcard.resource().to_string(),
                        action: wildcard.action().to_string(),
                        description: Some("Every action on every resource".to_string()),
                    },
                )
                .await?
                .value
            }
        };

        let granted = self.rbac.permissions_for_role(role.id).await?;
        if !granted.iter().any(|p| p.id == permission.id) {
            self.grant_permission(&actor, role.id, permission.id).await?;
        }
        Ok(role)
    }

    /// Create `handle` with the admin role unless it already exists.
    pub async fn ensure_admin_identity(&self, handle: &str, password: Option<String>) -> Result<Identity, AdminError> {
        let admin_role = self.seed_system_roles().await?;
        let parsed = HandleName::parse(handle)?;
        if let Some(existing) = self.identities.find_by_handle(&parsed).await? {
            return Ok(existing);
        }
        let actor = Actor::system();
        let identity = self
            .create_identity(
                &actor,
                CreateIdentity {
                    handle: handle.to_string(),
                    password,
                },
            )
            .await?
            .value;
        self.assign_role(&actor, identity.id, admin_role.id).await?;
        Ok(identity)
    }
}

fn non_blank(field: &str, value: String) -> Result<String, AdminError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AdminError::validation(format!("{field} cannot be empty")));
    }
    Ok(trimmed.to_string())
}
