//! Append-only audit trail model.
//!
//! There is deliberately no way to express an update or delete of an entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use gatehouse_core::{AuditEntryId, IdentityId};

use crate::ClientMeta;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    LoginSucceeded,
    LoginFailed,
    AccountLocked,
    Logout,
    TokenRefreshed,
    PasswordChanged,
    IdentityCreated,
    IdentityUpdated,
    IdentityDeactivated,
    RoleCreated,
    RoleUpdated,
    RoleDeleted,
    PermissionCreated,
    PermissionDeleted,
    PageCreated,
    PageUpdated,
    PageDeleted,
    RoleAssigned,
    RoleUnassigned,
    PermissionGranted,
    PermissionRevoked,
    PageGranted,
    PageRevoked,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoginSucceeded => "auth.login_succeeded",
            Self::LoginFailed => "auth.login_failed",
            Self::AccountLocked => "auth.account_locked",
            Self::Logout => "auth.logout",
            Self::TokenRefreshed => "auth.token_refreshed",
            Self::PasswordChanged => "auth.password_changed",
            Self::IdentityCreated => "identity.created",
            Self::IdentityUpdated => "identity.updated",
            Self::IdentityDeactivated => "identity.deactivated",
            Self::RoleCreated => "role.created",
            Self::RoleUpdated => "role.updated",
            Self::RoleDeleted => "role.deleted",
            Self::PermissionCreated => "permission.created",
            Self::PermissionDeleted => "permission.deleted",
            Self::PageCreated => "page.created",
            Self::PageUpdated => "page.updated",
            Self::PageDeleted => "page.deleted",
            Self::RoleAssigned => "identity.role_assigned",
            Self::RoleUnassigned => "identity.role_unassigned",
            Self::PermissionGranted => "role.permission_granted",
            Self::PermissionRevoked => "role.permission_revoked",
            Self::PageGranted => "role.page_granted",
            Self::PageRevoked => "role.page_revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        ALL_ACTIONS.iter().copied().find(|a| a.as_str() == s)
    }
}

const ALL_ACTIONS: [AuditAction; 23] = [
    AuditAction::LoginSucceeded,
    AuditAction::LoginFailed,
    AuditAction::AccountLocked,
    AuditAction::Logout,
    AuditAction::TokenRefreshed,
    AuditAction::PasswordChanged,
    AuditAction::IdentityCreated,
    AuditAction::IdentityUpdated,
    AuditAction::IdentityDeactivated,
    AuditAction::RoleCreated,
    AuditAction::RoleUpdated,
    AuditAction::RoleDeleted,
    AuditAction::PermissionCreated,
    AuditAction::PermissionDeleted,
    AuditAction::PageCreated,
    AuditAction::PageUpdated,
    AuditAction::PageDeleted,
    AuditAction::RoleAssigned,
    AuditAction::RoleUnassigned,
    AuditAction::PermissionGranted,
    AuditAction::PermissionRevoked,
    AuditAction::PageGranted,
    AuditAction::PageRevoked,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Identity,
    Role,
    Permission,
    Page,
    RolePermission,
    RolePage,
    IdentityRole,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Role => "role",
            Self::Permission => "permission",
            Self::Page => "page",
            Self::RolePermission => "role_permission",
            Self::RolePage => "role_page",
            Self::IdentityRole => "identity_role",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            Self::Identity,
            Self::Role,
            Self::Permission,
            Self::Page,
            Self::RolePermission,
            Self::RolePage,
            Self::IdentityRole,
        ]
        .into_iter()
        .find(|k| k.as_str() == s)
    }
}

/// Audit entry before it is assigned an id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAuditEntry {
    /// Identity the action concerns; `None` for system actions.
    pub identity_id: Option<IdentityId>,
    pub action: AuditAction,
    pub entity_type: EntityKind,
    pub entity_id: Option<Uuid>,
    pub old_value: Option<JsonValue>,
    pub new_value: Option<JsonValue>,
    /// Identity that performed the action.
    pub performed_by: Option<IdentityId>,
    pub client: ClientMeta,
}

impl NewAuditEntry {
    pub fn new(action: AuditAction, entity_type: EntityKind) -> Self {
        Self {
            identity_id: None,
            action,
            entity_type,
            entity_id: None,
            old_value: None,
            new_value: None,
            performed_by: None,
            client: ClientMeta::default(),
        }
    }

    pub fn concerning(mut self, identity_id: IdentityId) -> Self {
        self.identity_id = Some(identity_id);
        self
    }

    pub fn entity(mut self, id: impl Into<Uuid>) -> Self {
        self.entity_id = Some(id.into());
        self
    }

    pub fn old_value(mut self, value: JsonValue) -> Self {
        self.old_value = Some(value);
        self
    }

    pub fn new_value(mut self, value: JsonValue) -> Self {
        self.new_value = Some(value);
        self
    }

    pub fn performed_by(mut self, actor: Option<IdentityId>) -> Self {
        self.performed_by = actor;
        self
    }

    pub fn client(mut self, client: ClientMeta) -> Self {
        self.client = client;
        self
    }

    pub fn into_entry(self, id: AuditEntryId, recorded_at: DateTime<Utc>) -> AuditEntry {
        AuditEntry {
            id,
            identity_id: self.identity_id,
            action: self.action,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            old_value: self.old_value,
            new_value: self.new_value,
            performed_by: self.performed_by,
            client: self.client,
            recorded_at,
        }
    }
}

/// Immutable, persisted audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditEntryId,
    pub identity_id: Option<IdentityId>,
    pub action: AuditAction,
    pub entity_type: EntityKind,
    pub entity_id: Option<Uuid>,
    pub old_value: Option<JsonValue>,
    pub new_value: Option<JsonValue>,
    pub performed_by: Option<IdentityId>,
    pub client: ClientMeta,
    pub recorded_at: DateTime<Utc>,
}
