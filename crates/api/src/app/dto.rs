//! Request/response DTOs and JSON mapping helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gatehouse_auth::{Entitlements, HandleName, Identity, PageNode, PermissionName, RoleName};
use gatehouse_core::{AuditEntryId, IdentityId, PageId, SessionId};
use gatehouse_infra::{Audited, LoginOutcome};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub handle: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// Roles, permissions and the visible page tree.
#[derive(Debug, Serialize)]
pub struct EntitlementsView {
    pub roles: Vec<RoleName>,
    pub permissions: Vec<PermissionName>,
    pub pages: Vec<PageNode>,
}

impl From<&Entitlements> for EntitlementsView {
    fn from(value: &Entitlements) -> Self {
        Self {
            roles: value.roles.clone(),
            permissions: value.permissions.clone(),
            pages: value.page_tree(),
        }
    }
}

/// The refresh token itself travels only in its cookie.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub identity_id: IdentityId,
    pub handle: HandleName,
    pub session_id: SessionId,
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub refresh_expires_at: Option<DateTime<Utc>>,
    pub entitlements: EntitlementsView,
}

impl From<&LoginOutcome> for LoginResponse {
    fn from(value: &LoginOutcome) -> Self {
        Self {
            identity_id: value.identity_id,
            handle: value.handle.clone(),
            session_id: value.session_id,
            access_token: value.access.token.clone(),
            expires_at: value.access.expires_at,
            refresh_expires_at: value.refresh.as_ref().map(|r| r.expires_at),
            entitlements: EntitlementsView::from(&value.entitlements),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub identity_id: IdentityId,
    pub handle: HandleName,
    pub session_id: SessionId,
    #[serde(flatten)]
    pub entitlements: EntitlementsView,
}

/// Identity without its password hash.
#[derive(Debug, Serialize)]
pub struct IdentityView {
    pub id: IdentityId,
    pub handle: HandleName,
    pub active: bool,
    pub failed_login_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub password_changed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Identity> for IdentityView {
    fn from(value: Identity) -> Self {
        Self {
            id: value.id,
            handle: value.handle,
            active: value.active,
            failed_login_attempts: value.failed_login_attempts,
            locked_until: value.locked_until,
            last_login_at: value.last_login_at,
            password_changed_at: value.password_changed_at,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

/// Envelope for admin mutations: the resulting value and its audit entries.
#[derive(Debug, Serialize)]
pub struct AuditedResponse<T> {
    pub data: T,
    pub audit_ids: Vec<AuditEntryId>,
}

impl<T> AuditedResponse<T> {
    pub fn map<U>(audited: Audited<U>, f: impl FnOnce(U) -> T) -> Self {
        Self {
            data: f(audited.value),
            audit_ids: audited.audit_ids,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AssignRoleRequest {
    pub role_id: String,
}

#[derive(Debug, Deserialize)]
pub struct GrantPermissionRequest {
    pub permission_id: String,
}

#[derive(Debug, Deserialize)]
pub struct GrantPageRequest {
    pub page_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SetPagesRequest {
    pub page_ids: Vec<PageId>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditParams {
    pub identity_id: Option<String>,
    pub action: Option<String>,
    pub limit: Option<usize>,
}
