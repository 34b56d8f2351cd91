//! Guard predicates shared by route enforcement and UI visibility filtering.
//!
//! - No IO
//! - No panics
//! - Pure checks against the resolved entitlement set

use thiserror::Error;

use crate::{PageName, PermissionName, Principal, RoleName};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: page '{0}' is not granted")]
    MissingPage(String),

    #[error("forbidden: requires one of roles {0:?}")]
    MissingRole(Vec<String>),

    #[error("forbidden: missing permission '{0}'")]
    MissingPermission(String),
}

pub fn require_page_access(principal: &Principal, page: &PageName) -> Result<(), AuthzError> {
    if principal.entitlements.has_page(page) {
        Ok(())
    } else {
        Err(AuthzError::MissingPage(page.to_string()))
    }
}

/// Passes when the principal holds **any** of `roles`.
pub fn require_role(principal: &Principal, roles: &[RoleName]) -> Result<(), AuthzError> {
    if roles.iter().any(|r| principal.entitlements.has_role(r)) {
        Ok(())
    } else {
        Err(AuthzError::MissingRole(
            roles.iter().map(|r| r.to_string()).collect(),
        ))
    }
}

pub fn require_permission(principal: &Principal, required: &PermissionName) -> Result<(), AuthzError> {
    if principal.entitlements.has_permission(required) {
        Ok(())
    } else {
        Err(AuthzError::MissingPermission(required.to_string()))
    }
}
