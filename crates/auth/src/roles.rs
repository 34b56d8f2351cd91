use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gatehouse_core::{DomainError, RoleId};

use crate::naming::check_name;

/// Name of the built-in administrative role.
pub const ADMIN_ROLE: &str = "admin";

/// Validated role name used for RBAC.
///
/// Names are checked once at the boundary (insert/update, token decode); the
/// resolver and guards compare validated values only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoleName(Cow<'static, str>);

impl RoleName {
    pub fn parse(name: impl Into<Cow<'static, str>>) -> Result<Self, DomainError> {
        let name = name.into();
        check_name("role name", &name, 64, None)?;
        Ok(Self(name))
    }

    pub fn admin() -> Self {
        Self(Cow::Borrowed(ADMIN_ROLE))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_admin(&self) -> bool {
        self.as_str() == ADMIN_ROLE
    }
}

impl TryFrom<String> for RoleName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<RoleName> for String {
    fn from(value: RoleName) -> Self {
        value.0.into_owned()
    }
}

impl core::fmt::Display for RoleName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named bundle of capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: RoleName,
    pub description: Option<String>,
    /// System-defined roles cannot be deleted through the admin surface.
    pub system_defined: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn ensure_deletable(&self) -> Result<(), DomainError> {
        if self.system_defined {
            return Err(DomainError::invariant(format!(
                "role '{}' is system-defined and cannot be deleted",
                self.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_simple_names() {
        assert!(RoleName::parse("sales_manager").is_ok());
        assert!(RoleName::parse("ops-2").is_ok());
    }

    #[test]
    fn rejects_malformed_names() {
        assert!(RoleName::parse("").is_err());
        assert!(RoleName::parse("Admin").is_err());
        assert!(RoleName::parse("9lives").is_err());
        assert!(RoleName::parse("a.b").is_err());
    }

    #[test]
    fn deserialization_validates() {
        let ok: Result<RoleName, _> = serde_json::from_str("\"viewer\"");
        assert!(ok.is_ok());
        let bad: Result<RoleName, _> = serde_json::from_str("\"DROP TABLE\"");
        assert!(bad.is_err());
    }

    #[test]
    fn system_roles_refuse_deletion() {
        let now = Utc::now();
        let role = Role {
            id: RoleId::new(),
            name: RoleName::admin(),
            description: None,
            system_defined: true,
            created_at: now,
            updated_at: now,
        };
        assert!(role.ensure_deletable().is_err());
    }
}
