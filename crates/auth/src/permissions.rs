use serde::{Deserialize, Serialize};

use gatehouse_core::{DomainError, PermissionId};

use crate::naming::check_name;

/// Atomic capability expressed as `(resource, action)`, e.g. `(users, manage)`.
///
/// Rendered as `resource:action`. The wildcard `*:*` grants everything and is
/// reserved for the system administrator role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PermissionName {
    resource: String,
    action: String,
}

impl PermissionName {
    pub fn new(resource: &str, action: &str) -> Result<Self, DomainError> {
        if resource == "*" && action == "*" {
            return Ok(Self::wildcard());
        }
        check_name("permission resource", resource, 64, None)?;
        check_name("permission action", action, 64, None)?;
        Ok(Self {
            resource: resource.to_string(),
            action: action.to_string(),
        })
    }

    pub fn wildcard() -> Self {
        Self {
            resource: "*".to_string(),
            action: "*".to_string(),
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn is_wildcard(&self) -> bool {
        self.resource == "*" && self.action == "*"
    }
}

impl core::str::FromStr for PermissionName {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (resource, action) = s
            .split_once(':')
            .ok_or_else(|| DomainError::validation(format!("permission '{s}' must be 'resource:action'")))?;
        Self::new(resource, action)
    }
}

impl TryFrom<String> for PermissionName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PermissionName> for String {
    fn from(value: PermissionName) -> Self {
        value.to_string()
    }
}

impl core::fmt::Display for PermissionName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

/// Persisted permission row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub name: PermissionName,
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_resource_action_pairs() {
        let p: PermissionName = "users:manage".parse().unwrap();
        assert_eq!(p.resource(), "users");
        assert_eq!(p.action(), "manage");
        assert_eq!(p.to_string(), "users:manage");
    }

    #[test]
    fn wildcard_is_only_full_wildcard() {
        assert!("*:*".parse::<PermissionName>().unwrap().is_wildcard());
        assert!("*:read".parse::<PermissionName>().is_err());
        assert!("users".parse::<PermissionName>().is_err());
    }
}
