//! Identities: named principals that authenticate with a secret.
//!
//! Identities are never physically deleted while history references them;
//! deactivation flips `active` instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gatehouse_core::{DomainError, IdentityId};

use crate::lockout::LockoutState;

/// Unique login handle. Compared case-insensitively (stored lowercase).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HandleName(String);

impl HandleName {
    pub fn parse(handle: impl AsRef<str>) -> Result<Self, DomainError> {
        let handle = handle.as_ref().trim().to_lowercase();
        if handle.len() < 2 || handle.len() > 64 {
            return Err(DomainError::validation("handle must be 2 to 64 characters"));
        }
        if !handle
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '@' | '+'))
        {
            return Err(DomainError::validation(
                "handle may only contain letters, digits and . _ - @ +",
            ));
        }
        Ok(Self(handle))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for HandleName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<HandleName> for String {
    fn from(value: HandleName) -> Self {
        value.0
    }
}

impl core::fmt::Display for HandleName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persisted identity row.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: IdentityId,
    pub handle: HandleName,
    pub password_hash: String,
    pub active: bool,
    pub failed_login_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub password_changed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Identity {
    pub fn new(handle: HandleName, password_hash: String, now: DateTime<Utc>) -> Self {
        Self {
            id: IdentityId::new(),
            handle,
            password_hash,
            active: true,
            failed_login_attempts: 0,
            locked_until: None,
            last_login_at: None,
            password_changed_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn lockout_state(&self) -> LockoutState {
        LockoutState {
            failed_attempts: self.failed_login_attempts,
            locked_until: self.locked_until,
        }
    }

    /// Snapshot used for audit old/new values. Never includes the hash.
    pub fn audit_snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "handle": self.handle,
            "active": self.active,
        })
    }
}

impl core::fmt::Debug for Identity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .field("password_hash", &"<redacted>")
            .field("active", &self.active)
            .field("failed_login_attempts", &self.failed_login_attempts)
            .field("locked_until", &self.locked_until)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_normalized() {
        let h = HandleName::parse("  Alice@Example.com ").unwrap();
        assert_eq!(h.as_str(), "alice@example.com");
    }

    #[test]
    fn handles_reject_spaces() {
        assert!(HandleName::parse("al ice").is_err());
        assert!(HandleName::parse("a").is_err());
    }

    #[test]
    fn handles_order_by_normalized_text() {
        let mut handles: Vec<HandleName> = ["carol", "Alice", "bob"]
            .into_iter()
            .map(|h| HandleName::parse(h).unwrap())
            .collect();
        handles.sort();
        let names: Vec<&str> = handles.iter().map(HandleName::as_str).collect();
        assert_eq!(names, ["alice", "bob", "carol"]);
    }

    #[test]
    fn debug_output_redacts_hash() {
        let identity = Identity::new(HandleName::parse("bob").unwrap(), "$argon2id$secret".into(), Utc::now());
        let rendered = format!("{identity:?}");
        assert!(!rendered.contains("argon2id"));
        assert!(rendered.contains("<redacted>"));
    }
}
