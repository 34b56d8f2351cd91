//! `gatehouse-auth`: pure authentication/authorization logic.
//!
//! This crate is intentionally decoupled from HTTP and storage: every function
//! takes the current time explicitly and returns typed outcomes.

pub mod audit;
pub mod authorize;
pub mod claims;
pub mod client;
pub mod entitlements;
pub mod error;
pub mod identity;
pub mod lockout;
mod naming;
pub mod pages;
pub mod password;
pub mod permissions;
pub mod principal;
pub mod refresh;
pub mod roles;
pub mod session;
pub mod tokens;

pub use audit::{AuditAction, AuditEntry, EntityKind, NewAuditEntry};
pub use authorize::{AuthzError, require_page_access, require_permission, require_role};
pub use claims::{AccessClaims, TokenError, validate_claims};
pub use client::ClientMeta;
pub use entitlements::{Entitlements, PageEntry, RoleGrant, resolve_entitlements};
pub use error::AuthError;
pub use identity::{HandleName, Identity};
pub use lockout::{LockoutPolicy, LockoutState, LockoutTransition, is_locked};
pub use pages::{Page, PageName, PageNode, build_page_tree, ensure_acyclic};
pub use password::{HashCost, PasswordError, PasswordPolicy, PasswordService, PolicyViolation, ValidationResult};
pub use permissions::{Permission, PermissionName};
pub use principal::Principal;
pub use refresh::{RefreshError, RefreshTokenRecord};
pub use roles::{ADMIN_ROLE, Role, RoleName};
pub use session::{SessionError, SessionPolicy, SessionRecord};
pub use tokens::{AccessTokenIssuer, IssuedAccessToken, OpaqueToken, hash_token, token_fingerprint};
