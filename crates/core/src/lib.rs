//! `gatehouse-core`: foundation building blocks shared by every crate.
//!
//! This crate contains **pure** primitives (no infrastructure concerns).

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::{
    AuditEntryId, IdentityId, PageId, PermissionId, RefreshTokenId, RoleId, SessionId,
};
