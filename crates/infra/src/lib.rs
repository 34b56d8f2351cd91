//! Infrastructure layer: storage, configuration and the services that tie the
//! pure auth logic to persistence and a clock.

pub mod admin;
pub mod audit;
pub mod config;
pub mod entitlements;
pub mod lockout;
pub mod orchestrator;
pub mod services;
pub mod sessions;
pub mod store;
pub mod tokens;

#[cfg(test)]
mod integration_tests;

pub use admin::{AdminError, AdminService, Actor, Audited};
pub use config::{AuthConfig, ConfigError};
pub use orchestrator::{AuthOrchestrator, LoginOutcome};
pub use services::AuthServices;
pub use store::{AuditQuery, StoreError, Stores};
