use gatehouse_core::{IdentityId, SessionId};

use crate::{Entitlements, HandleName};

/// A fully resolved principal for authorization decisions.
///
/// Built per request after token verification, session touch and entitlement
/// resolution, in that order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub identity_id: IdentityId,
    pub handle: HandleName,
    pub session_id: SessionId,
    pub entitlements: Entitlements,
}
