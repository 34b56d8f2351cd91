use axum::http::HeaderMap;
use axum::http::header::USER_AGENT;

use gatehouse_auth::{ClientMeta, Entitlements, HandleName, Principal};
use gatehouse_core::{IdentityId, SessionId};

/// Authenticated principal for a request.
///
/// Inserted by the authentication middleware; handlers behind it can rely on
/// it being present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal: Principal,
}

impl PrincipalContext {
    pub fn new(principal: Principal) -> Self {
        Self { principal }
    }

    pub fn identity_id(&self) -> IdentityId {
        self.principal.identity_id
    }

    pub fn handle(&self) -> &HandleName {
        &self.principal.handle
    }

    pub fn session_id(&self) -> SessionId {
        self.principal.session_id
    }

    pub fn entitlements(&self) -> &Entitlements {
        &self.principal.entitlements
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }
}

/// Client metadata from request headers. The first `X-Forwarded-For` hop wins.
pub fn client_meta(headers: &HeaderMap) -> ClientMeta {
    let ip_address = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    ClientMeta::new(ip_address, user_agent)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn forwarded_for_uses_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        headers.insert(USER_AGENT, HeaderValue::from_static("curl/8"));

        let meta = client_meta(&headers);
        assert_eq!(meta.ip_address.as_deref(), Some("203.0.113.7"));
        assert_eq!(meta.user_agent.as_deref(), Some("curl/8"));
    }

    #[test]
    fn missing_headers_give_empty_meta() {
        assert_eq!(client_meta(&HeaderMap::new()), ClientMeta::default());
    }
}
