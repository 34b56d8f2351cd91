//! Cookie transport for access and refresh tokens.

use axum::http::header::{AUTHORIZATION, COOKIE, InvalidHeaderValue};
use axum::http::{HeaderMap, HeaderValue};

use gatehouse_infra::AuthConfig;

pub const ACCESS_COOKIE: &str = "gh_access";
pub const REFRESH_COOKIE: &str = "gh_refresh";

const ACCESS_PATH: &str = "/";
const REFRESH_PATH: &str = "/auth";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookieSettings {
    pub secure: bool,
    pub access_max_age: i64,
    pub refresh_max_age: i64,
}

impl CookieSettings {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            secure: config.cookie_secure,
            access_max_age: config.access_ttl.num_seconds(),
            refresh_max_age: config.refresh_ttl.num_seconds(),
        }
    }

    pub fn access(&self, token: &str) -> Result<HeaderValue, InvalidHeaderValue> {
        self.build(ACCESS_COOKIE, token, ACCESS_PATH, self.access_max_age)
    }

    pub fn refresh(&self, token: &str) -> Result<HeaderValue, InvalidHeaderValue> {
        self.build(REFRESH_COOKIE, token, REFRESH_PATH, self.refresh_max_age)
    }

    /// Expire both cookies.
    pub fn cleared(&self) -> Result<[HeaderValue; 2], InvalidHeaderValue> {
        Ok([
            self.build(ACCESS_COOKIE, "", ACCESS_PATH, 0)?,
            self.build(REFRESH_COOKIE, "", REFRESH_PATH, 0)?,
        ])
    }

    fn build(&self, name: &str, value: &str, path: &str, max_age: i64) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut cookie = format!("{name}={value}; Path={path}; HttpOnly; SameSite=Strict; Max-Age={max_age}");
        if self.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
    }
}

/// Value of cookie `name`, if present and non-empty.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Access token from the `Authorization` header, falling back to the cookie.
pub fn access_token(headers: &HeaderMap) -> Option<String> {
    bearer_token(headers).or_else(|| read_cookie(headers, ACCESS_COOKIE))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(secure: bool) -> CookieSettings {
        CookieSettings {
            secure,
            access_max_age: 86_400,
            refresh_max_age: 2_592_000,
        }
    }

    #[test]
    fn access_cookie_attributes() {
        let cookie = settings(true).access("abc").unwrap();
        assert_eq!(
            cookie.to_str().unwrap(),
            "gh_access=abc; Path=/; HttpOnly; SameSite=Strict; Max-Age=86400; Secure"
        );
    }

    #[test]
    fn refresh_cookie_is_scoped_to_auth_routes() {
        let cookie = settings(false).refresh("xyz").unwrap();
        let cookie = cookie.to_str().unwrap();
        assert!(cookie.contains("Path=/auth"));
        assert!(!cookie.contains("Secure"));
    }

    #[test]
    fn bearer_header_takes_precedence_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("other=1; gh_access=from-cookie"));
        assert_eq!(access_token(&headers).as_deref(), Some("from-cookie"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(access_token(&headers).as_deref(), Some("from-header"));
    }

    #[test]
    fn cleared_cookies_expire_immediately() {
        let [access, refresh] = settings(false).cleared().unwrap();
        assert!(access.to_str().unwrap().contains("Max-Age=0"));
        assert!(refresh.to_str().unwrap().starts_with("gh_refresh=;"));
    }
}
