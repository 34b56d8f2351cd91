//! Process-wide configuration, read once at start-up.
//!
//! Values come from `GATEHOUSE_*` environment variables. `from_lookup` takes any
//! key → value function so tests never touch the real process environment.

use std::net::SocketAddr;
use std::time::Duration as StdDuration;

use chrono::Duration;
use thiserror::Error;

use gatehouse_auth::{HashCost, LockoutPolicy, PasswordPolicy, SessionPolicy};

pub const MIN_SECRET_LEN: usize = 32;

/// Upper bound for every configured window (TTLs, lockout, session limits).
pub const MAX_WINDOW_DAYS: i64 = 3650;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{var}: {message}")]
    Invalid { var: &'static str, message: String },
}

impl ConfigError {
    fn invalid(var: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            var,
            message: message.into(),
        }
    }
}

/// Immutable configuration shared by every service.
#[derive(Clone)]
pub struct AuthConfig {
    pub jwt_secret: Vec<u8>,
    pub default_password: Option<String>,
    pub lockout: LockoutPolicy,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub session: SessionPolicy,
    pub password_policy: PasswordPolicy,
    pub hash_cost: HashCost,
    pub db_timeout: StdDuration,
    pub cookie_secure: bool,
    pub database_url: Option<String>,
    pub bind: SocketAddr,
}

impl core::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .field("default_password", &self.default_password.as_ref().map(|_| "<redacted>"))
            .field("lockout", &self.lockout)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("session", &self.session)
            .field("password_policy", &self.password_policy)
            .field("hash_cost", &self.hash_cost)
            .field("db_timeout", &self.db_timeout)
            .field("cookie_secure", &self.cookie_secure)
            .field("database_url", &self.database_url.as_ref().map(|_| "<redacted>"))
            .field("bind", &self.bind)
            .finish()
    }
}

impl AuthConfig {
    /// Defaults for everything except the signing secret.
    pub fn new(jwt_secret: impl Into<Vec<u8>>) -> Self {
        let access_ttl = Duration::minutes(1440);
        Self {
            jwt_secret: jwt_secret.into(),
            default_password: None,
            lockout: LockoutPolicy::default(),
            access_ttl,
            refresh_ttl: Duration::days(30),
            session: SessionPolicy {
                idle_timeout: Duration::minutes(60),
                max_lifetime: access_ttl,
            },
            password_policy: PasswordPolicy::default(),
            hash_cost: HashCost::default(),
            db_timeout: StdDuration::from_millis(5000),
            cookie_secure: true,
            database_url: None,
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }

    pub fn with_lockout(mut self, lockout: LockoutPolicy) -> Self {
        self.lockout = lockout;
        self
    }

    pub fn with_session(mut self, session: SessionPolicy) -> Self {
        self.session = session;
        self
    }

    pub fn with_hash_cost(mut self, cost: HashCost) -> Self {
        self.hash_cost = cost;
        self
    }

    pub fn with_default_password(mut self, password: impl Into<String>) -> Self {
        self.default_password = Some(password.into());
        self
    }

    pub fn with_cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let secret = get("GATEHOUSE_JWT_SECRET").ok_or(ConfigError::Missing("GATEHOUSE_JWT_SECRET"))?;
        if secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::invalid(
                "GATEHOUSE_JWT_SECRET",
                format!("must be at least {MIN_SECRET_LEN} bytes"),
            ));
        }
        let mut config = Self::new(secret.into_bytes());

        let threshold: u32 = parse(&get, "GATEHOUSE_LOCKOUT_THRESHOLD", 5)?;
        if threshold == 0 {
            return Err(ConfigError::invalid("GATEHOUSE_LOCKOUT_THRESHOLD", "must be at least 1"));
        }
        config.lockout = LockoutPolicy {
            threshold,
            duration: window(&get, "GATEHOUSE_LOCKOUT_MINUTES", 15, Duration::try_minutes)?,
        };

        config.access_ttl = window(&get, "GATEHOUSE_ACCESS_TTL_MINUTES", 1440, Duration::try_minutes)?;
        config.refresh_ttl = window(&get, "GATEHOUSE_REFRESH_TTL_DAYS", 30, Duration::try_days)?;
        config.session = SessionPolicy {
            idle_timeout: window(&get, "GATEHOUSE_SESSION_IDLE_MINUTES", 60, Duration::try_minutes)?,
            max_lifetime: window(
                &get,
                "GATEHOUSE_SESSION_MAX_MINUTES",
                config.access_ttl.num_minutes(),
                Duration::try_minutes,
            )?,
        };

        config.password_policy = PasswordPolicy {
            min_length: parse(&get, "GATEHOUSE_PASSWORD_MIN_LENGTH", 8)?,
            require_uppercase: flag(&get, "GATEHOUSE_PASSWORD_REQUIRE_UPPERCASE", true)?,
            require_lowercase: flag(&get, "GATEHOUSE_PASSWORD_REQUIRE_LOWERCASE", true)?,
            require_numbers: flag(&get, "GATEHOUSE_PASSWORD_REQUIRE_NUMBERS", true)?,
            require_special_chars: flag(&get, "GATEHOUSE_PASSWORD_REQUIRE_SPECIAL", false)?,
        };

        let default_iterations = config.hash_cost.iterations;
        config.hash_cost.iterations = parse(&get, "GATEHOUSE_HASH_COST", default_iterations)?;
        if config.hash_cost.iterations == 0 {
            return Err(ConfigError::invalid("GATEHOUSE_HASH_COST", "must be at least 1"));
        }

        if let Some(password) = get("GATEHOUSE_DEFAULT_PASSWORD") {
            let result = config.password_policy.validate(&password);
            if !result.valid {
                return Err(ConfigError::invalid(
                    "GATEHOUSE_DEFAULT_PASSWORD",
                    "does not satisfy the password policy",
                ));
            }
            config.default_password = Some(password);
        }

        let db_timeout_ms: u64 = parse(&get, "GATEHOUSE_DB_TIMEOUT_MS", 5000)?;
        if db_timeout_ms == 0 {
            return Err(ConfigError::invalid("GATEHOUSE_DB_TIMEOUT_MS", "must be at least 1"));
        }
        config.db_timeout = StdDuration::from_millis(db_timeout_ms);
        config.cookie_secure = flag(&get, "GATEHOUSE_COOKIE_SECURE", true)?;
        config.database_url = get("DATABASE_URL");
        if let Some(bind) = get("GATEHOUSE_BIND") {
            config.bind = bind
                .parse()
                .map_err(|_| ConfigError::invalid("GATEHOUSE_BIND", "expected host:port"))?;
        }

        Ok(config)
    }
}

fn parse<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: core::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::invalid(var, format!("cannot parse '{raw}'"))),
        None => Ok(default),
    }
}

fn positive<G>(get: &G, var: &'static str, default: i64) -> Result<i64, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let value: i64 = parse(get, var, default)?;
    if value <= 0 {
        return Err(ConfigError::invalid(var, "must be positive"));
    }
    Ok(value)
}

/// A positive count of `unit`s, at most `MAX_WINDOW_DAYS` long.
fn window<G>(
    get: &G,
    var: &'static str,
    default: i64,
    unit: fn(i64) -> Option<Duration>,
) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let value = positive(get, var, default)?;
    unit(value)
        .filter(|d| *d <= Duration::days(MAX_WINDOW_DAYS))
        .ok_or_else(|| ConfigError::invalid(var, format!("must not exceed {MAX_WINDOW_DAYS} days")))
}

fn flag<G>(get: &G, var: &'static str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(var).map(|v| v.to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(ConfigError::invalid(var, format!("expected a boolean, got '{v}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use std::collections::HashMap;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn load(pairs: &[(&str, &str)]) -> Result<AuthConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AuthConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_secret_is_set() {
        let config = load(&[("GATEHOUSE_JWT_SECRET", SECRET)]).unwrap();
        assert_eq!(config.lockout.threshold, 5);
        assert_eq!(config.lockout.duration, Duration::minutes(15));
        assert_eq!(config.access_ttl, Duration::hours(24));
        assert_eq!(config.refresh_ttl, Duration::days(30));
        assert_eq!(config.session.idle_timeout, Duration::minutes(60));
        assert_eq!(config.session.max_lifetime, config.access_ttl);
        assert!(config.cookie_secure);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn missing_or_short_secret_is_rejected() {
        assert_eq!(load(&[]).unwrap_err(), ConfigError::Missing("GATEHOUSE_JWT_SECRET"));
        assert!(matches!(
            load(&[("GATEHOUSE_JWT_SECRET", "short")]).unwrap_err(),
            ConfigError::Invalid { var: "GATEHOUSE_JWT_SECRET", .. }
        ));
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let err = load(&[
            ("GATEHOUSE_JWT_SECRET", SECRET),
            ("GATEHOUSE_LOCKOUT_THRESHOLD", "many"),
        ])
        .unwrap_err();
        assert!(err.to_string().starts_with("GATEHOUSE_LOCKOUT_THRESHOLD"));

        let err = load(&[("GATEHOUSE_JWT_SECRET", SECRET), ("GATEHOUSE_COOKIE_SECURE", "maybe")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "GATEHOUSE_COOKIE_SECURE", .. }));
    }

    #[test]
    fn weak_default_password_is_rejected() {
        let err = load(&[
            ("GATEHOUSE_JWT_SECRET", SECRET),
            ("GATEHOUSE_DEFAULT_PASSWORD", "password"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "GATEHOUSE_DEFAULT_PASSWORD", .. }));

        let ok = load(&[
            ("GATEHOUSE_JWT_SECRET", SECRET),
            ("GATEHOUSE_DEFAULT_PASSWORD", "Welcome123"),
        ])
        .unwrap();
        assert_eq!(ok.default_password.as_deref(), Some("Welcome123"));
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("GATEHOUSE_JWT_SECRET", SECRET),
            ("GATEHOUSE_LOCKOUT_THRESHOLD", "3"),
            ("GATEHOUSE_SESSION_MAX_MINUTES", "90"),
            ("GATEHOUSE_PASSWORD_REQUIRE_SPECIAL", "true"),
            ("GATEHOUSE_BIND", "127.0.0.1:9000"),
            ("DATABASE_URL", "postgres://localhost/gatehouse"),
        ])
        .unwrap();
        assert_eq!(config.lockout.threshold, 3);
        assert_eq!(config.session.max_lifetime, Duration::minutes(90));
        assert!(config.password_policy.require_special_chars);
        assert_eq!(config.bind.port(), 9000);
        assert!(config.database_url.is_some());
    }

    #[test]
    fn oversized_windows_are_rejected_not_panicking() {
        for (var, value) in [
            ("GATEHOUSE_ACCESS_TTL_MINUTES", "9223372036854775807"),
            ("GATEHOUSE_REFRESH_TTL_DAYS", "100000000"),
            ("GATEHOUSE_LOCKOUT_MINUTES", "9223372036854775807"),
            ("GATEHOUSE_SESSION_IDLE_MINUTES", "5256001"),
            ("GATEHOUSE_SESSION_MAX_MINUTES", "9223372036854775807"),
        ] {
            let err = load(&[("GATEHOUSE_JWT_SECRET", SECRET), (var, value)]).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { var: v, .. } if v == var),
                "{var}={value} gave {err:?}"
            );
        }

        let longest = load(&[
            ("GATEHOUSE_JWT_SECRET", SECRET),
            ("GATEHOUSE_REFRESH_TTL_DAYS", "3650"),
        ])
        .unwrap();
        assert_eq!(longest.refresh_ttl, Duration::days(MAX_WINDOW_DAYS));
    }

    #[test]
    fn zero_db_timeout_is_rejected() {
        let err = load(&[("GATEHOUSE_JWT_SECRET", SECRET), ("GATEHOUSE_DB_TIMEOUT_MS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "GATEHOUSE_DB_TIMEOUT_MS", .. }));

        let config = load(&[("GATEHOUSE_JWT_SECRET", SECRET), ("GATEHOUSE_DB_TIMEOUT_MS", "250")]).unwrap();
        assert_eq!(config.db_timeout, StdDuration::from_millis(250));
    }

    proptest! {
        #[test]
        fn any_ttl_either_loads_within_bounds_or_names_the_variable(minutes in any::<i64>()) {
            let raw = minutes.to_string();
            match load(&[("GATEHOUSE_JWT_SECRET", SECRET), ("GATEHOUSE_ACCESS_TTL_MINUTES", &raw)]) {
                Ok(config) => {
                    prop_assert!(config.access_ttl > Duration::zero());
                    prop_assert!(config.access_ttl <= Duration::days(MAX_WINDOW_DAYS));
                    prop_assert!(Utc::now().checked_add_signed(config.refresh_ttl).is_some());
                }
                Err(err) => prop_assert!(
                    matches!(err, ConfigError::Invalid { var: "GATEHOUSE_ACCESS_TTL_MINUTES", .. }),
                    "unexpected error: {:?}", err
                ),
            }
        }
    }
}
