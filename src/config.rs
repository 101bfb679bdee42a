//! Session configuration.
//!
//! All validation happens up front in [`SessionConfig::validate`], before any
//! session is created, so a bad cookie name or SameSite combination never
//! reaches a live request.

use std::fmt;
use std::str::FromStr;

use chrono::Duration;

use crate::SecretString;
use crate::SessionError;

/// Cookie SameSite attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SameSite {
    None,
    Lax,
    #[default]
    Strict,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SameSite::None => f.write_str("None"),
            SameSite::Lax => f.write_str("Lax"),
            SameSite::Strict => f.write_str("Strict"),
        }
    }
}

impl FromStr for SameSite {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "None" => Ok(SameSite::None),
            "Lax" => Ok(SameSite::Lax),
            "Strict" => Ok(SameSite::Strict),
            other => Err(SessionError::InvalidConfiguration(format!(
                "invalid SameSite value '{other}', must be Strict, Lax or None"
            ))),
        }
    }
}

/// Parameters for the session cookie, passed through opaquely to the
/// boundary adapter. The core never writes a Set-Cookie header itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieParams {
    /// Cookie lifetime. `None` means a session cookie (expires with the
    /// browser).
    pub lifetime: Option<Duration>,
    pub path: String,
    pub domain: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
}

impl Default for CookieParams {
    fn default() -> Self {
        Self {
            lifetime: None,
            path: "/".to_owned(),
            domain: None,
            secure: true,
            http_only: true,
            same_site: SameSite::Strict,
        }
    }
}

/// Per-request security policy settings.
///
/// Each `None`/`false` disables the corresponding check; the pipeline is
/// composed from whatever remains enabled.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Sessions idle for longer than this are destroyed and restarted.
    pub idle_timeout: Option<Duration>,
    /// Session IDs older than this are rotated in place.
    pub regeneration_interval: Option<Duration>,
    /// Bind sessions to a stable per-client signal and destroy on mismatch.
    pub bind_client_signal: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Some(Duration::minutes(30)),
            regeneration_interval: Some(Duration::minutes(5)),
            bind_client_signal: true,
        }
    }
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Logical session namespace, doubling as the cookie name.
    /// Alphanumeric and underscore only.
    pub name: String,
    pub cookie: CookieParams,
    /// Backend record TTL. Refreshed on every write (sliding expiration).
    pub ttl: Duration,
    /// When set, [`boundary::begin_request`](crate::boundary::begin_request)
    /// starts the session before handing it to the application. Reads on a
    /// session that was never started remain a defined error either way.
    pub auto_start: bool,
    /// HMAC key for cookie signing. At least 32 bytes.
    pub secret_key: SecretString,
    pub security: SecurityConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: "app_session".to_owned(),
            cookie: CookieParams::default(),
            ttl: Duration::hours(1),
            auto_start: true,
            secret_key: SecretString::new(""),
            security: SecurityConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Configuration suitable for local development.
    ///
    /// Relaxes cookie transport requirements; security checks stay on.
    pub fn development() -> Self {
        Self {
            cookie: CookieParams {
                secure: false,
                same_site: SameSite::Lax,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfiguration`] on a bad session name,
    /// a missing or short signing key, a non-positive TTL, or a cookie that
    /// sets `SameSite=None` without `Secure`.
    pub fn validate(&self) -> Result<(), SessionError> {
        valid_session_name(&self.name)?;

        if self.secret_key.is_empty() {
            return Err(SessionError::InvalidConfiguration(
                "secret_key must not be empty".to_owned(),
            ));
        }
        if self.secret_key.len() < 32 {
            return Err(SessionError::InvalidConfiguration(
                "secret_key should be at least 32 bytes".to_owned(),
            ));
        }
        if self.ttl <= Duration::zero() {
            return Err(SessionError::InvalidConfiguration(
                "ttl must be positive".to_owned(),
            ));
        }
        if self.cookie.same_site == SameSite::None && !self.cookie.secure {
            return Err(SessionError::InvalidConfiguration(
                "SameSite=None requires a secure cookie".to_owned(),
            ));
        }
        if let Some(idle) = self.security.idle_timeout {
            if idle <= Duration::zero() {
                return Err(SessionError::InvalidConfiguration(
                    "idle_timeout must be positive".to_owned(),
                ));
            }
        }
        if let Some(interval) = self.security.regeneration_interval {
            if interval <= Duration::zero() {
                return Err(SessionError::InvalidConfiguration(
                    "regeneration_interval must be positive".to_owned(),
                ));
            }
        }

        Ok(())
    }
}

/// Checks a session name against the allowed pattern.
pub(crate) fn valid_session_name(name: &str) -> Result<(), SessionError> {
    if name.is_empty() {
        return Err(SessionError::InvalidConfiguration(
            "session name must not be empty".to_owned(),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(SessionError::InvalidConfiguration(format!(
            "session name '{name}' contains invalid characters"
        )));
    }
    Ok(())
}
