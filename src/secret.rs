//! Sensitive data wrapper types.

use std::fmt;

/// A wrapper for sensitive string data that prevents accidental logging.
///
/// `SecretString` implements `Debug` and `Display` to show `[REDACTED]`
/// instead of the actual content. The cookie-signing key is carried in one of
/// these so that dumping a [`SessionConfig`](crate::SessionConfig) never leaks
/// it.
///
/// # Example
///
/// ```rust
/// use vestibule::SecretString;
///
/// let key = SecretString::new("cookie-signing-key-0123456789abcdef");
/// assert_eq!(format!("{:?}", key), "SecretString([REDACTED])");
/// assert_eq!(key.expose_secret(), "cookie-signing-key-0123456789abcdef");
/// ```
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
    /// Creates a new `SecretString` from any type that can be converted to a `String`.
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Exposes the secret value.
    ///
    /// Use this method only when you need the actual bytes, such as when
    /// keying an HMAC.
    #[must_use]
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    /// Returns true if the secret is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the length of the secret in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString([REDACTED])")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for SecretString {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacted() {
        let secret = SecretString::new("signing-key");
        assert_eq!(format!("{secret:?}"), "SecretString([REDACTED])");
    }

    #[test]
    fn test_display_redacted() {
        let secret = SecretString::new("signing-key");
        assert_eq!(format!("{secret}"), "[REDACTED]");
    }

    #[test]
    fn test_expose_secret() {
        let secret = SecretString::new("signing-key");
        assert_eq!(secret.expose_secret(), "signing-key");
    }

    #[test]
    fn test_from_impls() {
        let secret: SecretString = String::from("key").into();
        assert_eq!(secret.expose_secret(), "key");

        let secret: SecretString = "key".into();
        assert_eq!(secret.expose_secret(), "key");
    }

    #[test]
    fn test_len_and_empty() {
        assert!(SecretString::new("").is_empty());
        assert_eq!(SecretString::new("abcd").len(), 4);
    }
}
