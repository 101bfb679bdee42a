//! Random identifier generation and binding-signal hashing.

use sha2::{Digest, Sha256};

/// Length of generated session IDs in characters.
///
/// 32 alphanumeric characters carry roughly 190 bits of entropy, well above
/// the 128-bit floor for an unguessable session identifier.
pub const SESSION_ID_LENGTH: usize = 32;

/// Length of generated CSRF tokens in characters.
pub const CSRF_TOKEN_LENGTH: usize = 32;

/// Generates a cryptographically secure random token.
///
/// The token consists of alphanumeric characters (a-z, A-Z, 0-9),
/// providing approximately 5.95 bits of entropy per character.
pub fn generate_token(length: usize) -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| char::from(rng.sample(rand::distributions::Alphanumeric)))
        .collect()
}

/// Generates a new unguessable session ID.
pub fn generate_session_id() -> String {
    generate_token(SESSION_ID_LENGTH)
}

/// Generates a new CSRF token.
pub fn generate_csrf_token() -> String {
    generate_token(CSRF_TOKEN_LENGTH)
}

/// Hashes a client binding signal with SHA-256.
///
/// The signal is an opaque, stable per-client value chosen by the caller
/// (a user-agent string, a TLS channel binding, a forwarded address). Only
/// the hex digest is ever stored in the session, never the raw signal.
pub fn hash_binding_signal(signal: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(signal.as_bytes());
    hex::encode(hasher.finalize())
}

/// Returns true if `id` looks like a token this crate generated.
///
/// Incoming IDs arrive from an untrusted cookie; anything outside the
/// alphanumeric alphabet is rejected before it can reach a backend key or a
/// file path.
pub fn valid_session_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_token_length() {
        assert_eq!(generate_token(16).len(), 16);
        assert_eq!(generate_token(32).len(), 32);
        assert_eq!(generate_token(64).len(), 64);
    }

    #[test]
    fn test_generate_token_unique() {
        assert_ne!(generate_token(32), generate_token(32));
    }

    #[test]
    fn test_generate_session_id_alphanumeric() {
        let id = generate_session_id();
        assert_eq!(id.len(), SESSION_ID_LENGTH);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(valid_session_id(&id));
    }

    #[test]
    fn test_hash_binding_signal_deterministic() {
        let h1 = hash_binding_signal("Mozilla/5.0");
        let h2 = hash_binding_signal("Mozilla/5.0");
        assert_eq!(h1, h2);
        // SHA-256 hex digest
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn test_hash_binding_signal_distinguishes_inputs() {
        assert_ne!(hash_binding_signal("sig1"), hash_binding_signal("sig2"));
    }

    #[test]
    fn test_valid_session_id_rejects_traversal() {
        assert!(!valid_session_id(""));
        assert!(!valid_session_id("../etc/passwd"));
        assert!(!valid_session_id("abc.123"));
        assert!(!valid_session_id("abc 123"));
        assert!(valid_session_id("Abc123"));
    }
}
