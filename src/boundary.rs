//! The host-framework boundary.
//!
//! The core never touches network transport. A host HTTP layer implements
//! [`BoundaryAdapter`] to hand in the inbound cookie value and carry
//! outbound cookie updates; [`begin_request`] and [`finish_request`] wire a
//! [`Session`] to it. Session IDs cross the wire signed with HMAC-SHA256 so
//! a tampered cookie is indistinguishable from no cookie.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::{CookieParams, SessionConfig};
use crate::session::{Session, SessionStatus};
use crate::store::SessionStore;
use crate::{SecretString, SessionError};

type HmacSha256 = Hmac<Sha256>;

/// Host HTTP layer contract consumed by the core.
pub trait BoundaryAdapter {
    /// The inbound session credential (cookie value), if the request
    /// carried one. Returned raw; the core verifies the signature.
    fn incoming_session_cookie(&self) -> Option<String>;

    /// Sets the outbound session credential.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::CannotStart`] when the transport can no
    /// longer accept headers (response already committed).
    fn emit_session_id(
        &mut self,
        signed_id: &str,
        params: &CookieParams,
    ) -> Result<(), SessionError>;

    /// Expires the outbound session credential, e.g. after a destroy.
    ///
    /// # Errors
    ///
    /// Same failure mode as [`BoundaryAdapter::emit_session_id`].
    fn emit_session_cleared(&mut self, params: &CookieParams) -> Result<(), SessionError>;
}

/// Signs and verifies session IDs for cookie transport.
pub struct CookieCodec {
    secret: SecretString,
}

impl CookieCodec {
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    /// Signs a session ID with HMAC-SHA256.
    ///
    /// Returns a string in the format `{session_id}.{signature}`.
    pub fn sign(&self, session_id: &str) -> String {
        let signature = compute_hmac(
            session_id.as_bytes(),
            self.secret.expose_secret().as_bytes(),
        );
        format!("{}.{}", session_id, hex::encode(signature))
    }

    /// Verifies a signed cookie value and extracts the session ID.
    ///
    /// Returns `None` if the signature is invalid (tampered).
    pub fn verify(&self, cookie_value: &str) -> Option<String> {
        let (session_id, signature_hex) = cookie_value.rsplit_once('.')?;

        let actual_sig = hex::decode(signature_hex).ok()?;
        let expected_sig = compute_hmac(
            session_id.as_bytes(),
            self.secret.expose_secret().as_bytes(),
        );

        if constant_time_eq(&expected_sig, &actual_sig) {
            Some(session_id.to_owned())
        } else {
            log::warn!(target: "vestibule::boundary", "msg=\"session cookie tampered\" cookie_prefix=\"{}...\"", &cookie_value.chars().take(8).collect::<String>());
            None
        }
    }
}

/// Computes HMAC-SHA256.
///
/// # Panics
///
/// This function cannot panic as HMAC accepts keys of any size.
fn compute_hmac(message: &[u8], key: &[u8]) -> Vec<u8> {
    #[allow(clippy::expect_used)]
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any size");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

/// Constant-time comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Builds the session for an arriving request.
///
/// Verifies and binds the incoming cookie's session ID (a tampered or
/// malformed cookie counts as absent) and, when the configuration says
/// `auto_start`, starts the session. Whether a start failure aborts the
/// request or degrades to no session is the adapter's policy; the error is
/// reported, never swallowed here.
pub async fn begin_request(
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
    adapter: &dyn BoundaryAdapter,
) -> Result<Session, SessionError> {
    let codec = CookieCodec::new(config.secret_key.clone());
    let auto_start = config.auto_start;
    let mut session = Session::new(store, config)?;

    if let Some(cookie_value) = adapter.incoming_session_cookie() {
        if let Some(session_id) = codec.verify(&cookie_value) {
            session.bind_incoming_id(session_id)?;
        }
    }

    if auto_start {
        session.start().await?;
    }

    Ok(session)
}

/// Emits the outbound session credential for a finished request.
///
/// An Active session re-emits its (possibly rotated) signed ID; a Destroyed
/// session clears the cookie; a session never started emits nothing.
pub fn finish_request(
    session: &Session,
    adapter: &mut dyn BoundaryAdapter,
) -> Result<(), SessionError> {
    match session.status() {
        SessionStatus::Active => {
            let id = session.id().ok_or(SessionError::NotStarted)?;
            let signed = CookieCodec::new(session.config().secret_key.clone()).sign(id);
            adapter.emit_session_id(&signed, session.cookie_params())
        }
        SessionStatus::Destroyed => adapter.emit_session_cleared(session.cookie_params()),
        SessionStatus::NotStarted => Ok(()),
    }
}
