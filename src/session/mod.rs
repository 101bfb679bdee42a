//! The session engine: lifecycle state machine and data operations.

mod flash;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

pub use flash::Flash;

use crate::config::{valid_session_name, CookieParams, SessionConfig};
use crate::crypto::{generate_session_id, valid_session_id};
use crate::policy::SecurityMetadata;
use crate::store::{SessionData, SessionStore, WriteGuarantee};
use crate::SessionError;

/// Reserved key holding flash messages inside the session data.
pub(crate) const FLASH_KEY: &str = "_flash";

/// Reserved key holding security metadata inside the session data.
pub(crate) const SECURITY_KEY: &str = "_security";

fn is_reserved(key: &str) -> bool {
    key == FLASH_KEY || key == SECURITY_KEY
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    NotStarted,
    Active,
    Destroyed,
}

/// One client's server-side session for one in-flight request.
///
/// Owns an in-memory copy of the session data and writes every mutation
/// through to the [`SessionStore`] before returning, so a crash after a
/// returned `set` never loses the write.
///
/// Data operations require an Active session; calls before [`start`] or
/// after [`destroy`] fail with [`SessionError::NotStarted`] rather than
/// starting implicitly.
///
/// [`start`]: Session::start
/// [`destroy`]: Session::destroy
pub struct Session {
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
    status: SessionStatus,
    id: Option<String>,
    data: SessionData,
}

impl Session {
    /// Creates a session engine in the NotStarted state.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfiguration`] when the configuration
    /// does not validate.
    pub fn new(store: Arc<dyn SessionStore>, config: SessionConfig) -> Result<Self, SessionError> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            status: SessionStatus::NotStarted,
            id: None,
            data: SessionData::new(),
        })
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_started(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// The current session ID, if one is bound.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// The logical session namespace (cookie name).
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Renames the session namespace.
    ///
    /// # Errors
    ///
    /// Fails with [`SessionError::AlreadyStarted`] on an Active session; the
    /// name must be fixed before first use.
    pub fn set_name(&mut self, name: impl Into<String>) -> Result<(), SessionError> {
        if self.status == SessionStatus::Active {
            return Err(SessionError::AlreadyStarted);
        }
        let name = name.into();
        valid_session_name(&name)?;
        self.config.name = name;
        Ok(())
    }

    pub fn cookie_params(&self) -> &CookieParams {
        &self.config.cookie
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The concurrency contract of the underlying store.
    pub fn write_guarantee(&self) -> WriteGuarantee {
        self.store.write_guarantee()
    }

    /// Binds a session ID received from the client before starting.
    ///
    /// IDs that do not look like tokens this crate generates are dropped
    /// with a warning; a forged or mangled cookie is treated the same as no
    /// cookie at all.
    ///
    /// # Errors
    ///
    /// Fails with [`SessionError::AlreadyStarted`] on an Active session.
    pub fn bind_incoming_id(&mut self, id: impl Into<String>) -> Result<(), SessionError> {
        if self.status == SessionStatus::Active {
            return Err(SessionError::AlreadyStarted);
        }
        let id = id.into();
        if !valid_session_id(&id) {
            log::warn!(target: "vestibule::session", "msg=\"rejecting malformed incoming session id\" id_prefix=\"{}...\"", id.chars().take(8).collect::<String>());
            return Ok(());
        }
        self.id = Some(id);
        Ok(())
    }

    /// Starts the session.
    ///
    /// Loads the record for a bound ID (an absent or expired record yields a
    /// fresh, empty session), or allocates a new unguessable ID. Calling
    /// `start` on an Active session is an idempotent no-op. Starting again
    /// after [`destroy`](Session::destroy) begins a fresh session with a new
    /// ID.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        match self.status {
            SessionStatus::Active => Ok(()),
            SessionStatus::Destroyed => {
                self.id = Some(generate_session_id());
                self.data = SessionData::new();
                self.status = SessionStatus::Active;
                Ok(())
            }
            SessionStatus::NotStarted => {
                // A bound ID must survive a failed load so a retry can still
                // reach the client's record
                let id = match self.id.clone() {
                    Some(id) => id,
                    None => generate_session_id(),
                };
                self.data = self.store.load(&id).await?.unwrap_or_default();
                self.id = Some(id);
                self.status = SessionStatus::Active;
                Ok(())
            }
        }
    }

    fn require_active(&self) -> Result<&str, SessionError> {
        if self.status != SessionStatus::Active {
            return Err(SessionError::NotStarted);
        }
        self.id.as_deref().ok_or(SessionError::NotStarted)
    }

    fn guard_key(key: &str) -> Result<(), SessionError> {
        if is_reserved(key) {
            return Err(SessionError::ReservedKey(key.to_owned()));
        }
        Ok(())
    }

    /// Returns the value stored at `key`.
    pub fn get(&self, key: &str) -> Result<Option<&Value>, SessionError> {
        self.require_active()?;
        Self::guard_key(key)?;
        Ok(self.data.get(key))
    }

    /// Returns the value stored at `key`, or `default` if absent.
    pub fn get_or(&self, key: &str, default: Value) -> Result<Value, SessionError> {
        Ok(self.get(key)?.cloned().unwrap_or(default))
    }

    /// Returns the value stored at `key`, deserialized into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Serialization`] when the stored value does
    /// not deserialize into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SessionError> {
        match self.get(key)? {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| SessionError::Serialization(e.to_string())),
        }
    }

    pub fn has(&self, key: &str) -> Result<bool, SessionError> {
        self.require_active()?;
        Self::guard_key(key)?;
        Ok(self.data.contains_key(key))
    }

    /// Returns a copy of all user data, without the reserved namespaces.
    pub fn all(&self) -> Result<SessionData, SessionError> {
        self.require_active()?;
        Ok(self
            .data
            .iter()
            .filter(|(key, _)| !is_reserved(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    /// Stores `value` at `key` and persists it before returning.
    pub async fn set<T: Serialize>(&mut self, key: &str, value: T) -> Result<(), SessionError> {
        self.require_active()?;
        Self::guard_key(key)?;
        let value =
            serde_json::to_value(value).map_err(|e| SessionError::Serialization(e.to_string()))?;
        self.data.insert(key.to_owned(), value);
        self.persist_key(key).await
    }

    /// Removes `key`, returning its previous value.
    pub async fn remove(&mut self, key: &str) -> Result<Option<Value>, SessionError> {
        self.require_active()?;
        Self::guard_key(key)?;
        let previous = self.data.remove(key);
        if previous.is_some() {
            self.persist_key(key).await?;
        }
        Ok(previous)
    }

    /// Clears all session data, reserved namespaces included, and persists
    /// the empty record.
    pub async fn clear(&mut self) -> Result<(), SessionError> {
        let id = self.require_active()?.to_owned();
        self.data.clear();
        self.store.save(&id, &self.data, self.config.ttl).await
    }

    /// Destroys the session: deletes the backend record and clears all
    /// in-memory data.
    ///
    /// A no-op success on a session that is not Active, matching the
    /// contract that destroying nothing destroys successfully.
    pub async fn destroy(&mut self) -> Result<bool, SessionError> {
        let id = match self.status {
            SessionStatus::Active => match self.id.clone() {
                Some(id) => id,
                None => return Ok(true),
            },
            _ => return Ok(true),
        };

        self.store
            .delete(&id)
            .await
            .map_err(|e| SessionError::CannotDestroy(e.to_string()))?;

        self.id = None;
        self.data.clear();
        self.status = SessionStatus::Destroyed;
        log::debug!(target: "vestibule::session", "msg=\"session destroyed\" name=\"{}\"", self.config.name);
        Ok(true)
    }

    /// Replaces the session ID with a freshly generated one, migrating the
    /// data in a single backend operation.
    ///
    /// Returns the new ID. With `delete_old` the old record is removed in
    /// the same operation.
    ///
    /// # Errors
    ///
    /// Fails with [`SessionError::NotStarted`] unless the session is Active.
    pub async fn regenerate_id(&mut self, delete_old: bool) -> Result<String, SessionError> {
        let old_id = self.require_active()?.to_owned();
        let new_id = generate_session_id();

        self.store
            .migrate(&old_id, &new_id, &self.data, self.config.ttl, delete_old)
            .await?;

        self.id = Some(new_id.clone());
        log::debug!(target: "vestibule::session", "msg=\"session id regenerated\" name=\"{}\" delete_old={delete_old}", self.config.name);
        Ok(new_id)
    }

    /// Returns the flash message accessor.
    pub fn flash(&mut self) -> Flash<'_> {
        Flash::new(self)
    }

    /// Reads the security metadata stored in the session, if initialized.
    pub fn security_metadata(&self) -> Result<Option<SecurityMetadata>, SessionError> {
        self.require_active()?;
        match self.data.get(SECURITY_KEY) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| SessionError::Serialization(e.to_string())),
        }
    }

    /// Writes the security metadata in one backend write.
    pub async fn store_security_metadata(
        &mut self,
        metadata: &SecurityMetadata,
    ) -> Result<(), SessionError> {
        self.require_active()?;
        let value = serde_json::to_value(metadata)
            .map_err(|e| SessionError::Serialization(e.to_string()))?;
        self.data.insert(SECURITY_KEY.to_owned(), value);
        self.persist_key(SECURITY_KEY).await
    }

    /// The CSRF token minted for this session, if the pipeline has run.
    pub fn csrf_token(&self) -> Result<Option<String>, SessionError> {
        Ok(self.security_metadata()?.map(|meta| meta.csrf_token))
    }

    /// Persists the current in-memory state of one key: writes it if
    /// present, deletes it from the record if absent.
    pub(crate) async fn persist_key(&mut self, key: &str) -> Result<(), SessionError> {
        let id = match self.id.as_deref() {
            Some(id) => id.to_owned(),
            None => return Err(SessionError::NotStarted),
        };

        match self.data.get(key) {
            Some(value) => {
                self.store
                    .put_key(&id, key, value.clone(), self.config.ttl)
                    .await
            }
            None => self.store.delete_key(&id, key, self.config.ttl).await,
        }
    }

    pub(crate) fn data(&self) -> &SessionData {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut SessionData {
        &mut self.data
    }
}
