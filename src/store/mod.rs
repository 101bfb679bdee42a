//! Session storage backends.

mod file;
mod memory;
#[cfg(feature = "redis-store")]
mod redis;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Duration;
use serde_json::Value;

pub use file::FileStore;
pub use memory::MemoryStore;
#[cfg(feature = "redis-store")]
pub use redis::RedisStore;

use crate::SessionError;

/// The full data mapping for one session.
pub type SessionData = HashMap<String, Value>;

/// Concurrency contract a backend declares for concurrent writers against
/// the same session ID.
///
/// Two requests (two tabs, two processes) can share a session ID. Whether a
/// write from one can clobber an unrelated write from the other depends on
/// how the backend persists:
///
/// - `AtomicPerKey`: per-key writes are independent; concurrent writes to
///   distinct keys are both observable afterwards.
/// - `LastWriterWins`: the backend persists the whole record on every write,
///   so a concurrent writer can lose an unrelated key.
///
/// Callers that care must check the guarantee rather than assume atomicity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteGuarantee {
    AtomicPerKey,
    LastWriterWins,
}

/// Durable key-value persistence for session records.
///
/// One record per session ID; a record whose expiry has passed is logically
/// absent. Every write refreshes the TTL (sliding expiration). Backends must
/// report transport faults as [`SessionError::BackendUnavailable`], never as
/// an absent record.
///
/// Implementations:
/// - [`MemoryStore`]: in-process map for testing and single-instance
///   deployments
/// - [`FileStore`]: one JSON file per session
/// - [`RedisStore`]: one redis hash per session (feature `redis-store`)
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Loads the data mapping for a session ID.
    ///
    /// An absent or expired record yields `Ok(None)`; a session with no
    /// prior data is indistinguishable from a fresh one.
    async fn load(&self, session_id: &str) -> Result<Option<SessionData>, SessionError>;

    /// Writes the whole record, replacing whatever was stored.
    async fn save(
        &self,
        session_id: &str,
        data: &SessionData,
        ttl: Duration,
    ) -> Result<(), SessionError>;

    /// Writes a single key, creating the record if absent.
    async fn put_key(
        &self,
        session_id: &str,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> Result<(), SessionError>;

    /// Removes a single key. Removing from an absent record is a no-op.
    async fn delete_key(
        &self,
        session_id: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<(), SessionError>;

    /// Deletes the record. Returns whether a record existed.
    async fn delete(&self, session_id: &str) -> Result<bool, SessionError>;

    /// Moves a session's data to a new ID in one backend operation.
    ///
    /// Backs ID regeneration. The write of the new record and the removal of
    /// the old one happen inside a single lock scope or pipeline, so a
    /// concurrent destroy cannot leave an orphaned old-ID record.
    async fn migrate(
        &self,
        old_id: &str,
        new_id: &str,
        data: &SessionData,
        ttl: Duration,
        delete_old: bool,
    ) -> Result<(), SessionError>;

    /// The concurrency contract this backend provides for per-key writes.
    fn write_guarantee(&self) -> WriteGuarantee;
}
