//! In-memory session storage.
//!
//! Suitable for development, testing, and single-instance deployments.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::SessionError;

use super::{SessionData, SessionStore, WriteGuarantee};

struct StoredRecord {
    data: SessionData,
    expires_at: DateTime<Utc>,
}

/// In-memory session storage.
///
/// Records live in a `HashMap` behind a `RwLock`, keyed by session ID. Each
/// operation runs inside one lock scope, so per-key writes are atomic with
/// respect to each other ([`WriteGuarantee::AtomicPerKey`]).
///
/// # Note
///
/// Records are lost when the process restarts. Expired records are treated
/// as absent on read and reclaimed by [`MemoryStore::prune_expired`].
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<RwLock<HashMap<String, StoredRecord>>>,
}

impl MemoryStore {
    /// Creates a new in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records currently stored, including expired
    /// ones not yet pruned.
    pub fn len(&self) -> usize {
        self.records.read().map(|guard| guard.len()).unwrap_or(0)
    }

    /// Returns true if there are no records stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes expired records.
    ///
    /// Returns the number of records pruned.
    #[allow(clippy::significant_drop_tightening)]
    pub fn prune_expired(&self) -> Result<u64, SessionError> {
        let mut records = self.records.write().map_err(poisoned)?;

        let now = Utc::now();
        let before_count = records.len();

        records.retain(|_, record| record.expires_at > now);

        let pruned = before_count.saturating_sub(records.len());
        Ok(u64::try_from(pruned).unwrap_or(u64::MAX))
    }
}

fn poisoned<T>(_: T) -> SessionError {
    SessionError::BackendUnavailable("Lock poisoned".to_owned())
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load(&self, session_id: &str) -> Result<Option<SessionData>, SessionError> {
        let records = self.records.read().map_err(poisoned)?;

        Ok(records
            .get(session_id)
            .filter(|record| record.expires_at > Utc::now())
            .map(|record| record.data.clone()))
    }

    async fn save(
        &self,
        session_id: &str,
        data: &SessionData,
        ttl: Duration,
    ) -> Result<(), SessionError> {
        self.records.write().map_err(poisoned)?.insert(
            session_id.to_owned(),
            StoredRecord {
                data: data.clone(),
                expires_at: Utc::now() + ttl,
            },
        );

        Ok(())
    }

    async fn put_key(
        &self,
        session_id: &str,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> Result<(), SessionError> {
        let mut records = self.records.write().map_err(poisoned)?;

        let record = records
            .entry(session_id.to_owned())
            .or_insert_with(|| StoredRecord {
                data: SessionData::new(),
                expires_at: Utc::now() + ttl,
            });

        record.data.insert(key.to_owned(), value);
        record.expires_at = Utc::now() + ttl;

        Ok(())
    }

    async fn delete_key(
        &self,
        session_id: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<(), SessionError> {
        if let Some(record) = self
            .records
            .write()
            .map_err(poisoned)?
            .get_mut(session_id)
        {
            record.data.remove(key);
            record.expires_at = Utc::now() + ttl;
        }

        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<bool, SessionError> {
        Ok(self
            .records
            .write()
            .map_err(poisoned)?
            .remove(session_id)
            .is_some())
    }

    async fn migrate(
        &self,
        old_id: &str,
        new_id: &str,
        data: &SessionData,
        ttl: Duration,
        delete_old: bool,
    ) -> Result<(), SessionError> {
        let mut records = self.records.write().map_err(poisoned)?;

        if delete_old {
            records.remove(old_id);
        }
        records.insert(
            new_id.to_owned(),
            StoredRecord {
                data: data.clone(),
                expires_at: Utc::now() + ttl,
            },
        );

        Ok(())
    }

    fn write_guarantee(&self) -> WriteGuarantee {
        WriteGuarantee::AtomicPerKey
    }
}
