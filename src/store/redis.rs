//! Redis session storage.
//!
//! One redis hash per session at `<prefix><session_id>`. Keys of the session
//! data mapping become hash fields, so single-key writes are field-level
//! `HSET`/`HDEL` operations and concurrent writers to distinct keys cannot
//! lose each other's updates. The record TTL rides on the hash and is
//! refreshed by every write.

use async_trait::async_trait;
use chrono::Duration;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;

use crate::SessionError;

use super::{SessionData, SessionStore, WriteGuarantee};

/// Redis-backed session storage.
///
/// Declares [`WriteGuarantee::AtomicPerKey`]: per-key writes are hash-field
/// operations, and multi-step writes (full save, migrate) run as a MULTI
/// pipeline.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisStore {
    /// Wraps an existing connection manager.
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
        }
    }

    /// Connects to a redis server.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::BackendUnavailable`] if the server cannot be
    /// reached.
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, SessionError> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let conn = client.get_connection_manager().await.map_err(unavailable)?;
        Ok(Self::new(conn, prefix))
    }

    fn record_key(&self, session_id: &str) -> String {
        format!("{}{}", self.prefix, session_id)
    }
}

fn unavailable(e: redis::RedisError) -> SessionError {
    SessionError::BackendUnavailable(e.to_string())
}

fn encode_value(value: &Value) -> Result<String, SessionError> {
    serde_json::to_string(value).map_err(|e| SessionError::Serialization(e.to_string()))
}

fn ttl_seconds(ttl: Duration) -> i64 {
    ttl.num_seconds().max(1)
}

#[async_trait]
impl SessionStore for RedisStore {
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self), err))]
    async fn load(&self, session_id: &str) -> Result<Option<SessionData>, SessionError> {
        let mut conn = self.conn.clone();
        let key = self.record_key(session_id);

        let fields: std::collections::HashMap<String, String> =
            conn.hgetall(&key).await.map_err(unavailable)?;

        // Redis reports a missing hash as an empty one; expiry is native.
        if fields.is_empty() {
            return Ok(None);
        }

        let mut data = SessionData::with_capacity(fields.len());
        for (field, raw) in fields {
            let value: Value = serde_json::from_str(&raw)
                .map_err(|e| SessionError::Serialization(e.to_string()))?;
            data.insert(field, value);
        }

        Ok(Some(data))
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, data), err))]
    async fn save(
        &self,
        session_id: &str,
        data: &SessionData,
        ttl: Duration,
    ) -> Result<(), SessionError> {
        let mut conn = self.conn.clone();
        let key = self.record_key(session_id);

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.del(&key).ignore();
        if !data.is_empty() {
            for (field, value) in data {
                pipe.hset(&key, field, encode_value(value)?).ignore();
            }
            pipe.expire(&key, ttl_seconds(ttl)).ignore();
        }

        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(unavailable)
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, value), err))]
    async fn put_key(
        &self,
        session_id: &str,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> Result<(), SessionError> {
        let mut conn = self.conn.clone();
        let record_key = self.record_key(session_id);

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.hset(&record_key, key, encode_value(&value)?).ignore();
        pipe.expire(&record_key, ttl_seconds(ttl)).ignore();

        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(unavailable)
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self), err))]
    async fn delete_key(
        &self,
        session_id: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<(), SessionError> {
        let mut conn = self.conn.clone();
        let record_key = self.record_key(session_id);

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.hdel(&record_key, key).ignore();
        pipe.expire(&record_key, ttl_seconds(ttl)).ignore();

        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(unavailable)
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self), err))]
    async fn delete(&self, session_id: &str) -> Result<bool, SessionError> {
        let mut conn = self.conn.clone();
        let key = self.record_key(session_id);

        let removed: i64 = conn.del(&key).await.map_err(unavailable)?;
        Ok(removed > 0)
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, data), err))]
    async fn migrate(
        &self,
        old_id: &str,
        new_id: &str,
        data: &SessionData,
        ttl: Duration,
        delete_old: bool,
    ) -> Result<(), SessionError> {
        let mut conn = self.conn.clone();
        let old_key = self.record_key(old_id);
        let new_key = self.record_key(new_id);

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.del(&new_key).ignore();
        if !data.is_empty() {
            for (field, value) in data {
                pipe.hset(&new_key, field, encode_value(value)?).ignore();
            }
            pipe.expire(&new_key, ttl_seconds(ttl)).ignore();
        }
        if delete_old {
            pipe.del(&old_key).ignore();
        }

        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(unavailable)
    }

    fn write_guarantee(&self) -> WriteGuarantee {
        WriteGuarantee::AtomicPerKey
    }
}
