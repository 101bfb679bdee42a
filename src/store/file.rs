//! File-based session storage.
//!
//! Stores each session as a JSON file in a directory.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::valid_session_id;
use crate::SessionError;

use super::{SessionData, SessionStore, WriteGuarantee};

#[derive(Serialize, Deserialize)]
struct FileRecord {
    data: SessionData,
    expires_at: DateTime<Utc>,
}

/// File-based session storage.
///
/// Each session is stored as `{session_id}.json` in the configured
/// directory. Per-key writes rewrite the whole file, so this backend
/// declares [`WriteGuarantee::LastWriterWins`]: a concurrent writer against
/// the same session ID can lose an unrelated key.
///
/// # Example
///
/// ```rust,ignore
/// use vestibule::FileStore;
///
/// let store = FileStore::new("/var/lib/myapp/sessions")?;
/// ```
pub struct FileStore {
    directory: PathBuf,
}

impl FileStore {
    /// Creates a new file store, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let dir = directory.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            SessionError::BackendUnavailable(format!("Failed to create session directory: {e}"))
        })?;
        Ok(Self { directory: dir })
    }

    fn record_path(&self, session_id: &str) -> PathBuf {
        self.directory.join(format!("{session_id}.json"))
    }

    fn read_record(&self, session_id: &str) -> Result<Option<FileRecord>, SessionError> {
        let path = self.record_path(session_id);

        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path).map_err(|e| {
            SessionError::BackendUnavailable(format!("Failed to read session file: {e}"))
        })?;

        let record: FileRecord = serde_json::from_str(&content).map_err(|e| {
            SessionError::Serialization(format!("Failed to parse session file: {e}"))
        })?;

        Ok(Some(record))
    }

    fn write_record(&self, session_id: &str, record: &FileRecord) -> Result<(), SessionError> {
        let path = self.record_path(session_id);

        let content = serde_json::to_string_pretty(record).map_err(|e| {
            SessionError::Serialization(format!("Failed to serialize session: {e}"))
        })?;

        std::fs::write(&path, content).map_err(|e| {
            SessionError::BackendUnavailable(format!("Failed to write session file: {e}"))
        })?;

        Ok(())
    }

    fn remove_record(&self, session_id: &str) -> Result<bool, SessionError> {
        let path = self.record_path(session_id);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path).map_err(|e| {
            SessionError::BackendUnavailable(format!("Failed to delete session file: {e}"))
        })?;
        Ok(true)
    }

    /// Removes expired session files.
    ///
    /// Returns the number of files pruned.
    pub fn prune_expired(&self) -> Result<u64, SessionError> {
        let entries = std::fs::read_dir(&self.directory).map_err(|e| {
            SessionError::BackendUnavailable(format!("Failed to read session directory: {e}"))
        })?;

        let now = Utc::now();
        let mut pruned = 0u64;

        for entry in entries.flatten() {
            let path = entry.path();

            if path.extension().is_some_and(|ext| ext == "json") {
                if let Ok(content) = std::fs::read_to_string(&path) {
                    if let Ok(record) = serde_json::from_str::<FileRecord>(&content) {
                        if record.expires_at <= now && std::fs::remove_file(&path).is_ok() {
                            pruned += 1;
                        }
                    }
                }
            }
        }

        Ok(pruned)
    }
}

#[async_trait]
impl SessionStore for FileStore {
    async fn load(&self, session_id: &str) -> Result<Option<SessionData>, SessionError> {
        // Reject anything that could escape the directory
        if !valid_session_id(session_id) {
            return Ok(None);
        }

        match self.read_record(session_id)? {
            Some(record) if record.expires_at > Utc::now() => Ok(Some(record.data)),
            _ => Ok(None),
        }
    }

    async fn save(
        &self,
        session_id: &str,
        data: &SessionData,
        ttl: Duration,
    ) -> Result<(), SessionError> {
        if !valid_session_id(session_id) {
            return Ok(());
        }

        self.write_record(
            session_id,
            &FileRecord {
                data: data.clone(),
                expires_at: Utc::now() + ttl,
            },
        )
    }

    async fn put_key(
        &self,
        session_id: &str,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> Result<(), SessionError> {
        if !valid_session_id(session_id) {
            return Ok(());
        }

        // Whole-file read-modify-write; see the struct-level guarantee note.
        let mut record = self.read_record(session_id)?.unwrap_or(FileRecord {
            data: SessionData::new(),
            expires_at: Utc::now() + ttl,
        });

        record.data.insert(key.to_owned(), value);
        record.expires_at = Utc::now() + ttl;

        self.write_record(session_id, &record)
    }

    async fn delete_key(
        &self,
        session_id: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<(), SessionError> {
        if !valid_session_id(session_id) {
            return Ok(());
        }

        if let Some(mut record) = self.read_record(session_id)? {
            record.data.remove(key);
            record.expires_at = Utc::now() + ttl;
            self.write_record(session_id, &record)?;
        }

        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<bool, SessionError> {
        if !valid_session_id(session_id) {
            return Ok(false);
        }

        self.remove_record(session_id)
    }

    async fn migrate(
        &self,
        old_id: &str,
        new_id: &str,
        data: &SessionData,
        ttl: Duration,
        delete_old: bool,
    ) -> Result<(), SessionError> {
        if !valid_session_id(new_id) {
            return Ok(());
        }

        self.write_record(
            new_id,
            &FileRecord {
                data: data.clone(),
                expires_at: Utc::now() + ttl,
            },
        )?;

        if delete_old && valid_session_id(old_id) {
            self.remove_record(old_id)?;
        }

        Ok(())
    }

    fn write_guarantee(&self) -> WriteGuarantee {
        WriteGuarantee::LastWriterWins
    }
}

#[cfg(test)]
mod tests {
    use std::env;

    use serde_json::json;

    use crate::crypto::generate_token;

    use super::*;

    fn sample_data() -> SessionData {
        let mut data = SessionData::new();
        data.insert("user_id".to_owned(), json!(7));
        data
    }

    fn temp_dir() -> PathBuf {
        let dir = env::temp_dir().join(format!("vestibule_store_test_{}", generate_token(8)));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn cleanup(dir: &PathBuf) {
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = temp_dir();
        let store = FileStore::new(&dir).unwrap();
        let data = sample_data();

        store.save("sid1", &data, Duration::hours(1)).await.unwrap();
        assert_eq!(store.load("sid1").await.unwrap().unwrap(), data);

        cleanup(&dir);
    }

    #[tokio::test]
    async fn test_load_absent_is_none() {
        let dir = temp_dir();
        let store = FileStore::new(&dir).unwrap();

        assert!(store.load("nonexistent").await.unwrap().is_none());

        cleanup(&dir);
    }

    #[tokio::test]
    async fn test_path_traversal_prevention() {
        let dir = temp_dir();
        let store = FileStore::new(&dir).unwrap();

        assert!(store.load("../etc/passwd").await.unwrap().is_none());
        assert!(store
            .load("session/../../../etc/passwd")
            .await
            .unwrap()
            .is_none());

        cleanup(&dir);
    }

    #[tokio::test]
    async fn test_expired_record_is_absent() {
        let dir = temp_dir();
        let store = FileStore::new(&dir).unwrap();

        store
            .save("sid1", &sample_data(), Duration::seconds(-1))
            .await
            .unwrap();
        assert!(store.load("sid1").await.unwrap().is_none());

        cleanup(&dir);
    }

    #[tokio::test]
    async fn test_put_key_and_delete_key() {
        let dir = temp_dir();
        let store = FileStore::new(&dir).unwrap();

        store
            .put_key("sid1", "theme", json!("dark"), Duration::hours(1))
            .await
            .unwrap();
        store
            .put_key("sid1", "lang", json!("sk"), Duration::hours(1))
            .await
            .unwrap();

        let loaded = store.load("sid1").await.unwrap().unwrap();
        assert_eq!(loaded.get("theme"), Some(&json!("dark")));
        assert_eq!(loaded.get("lang"), Some(&json!("sk")));

        store
            .delete_key("sid1", "theme", Duration::hours(1))
            .await
            .unwrap();
        let loaded = store.load("sid1").await.unwrap().unwrap();
        assert!(!loaded.contains_key("theme"));

        cleanup(&dir);
    }

    #[tokio::test]
    async fn test_delete() {
        let dir = temp_dir();
        let store = FileStore::new(&dir).unwrap();

        store
            .save("sid1", &sample_data(), Duration::hours(1))
            .await
            .unwrap();
        assert!(store.delete("sid1").await.unwrap());
        assert!(!store.delete("sid1").await.unwrap());

        cleanup(&dir);
    }

    #[tokio::test]
    async fn test_migrate() {
        let dir = temp_dir();
        let store = FileStore::new(&dir).unwrap();
        let data = sample_data();

        store.save("oldid", &data, Duration::hours(1)).await.unwrap();
        store
            .migrate("oldid", "newid", &data, Duration::hours(1), true)
            .await
            .unwrap();

        assert!(store.load("oldid").await.unwrap().is_none());
        assert_eq!(store.load("newid").await.unwrap().unwrap(), data);

        cleanup(&dir);
    }

    #[tokio::test]
    async fn test_prune_expired() {
        let dir = temp_dir();
        let store = FileStore::new(&dir).unwrap();

        store
            .save("dead", &sample_data(), Duration::seconds(-1))
            .await
            .unwrap();
        store
            .save("alive", &sample_data(), Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(store.prune_expired().unwrap(), 1);
        assert!(store.load("alive").await.unwrap().is_some());

        cleanup(&dir);
    }

    #[test]
    fn test_declared_guarantee() {
        let dir = temp_dir();
        let store = FileStore::new(&dir).unwrap();
        assert_eq!(store.write_guarantee(), WriteGuarantee::LastWriterWins);
        cleanup(&dir);
    }
}
