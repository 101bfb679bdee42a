//! One-shot flash messages.
//!
//! Flash entries live inside the session data under a reserved namespace
//! key, so they ride along with the record and never collide with user
//! keys. Messages are plain strings, appended in order and consumed at most
//! once.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::SessionError;

use super::{Session, FLASH_KEY};

/// Flash message accessor, borrowed from a [`Session`].
///
/// ```rust,ignore
/// session.flash().add("success", "Saved.").await?;
/// let messages = session.flash().consume("success").await?;
/// ```
pub struct Flash<'a> {
    session: &'a mut Session,
}

impl<'a> Flash<'a> {
    pub(super) fn new(session: &'a mut Session) -> Self {
        Self { session }
    }

    fn bucket(&self) -> Option<&Map<String, Value>> {
        self.session.data().get(FLASH_KEY).and_then(Value::as_object)
    }

    /// Appends a message to the ordered sequence at `key`.
    pub async fn add(
        &mut self,
        key: &str,
        message: impl Into<String>,
    ) -> Result<(), SessionError> {
        self.session.require_active()?;

        let bucket = self
            .session
            .data_mut()
            .entry(FLASH_KEY.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        // A corrupted namespace is reset rather than trusted
        if !bucket.is_object() {
            *bucket = Value::Object(Map::new());
        }
        let entries = bucket
            .as_object_mut()
            .ok_or(SessionError::Serialization("flash namespace".to_owned()))?;

        let list = entries
            .entry(key.to_owned())
            .or_insert_with(|| Value::Array(Vec::new()));
        if !list.is_array() {
            *list = Value::Array(Vec::new());
        }
        if let Some(items) = list.as_array_mut() {
            items.push(Value::String(message.into()));
        }

        self.session.persist_key(FLASH_KEY).await
    }

    /// Non-destructive peek at the messages stored for `key`.
    ///
    /// Returns an empty sequence when the key is absent. Anything that is
    /// not a plain string is skipped.
    pub fn get(&self, key: &str) -> Result<Vec<String>, SessionError> {
        self.session.require_active()?;

        let messages = self
            .bucket()
            .and_then(|entries| entries.get(key))
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        Ok(messages)
    }

    /// True iff `key` maps to a non-empty sequence.
    pub fn has(&self, key: &str) -> Result<bool, SessionError> {
        Ok(!self.get(key)?.is_empty())
    }

    /// Returns and clears the messages for `key` as one logical operation.
    pub async fn consume(&mut self, key: &str) -> Result<Vec<String>, SessionError> {
        let messages = self.get(key)?;

        let mut emptied = false;
        if let Some(entries) = self
            .session
            .data_mut()
            .get_mut(FLASH_KEY)
            .and_then(Value::as_object_mut)
        {
            entries.remove(key);
            emptied = entries.is_empty();
        }
        if emptied {
            self.session.data_mut().remove(FLASH_KEY);
        }

        self.session.persist_key(FLASH_KEY).await?;
        Ok(messages)
    }

    /// Returns and clears the entire flash store.
    pub async fn consume_all(&mut self) -> Result<HashMap<String, Vec<String>>, SessionError> {
        self.session.require_active()?;

        let mut all = HashMap::new();
        if let Some(entries) = self.bucket() {
            for (key, items) in entries {
                let messages: Vec<String> = items
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_owned)
                            .collect()
                    })
                    .unwrap_or_default();
                all.insert(key.clone(), messages);
            }
        }

        self.session.data_mut().remove(FLASH_KEY);
        self.session.persist_key(FLASH_KEY).await?;
        Ok(all)
    }
}
