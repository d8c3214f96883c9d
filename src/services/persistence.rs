use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use tracing::warn;

use crate::config::{ACTIVE_ID_KEY, SESSIONS_KEY, USER_KEY};
use crate::models::{Conversation, User};

/// String key-value storage, the shape of browser local storage.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self
            .values
            .lock()
            .map_err(|e| anyhow!("Storage lock poisoned: {}", e))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .map_err(|e| anyhow!("Storage lock poisoned: {}", e))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values
            .lock()
            .map_err(|e| anyhow!("Storage lock poisoned: {}", e))?
            .remove(key);
        Ok(())
    }
}

/// One file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create storage directory: {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        std::fs::write(&path, value).with_context(|| format!("Failed to write {}", path.display()))
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }
}

/// Everything that survives a reload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistedState {
    pub conversations: Vec<Conversation>,
    pub active_id: Option<String>,
    pub user: Option<User>,
}

/// Read persisted state. Never fails: bad or unreadable values come back
/// empty.
pub fn load_state(storage: &dyn Storage) -> PersistedState {
    let mut conversations: Vec<Conversation> = read_json(storage, SESSIONS_KEY).unwrap_or_default();
    for message in conversations.iter_mut().flat_map(|c| c.messages.iter_mut()) {
        message.is_streaming = false;
    }

    let active_id = read_raw(storage, ACTIVE_ID_KEY).filter(|id| !id.is_empty());
    let user = read_json(storage, USER_KEY);

    PersistedState {
        conversations,
        active_id,
        user,
    }
}

pub fn save_state(
    storage: &dyn Storage,
    conversations: &[Conversation],
    active_id: Option<&str>,
) -> Result<()> {
    let json = serde_json::to_string(conversations).context("Failed to serialize conversations")?;
    storage.set(SESSIONS_KEY, &json)?;
    storage.set(ACTIVE_ID_KEY, active_id.unwrap_or(""))?;
    Ok(())
}

pub fn save_user(storage: &dyn Storage, user: &User) -> Result<()> {
    let json = serde_json::to_string(user).context("Failed to serialize user")?;
    storage.set(USER_KEY, &json)
}

pub fn clear_user(storage: &dyn Storage) -> Result<()> {
    storage.remove(USER_KEY)
}

fn read_raw(storage: &dyn Storage, key: &str) -> Option<String> {
    match storage.get(key) {
        Ok(value) => value,
        Err(e) => {
            warn!("Failed to read {}: {:#}", key, e);
            None
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(storage: &dyn Storage, key: &str) -> Option<T> {
    let raw = read_raw(storage, key)?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Discarding malformed {}: {}", key, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Message;

    fn sample_conversation() -> Conversation {
        let mut conversation = Conversation::new("Haiku", "gemini-3-flash-preview", false);
        conversation
            .messages
            .push(Message::user("Write a haiku", Vec::new(), None));
        let mut reply = Message::streaming_placeholder();
        reply.content = "Leaves fall".to_string();
        conversation.messages.push(reply);
        conversation
    }

    #[test]
    fn test_round_trip_clears_streaming_flags() {
        let storage = MemoryStorage::new();
        let conversation = sample_conversation();
        save_state(&storage, std::slice::from_ref(&conversation), Some(conversation.id.as_str())).unwrap();

        let state = load_state(&storage);
        assert_eq!(state.conversations.len(), 1);
        assert_eq!(state.active_id.as_deref(), Some(conversation.id.as_str()));
        let loaded = &state.conversations[0];
        assert_eq!(loaded.messages[1].content, "Leaves fall");
        assert!(!loaded.messages[1].is_streaming);
        assert!(state.user.is_none());
    }

    #[test]
    fn test_malformed_values_degrade() {
        let storage = MemoryStorage::new();
        storage.set(SESSIONS_KEY, "{not json").unwrap();
        storage.set(ACTIVE_ID_KEY, "").unwrap();
        storage.set(USER_KEY, "[]").unwrap();

        let state = load_state(&storage);
        assert_eq!(state, PersistedState::default());
    }

    #[test]
    fn test_stored_layout_uses_browser_field_names() {
        let storage = MemoryStorage::new();
        save_state(&storage, &[sample_conversation()], None).unwrap();
        let raw = storage.get(SESSIONS_KEY).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let message = &value[0]["messages"][0];
        assert!(message["timestamp"].is_i64());
        assert!(message.get("isStreaming").is_some());
        assert!(message.get("createdAt").is_none());
        assert_eq!(storage.get(ACTIVE_ID_KEY).unwrap().as_deref(), Some(""));
    }

    #[test]
    fn test_user_save_and_clear() {
        let storage = MemoryStorage::new();
        let user = User {
            id: "u1".to_string(),
            name: "Sam".to_string(),
            email: "sam@example.com".to_string(),
            picture: "https://example.com/sam.png".to_string(),
        };
        save_user(&storage, &user).unwrap();
        assert_eq!(load_state(&storage).user, Some(user));
        clear_user(&storage).unwrap();
        assert!(load_state(&storage).user.is_none());
    }

    #[test]
    fn test_file_storage() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("store")).unwrap();
        assert!(storage.get("missing").unwrap().is_none());
        storage.set("k", "v").unwrap();
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("v"));
        storage.remove("k").unwrap();
        storage.remove("k").unwrap();
        assert!(storage.get("k").unwrap().is_none());

        let conversation = sample_conversation();
        save_state(&storage, &[conversation.clone()], Some(conversation.id.as_str())).unwrap();
        let reopened = FileStorage::new(storage.dir()).unwrap();
        assert_eq!(load_state(&reopened).conversations[0].id, conversation.id);
    }
}
