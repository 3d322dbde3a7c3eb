//! Persisted key-value state: pairing tokens and the remembered TV.
//!
//! Values are plain strings under fixed keys so the file stays readable:
//!
//! ```toml
//! samsung_auto_connect_enabled = "true"
//! samsung_connected_tv_ip = "192.168.1.62"
//! samsung_connected_tv_name = "[TV] Living Room"
//! samsung_connected_tv_token = "58812345"
//! "samsung_token_192.168.1.62" = "58812345"
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

/// Key of the remembered TV's IP.
pub const CONNECTED_TV_IP: &str = "samsung_connected_tv_ip";
/// Key of the remembered TV's display name.
pub const CONNECTED_TV_NAME: &str = "samsung_connected_tv_name";
/// Key of the token most recently confirmed by any TV.
pub const CONNECTED_TV_TOKEN: &str = "samsung_connected_tv_token";
/// Key of the auto-connect flag; absent means enabled.
pub const AUTO_CONNECT_ENABLED: &str = "samsung_auto_connect_enabled";

/// Key of the pairing token issued by the TV at `ip`.
pub fn token_key(ip: &str) -> String {
    format!("samsung_token_{ip}")
}

/// Errors raised by a [`KeyValueStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error accessing state at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse state TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize state: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("state store lock poisoned")]
    Poisoned,
}

/// String key-value persistence used by the session and connection manager.
#[cfg_attr(test, mockall::automock)]
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    /// Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

// ── TOML file store ───────────────────────────────────────────────────────────

/// Write-through store backed by a TOML file.
///
/// The whole file is read once on open and rewritten on every change; it only
/// ever holds a handful of keys.  Memory is updated only after the write lands.
pub struct TomlStateStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl TomlStateStore {
    /// Opens `path`, starting empty when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] for file-system errors other than "not
    /// found", and [`StoreError::Parse`] if the file is not valid TOML.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => toml::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(entries)?;
        std::fs::write(&self.path, content).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl KeyValueStore for TomlStateStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        if entries.get(key).map(String::as_str) == Some(value) {
            return Ok(());
        }
        let mut next = entries.clone();
        next.insert(key.to_string(), value.to_string());
        self.flush(&next)?;
        *entries = next;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        if !entries.contains_key(key) {
            return Ok(());
        }
        let mut next = entries.clone();
        next.remove(key);
        self.flush(&next)?;
        *entries = next;
        Ok(())
    }
}

// ── In-memory store ───────────────────────────────────────────────────────────

/// Volatile store for tests and `--ephemeral` runs.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_state_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("tvremote-state-test-{}", uuid::Uuid::new_v4()))
            .join("state.toml")
    }

    #[test]
    fn test_token_key_embeds_ip() {
        assert_eq!(token_key("10.0.0.20"), "samsung_token_10.0.0.20");
    }

    #[test]
    fn test_memory_store_set_get_remove() {
        // Arrange
        let store = MemoryStore::new();

        // Act
        store.set(CONNECTED_TV_IP, "10.0.0.20").unwrap();
        let before = store.get(CONNECTED_TV_IP).unwrap();
        store.remove(CONNECTED_TV_IP).unwrap();
        let after = store.get(CONNECTED_TV_IP).unwrap();

        // Assert
        assert_eq!(before.as_deref(), Some("10.0.0.20"));
        assert_eq!(after, None);
    }

    #[test]
    fn test_toml_store_missing_file_starts_empty() {
        let store = TomlStateStore::open(temp_state_path()).unwrap();
        assert_eq!(store.get(CONNECTED_TV_IP).unwrap(), None);
    }

    #[test]
    fn test_toml_store_persists_across_reopen() {
        // Arrange
        let path = temp_state_path();
        let store = TomlStateStore::open(&path).unwrap();
        store.set(&token_key("192.168.1.62"), "58812345").unwrap();
        store.set(AUTO_CONNECT_ENABLED, "false").unwrap();
        drop(store);

        // Act
        let reopened = TomlStateStore::open(&path).unwrap();

        // Assert
        assert_eq!(
            reopened.get(&token_key("192.168.1.62")).unwrap().as_deref(),
            Some("58812345")
        );
        assert_eq!(
            reopened.get(AUTO_CONNECT_ENABLED).unwrap().as_deref(),
            Some("false")
        );
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_toml_store_remove_is_persisted() {
        let path = temp_state_path();
        let store = TomlStateStore::open(&path).unwrap();
        store.set(CONNECTED_TV_NAME, "Bedroom").unwrap();
        store.remove(CONNECTED_TV_NAME).unwrap();
        store.remove("never_set").unwrap();

        let reopened = TomlStateStore::open(&path).unwrap();
        assert_eq!(reopened.get(CONNECTED_TV_NAME).unwrap(), None);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_toml_store_failed_write_leaves_memory_unchanged() {
        // Arrange: a directory squatting on the state file path.
        let path = temp_state_path();
        let store = TomlStateStore::open(&path).unwrap();
        store.set(CONNECTED_TV_IP, "10.0.0.20").unwrap();
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir_all(&path).unwrap();

        // Act
        let set = store.set(CONNECTED_TV_NAME, "Bedroom");
        let remove = store.remove(CONNECTED_TV_IP);

        // Assert
        assert!(matches!(set, Err(StoreError::Io { .. })));
        assert!(matches!(remove, Err(StoreError::Io { .. })));
        assert_eq!(store.get(CONNECTED_TV_NAME).unwrap(), None);
        assert_eq!(store.get(CONNECTED_TV_IP).unwrap().as_deref(), Some("10.0.0.20"));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_toml_store_rejects_malformed_file() {
        // Arrange
        let path = temp_state_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not = [valid").unwrap();

        // Act
        let result = TomlStateStore::open(&path);

        // Assert
        assert!(matches!(result, Err(StoreError::Parse(_))));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
