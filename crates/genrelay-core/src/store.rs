//! # Injected Key-Value Cache
//!
//! The dispatcher keeps three pieces of local state: the current user record,
//! the server the user last selected, and the cached shared-token pool. All
//! three go through [`KeyValueStore`], a minimal string-keyed store with
//! `get`/`set`/`remove`.
//!
//! [`RelayCache`] layers typed accessors over any store. The cache is a
//! read-side optimization: concurrent writers race with last-writer-wins.
//!
//! Two backends ship here:
//! - [`MemoryStore`]: process-local, for tests and embedding.
//! - [`FileStore`]: a single JSON object on disk, for the CLI.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::CoreError;
use crate::profile::UserProfile;

/// Key holding the JSON-serialized [`UserProfile`].
pub const CURRENT_USER_KEY: &str = "genrelay.current_user";
/// Key holding the user-selected server base URL.
pub const SELECTED_SERVER_KEY: &str = "genrelay.selected_server";
/// Key holding the JSON array of cached pool tokens.
pub const TOKEN_POOL_KEY: &str = "genrelay.token_pool";

/// String-keyed cache backend.
///
/// Implementations must be `Send + Sync` so they can be shared behind an
/// `Arc` across concurrent dispatches.
pub trait KeyValueStore: Send + Sync {
    /// Read a value. `Ok(None)` when absent.
    fn get(&self, key: &str) -> Result<Option<String>, CoreError>;

    /// Write a value, replacing any previous one.
    fn set(&self, key: &str, value: &str) -> Result<(), CoreError>;

    /// Delete a value. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<(), CoreError>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CoreError> {
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CoreError> {
        self.entries.write().remove(key);
        Ok(())
    }
}

/// Store persisted as one JSON object file.
///
/// Writes go to a sibling temp file and are renamed into place. A mutex
/// serializes read-modify-write cycles within the process; other processes
/// sharing the file race with last-writer-wins.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    /// Open (or lazily create) a store at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>, CoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<(), CoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        let _guard = self.lock.lock();
        Ok(self.load()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CoreError> {
        let _guard = self.lock.lock();
        let mut entries = self.load()?;
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), CoreError> {
        let _guard = self.lock.lock();
        let mut entries = self.load()?;
        if entries.remove(key).is_some() {
            self.save(&entries)?;
        }
        Ok(())
    }
}

/// Typed accessors over a [`KeyValueStore`].
#[derive(Clone)]
pub struct RelayCache {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for RelayCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayCache").finish_non_exhaustive()
    }
}

impl RelayCache {
    /// Wrap a store.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Cache over a fresh [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// The cached current user, if any.
    pub fn current_user(&self) -> Result<Option<UserProfile>, CoreError> {
        match self.store.get(CURRENT_USER_KEY)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Replace the cached current user.
    pub fn set_current_user(&self, user: &UserProfile) -> Result<(), CoreError> {
        self.store.set(CURRENT_USER_KEY, &serde_json::to_string(user)?)
    }

    /// Forget the current user.
    pub fn clear_current_user(&self) -> Result<(), CoreError> {
        self.store.remove(CURRENT_USER_KEY)
    }

    /// The server the user last picked, if any.
    pub fn selected_server(&self) -> Result<Option<String>, CoreError> {
        Ok(self
            .store
            .get(SELECTED_SERVER_KEY)?
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()))
    }

    /// Remember the user's server choice.
    pub fn set_selected_server(&self, server: &str) -> Result<(), CoreError> {
        self.store.set(SELECTED_SERVER_KEY, server)
    }

    /// Forget the user's server choice.
    pub fn clear_selected_server(&self) -> Result<(), CoreError> {
        self.store.remove(SELECTED_SERVER_KEY)
    }

    /// Cached pool tokens in stored order. Blank entries are dropped.
    pub fn token_pool(&self) -> Result<Vec<String>, CoreError> {
        match self.store.get(TOKEN_POOL_KEY)? {
            Some(raw) => {
                let tokens: Vec<String> = serde_json::from_str(&raw)?;
                Ok(tokens
                    .into_iter()
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect())
            }
            None => Ok(Vec::new()),
        }
    }

    /// Replace the cached pool.
    pub fn set_token_pool(&self, tokens: &[String]) -> Result<(), CoreError> {
        self.store.set(TOKEN_POOL_KEY, &serde_json::to_string(tokens)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_get_set_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        store.remove("k").unwrap();
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("cache.json");

        let first = FileStore::new(&path);
        first.set("a", "1").unwrap();
        first.set("b", "2").unwrap();
        first.remove("a").unwrap();

        let second = FileStore::new(&path);
        assert_eq!(second.get("a").unwrap(), None);
        assert_eq!(second.get("b").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn file_store_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("absent.json"));
        assert_eq!(store.get("anything").unwrap(), None);
        store.remove("anything").unwrap();
        assert!(!store.path().exists());
    }

    #[test]
    fn file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "[not an object").unwrap();
        let store = FileStore::new(&path);
        assert!(matches!(store.get("k"), Err(CoreError::Json(_))));
    }

    #[test]
    fn cache_round_trips_current_user() {
        let cache = RelayCache::in_memory();
        assert!(cache.current_user().unwrap().is_none());

        let mut user = UserProfile::new("u-1", "ana");
        user.personal_token = Some("tok".into());
        cache.set_current_user(&user).unwrap();
        assert_eq!(cache.current_user().unwrap(), Some(user));

        cache.clear_current_user().unwrap();
        assert!(cache.current_user().unwrap().is_none());
    }

    #[test]
    fn selected_server_ignores_blank_value() {
        let cache = RelayCache::in_memory();
        cache.set_selected_server("  ").unwrap();
        assert_eq!(cache.selected_server().unwrap(), None);
        cache.set_selected_server("https://s1.example.com").unwrap();
        assert_eq!(
            cache.selected_server().unwrap().as_deref(),
            Some("https://s1.example.com")
        );
    }

    #[test]
    fn token_pool_drops_blank_entries() {
        let cache = RelayCache::in_memory();
        assert!(cache.token_pool().unwrap().is_empty());
        cache
            .set_token_pool(&["a".into(), " ".into(), "b".into()])
            .unwrap();
        assert_eq!(cache.token_pool().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn corrupt_user_record_is_an_error() {
        let cache = RelayCache::in_memory();
        cache.store().set(CURRENT_USER_KEY, "{broken").unwrap();
        assert!(cache.current_user().is_err());
    }
}
