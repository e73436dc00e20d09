//! On-disk persistence for node session IDs, keyed by node identifier.

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use tokio::{fs, sync::RwLock};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Stores the last known session ID of every node so a restart can resume
/// instead of re-identifying.
///
/// The map is read from `sessionIds.json` once, on first use, and kept in
/// memory afterwards; every change is written straight back through. Writes
/// go to a temporary file first and are renamed into place, so a crash never
/// leaves a half-written map. Clones share the cache.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
    cache: Arc<RwLock<Option<HashMap<String, String>>>>,
}

impl SessionStore {
    /// Creates a store rooted at `dir`, using the `sessionIds.json` file inside it.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            path: dir.into().join("sessionIds.json"),
            cache: Arc::new(RwLock::new(None)),
        }
    }

    async fn read_file(&self) -> HashMap<String, String> {
        let bytes = match fs::read(&self.path).await {
            Ok(v) => v,
            Err(_) => return HashMap::new(),
        };

        match serde_json::from_slice(&bytes) {
            Ok(map) => map,
            Err(e) => {
                warn!("can't parse '{}', starting empty: {}", self.path.display(), e);
                HashMap::new()
            }
        }
    }

    /// Returns the whole identifier-to-session map, reading the file the
    /// first time. A missing or unreadable file is an empty map.
    pub async fn load(&self) -> HashMap<String, String> {
        if let Some(map) = self.cache.read().await.as_ref() {
            return map.clone();
        }

        let mut cache = self.cache.write().await;
        if cache.is_none() {
            *cache = Some(self.read_file().await);
        }
        cache.clone().unwrap_or_default()
    }

    /// Returns the persisted session ID for this node identifier.
    pub async fn get(&self, identifier: &str) -> Option<String> {
        self.load().await.remove(identifier)
    }

    /// Stores the session ID for this node identifier.
    pub async fn put(&self, identifier: &str, session_id: &str) -> Result<()> {
        let mut cache = self.cache.write().await;
        if cache.is_none() {
            *cache = Some(self.read_file().await);
        }

        let map = cache.get_or_insert_with(HashMap::new);
        map.insert(identifier.to_owned(), session_id.to_owned());

        // the lock stays held so cache and file can't diverge
        self.write(map).await
    }

    /// Removes the session ID for this node identifier.
    pub async fn remove(&self, identifier: &str) -> Result<()> {
        let mut cache = self.cache.write().await;
        if cache.is_none() {
            *cache = Some(self.read_file().await);
        }

        let map = cache.get_or_insert_with(HashMap::new);
        if map.remove(identifier).is_none() {
            return Ok(());
        }

        self.write(map).await
    }

    async fn write(&self, map: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(Error::Io)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(map).map_err(Error::Json)?;

        fs::write(&tmp, &bytes).await.map_err(Error::Io)?;
        fs::rename(&tmp, &self.path).await.map_err(Error::Io)?;

        debug!("persisted {} session id(s) to '{}'", map.len(), self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());

        store.put("main", "la3kfltkdsbnb277e7gs").await.unwrap();
        store.put("backup", "tst5nnnuu6fjuh8gppe6").await.unwrap();

        assert_eq!(
            store.get("main").await.as_deref(),
            Some("la3kfltkdsbnb277e7gs")
        );

        store.put("main", "zxcvbnmasdfghjkqwert").await.unwrap();
        assert_eq!(
            store.get("main").await.as_deref(),
            Some("zxcvbnmasdfghjkqwert")
        );
        assert_eq!(
            store.get("backup").await.as_deref(),
            Some("tst5nnnuu6fjuh8gppe6")
        );
    }

    #[tokio::test]
    async fn a_fresh_store_picks_up_what_the_previous_one_wrote() {
        let dir = tempfile::tempdir().unwrap();

        SessionStore::new(dir.path())
            .put("main", "la3kfltkdsbnb277e7gs")
            .await
            .unwrap();

        let reopened = SessionStore::new(dir.path());
        assert_eq!(
            reopened.get("main").await.as_deref(),
            Some("la3kfltkdsbnb277e7gs")
        );
    }

    #[tokio::test]
    async fn the_file_is_only_read_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());

        store.put("main", "la3kfltkdsbnb277e7gs").await.unwrap();

        // the map lives in memory now; losing the file doesn't lose the ids
        std::fs::remove_file(dir.path().join("sessionIds.json")).unwrap();
        assert_eq!(
            store.get("main").await.as_deref(),
            Some("la3kfltkdsbnb277e7gs")
        );
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("nested"));

        assert!(store.get("main").await.is_none());
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn remove_is_a_noop_for_unknown_identifiers() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());

        store.remove("ghost").await.unwrap();
        store.put("main", "abc").await.unwrap();
        store.remove("main").await.unwrap();

        assert!(store.get("main").await.is_none());
    }
}
