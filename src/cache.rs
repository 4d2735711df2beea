use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::entry::FileEntry;

/// Key-value storage for [`FileEntry`] values, keyed by canonical request path.
///
/// Implement this to back the cache with an external store. Entries are
/// handed out as `Arc`s so that one entry can sit under several keys and be
/// updated in place; the store only has to keep the `Arc` it was given.
pub trait FileStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Arc<FileEntry>>;

    fn set(&self, key: String, entry: Arc<FileEntry>);
}

/// In-process [`FileStore`] backed by a hash map. No eviction.
#[derive(Debug, Default)]
pub struct MemoryStore {
    map: RwLock<HashMap<String, Arc<FileEntry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.map.read().keys().cloned().collect()
    }
}

impl FileStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Arc<FileEntry>> {
        self.map.read().get(key).cloned()
    }

    fn set(&self, key: String, entry: Arc<FileEntry>) {
        self.map.write().insert(key, entry);
    }
}

impl FromIterator<(String, Arc<FileEntry>)> for MemoryStore {
    fn from_iter<I: IntoIterator<Item = (String, Arc<FileEntry>)>>(iter: I) -> Self {
        Self {
            map: RwLock::new(iter.into_iter().collect()),
        }
    }
}

/// The file cache used by [`StaticCache`](crate::StaticCache): either an
/// in-process map or a caller supplied store.
pub enum FileCache {
    InProcess(MemoryStore),
    External(Arc<dyn FileStore>),
}

impl FileCache {
    pub fn in_process() -> Self {
        FileCache::InProcess(MemoryStore::new())
    }

    /// Start from an in-process map pre-seeded with `entries`.
    pub fn with_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, FileEntry)>,
    {
        FileCache::InProcess(
            entries
                .into_iter()
                .map(|(key, entry)| (key, Arc::new(entry)))
                .collect(),
        )
    }

    pub fn external<S>(store: S) -> Self
    where
        S: FileStore + 'static,
    {
        FileCache::External(Arc::new(store))
    }

    pub fn get(&self, key: &str) -> Option<Arc<FileEntry>> {
        match self {
            FileCache::InProcess(map) => map.get(key),
            FileCache::External(store) => store.get(key),
        }
    }

    pub fn set(&self, key: impl Into<String>, entry: Arc<FileEntry>) {
        let key = key.into();
        match self {
            FileCache::InProcess(map) => map.set(key, entry),
            FileCache::External(store) => store.set(key, entry),
        }
    }

    /// Return the entry under `key`, inserting an empty one first if there is
    /// none. Later in-place updates are visible to every holder of the entry.
    pub(crate) fn get_or_insert(&self, key: &str) -> Arc<FileEntry> {
        if let Some(entry) = self.get(key) {
            return entry;
        }

        let entry = Arc::new(FileEntry::new());
        self.set(key, entry.clone());
        entry
    }
}

impl Default for FileCache {
    fn default() -> Self {
        Self::in_process()
    }
}

impl fmt::Debug for FileCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileCache::InProcess(map) => f.debug_tuple("InProcess").field(&map.len()).finish(),
            FileCache::External(_) => f.write_str("External(..)"),
        }
    }
}

impl From<MemoryStore> for FileCache {
    fn from(map: MemoryStore) -> Self {
        FileCache::InProcess(map)
    }
}
