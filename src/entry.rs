use std::path::PathBuf;
use std::time::SystemTime;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::content_encoding::Encoding;

/// One servable resource: its metadata plus, optionally, its content and
/// compressed variants held in memory.
///
/// Entries are shared between cache keys (aliases) and concurrent requests
/// behind an `Arc`, so every field lives behind a lock and is replaced as a
/// whole value. Readers take an [`EntrySnapshot`] and never see a partially
/// written buffer.
///
/// Compressed buffers are computed outside the lock; two requests racing on the
/// same entry may both compress, and the last store wins. A store is dropped if
/// the entry's content changed while it was being computed.
#[derive(Debug, Default)]
pub struct FileEntry {
    state: RwLock<EntrySnapshot>,
}

/// A point-in-time copy of a [`FileEntry`]. Buffers are reference counted, so
/// taking one is cheap.
#[derive(Debug, Clone)]
pub struct EntrySnapshot {
    /// Backing file on disk, absent for buffer-only entries.
    pub path: Option<PathBuf>,
    pub mime_type: String,
    /// Literal `Cache-Control` value, replaces the one derived from `max_age`.
    pub cache_control: Option<String>,
    pub max_age: u64,
    pub mtime: SystemTime,
    pub length: u64,
    pub buffer: Option<Bytes>,
    pub gzip_buffer: Option<Bytes>,
    pub brotli_buffer: Option<Bytes>,
}

impl Default for EntrySnapshot {
    fn default() -> Self {
        Self {
            path: None,
            mime_type: mime_guess::mime::APPLICATION_OCTET_STREAM.to_string(),
            cache_control: None,
            max_age: 0,
            mtime: SystemTime::UNIX_EPOCH,
            length: 0,
            buffer: None,
            gzip_buffer: None,
            brotli_buffer: None,
        }
    }
}

impl EntrySnapshot {
    /// The `Cache-Control` header value to send.
    pub fn cache_control_value(&self) -> String {
        match &self.cache_control {
            Some(value) => value.clone(),
            None => format!("public, max-age={}", self.max_age),
        }
    }
}

/// Values written by the file loader. Compressed buffers are derived state and
/// are reset whenever the content changes.
#[derive(Debug)]
pub(crate) struct LoadedFile {
    pub(crate) path: PathBuf,
    pub(crate) mime_type: String,
    pub(crate) cache_control: Option<String>,
    pub(crate) max_age: u64,
    pub(crate) mtime: SystemTime,
    pub(crate) length: u64,
    pub(crate) buffer: Option<Bytes>,
}

impl FileEntry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a buffer-only entry with no file behind it.
    pub fn from_bytes(mime_type: impl Into<String>, content: impl Into<Bytes>) -> Self {
        let content = content.into();
        let entry = Self::default();
        {
            let mut state = entry.state.write();
            state.mime_type = mime_type.into();
            state.length = content.len() as u64;
            state.buffer = Some(content);
            state.mtime = SystemTime::now();
        }
        entry
    }

    /// Set the modification time reported in `Last-Modified`.
    pub fn with_mtime(self, mtime: SystemTime) -> Self {
        self.state.write().mtime = mtime;
        self
    }

    pub fn with_max_age(self, max_age: u64) -> Self {
        self.state.write().max_age = max_age;
        self
    }

    pub fn with_cache_control(self, cache_control: impl Into<String>) -> Self {
        self.state.write().cache_control = Some(cache_control.into());
        self
    }

    pub fn snapshot(&self) -> EntrySnapshot {
        self.state.read().clone()
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.state.read().path.clone()
    }

    pub fn mtime(&self) -> SystemTime {
        self.state.read().mtime
    }

    pub fn length(&self) -> u64 {
        self.state.read().length
    }

    pub fn max_age(&self) -> u64 {
        self.state.read().max_age
    }

    pub fn buffer(&self) -> Option<Bytes> {
        self.state.read().buffer.clone()
    }

    pub fn gzip_buffer(&self) -> Option<Bytes> {
        self.state.read().gzip_buffer.clone()
    }

    pub fn brotli_buffer(&self) -> Option<Bytes> {
        self.state.read().brotli_buffer.clone()
    }

    pub(crate) fn has_buffer(&self) -> bool {
        self.state.read().buffer.is_some()
    }

    /// Apply a fresh stat of the backing file. Only a newer modification time
    /// replaces the cached `mtime` and `length`.
    pub(crate) fn refresh(&self, mtime: SystemTime, length: u64) -> bool {
        let mut state = self.state.write();
        if mtime > state.mtime {
            state.mtime = mtime;
            state.length = length;
            true
        } else {
            false
        }
    }

    pub(crate) fn update(&self, loaded: LoadedFile) {
        let mut state = self.state.write();

        let content_changed = match (&state.buffer, &loaded.buffer) {
            (Some(old), Some(new)) => old != new,
            (None, None) => false,
            _ => true,
        };

        state.path = Some(loaded.path);
        state.mime_type = loaded.mime_type;
        state.cache_control = loaded.cache_control;
        state.max_age = loaded.max_age;
        state.mtime = loaded.mtime;
        state.length = loaded.length;
        state.buffer = loaded.buffer;

        if content_changed {
            state.gzip_buffer = None;
            state.brotli_buffer = None;
        }
    }

    /// Cache a compressed variant of `source`. Ignored when `source` is no
    /// longer the entry's buffer.
    pub(crate) fn store_encoded(&self, encoding: Encoding, source: &Bytes, encoded: Bytes) -> bool {
        let mut state = self.state.write();

        if !matches!(&state.buffer, Some(buffer) if same_bytes(buffer, source)) {
            return false;
        }

        match encoding {
            Encoding::Gzip => state.gzip_buffer = Some(encoded),
            Encoding::Brotli => state.brotli_buffer = Some(encoded),
            Encoding::Identity => return false,
        }
        true
    }
}

impl From<EntrySnapshot> for FileEntry {
    fn from(snapshot: EntrySnapshot) -> Self {
        Self {
            state: RwLock::new(snapshot),
        }
    }
}

fn same_bytes(a: &Bytes, b: &Bytes) -> bool {
    a.as_ptr() == b.as_ptr() && a.len() == b.len()
}
