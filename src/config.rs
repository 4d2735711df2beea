use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::FileCache;
use crate::compression::is_compressible;

// default capacity 64KiB
pub(crate) const DEFAULT_CAPACITY: usize = 65536;

type Predicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Restricts which files are loaded at startup. Names are relative to the
/// served directory and `/` separated, e.g. `css/app.css`.
#[derive(Clone, Default)]
pub enum Filter {
    #[default]
    All,
    AllowList(HashSet<String>),
    Predicate(Predicate),
}

impl Filter {
    pub fn allows(&self, name: &str) -> bool {
        match self {
            Filter::All => true,
            Filter::AllowList(names) => names.contains(name),
            Filter::Predicate(predicate) => predicate(name),
        }
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::All => f.write_str("All"),
            Filter::AllowList(names) => f.debug_tuple("AllowList").field(names).finish(),
            Filter::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Options for [`StaticCache`](crate::StaticCache).
///
/// # Example
///
/// ```
/// use static_cache::Config;
///
/// let config = Config::new("public")
///     .prefix("/static")
///     .gzip(true)
///     .buffer(true)
///     .max_age(3600)
///     .alias("/static/", "/static/index.html");
/// ```
pub struct Config {
    pub(crate) dir: Option<PathBuf>,
    pub(crate) prefix: String,
    pub(crate) files: Option<FileCache>,
    pub(crate) gzip: bool,
    pub(crate) filter: Filter,
    pub(crate) preload: bool,
    pub(crate) alias: BTreeMap<String, String>,
    pub(crate) dynamic: bool,
    pub(crate) max_age: u64,
    pub(crate) cache_control: Option<String>,
    pub(crate) buffer: bool,
    pub(crate) use_precompiled_gzip: bool,
    pub(crate) compressible: Predicate,
    pub(crate) buf_chunk_size: usize,
    #[cfg(feature = "include-dir")]
    pub(crate) embedded: Option<&'static include_dir::Dir<'static>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: None,
            prefix: "/".to_owned(),
            files: None,
            gzip: false,
            filter: Filter::All,
            preload: true,
            alias: BTreeMap::new(),
            dynamic: false,
            max_age: 0,
            cache_control: None,
            buffer: false,
            use_precompiled_gzip: false,
            compressible: Arc::new(is_compressible),
            buf_chunk_size: DEFAULT_CAPACITY,
            #[cfg(feature = "include-dir")]
            embedded: None,
        }
    }
}

impl Config {
    /// Serve the files under `dir`.
    ///
    /// [`Config::default`] serves the process working directory instead.
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: Some(dir.into()),
            ..Self::default()
        }
    }

    /// URL path prefix the files are served under. A trailing `/` is added
    /// when missing.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Use `files` as the cache instead of a fresh in-process map.
    pub fn files(mut self, files: FileCache) -> Self {
        self.files = Some(files);
        self
    }

    /// Negotiate gzip and brotli encodings with clients.
    pub fn gzip(mut self, gzip: bool) -> Self {
        self.gzip = gzip;
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Only preload files for which `predicate` returns `true`.
    pub fn filter_fn<P>(self, predicate: P) -> Self
    where
        P: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.filter(Filter::Predicate(Arc::new(predicate)))
    }

    /// Only preload the listed files.
    pub fn allow_list<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter(Filter::AllowList(names.into_iter().map(Into::into).collect()))
    }

    /// Walk the directory and load every file at construction. Defaults to `true`.
    pub fn preload(mut self, preload: bool) -> Self {
        self.preload = preload;
        self
    }

    /// Serve the entry cached under `target` at `alias` as well. Aliases whose
    /// target is not cached at construction are ignored.
    pub fn alias(mut self, alias: impl Into<String>, target: impl Into<String>) -> Self {
        self.alias.insert(alias.into(), target.into());
        self
    }

    /// Load files that were not preloaded on first request.
    pub fn dynamic(mut self, dynamic: bool) -> Self {
        self.dynamic = dynamic;
        self
    }

    /// Default `max-age` in seconds. Defaults to `0`.
    pub fn max_age(mut self, max_age: u64) -> Self {
        self.max_age = max_age;
        self
    }

    /// Send this literal `Cache-Control` value instead of `public, max-age=..`.
    pub fn cache_control(mut self, cache_control: impl Into<String>) -> Self {
        self.cache_control = Some(cache_control.into());
        self
    }

    /// Keep file contents in memory instead of reading them on every request.
    pub fn buffer(mut self, buffer: bool) -> Self {
        self.buffer = buffer;
        self
    }

    /// Reuse the cached `<file>.gz` entry instead of compressing on demand.
    pub fn use_precompiled_gzip(mut self, use_precompiled_gzip: bool) -> Self {
        self.use_precompiled_gzip = use_precompiled_gzip;
        self
    }

    /// Replace the MIME type classification deciding what gets compressed.
    ///
    /// Defaults to [`is_compressible`].
    pub fn compressible<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.compressible = Arc::new(predicate);
        self
    }

    /// Set a specific read buffer chunk size for streamed files.
    ///
    /// The default capacity is 64kb.
    pub fn buf_chunk_size(mut self, chunk_size: usize) -> Self {
        self.buf_chunk_size = chunk_size;
        self
    }

    /// Seed the cache with the files of an embedded directory. They are held
    /// in memory and have no file on disk behind them.
    #[cfg(feature = "include-dir")]
    pub fn embed(mut self, dir: &'static include_dir::Dir<'static>) -> Self {
        self.embedded = Some(dir);
        self
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("dir", &self.dir)
            .field("prefix", &self.prefix)
            .field("files", &self.files)
            .field("gzip", &self.gzip)
            .field("filter", &self.filter)
            .field("preload", &self.preload)
            .field("alias", &self.alias)
            .field("dynamic", &self.dynamic)
            .field("max_age", &self.max_age)
            .field("cache_control", &self.cache_control)
            .field("buffer", &self.buffer)
            .field("use_precompiled_gzip", &self.use_precompiled_gzip)
            .field("buf_chunk_size", &self.buf_chunk_size)
            .finish_non_exhaustive()
    }
}
