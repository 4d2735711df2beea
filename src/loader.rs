//! Populating the [`FileCache`] from disk.
//!
//! All of this is blocking I/O. It runs at construction and on the first
//! request for a dynamically loaded file, never per request on cached entries.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::cache::FileCache;
use crate::entry::{FileEntry, LoadedFile};
use crate::error::{Error, Result};
use crate::path;

/// Load settings shared by every file.
#[derive(Debug, Clone)]
pub(crate) struct LoadOptions {
    pub(crate) prefix: String,
    pub(crate) max_age: u64,
    pub(crate) cache_control: Option<String>,
    pub(crate) buffer: bool,
}

pub(crate) fn mime_type(key: &str) -> String {
    mime_guess::from_path(key).first_or_octet_stream().to_string()
}

/// Load `name` (relative to `root`) into the cache under its canonical key and
/// return the entry.
///
/// An existing entry is updated in place, keeping a `max_age` that was set on
/// it before.
pub(crate) fn load_file(
    name: &str,
    root: &Path,
    options: &LoadOptions,
    files: &FileCache,
) -> io::Result<Arc<FileEntry>> {
    let key = path::join(&options.prefix, name);
    let file_path = root.join(name);

    let meta = fs::metadata(&file_path)?;
    let buffer = if options.buffer {
        Some(Bytes::from(fs::read(&file_path)?))
    } else {
        None
    };

    let entry = files.get_or_insert(&key);
    let max_age = match entry.max_age() {
        0 => options.max_age,
        max_age => max_age,
    };

    entry.update(LoadedFile {
        path: file_path,
        mime_type: mime_type(&key),
        cache_control: options.cache_control.clone(),
        max_age,
        mtime: meta.modified()?,
        length: meta.len(),
        buffer,
    });

    debug!(key = %key, length = meta.len(), buffered = options.buffer, "loaded file");

    Ok(entry)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

/// Relative, `/` separated names of every non-hidden file below `root`.
pub(crate) fn walk(root: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry));

    for entry in walker {
        let entry = entry?;

        if !entry.file_type().is_file() {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let name = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        names.push(name);
    }

    names.sort();
    Ok(names)
}

/// Load every file below `root` that `allows` lets through.
pub(crate) fn preload(
    root: &Path,
    options: &LoadOptions,
    files: &FileCache,
    allows: impl Fn(&str) -> bool,
) -> Result<usize> {
    let mut loaded = 0;

    for name in walk(root)?.into_iter().filter(|name| allows(name)) {
        load_file(&name, root, options, files).map_err(|source| Error::Io {
            path: root.join(&name),
            source,
        })?;
        loaded += 1;
    }

    Ok(loaded)
}

/// Register each alias as a second key for its target's entry. Returns how
/// many aliases were registered.
pub(crate) fn register_aliases<'a>(
    aliases: impl IntoIterator<Item = (&'a String, &'a String)>,
    files: &FileCache,
) -> usize {
    let mut registered = 0;

    for (alias, target) in aliases {
        if let Some(entry) = files.get(target) {
            files.set(alias.clone(), entry);
            debug!(alias = %alias, target = %target, "aliased file");
            registered += 1;
        }
    }

    registered
}

/// Seed the cache with buffer-only entries for every file in an embedded
/// directory.
#[cfg(feature = "include-dir")]
pub(crate) fn load_embedded(
    dir: &'static include_dir::Dir<'static>,
    options: &LoadOptions,
    files: &FileCache,
    allows: impl Fn(&str) -> bool,
) -> usize {
    use include_dir::DirEntry;

    let mut pending = vec![dir];
    let mut loaded = 0;

    while let Some(dir) = pending.pop() {
        for entry in dir.entries() {
            let file = match entry {
                DirEntry::Dir(dir) => {
                    pending.push(dir);
                    continue;
                }
                DirEntry::File(file) => file,
            };

            let name = file.path().to_string_lossy().replace('\\', "/");
            if path::is_hidden(&name) || !allows(&name) {
                continue;
            }

            let key = path::join(&options.prefix, &name);
            let content = Bytes::from_static(file.contents());
            let mut entry =
                FileEntry::from_bytes(mime_type(&key), content).with_max_age(options.max_age);
            if let Some(meta) = file.metadata() {
                entry = entry.with_mtime(meta.modified());
            }
            if let Some(cache_control) = &options.cache_control {
                entry = entry.with_cache_control(cache_control.clone());
            }

            files.set(key.clone(), Arc::new(entry));
            debug!(key = %key, length = file.contents().len(), "loaded embedded file");
            loaded += 1;
        }
    }

    loaded
}
