//! Request path handling: decoding, normalization and the lookup rules that
//! keep dynamic loading inside the served directory.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use http::Method;
use percent_encoding::percent_decode_str;
use tokio::fs;

/// Percent-decode a request path. A malformed escape, or anything that does
/// not decode to UTF-8, leaves the path as it arrived.
pub(crate) fn decode(raw: &str) -> Cow<'_, str> {
    if !is_well_formed(raw) {
        return Cow::Borrowed(raw);
    }

    percent_decode_str(raw)
        .decode_utf8()
        .unwrap_or(Cow::Borrowed(raw))
}

// every `%` must start a two hex digit escape
fn is_well_formed(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' {
            match bytes.get(i + 1..i + 3) {
                Some([hi, lo]) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => i += 3,
                _ => return false,
            }
        } else {
            i += 1;
        }
    }

    true
}

/// Lexically normalize a `/` separated path: `.` segments are dropped, `..`
/// removes the previous segment and repeated separators collapse. A leading
/// and a trailing separator are preserved. `..` cannot climb above the root of
/// an absolute path.
pub(crate) fn normalize(path: &str) -> String {
    if path.is_empty() {
        return ".".to_owned();
    }

    let absolute = path.starts_with('/');
    let trailing = path.ends_with('/');

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                _ if absolute => {}
                _ => segments.push(".."),
            },
            segment => segments.push(segment),
        }
    }

    let mut normalized = String::with_capacity(path.len());
    if absolute {
        normalized.push('/');
    }
    normalized.push_str(&segments.join("/"));

    if normalized.is_empty() {
        return ".".to_owned();
    }
    if trailing && !normalized.ends_with('/') {
        normalized.push('/');
    }
    normalized
}

/// Join two `/` separated paths and normalize the result.
pub(crate) fn join(base: &str, name: &str) -> String {
    normalize(&format!("{base}/{name}"))
}

/// Force a trailing separator onto the configured prefix, `""` becomes `"/"`.
pub(crate) fn normalize_prefix(prefix: &str) -> String {
    format!("{}/", prefix.trim_end_matches('/'))
}

pub(crate) fn is_hidden(name: &str) -> bool {
    name.rsplit('/').next().is_some_and(|base| base.starts_with('.'))
}

/// Maps request paths to cache keys and, for dynamic loading, to files under
/// the root directory.
#[derive(Debug, Clone)]
pub(crate) struct PathResolver {
    prefix: String,
    // prefix without its leading separator, as found in relative names
    file_prefix: String,
    root: PathBuf,
}

impl PathResolver {
    pub(crate) fn new(prefix: &str, root: PathBuf) -> Self {
        let prefix = normalize_prefix(prefix);
        let file_prefix = normalize(prefix.trim_start_matches('/'));

        Self {
            prefix,
            file_prefix,
            root,
        }
    }

    pub(crate) fn prefix(&self) -> &str {
        &self.prefix
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    /// The cache key for a request, or `None` when the request is not ours.
    pub(crate) fn lookup_key(&self, method: &Method, raw_path: &str) -> Option<String> {
        if method != Method::GET && method != Method::HEAD {
            return None;
        }
        if !raw_path.starts_with(&self.prefix) {
            return None;
        }

        Some(normalize(&decode(raw_path)))
    }

    /// Map a cache key that missed onto a regular file below the root.
    ///
    /// Returns the file's name relative to the root, `/` separated, or `None`
    /// when the key names a hidden file, escapes the root or does not point at
    /// a regular file.
    pub(crate) async fn resolve_dynamic(&self, key: &str) -> Option<String> {
        let name = self.relative_name(key)?;
        let full_path = self.root.join(&name);

        // files that can be accessed must live under the root directory
        if !full_path.starts_with(&self.root) {
            return None;
        }

        match fs::metadata(&full_path).await {
            Ok(meta) if meta.is_file() => Some(name),
            _ => None,
        }
    }

    fn relative_name(&self, key: &str) -> Option<String> {
        if is_hidden(key) {
            return None;
        }

        let name = key.strip_prefix('/').unwrap_or(key);
        let name = if self.prefix == "/" {
            name
        } else {
            name.strip_prefix(self.file_prefix.as_str())?
        };

        let name = name.trim_start_matches('/');
        if name.is_empty() || name.split('/').any(|segment| segment == "..") {
            return None;
        }

        Some(name.to_owned())
    }
}
