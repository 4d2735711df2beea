use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building a [`StaticCache`](crate::StaticCache).
///
/// Request handling never produces these: files that cannot be found or read
/// at request time are passed on to the fallback instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to load {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to walk served directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("invalid Cache-Control value {0:?}")]
    InvalidCacheControl(String),

    #[error("current directory is unavailable: {0}")]
    CurrentDir(#[source] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
