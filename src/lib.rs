//! HTTP static file handler backed by an in-memory file cache.
//!
//! [`StaticCache`] is a [`tower_service::Service`] that serves the files of a
//! directory out of a [`FileCache`]. Files are loaded when the service is
//! built, or on first request with [`Config::dynamic`]. Each cached
//! [`FileEntry`] keeps its metadata and, with [`Config::buffer`], its content in
//! memory. gzip and brotli variants of buffered content are computed on the
//! first request that can use them and reused afterwards.
//!
//! Requests the cache cannot answer are declined and passed on to a fallback
//! service, so the handler can sit in front of the rest of an application.
//!
//! # Example
//! ```no_run
//! use static_cache::{Config, StaticCache};
//!
//! # fn main() -> Result<(), static_cache::Error> {
//! // This will serve files in the "assets" directory and
//! // its subdirectories under `/static/`
//! let service = StaticCache::new(
//!     Config::new("assets")
//!         .prefix("/static")
//!         .gzip(true)
//!         .buffer(true)
//!         .max_age(3600),
//! )?;
//!
//! # async {
//! // Run our service using `hyper`
//! let addr = std::net::SocketAddr::from(([127, 0, 0, 1], 3000));
//! hyper::Server::bind(&addr)
//!     .serve(tower::make::Shared::new(service))
//!     .await
//!     .expect("server error");
//! # };
//! # Ok(())
//! # }
//! ```

use std::io;

use bytes::Bytes;
use http_body::combinators::UnsyncBoxBody;

pub use cache::{FileCache, FileStore, MemoryStore};
pub use compression::is_compressible;
pub use config::{Config, Filter};
pub use entry::{EntrySnapshot, FileEntry};
pub use error::{Error, Result};
pub use static_cache::{DefaultFallback, Outcome, StaticCache};

mod async_body;
mod cache;
mod compression;
mod config;
mod content_encoding;
mod entry;
mod error;
mod headers;
mod loader;
mod path;
mod static_cache;
#[cfg(test)]
mod tests;

pub type ResponseBody = UnsyncBoxBody<Bytes, io::Error>;
