use std::convert::Infallible;
use std::error::Error as StdError;
use std::future::Ready;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::{env, fmt, io};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::TryFutureExt;
use http::header::{self, ALLOW};
use http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use http_body::{Body, Empty, Full};
use mime_guess::{mime, Mime};
use tokio::fs::{self, File};
use tower_http::set_status::SetStatus;
use tower_http::BoxError;
use tower_service::Service;
use tracing::{debug, trace};

use crate::async_body::{AsyncReadBody, GzipBody};
use crate::cache::FileCache;
use crate::compression::{self, Negotiator, Representation};
use crate::config::Config;
use crate::content_encoding::AcceptEncoding;
use crate::entry::FileEntry;
use crate::error::{Error, Result};
use crate::headers::{is_fresh, LastModified};
use crate::loader::{self, LoadOptions};
use crate::path::PathResolver;
use crate::ResponseBody;

/// Service that serves files from an in-memory [`FileCache`] filled from a
/// directory.
///
/// Only `GET` and `HEAD` requests under the configured prefix for a cached
/// (or, with [`Config::dynamic`], loadable) file are answered. Every other
/// request is declined and handed to the fallback service. Without a fallback
/// declined requests get an empty `404 Not Found`, or `405 Method Not Allowed`
/// for other methods.
///
/// # Example
///
/// ```no_run
/// use static_cache::{Config, StaticCache};
///
/// # fn main() -> Result<(), static_cache::Error> {
/// let service = StaticCache::new(
///     Config::new("assets")
///         .prefix("/assets")
///         .gzip(true)
///         .buffer(true),
/// )?;
///
/// # async {
/// // Run our service using `hyper`
/// let addr = std::net::SocketAddr::from(([127, 0, 0, 1], 3000));
/// hyper::Server::bind(&addr)
///     .serve(tower::make::Shared::new(service))
///     .await
///     .expect("server error");
/// # };
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct StaticCache<F = DefaultFallback> {
    inner: Arc<Inner>,
    fallback: Option<F>,
}

struct Inner {
    resolver: PathResolver,
    files: FileCache,
    load: LoadOptions,
    gzip: bool,
    dynamic: bool,
    use_precompiled_gzip: bool,
    compressible: Arc<dyn Fn(&str) -> bool + Send + Sync>,
    buf_chunk_size: usize,
}

/// How a request was dealt with.
#[derive(Debug)]
pub enum Outcome<B> {
    /// Not ours. The request is handed back untouched.
    Declined(Request<B>),
    /// `200 OK`, with a body unless the request was a `HEAD`.
    Served(Response<ResponseBody>),
    /// `304 Not Modified`, no body.
    NotModified(Response<ResponseBody>),
}

impl<B> Outcome<B> {
    pub fn is_declined(&self) -> bool {
        matches!(self, Outcome::Declined(_))
    }

    /// The response, or the request back if it was declined.
    pub fn into_response(self) -> Result<Response<ResponseBody>, Request<B>> {
        match self {
            Outcome::Declined(req) => Err(req),
            Outcome::Served(res) | Outcome::NotModified(res) => Ok(res),
        }
    }
}

impl StaticCache<DefaultFallback> {
    /// Create a new [`StaticCache`].
    ///
    /// Preloading, embedded files and aliases are all processed here, so this
    /// blocks on the directory walk and file reads.
    pub fn new(mut config: Config) -> Result<Self> {
        let dir = match config.dir.take() {
            Some(dir) => dir,
            None => env::current_dir().map_err(Error::CurrentDir)?,
        };

        if let Some(cache_control) = &config.cache_control {
            if HeaderValue::from_str(cache_control).is_err() {
                return Err(Error::InvalidCacheControl(cache_control.clone()));
            }
        }

        let resolver = PathResolver::new(&config.prefix, dir);
        let files = config.files.take().unwrap_or_default();
        let load = LoadOptions {
            prefix: resolver.prefix().to_owned(),
            max_age: config.max_age,
            cache_control: config.cache_control.clone(),
            buffer: config.buffer,
        };

        #[cfg(feature = "include-dir")]
        if let Some(embedded) = config.embedded {
            let loaded =
                loader::load_embedded(embedded, &load, &files, |name| config.filter.allows(name));
            debug!(loaded, "seeded embedded files");
        }

        if config.preload {
            let loaded = loader::preload(resolver.root(), &load, &files, |name| {
                config.filter.allows(name)
            })?;
            debug!(dir = %resolver.root().display(), loaded, "preloaded files");
        }

        loader::register_aliases(&config.alias, &files);

        Ok(Self {
            inner: Arc::new(Inner {
                resolver,
                files,
                load,
                gzip: config.gzip,
                dynamic: config.dynamic,
                use_precompiled_gzip: config.use_precompiled_gzip,
                compressible: config.compressible,
                buf_chunk_size: config.buf_chunk_size,
            }),
            fallback: None,
        })
    }
}

impl<F> StaticCache<F> {
    /// The cache backing this service.
    pub fn files(&self) -> &FileCache {
        &self.inner.files
    }

    /// Set the fallback service.
    ///
    /// Declined requests are passed to it. The status code it returns is not
    /// altered; use [`StaticCache::not_found_service`] to always respond with
    /// `404 Not Found`.
    pub fn fallback<F2>(self, new_fallback: F2) -> StaticCache<F2> {
        StaticCache {
            inner: self.inner,
            fallback: Some(new_fallback),
        }
    }

    /// Set the fallback service and override the fallback's status code to `404 Not Found`.
    pub fn not_found_service<F2>(self, new_fallback: F2) -> StaticCache<SetStatus<F2>> {
        self.fallback(SetStatus::new(new_fallback, StatusCode::NOT_FOUND))
    }

    /// Run one request through the cache without calling the fallback.
    pub async fn handle<B>(&self, req: Request<B>) -> io::Result<Outcome<B>> {
        self.inner.handle(req).await
    }
}

impl Inner {
    async fn handle<B>(self: &Arc<Self>, req: Request<B>) -> io::Result<Outcome<B>> {
        let Some(key) = self.resolver.lookup_key(req.method(), req.uri().path()) else {
            trace!(method = %req.method(), path = req.uri().path(), "declined");
            return Ok(Outcome::Declined(req));
        };

        let Some(entry) = self.lookup(&key).await else {
            trace!(key = %key, "not cached");
            return Ok(Outcome::Declined(req));
        };

        if !entry.has_buffer() && !self.refresh(&key, &entry).await {
            return Ok(Outcome::Declined(req));
        }

        let file = entry.snapshot();
        let mut headers = HeaderMap::new();

        if self.gzip {
            headers.insert(header::VARY, HeaderValue::from_static("Accept-Encoding"));
        }

        let last_modified = LastModified::from(file.mtime);
        headers.insert(header::LAST_MODIFIED, last_modified.to_header_value());

        if is_fresh(req.headers(), &last_modified) {
            trace!(key = %key, "not modified");
            return Ok(Outcome::NotModified(response(
                StatusCode::NOT_MODIFIED,
                headers,
                empty_body(),
            )));
        }

        headers.insert(header::CONTENT_TYPE, content_type(&file.mime_type));
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_str(&file.cache_control_value())
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?,
        );

        let accept = AcceptEncoding::from_headers(req.headers());

        if req.method() == Method::HEAD {
            let negotiator = Negotiator {
                enabled: self.gzip,
                compressible: &*self.compressible,
                precompiled_gzip: None,
            };
            let (length, encoding) =
                compression::head_representation(&negotiator, &file, &accept);
            if let Some(encoding) = encoding {
                headers.insert(header::CONTENT_ENCODING, encoding.into_header_value());
            }
            if let Some(length) = length {
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
            }

            return Ok(Outcome::Served(response(StatusCode::OK, headers, empty_body())));
        }

        let representation = Negotiator {
            enabled: self.gzip,
            compressible: &*self.compressible,
            precompiled_gzip: self.precompiled_gzip(&key),
        }
        .negotiate(&entry, &file, &accept)
        .await?;

        if let Some(encoding) = representation.encoding() {
            headers.insert(header::CONTENT_ENCODING, encoding.into_header_value());
        }

        let body = match representation {
            Representation::Identity(bytes) | Representation::Encoded(_, bytes) => {
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));
                body_from_bytes(bytes)
            }
            Representation::Stream { path, gzip } => {
                let handle = match File::open(&path).await {
                    Ok(handle) => handle,
                    Err(err) if is_not_found(&err) => {
                        debug!(key = %key, error = %err, "file vanished before streaming");
                        return Ok(Outcome::Declined(req));
                    }
                    Err(err) => return Err(err),
                };

                // a gzipped stream has no length known up front
                if gzip {
                    GzipBody::with_capacity(handle, self.buf_chunk_size).boxed_unsync()
                } else {
                    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(file.length));
                    AsyncReadBody::with_capacity(handle, self.buf_chunk_size).boxed_unsync()
                }
            }
        };

        Ok(Outcome::Served(response(StatusCode::OK, headers, body)))
    }

    async fn lookup(self: &Arc<Self>, key: &str) -> Option<Arc<FileEntry>> {
        if let Some(entry) = self.files.get(key) {
            return Some(entry);
        }

        if !self.dynamic {
            return None;
        }

        let name = self.resolver.resolve_dynamic(key).await?;
        let inner = Arc::clone(self);
        let loaded = tokio::task::spawn_blocking(move || {
            loader::load_file(&name, inner.resolver.root(), &inner.load, &inner.files)
        })
        .await
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err));

        match loaded.and_then(|loaded| loaded) {
            Ok(entry) => Some(entry),
            Err(err) => {
                debug!(key = %key, error = %err, "dynamic load failed");
                None
            }
        }
    }

    /// Re-stat the backing file of an entry without a buffer. `false` means
    /// the file is gone or unreadable.
    async fn refresh(&self, key: &str, entry: &FileEntry) -> bool {
        let Some(path) = entry.path() else {
            return false;
        };

        let meta = match fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(err) => {
                debug!(key = %key, error = %err, "stat failed");
                return false;
            }
        };

        if let Ok(modified) = meta.modified() {
            if entry.refresh(modified, meta.len()) {
                debug!(key = %key, length = meta.len(), "file changed on disk");
            }
        }

        true
    }

    fn precompiled_gzip(&self, key: &str) -> Option<Bytes> {
        if !self.use_precompiled_gzip {
            return None;
        }

        self.files.get(&format!("{key}.gz"))?.buffer()
    }
}

impl<ReqBody, F, FResBody> Service<Request<ReqBody>> for StaticCache<F>
where
    ReqBody: Send + 'static,
    F: Service<Request<ReqBody>, Response = Response<FResBody>> + Clone + Send + 'static,
    F::Error: Into<io::Error>,
    F::Future: Send,
    FResBody: Body<Data = Bytes> + Send + 'static,
    FResBody::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    type Response = Response<ResponseBody>;
    type Error = io::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    #[inline]
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if let Some(fallback) = &mut self.fallback {
            fallback.poll_ready(cx).map_err(Into::into)
        } else {
            Poll::Ready(Ok(()))
        }
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let inner = self.inner.clone();

        // get the ready fallback and leave a non-ready clone in its place
        let fallback = self.fallback.as_mut().map(|fallback| {
            let clone = fallback.clone();
            std::mem::replace(fallback, clone)
        });

        Box::pin(async move {
            match inner.handle(req).await? {
                Outcome::Declined(req) => match fallback {
                    Some(mut fallback) => call_fallback(&mut fallback, req).await,
                    None if req.method() != Method::GET && req.method() != Method::HEAD => {
                        let mut res = response_with_status(StatusCode::METHOD_NOT_ALLOWED);
                        res.headers_mut()
                            .insert(ALLOW, HeaderValue::from_static("GET,HEAD"));
                        Ok(res)
                    }
                    None => Ok(not_found()),
                },
                Outcome::Served(res) | Outcome::NotModified(res) => Ok(res),
            }
        })
    }
}

impl<F> fmt::Debug for StaticCache<F>
where
    F: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCache")
            .field("inner", &self.inner)
            .field("fallback", &self.fallback)
            .finish()
    }
}

impl fmt::Debug for Inner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inner")
            .field("resolver", &self.resolver)
            .field("files", &self.files)
            .field("load", &self.load)
            .field("gzip", &self.gzip)
            .field("dynamic", &self.dynamic)
            .field("use_precompiled_gzip", &self.use_precompiled_gzip)
            .field("buf_chunk_size", &self.buf_chunk_size)
            .finish_non_exhaustive()
    }
}

/// The default fallback service used with [`StaticCache`].
#[derive(Debug, Clone, Copy)]
pub struct DefaultFallback(Infallible);

impl<ReqBody> Service<Request<ReqBody>> for DefaultFallback
where
    ReqBody: Send + 'static,
{
    type Response = Response<ResponseBody>;
    type Error = io::Error;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        match self.0 {}
    }

    fn call(&mut self, _req: Request<ReqBody>) -> Self::Future {
        match self.0 {}
    }
}

fn is_not_found(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
    )
}

/// `Content-Type` for a MIME type, with `charset=utf-8` on text-like types.
fn content_type(mime_type: &str) -> HeaderValue {
    let value = match mime_type.parse::<Mime>() {
        Ok(parsed) if parsed.get_param(mime::CHARSET).is_none() && is_text(&parsed) => {
            format!("{parsed}; charset=utf-8")
        }
        _ => mime_type.to_owned(),
    };

    HeaderValue::from_str(&value)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"))
}

fn is_text(mime: &Mime) -> bool {
    mime.type_() == mime::TEXT
        || matches!(
            mime.essence_str(),
            "application/javascript" | "application/json"
        )
}

fn response(status: StatusCode, headers: HeaderMap, body: ResponseBody) -> Response<ResponseBody> {
    let mut res = Response::new(body);
    *res.status_mut() = status;
    *res.headers_mut() = headers;
    res
}

fn response_with_status(status: StatusCode) -> Response<ResponseBody> {
    response(status, HeaderMap::new(), empty_body())
}

fn empty_body() -> ResponseBody {
    Empty::new().map_err(|err| match err {}).boxed_unsync()
}

fn body_from_bytes(bytes: Bytes) -> ResponseBody {
    Full::from(bytes).map_err(|err| match err {}).boxed_unsync()
}

async fn call_fallback<F, B, FResBody>(
    fallback: &mut F,
    req: Request<B>,
) -> io::Result<Response<ResponseBody>>
where
    F: Service<Request<B>, Response = Response<FResBody>>,
    F::Error: Into<io::Error>,
    FResBody: Body<Data = Bytes> + Send + 'static,
    FResBody::Error: Into<BoxError>,
{
    fallback
        .call(req)
        .err_into()
        .map_ok(|response| {
            response.map(|body| {
                body.map_err(|err| match err.into().downcast::<io::Error>() {
                    Ok(err) => *err,
                    Err(err) => io::Error::new(io::ErrorKind::Other, err),
                })
                .boxed_unsync()
            })
        })
        .await
}

fn not_found() -> Response<ResponseBody> {
    response_with_status(StatusCode::NOT_FOUND)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_adds_charset_to_text() {
        assert_eq!(content_type("text/html"), "text/html; charset=utf-8");
        assert_eq!(
            content_type("application/javascript"),
            "application/javascript; charset=utf-8"
        );
        assert_eq!(content_type("image/png"), "image/png");
        assert_eq!(
            content_type("text/plain; charset=latin1"),
            "text/plain; charset=latin1"
        );
    }

    #[test]
    fn outcome_hands_back_declined_request() {
        let req = Request::builder().uri("/x").body("body").unwrap();
        let outcome: Outcome<&str> = Outcome::Declined(req);

        assert!(outcome.is_declined());
        let req = outcome.into_response().unwrap_err();
        assert_eq!(*req.body(), "body");
    }
}
