use std::io::{self, Write};
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures_util::Stream;
use http::HeaderMap;
use http_body::Body;
use pin_project::pin_project;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

/// Adapter that turns an `impl AsyncRead` to an `impl Body`.
#[pin_project]
#[derive(Debug)]
pub struct AsyncReadBody<T> {
    #[pin]
    reader: ReaderStream<T>,
}

impl<T> AsyncReadBody<T>
where
    T: AsyncRead,
{
    /// Create a new [`AsyncReadBody`] wrapping the given reader,
    /// with a specific read buffer capacity
    pub(crate) fn with_capacity(read: T, capacity: usize) -> Self {
        Self {
            reader: ReaderStream::with_capacity(read, capacity),
        }
    }
}

impl<T> Body for AsyncReadBody<T>
where
    T: AsyncRead,
{
    type Data = Bytes;
    type Error = io::Error;

    fn poll_data(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Self::Data, Self::Error>>> {
        self.project().reader.poll_next(cx)
    }

    fn poll_trailers(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Result<Option<HeaderMap>, Self::Error>> {
        Poll::Ready(Ok(None))
    }
}

/// Gzips an `impl AsyncRead` at level 9 while it is being sent.
///
/// The compressed length is unknown up front, so responses using this body
/// carry no `Content-Length`.
#[pin_project]
pub struct GzipBody<T> {
    #[pin]
    reader: ReaderStream<T>,
    // `None` once the gzip trailer has been emitted
    encoder: Option<GzEncoder<Vec<u8>>>,
}

impl<T> GzipBody<T>
where
    T: AsyncRead,
{
    pub(crate) fn with_capacity(read: T, capacity: usize) -> Self {
        Self {
            reader: ReaderStream::with_capacity(read, capacity),
            encoder: Some(GzEncoder::new(Vec::new(), Compression::best())),
        }
    }
}

impl<T> Body for GzipBody<T>
where
    T: AsyncRead,
{
    type Data = Bytes;
    type Error = io::Error;

    fn poll_data(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Self::Data, Self::Error>>> {
        let mut this = self.project();

        loop {
            let Some(encoder) = this.encoder.as_mut() else {
                return Poll::Ready(None);
            };

            match ready!(this.reader.as_mut().poll_next(cx)) {
                Some(Ok(chunk)) => {
                    if let Err(err) = encoder.write_all(&chunk) {
                        return Poll::Ready(Some(Err(err)));
                    }

                    // the encoder holds small inputs back until it has a full block
                    let output = encoder.get_mut();
                    if !output.is_empty() {
                        return Poll::Ready(Some(Ok(Bytes::from(std::mem::take(output)))));
                    }
                }
                Some(Err(err)) => return Poll::Ready(Some(Err(err))),
                None => {
                    let finished = this.encoder.take().map(GzEncoder::finish);
                    return match finished {
                        Some(Ok(output)) if !output.is_empty() => {
                            Poll::Ready(Some(Ok(Bytes::from(output))))
                        }
                        Some(Err(err)) => Poll::Ready(Some(Err(err))),
                        _ => Poll::Ready(None),
                    };
                }
            }
        }
    }

    fn poll_trailers(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Result<Option<HeaderMap>, Self::Error>> {
        Poll::Ready(Ok(None))
    }
}
