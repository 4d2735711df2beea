//! Choosing and producing the representation of a file that goes on the wire.

use std::io::{self, Cursor, Write};
use std::path::PathBuf;

use brotli::enc::BrotliEncoderParams;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, trace};

use crate::content_encoding::{AcceptEncoding, Encoding};
use crate::entry::{EntrySnapshot, FileEntry};

/// Files at or below this size are always sent as they are.
pub(crate) const COMPRESSION_THRESHOLD: u64 = 1024;

const BROTLI_MAX_QUALITY: i32 = 11;

/// The default classification of MIME types worth compressing: text, script
/// and markup formats, JSON, SVG, and a few uncompressed binary formats such as
/// fonts and icons. Parameters like `charset` are ignored.
pub fn is_compressible(mime_type: &str) -> bool {
    let essence = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    let Some((kind, subtype)) = essence.split_once('/') else {
        return false;
    };

    if kind == "text" {
        return subtype != "event-stream";
    }

    if subtype.ends_with("+json") || subtype.ends_with("+xml") || subtype.ends_with("+text") {
        return true;
    }

    matches!(
        essence.as_str(),
        "application/javascript"
            | "application/x-javascript"
            | "application/ecmascript"
            | "application/json"
            | "application/xml"
            | "application/wasm"
            | "application/x-sh"
            | "application/rtf"
            | "application/vnd.ms-fontobject"
            | "application/x-font-ttf"
            | "font/ttf"
            | "font/otf"
            | "image/bmp"
            | "image/x-icon"
            | "image/vnd.microsoft.icon"
    )
}

/// gzip at level 9.
pub(crate) fn gzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data)?;
    encoder.finish()
}

/// brotli at the highest quality.
pub(crate) fn brotli(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut output = Vec::new();
    brotli::BrotliCompress(
        &mut Cursor::new(data),
        &mut output,
        &BrotliEncoderParams {
            quality: BROTLI_MAX_QUALITY,
            ..Default::default()
        },
    )?;
    Ok(output)
}

// compression is CPU bound, keep it off the async worker threads
async fn compress_blocking(
    encode: fn(&[u8]) -> io::Result<Vec<u8>>,
    data: Bytes,
) -> io::Result<Bytes> {
    let compressed = tokio::task::spawn_blocking(move || encode(&data))
    .await
    .map_err(|err| io::Error::new(io::ErrorKind::Other, err))??;

    Ok(Bytes::from(compressed))
}

/// What to send for a GET.
#[derive(Debug)]
pub(crate) enum Representation {
    /// The in-memory content, unencoded.
    Identity(Bytes),
    /// A cached or just computed compressed buffer.
    Encoded(Encoding, Bytes),
    /// Content read from disk for this request, gzipped on the fly if set.
    Stream { path: PathBuf, gzip: bool },
}

impl Representation {
    pub(crate) fn encoding(&self) -> Option<Encoding> {
        match self {
            Representation::Identity(_) => None,
            Representation::Encoded(encoding, _) => Some(*encoding),
            Representation::Stream { gzip: true, .. } => Some(Encoding::Gzip),
            Representation::Stream { gzip: false, .. } => None,
        }
    }
}

/// Per-handler compression settings.
pub(crate) struct Negotiator<'a> {
    pub(crate) enabled: bool,
    pub(crate) compressible: &'a (dyn Fn(&str) -> bool + Send + Sync),
    /// Content of the cached `<file>.gz` entry, if precompiled gzip is in use.
    pub(crate) precompiled_gzip: Option<Bytes>,
}

impl Negotiator<'_> {
    fn should_compress(&self, file: &EntrySnapshot, accept: &AcceptEncoding) -> bool {
        self.enabled
            && file.length > COMPRESSION_THRESHOLD
            && accept.accepts(Encoding::Gzip)
            && (self.compressible)(&file.mime_type)
    }

    /// Pick the representation for a GET, computing and caching compressed
    /// buffers on `entry` as needed.
    ///
    /// Buffers already on the entry are served before anything is decided
    /// about compression, but never with an encoding the client refused.
    pub(crate) async fn negotiate(
        self,
        entry: &FileEntry,
        file: &EntrySnapshot,
        accept: &AcceptEncoding,
    ) -> io::Result<Representation> {
        let accept_br = accept.accepts(Encoding::Brotli);
        let accept_gzip = accept.accepts(Encoding::Gzip);

        if let (Some(brotli), true) = (&file.brotli_buffer, accept_br) {
            return Ok(Representation::Encoded(Encoding::Brotli, brotli.clone()));
        }

        if let (Some(gzip), Some(buffer)) = (&file.gzip_buffer, &file.buffer) {
            return Ok(if accept_gzip {
                Representation::Encoded(Encoding::Gzip, gzip.clone())
            } else {
                Representation::Identity(buffer.clone())
            });
        }

        let should_compress = self.should_compress(file, accept);

        let Some(buffer) = &file.buffer else {
            let path = file
                .path
                .clone()
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
            trace!(path = %path.display(), gzip = should_compress, "streaming file");
            return Ok(Representation::Stream {
                path,
                gzip: should_compress,
            });
        };

        if !should_compress {
            return Ok(Representation::Identity(buffer.clone()));
        }

        if accept_br {
            let brotli = match &file.brotli_buffer {
                Some(brotli) => brotli.clone(),
                None => {
                    let compressed = compress_blocking(brotli, buffer.clone()).await?;
                    debug!(
                        length = file.length,
                        compressed = compressed.len(),
                        "computed brotli buffer"
                    );
                    entry.store_encoded(Encoding::Brotli, buffer, compressed.clone());
                    compressed
                }
            };
            return Ok(Representation::Encoded(Encoding::Brotli, brotli));
        }

        let gzip = match self.precompiled_gzip {
            Some(precompiled) => precompiled,
            None => {
                let compressed = compress_blocking(gzip, buffer.clone()).await?;
                debug!(
                    length = file.length,
                    compressed = compressed.len(),
                    "computed gzip buffer"
                );
                compressed
            }
        };
        entry.store_encoded(Encoding::Gzip, buffer, gzip.clone());

        Ok(Representation::Encoded(Encoding::Gzip, gzip))
    }
}

/// The length and encoding a HEAD reports: whatever a GET would send from the
/// buffers cached right now. Nothing is compressed for a HEAD, and a file that
/// a GET would gzip while streaming has no length to report.
pub(crate) fn head_representation(
    negotiator: &Negotiator<'_>,
    file: &EntrySnapshot,
    accept: &AcceptEncoding,
) -> (Option<u64>, Option<Encoding>) {
    if file.buffer.is_none() {
        return if negotiator.should_compress(file, accept) {
            (None, Some(Encoding::Gzip))
        } else {
            (Some(file.length), None)
        };
    }

    match (&file.brotli_buffer, &file.gzip_buffer) {
        (Some(brotli), _) if accept.accepts(Encoding::Brotli) => {
            (Some(brotli.len() as u64), Some(Encoding::Brotli))
        }
        (_, Some(gzip)) if accept.accepts(Encoding::Gzip) => {
            (Some(gzip.len() as u64), Some(Encoding::Gzip))
        }
        _ => (Some(file.length), None),
    }
}
