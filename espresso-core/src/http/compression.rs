//! Response compression
//!
//! [`CompressionProvider::resolve`] decides, per response, whether the body
//! should go through a streaming compressor and which one. Compression is
//! skipped when:
//!
//! - the response already has a `Content-Encoding`
//! - the request or the response carries `Cache-Control: no-transform`
//! - the declared `Content-Length` is below the configured minimum
//! - the content type is known not to benefit (images, archives, ...)
//! - the client accepts none of the offered encodings
//! - the caller supplied filter vetoes it
//!
//! Encoders are streaming: chunks are written to a gzip/zlib/brotli writer
//! as they arrive, and whatever output the writer produced is forwarded.
//! [`encode_flushed`] also flushes the writer after every chunk, so each
//! input chunk is decodable by the client as soon as it is sent.

use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use async_stream::try_stream;
use brotli::CompressorWriter as BrotliCompressor;
use bytes::Bytes;
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use futures::StreamExt;
use http::header::{ACCEPT_ENCODING, CACHE_CONTROL, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use http::HeaderMap;

use super::body::ByteStream;
use crate::error::BoxError;

/// Encodings the server can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Brotli,
    Gzip,
    Deflate,
}

impl Encoding {
    /// Token used in `Accept-Encoding` and `Content-Encoding`
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Brotli => "br",
            Encoding::Gzip => "gzip",
            Encoding::Deflate => "deflate",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "br" | "brotli" => Ok(Encoding::Brotli),
            "gzip" | "x-gzip" => Ok(Encoding::Gzip),
            "deflate" => Ok(Encoding::Deflate),
            other => Err(format!("unsupported encoding: {}", other)),
        }
    }
}

/// Predicate over the response headers; returning `false` vetoes compression
pub type CompressionFilter = Arc<dyn Fn(&HeaderMap) -> bool + Send + Sync>;

/// Tuning for [`CompressionProvider`]
#[derive(Clone)]
pub struct CompressionOptions {
    /// Bodies with a known length below this are sent as is
    pub min_bytes: u64,
    /// Offered encodings, most preferred first
    pub encodings: Vec<Encoding>,
    pub filter: Option<CompressionFilter>,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self {
            min_bytes: 1024,
            encodings: vec![Encoding::Brotli, Encoding::Gzip, Encoding::Deflate],
            filter: None,
        }
    }
}

impl fmt::Debug for CompressionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressionOptions")
            .field("min_bytes", &self.min_bytes)
            .field("encodings", &self.encodings)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

impl CompressionOptions {
    pub fn min_bytes(mut self, min_bytes: u64) -> Self {
        self.min_bytes = min_bytes;
        self
    }

    pub fn encodings(mut self, encodings: Vec<Encoding>) -> Self {
        self.encodings = encodings;
        self
    }

    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&HeaderMap) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }
}

/// Picks the compression for a response
#[derive(Debug, Clone, Default)]
pub struct CompressionProvider {
    options: CompressionOptions,
}

impl CompressionProvider {
    pub fn new(options: CompressionOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CompressionOptions {
        &self.options
    }

    /// Encoding to apply to a response, or `None` to send it unencoded
    pub fn resolve(&self, request: &HeaderMap, response: &HeaderMap) -> Option<Encoding> {
        if has_no_transform(request) || has_no_transform(response) {
            return None;
        }

        if response.contains_key(CONTENT_ENCODING) {
            return None;
        }

        // An unknown length is never "too small"
        if let Some(length) = header_str(response, CONTENT_LENGTH).and_then(|v| v.trim().parse::<u64>().ok())
        {
            if length < self.options.min_bytes {
                return None;
            }
        }

        if let Some(content_type) = header_str(response, CONTENT_TYPE) {
            if !is_compressible(content_type) {
                return None;
            }
        }

        let encoding = negotiate(header_str(request, ACCEPT_ENCODING), &self.options.encodings)?;

        match &self.options.filter {
            Some(filter) if !filter(response) => None,
            _ => Some(encoding),
        }
    }
}

fn header_str(headers: &HeaderMap, name: http::header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn has_no_transform(headers: &HeaderMap) -> bool {
    headers.get_all(CACHE_CONTROL).iter().filter_map(|v| v.to_str().ok()).any(|value| {
        value.split(',').any(|directive| directive.trim().eq_ignore_ascii_case("no-transform"))
    })
}

/// Whether a media type benefits from compression
///
/// Unknown types are assumed compressible.
pub fn is_compressible(content_type: &str) -> bool {
    let media_type = content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    if media_type.is_empty() {
        return true;
    }

    if media_type.starts_with("text/")
        || media_type.ends_with("+json")
        || media_type.ends_with("+xml")
        || media_type.ends_with("+text")
    {
        return true;
    }

    match media_type.as_str() {
        "application/json"
        | "application/javascript"
        | "application/x-javascript"
        | "application/ecmascript"
        | "application/xml"
        | "application/x-www-form-urlencoded"
        | "application/graphql"
        | "application/wasm"
        | "image/svg+xml"
        | "image/bmp"
        | "image/x-icon"
        | "image/vnd.microsoft.icon"
        | "font/ttf"
        | "font/otf" => true,
        "application/octet-stream"
        | "application/zip"
        | "application/gzip"
        | "application/x-gzip"
        | "application/x-bzip2"
        | "application/x-7z-compressed"
        | "application/x-rar-compressed"
        | "application/zstd"
        | "application/pdf"
        | "font/woff"
        | "font/woff2" => false,
        other => {
            !(other.starts_with("image/") || other.starts_with("audio/") || other.starts_with("video/"))
        }
    }
}

/// Pick the best offered encoding for an `Accept-Encoding` header
///
/// Each offer gets the quality of its exact entry, else the `*` entry, else
/// zero. The highest quality wins and ties go to the earlier offer. No
/// header means no compression.
pub fn negotiate(accept_encoding: Option<&str>, offered: &[Encoding]) -> Option<Encoding> {
    let accept_encoding = accept_encoding?;
    let accepted: Vec<(String, f32)> = accept_encoding.split(',').filter_map(parse_coding).collect();

    let quality_of = |encoding: &Encoding| -> f32 {
        let exact = accepted.iter().find(|(coding, _)| {
            coding.parse::<Encoding>().map(|e| e == *encoding).unwrap_or(false)
        });
        match exact {
            Some((_, q)) => *q,
            None => accepted.iter().find(|(coding, _)| coding == "*").map(|(_, q)| *q).unwrap_or(0.0),
        }
    };

    let mut best: Option<(Encoding, f32)> = None;
    for encoding in offered {
        let q = quality_of(encoding);
        if q <= 0.0 {
            continue;
        }
        match best {
            Some((_, best_q)) if best_q >= q => {}
            _ => best = Some((*encoding, q)),
        }
    }

    best.map(|(encoding, _)| encoding)
}

fn parse_coding(entry: &str) -> Option<(String, f32)> {
    let mut parts = entry.split(';');
    let coding = parts.next()?.trim().to_ascii_lowercase();
    if coding.is_empty() {
        return None;
    }

    let mut quality = 1.0;
    for param in parts {
        if let Some((key, value)) = param.split_once('=') {
            if key.trim().eq_ignore_ascii_case("q") {
                quality = value.trim().parse::<f32>().ok()?;
            }
        }
    }

    Some((coding, quality))
}

/// Collects encoder output between polls
#[derive(Clone, Default)]
struct ChunkSink(Arc<Mutex<Vec<u8>>>);

impl ChunkSink {
    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Write for ChunkSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

enum Encoder {
    Gzip(GzEncoder<ChunkSink>),
    Deflate(ZlibEncoder<ChunkSink>),
    Brotli(Box<BrotliCompressor<ChunkSink>>),
}

impl Encoder {
    fn new(encoding: Encoding, sink: ChunkSink) -> Self {
        match encoding {
            Encoding::Gzip => Encoder::Gzip(GzEncoder::new(sink, Compression::default())),
            Encoding::Deflate => Encoder::Deflate(ZlibEncoder::new(sink, Compression::default())),
            Encoding::Brotli => Encoder::Brotli(Box::new(BrotliCompressor::new(sink, 4096, 5, 22))),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            Encoder::Gzip(encoder) => encoder.write_all(data),
            Encoder::Deflate(encoder) => encoder.write_all(data),
            Encoder::Brotli(encoder) => encoder.write_all(data),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::Gzip(encoder) => encoder.flush(),
            Encoder::Deflate(encoder) => encoder.flush(),
            Encoder::Brotli(encoder) => encoder.flush(),
        }
    }

    fn finish(self) -> io::Result<()> {
        match self {
            Encoder::Gzip(encoder) => encoder.finish().map(drop),
            Encoder::Deflate(encoder) => encoder.finish().map(drop),
            // Consuming the writer terminates the brotli stream
            Encoder::Brotli(encoder) => {
                drop(encoder.into_inner());
                Ok(())
            }
        }
    }
}

/// Run a byte stream through a streaming compressor
pub fn encode(stream: ByteStream, encoding: Encoding) -> ByteStream {
    compress(stream, encoding, false).boxed()
}

/// Like [`encode`], flushing the compressor after every input chunk
///
/// For sources that produce data over time; costs some compression ratio.
pub fn encode_flushed(stream: ByteStream, encoding: Encoding) -> ByteStream {
    compress(stream, encoding, true).boxed()
}

fn compress(
    mut stream: ByteStream,
    encoding: Encoding,
    flush_chunks: bool,
) -> impl futures::Stream<Item = Result<Bytes, BoxError>> + Send + 'static {
    try_stream! {
        let sink = ChunkSink::default();
        let mut encoder = Encoder::new(encoding, sink.clone());

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            encoder.write_all(&chunk)?;
            if flush_chunks {
                encoder.flush()?;
            }
            let output = sink.take();
            if !output.is_empty() {
                yield Bytes::from(output);
            }
        }

        encoder.finish()?;
        let output = sink.take();
        if !output.is_empty() {
            yield Bytes::from(output);
        }
    }
}
