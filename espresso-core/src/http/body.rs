//! Response bodies
//!
//! [`Body`] is what handlers hand to [`Response::send`](super::Response::send).
//! The send pipeline resolves it into either a fixed buffer (which gets a
//! `Content-Length`) or a byte stream, and finally into the boxed hyper body
//! type [`ResponseBody`].

use std::fmt;

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use http_body_util::{combinators::UnsyncBoxBody, BodyExt, Empty, Full, StreamBody};
use hyper::body::Frame;

use crate::error::BoxError;

/// Body type of every response produced by Espresso
pub type ResponseBody = UnsyncBoxBody<Bytes, BoxError>;

/// Type-erased inbound request body
pub type RequestBody = UnsyncBoxBody<Bytes, BoxError>;

/// Fallible byte stream used for streamed bodies
pub type ByteStream = BoxStream<'static, Result<Bytes, BoxError>>;

/// Create a response body from any data that can be converted to Bytes
pub fn body_from<T: Into<Bytes>>(data: T) -> ResponseBody {
    Full::new(data.into()).map_err(|never| match never {}).boxed_unsync()
}

/// An empty response body
pub fn empty_body() -> ResponseBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync()
}

/// Wrap a byte stream as a response body
pub fn stream_body(stream: ByteStream) -> ResponseBody {
    StreamBody::new(stream.map(|chunk| chunk.map(Frame::data))).boxed_unsync()
}

/// Anything that can be sent as a response body
#[derive(Default)]
pub enum Body {
    /// No body at all
    #[default]
    Empty,
    /// UTF-8 text, `text/plain` unless a content type is already set
    Text(String),
    /// Key/value pairs, sent as `application/x-www-form-urlencoded`
    Form(Vec<(String, String)>),
    /// A fixed buffer
    Bytes(Bytes),
    /// A stream of chunks of unknown total length
    Stream(ByteStream),
}

impl Body {
    /// Stream the body from any fallible byte stream
    pub fn stream<S, E>(stream: S) -> Self
    where
        S: futures::Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Body::Stream(stream.map(|chunk| chunk.map_err(Into::into)).boxed())
    }

    /// Stream the body from a finite sequence of chunks
    pub fn from_chunks<I>(chunks: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Bytes>,
        I::IntoIter: Send + 'static,
    {
        Body::Stream(stream::iter(chunks.into_iter().map(|chunk| Ok(chunk.into()))).boxed())
    }

    /// Form body from key/value pairs
    pub fn form<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Body::Form(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }

    /// Content type implied by the body kind, if any
    pub(crate) fn implied_content_type(&self) -> Option<&'static str> {
        match self {
            Body::Text(_) => Some("text/plain"),
            Body::Form(_) => Some("application/x-www-form-urlencoded"),
            _ => None,
        }
    }

    pub(crate) fn resolve(self) -> ResolvedBody {
        match self {
            Body::Empty => ResolvedBody::Empty,
            Body::Text(text) => ResolvedBody::Buffer(Bytes::from(text)),
            Body::Form(pairs) => ResolvedBody::Buffer(Bytes::from(encode_form(&pairs))),
            Body::Bytes(bytes) => ResolvedBody::Buffer(bytes),
            Body::Stream(stream) => ResolvedBody::Stream(stream),
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Empty"),
            Body::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Body::Form(pairs) => f.debug_tuple("Form").field(pairs).finish(),
            Body::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Body::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<()> for Body {
    fn from(_: ()) -> Self {
        Body::Empty
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Body::Text(text.to_string())
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Text(text)
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Bytes(Bytes::from(bytes))
    }
}

impl<T: Into<Body>> From<Option<T>> for Body {
    fn from(body: Option<T>) -> Self {
        body.map(Into::into).unwrap_or_default()
    }
}

/// A body after the send pipeline looked at it
pub(crate) enum ResolvedBody {
    Empty,
    Buffer(Bytes),
    Stream(ByteStream),
}

impl ResolvedBody {
    pub(crate) fn into_stream(self) -> ByteStream {
        match self {
            ResolvedBody::Empty => stream::empty().boxed(),
            ResolvedBody::Buffer(bytes) => stream::once(async move { Ok(bytes) }).boxed(),
            ResolvedBody::Stream(stream) => stream,
        }
    }
}

pub(crate) fn encode_form(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", encode_form_component(k), encode_form_component(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// `application/x-www-form-urlencoded` encoding: spaces become `+`
fn encode_form_component(value: &str) -> String {
    urlencoding::encode(value).replace("%20", "+")
}
