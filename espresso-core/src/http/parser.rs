//! Request body parsers
//!
//! Parsers are registered per bare media type (`application/json`, no
//! parameters, no wildcards). The special key `default` is used when the
//! request has no `Content-Type` at all.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Limited};
use serde_json::{Map, Value};

use super::body::RequestBody;
use crate::error::BoxError;

/// Key used when a request has no `Content-Type`
pub const DEFAULT_PARSER_KEY: &str = "default";

/// Registered parsers keyed by lower-cased media type
pub type ParserMap = HashMap<String, Arc<dyn Parser>>;

/// Unread request body handed to a [`Parser`]
pub struct BodyReader {
    body: RequestBody,
    limit: usize,
}

impl BodyReader {
    pub(crate) fn new(body: RequestBody, limit: usize) -> Self {
        Self { body, limit }
    }

    /// Read the whole body, failing once it grows past the size limit
    pub async fn bytes(self) -> Result<Bytes, BoxError> {
        let collect: std::pin::Pin<Box<dyn std::future::Future<Output = _> + Send>> =
            Box::pin(Limited::new(self.body, self.limit).collect());
        let collected = collect.await?;
        Ok(collected.to_bytes())
    }

    /// Read the whole body as UTF-8
    pub async fn text(self) -> Result<String, BoxError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }
}

/// Turns a request body into a JSON value
#[async_trait]
pub trait Parser: Send + Sync {
    async fn parse(&self, body: BodyReader) -> Result<Value, BoxError>;
}

/// `application/json`; an empty body parses as `null`
pub struct JsonParser;

#[async_trait]
impl Parser for JsonParser {
    async fn parse(&self, body: BodyReader) -> Result<Value, BoxError> {
        let bytes = body.bytes().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// `application/x-www-form-urlencoded`; repeated keys become arrays
pub struct FormParser;

#[async_trait]
impl Parser for FormParser {
    async fn parse(&self, body: BodyReader) -> Result<Value, BoxError> {
        let bytes = body.bytes().await?;
        Ok(group_pairs(url::form_urlencoded::parse(&bytes).into_owned()))
    }
}

/// `text/plain`
pub struct TextParser;

#[async_trait]
impl Parser for TextParser {
    async fn parse(&self, body: BodyReader) -> Result<Value, BoxError> {
        Ok(Value::String(body.text().await?))
    }
}

/// Parser built from a synchronous function over the buffered body
pub struct FnParser<F>(pub F);

#[async_trait]
impl<F> Parser for FnParser<F>
where
    F: Fn(Bytes) -> Result<Value, BoxError> + Send + Sync,
{
    async fn parse(&self, body: BodyReader) -> Result<Value, BoxError> {
        let bytes = body.bytes().await?;
        (self.0)(bytes)
    }
}

/// The parsers every application starts with
pub fn default_parsers() -> ParserMap {
    let json: Arc<dyn Parser> = Arc::new(JsonParser);
    let mut parsers = ParserMap::new();
    parsers.insert("application/json".to_string(), json.clone());
    parsers.insert(DEFAULT_PARSER_KEY.to_string(), json);
    parsers.insert("application/x-www-form-urlencoded".to_string(), Arc::new(FormParser));
    parsers.insert("text/plain".to_string(), Arc::new(TextParser));
    parsers
}

/// Lower-cased media type of a `Content-Type` value, parameters stripped
pub fn media_type(content_type: &str) -> String {
    content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase()
}

/// Group `key=value` pairs into an object, repeated keys as arrays
pub(crate) fn group_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Value {
    let mut object = Map::new();
    for (key, value) in pairs {
        match object.get_mut(&key) {
            Some(Value::Array(values)) => values.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
            None => {
                object.insert(key, Value::String(value));
            }
        }
    }
    Value::Object(object)
}
