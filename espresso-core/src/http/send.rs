//! Response send pipeline
//!
//! Steps, in order:
//!
//! 1. apply the requested status and headers
//! 2. default the content type from the body kind
//! 3. fixed buffers get a `Content-Length`
//! 4. negotiate compression; when it applies, add `Vary: Accept-Encoding`,
//!    set `Content-Encoding` and drop `Content-Length`
//! 5. `HEAD` requests get the head only, the body is discarded
//! 6. everything else streams the (possibly compressed) body
//!
//! Backpressure comes from hyper: the body is only polled as fast as the
//! connection can write it.

use http::header::{HeaderValue, CONTENT_ENCODING, CONTENT_LENGTH, VARY};
use http::{HeaderMap, Method};

use super::body::{body_from, empty_body, stream_body, Body, ResolvedBody};
use super::compression::{encode, encode_flushed, Encoding};
use super::response::{merge_headers, parse_headers, Response, SendOptions};
use crate::error::Result;

/// Claim `response` and send `body` on it
///
/// The option headers are parsed before the response is claimed, so a bad
/// header leaves it unsent for the error handlers.
pub(crate) async fn send(
    response: &Response,
    body: Body,
    options: SendOptions,
    content_type: Option<&'static str>,
) -> Result<()> {
    let extra = parse_headers(&options.headers)?;
    response.begin_send()?;

    let content_type = content_type.or_else(|| body.implied_content_type());
    let resolved = body.resolve();

    let encoding = {
        let mut state = response.state();
        if let Some(status) = options.status {
            state.status = status;
        }
        merge_headers(&mut state.headers, extra);

        if matches!(resolved, ResolvedBody::Empty) {
            None
        } else {
            if let Some(content_type) = content_type {
                Response::default_content_type(&mut state, content_type);
            }
            if let ResolvedBody::Buffer(bytes) = &resolved {
                state.headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
            }

            let encoding = response
                .compression()
                .and_then(|provider| provider.resolve(response.request().headers(), &state.headers));
            if let Some(encoding) = encoding {
                add_vary(&mut state.headers, "Accept-Encoding");
                state.headers.insert(CONTENT_ENCODING, HeaderValue::from_static(encoding.as_str()));
                state.headers.remove(CONTENT_LENGTH);
            }
            encoding
        }
    };

    if response.request().method() == Method::HEAD {
        // Headers describe the body that would have been sent
        response.dispatch(empty_body());
        return Ok(());
    }

    response.dispatch(into_response_body(resolved, encoding));
    Ok(())
}

fn into_response_body(resolved: ResolvedBody, encoding: Option<Encoding>) -> super::body::ResponseBody {
    match (resolved, encoding) {
        (ResolvedBody::Empty, _) => empty_body(),
        (ResolvedBody::Buffer(bytes), None) => body_from(bytes),
        (ResolvedBody::Stream(stream), None) => stream_body(stream),
        (ResolvedBody::Stream(stream), Some(encoding)) => stream_body(encode_flushed(stream, encoding)),
        (resolved, Some(encoding)) => stream_body(encode(resolved.into_stream(), encoding)),
    }
}

/// Add a field to `Vary` unless it's already listed (or `*`)
pub(crate) fn add_vary(headers: &mut HeaderMap, field: &str) {
    let listed = headers
        .get_all(VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .any(|existing| existing == "*" || existing.eq_ignore_ascii_case(field));

    if !listed {
        if let Ok(value) = HeaderValue::from_str(field) {
            headers.append(VARY, value);
        }
    }
}
