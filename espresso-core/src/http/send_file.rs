//! File responses
//!
//! Files are resolved below a root directory, described with
//! `Content-Type`, `Content-Length`, a weak `ETag` and `Last-Modified`, and
//! streamed in fixed-size chunks. Satisfied conditional requests get a `304`.

use std::path::{Component, Path, PathBuf};

use bytes::BytesMut;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use http::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, ETAG, LAST_MODIFIED};
use http::StatusCode;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use super::body::Body;
use super::conditional::{format_http_date, is_modified};
use super::response::{parse_headers, NotFound, Response, SendFileOptions};
use super::send::send;
use super::{FORBIDDEN_BODY, NOT_FOUND_BODY};
use crate::error::{Error, Result};

const CHUNK_SIZE: usize = 64 * 1024;

pub(crate) fn send_file<'a>(
    response: &'a Response,
    root: &'a Path,
    filename: &'a str,
    options: SendFileOptions,
) -> BoxFuture<'a, Result<()>> {
    async move {
        if response.sent() {
            return Err(Error::AlreadySent);
        }

        let Some(relative) = normalize(filename) else {
            log::debug!("Refusing to serve {:?} outside of {}", filename, root.display());
            return response.send_json(&FORBIDDEN_BODY, StatusCode::FORBIDDEN).await;
        };
        let path = root.join(relative);

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Some(metadata),
            Ok(_) => None,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => None,
            Err(error) => return Err(error.into()),
        };

        let Some(metadata) = metadata else {
            return not_found(response, root, filename, options).await;
        };

        let size = metadata.len();
        let modified: Option<DateTime<Utc>> = metadata.modified().ok().map(DateTime::from);
        let etag = weak_etag(size, modified);

        let mut send_options = options.send_options(filename);
        parse_headers(&send_options.headers)?;

        if options.use_cache_control && !is_modified(response.request().headers(), Some(&etag), modified) {
            describe(response, &path, None, modified, &etag);
            send_options.status = Some(StatusCode::NOT_MODIFIED);
            return send(response, Body::Empty, send_options, None).await;
        }

        // Nothing about the file goes on the response until it is readable
        let file = File::open(&path).await?;
        describe(response, &path, Some(size), modified, &etag);
        send(response, Body::Stream(read_chunks(file)), send_options, None).await
    }
    .boxed()
}

/// Content type, length and validators of the file, unless already set
fn describe(response: &Response, path: &Path, size: Option<u64>, modified: Option<DateTime<Utc>>, etag: &str) {
    let mut state = response.state();
    if !state.headers.contains_key(CONTENT_TYPE) {
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        if let Ok(value) = HeaderValue::from_str(mime.essence_str()) {
            state.headers.insert(CONTENT_TYPE, value);
        }
    }
    match size {
        Some(size) if size > 0 => {
            state.headers.insert(CONTENT_LENGTH, HeaderValue::from(size));
        }
        _ => {
            state.headers.remove(CONTENT_LENGTH);
        }
    }
    if let Some(modified) = modified {
        if !state.headers.contains_key(LAST_MODIFIED) {
            if let Ok(value) = HeaderValue::from_str(&format_http_date(&modified)) {
                state.headers.insert(LAST_MODIFIED, value);
            }
        }
    }
    if !state.headers.contains_key(ETAG) {
        if let Ok(value) = HeaderValue::from_str(etag) {
            state.headers.insert(ETAG, value);
        }
    }
}

async fn not_found(response: &Response, root: &Path, filename: &str, options: SendFileOptions) -> Result<()> {
    match options.on_not_found.clone() {
        Some(NotFound::Document(document)) => {
            let fallback = SendFileOptions { on_not_found: None, use_cache_control: true, ..options };
            return send_file(response, root, &document, fallback).await;
        }
        Some(NotFound::Handler(handler)) => {
            handler(response.clone(), root.to_path_buf(), filename.to_string()).await?;
            if response.sent() {
                return Ok(());
            }
        }
        None => {}
    }

    response.send_json(&NOT_FOUND_BODY, StatusCode::NOT_FOUND).await
}

/// Resolve `.` and `..` without touching the file system
///
/// Leading slashes are ignored, so `/a.txt` names `a.txt` below the root.
/// `None` when the path climbs above the root.
fn normalize(filename: &str) -> Option<PathBuf> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in Path::new(filename).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    Some(parts.iter().collect())
}

/// `W/"<size hex>-<mtime ms hex>"`
fn weak_etag(size: u64, modified: Option<DateTime<Utc>>) -> String {
    let millis = modified.map(|t| t.timestamp_millis().max(0)).unwrap_or(0);
    format!("W/\"{:x}-{:x}\"", size, millis)
}

fn read_chunks(mut file: File) -> super::body::ByteStream {
    let stream = async_stream::try_stream! {
        loop {
            let mut buffer = BytesMut::with_capacity(CHUNK_SIZE);
            let read = file.read_buf(&mut buffer).await?;
            if read == 0 {
                break;
            }
            yield buffer.freeze();
        }
    };
    futures::StreamExt::boxed(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::Request;
    use crate::http::response::{FileHeaders, ResponseReceiver};
    use bytes::Bytes;
    use http_body_util::{BodyExt, Full};
    use std::fs;

    fn response_for(builder: http::request::Builder) -> (Response, ResponseReceiver) {
        let request = Request::from_http(builder.body(Full::new(Bytes::new())).unwrap());
        Response::for_request(&request)
    }

    async fn body_text(response: http::Response<crate::http::body::ResponseBody>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn site() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
        fs::create_dir(dir.path().join("assets")).unwrap();
        fs::write(dir.path().join("assets/app.css"), "body{margin:0}").unwrap();
        fs::write(dir.path().join("empty.txt"), "").unwrap();
        dir
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("a/./b/../c.txt"), Some(PathBuf::from("a/c.txt")));
        assert_eq!(normalize("/index.html"), Some(PathBuf::from("index.html")));
        assert_eq!(normalize("../secret"), None);
        assert_eq!(normalize("a/../../secret"), None);
    }

    #[test]
    fn test_weak_etag_format() {
        let modified = DateTime::from_timestamp_millis(0x1234).unwrap();
        assert_eq!(weak_etag(255, Some(modified)), "W/\"ff-1234\"");
    }

    #[tokio::test]
    async fn test_serves_file_with_validators() {
        let dir = site();
        let (response, rx) = response_for(http::Request::get("/"));
        response.send_file(dir.path(), "assets/app.css", SendFileOptions::new()).await.unwrap();

        let sent = rx.await.unwrap();
        assert_eq!(sent.status(), StatusCode::OK);
        assert_eq!(sent.headers()[CONTENT_TYPE], "text/css");
        assert_eq!(sent.headers()[CONTENT_LENGTH], "14");
        assert!(sent.headers()[ETAG].to_str().unwrap().starts_with("W/\"e-"));
        assert!(sent.headers().contains_key(LAST_MODIFIED));
        assert_eq!(body_text(sent).await, "body{margin:0}");
    }

    #[tokio::test]
    async fn test_empty_file_has_no_length() {
        let dir = site();
        let (response, rx) = response_for(http::Request::get("/"));
        response.send_file(dir.path(), "empty.txt", SendFileOptions::new()).await.unwrap();

        let sent = rx.await.unwrap();
        assert!(sent.headers().get(CONTENT_LENGTH).is_none());
        assert_eq!(body_text(sent).await, "");
    }

    #[tokio::test]
    async fn test_matching_etag_gets_304() {
        let dir = site();
        let (first, rx) = response_for(http::Request::get("/"));
        first.send_file(dir.path(), "index.html", SendFileOptions::new()).await.unwrap();
        let etag = rx.await.unwrap().headers()[ETAG].to_str().unwrap().to_string();

        let (second, rx) = response_for(http::Request::get("/").header("if-none-match", &etag));
        second.send_file(dir.path(), "index.html", SendFileOptions::new()).await.unwrap();
        let sent = rx.await.unwrap();
        assert_eq!(sent.status(), StatusCode::NOT_MODIFIED);
        assert!(sent.headers().get(CONTENT_LENGTH).is_none());
        assert_eq!(body_text(sent).await, "");

        let (third, rx) = response_for(http::Request::get("/").header("if-none-match", &etag));
        third
            .send_file(dir.path(), "index.html", SendFileOptions::new().use_cache_control(false))
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_traversal_is_forbidden() {
        let dir = site();
        let (response, rx) = response_for(http::Request::get("/"));
        response.send_file(dir.path(), "../etc/passwd", SendFileOptions::new()).await.unwrap();

        let sent = rx.await.unwrap();
        assert_eq!(sent.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_text(sent).await, r#"{"error":"Forbidden"}"#);
    }

    #[tokio::test]
    async fn test_missing_file_is_404() {
        let dir = site();
        let (response, rx) = response_for(http::Request::get("/"));
        response.send_file(dir.path(), "nope.txt", SendFileOptions::new()).await.unwrap();

        let sent = rx.await.unwrap();
        assert_eq!(sent.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(sent).await, r#"{"error":"Not Found"}"#);
    }

    #[tokio::test]
    async fn test_directory_counts_as_missing() {
        let dir = site();
        let (response, rx) = response_for(http::Request::get("/"));
        response.send_file(dir.path(), "assets", SendFileOptions::new()).await.unwrap();
        assert_eq!(rx.await.unwrap().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_not_found_document_fallback() {
        let dir = site();
        let (response, rx) = response_for(http::Request::get("/"));
        let options = SendFileOptions::new()
            .not_found_document("index.html")
            .headers(FileHeaders::by_filename(|name| vec![("x-file".to_string(), name.to_string())]));
        response.send_file(dir.path(), "deep/link", options).await.unwrap();

        let sent = rx.await.unwrap();
        assert_eq!(sent.status(), StatusCode::OK);
        assert_eq!(sent.headers()["x-file"], "index.html");
        assert_eq!(body_text(sent).await, "<h1>home</h1>");
    }

    #[tokio::test]
    async fn test_not_found_handler_may_respond() {
        let dir = site();
        let (response, rx) = response_for(http::Request::get("/"));
        let options = SendFileOptions::new().not_found_handler(|response: Response, _root, filename: String| async move {
            response.send(format!("no {filename}"), StatusCode::GONE).await
        });
        response.send_file(dir.path(), "old.txt", options).await.unwrap();

        let sent = rx.await.unwrap();
        assert_eq!(sent.status(), StatusCode::GONE);
        assert_eq!(body_text(sent).await, "no old.txt");
    }

    #[tokio::test]
    async fn test_not_found_handler_without_response_falls_back_to_404() {
        let dir = site();
        let (response, rx) = response_for(http::Request::get("/"));
        let options = SendFileOptions::new().not_found_handler(|_response: Response, _root, _filename| async { Ok(()) });
        response.send_file(dir.path(), "old.txt", options).await.unwrap();
        assert_eq!(rx.await.unwrap().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_header_option_touches_nothing() {
        let dir = site();
        let (response, _rx) = response_for(http::Request::get("/"));
        let options = SendFileOptions::new().headers(FileHeaders::Static(vec![("bad name".into(), "v".into())]));

        let error = response.send_file(dir.path(), "index.html", options).await.unwrap_err();
        assert!(matches!(error, Error::InvalidHeader(_)));
        assert!(!response.sent());
        assert!(!response.has_header("content-type"));
        assert!(!response.has_header("etag"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_file_leaves_no_file_headers() {
        use std::os::unix::fs::PermissionsExt;

        let dir = site();
        let locked = dir.path().join("locked.html");
        fs::write(&locked, "<p>secret</p>").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::File::open(&locked).is_ok() {
            // Permission bits are not enforced for this user
            return;
        }

        let (response, _rx) = response_for(http::Request::get("/"));
        let error = response.send_file(dir.path(), "locked.html", SendFileOptions::new()).await.unwrap_err();
        assert!(matches!(error, Error::Io(_)));
        assert!(!response.sent());
        for name in ["content-type", "content-length", "etag", "last-modified"] {
            assert!(!response.has_header(name), "{name} should not be set");
        }
    }

    #[tokio::test]
    async fn test_head_sends_headers_only() {
        let dir = site();
        let (response, rx) = response_for(http::Request::head("/"));
        response.send_file(dir.path(), "index.html", SendFileOptions::new()).await.unwrap();

        let sent = rx.await.unwrap();
        assert_eq!(sent.headers()[CONTENT_LENGTH], "13");
        assert_eq!(sent.headers()[CONTENT_TYPE], "text/html");
        assert_eq!(body_text(sent).await, "");
    }
}
