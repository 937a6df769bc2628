//! End-to-end tests of the request pipeline
//!
//! Requests go through `Listener::handle`, the same path a socket connection
//! takes, minus the socket.

use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use espresso_core::error::Error;
use espresso_core::http::{Body, FileHeaders};
use espresso_core::prelude::*;
use http_body_util::{BodyExt, Full};

async fn call(app: &Application, request: http::Request<Full<Bytes>>) -> (http::response::Parts, Bytes) {
    let response = app.listener().handle(request).await;
    let (parts, body) = response.into_parts();
    (parts, body.collect().await.unwrap().to_bytes())
}

fn get(uri: &str) -> http::Request<Full<Bytes>> {
    http::Request::get(uri).body(Full::new(Bytes::new())).unwrap()
}

fn echo_param(name: &'static str) -> impl Fn(Request, Response) -> futures::future::BoxFuture<'static, Result<()>> {
    use futures::FutureExt;
    move |req: Request, res: Response| {
        async move {
            let value = req.path_parameter(name).unwrap_or_default().to_string();
            res.send_json(&serde_json::json!({ name: value }), SendOptions::new()).await
        }
        .boxed()
    }
}

#[tokio::test]
async fn test_path_parameter_is_returned() {
    let mut app = Application::new();
    app.add_route("GET", "/items/{id}", echo_param("id")).unwrap();

    let (parts, body) = call(&app, get("/items/42")).await;
    assert_eq!(parts.status, StatusCode::OK);
    assert_eq!(parts.headers["content-type"], "application/json");
    assert_eq!(body, r#"{"id":"42"}"#);
}

#[tokio::test]
async fn test_wildcard_receives_the_remaining_path() {
    let mut app = Application::new();
    app.add_route("GET", "/files/{path+}", echo_param("path")).unwrap();

    let (parts, body) = call(&app, get("/files/a/b/c.txt")).await;
    assert_eq!(parts.status, StatusCode::OK);
    assert_eq!(body, r#"{"path":"a/b/c.txt"}"#);
}

#[tokio::test]
async fn test_controller_error_handler_can_stop_propagation() {
    let global_calls = Arc::new(AtomicUsize::new(0));
    let counted = global_calls.clone();

    let mut controller = Controller::new("/admin");
    controller
        .add_filter(|_req, _res| async { Err(Error::msg("not allowed")) })
        .add_error_handler(|context: ErrorContext| async move {
            context.skip_remaining_handlers();
            context.response.send_json(&serde_json::json!({ "denied": true }), StatusCode::FORBIDDEN).await
        })
        .add_route("GET", "/panel", |_req: Request, res: Response| async move {
            res.send("panel", SendOptions::new()).await
        });

    let mut app = Application::new();
    app.add_controller(&controller).unwrap().add_error_handler(move |_context: ErrorContext| {
        let counted = counted.clone();
        async move {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });

    let (parts, body) = call(&app, get("/admin/panel")).await;
    assert_eq!(parts.status, StatusCode::FORBIDDEN);
    assert_eq!(body, r#"{"denied":true}"#);
    assert_eq!(global_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unstopped_controller_errors_reach_the_application() {
    let seen = Arc::new(AtomicUsize::new(0));
    let counted = seen.clone();

    let mut controller = Controller::new("");
    controller
        .add_route("GET", "/boom", |_req: Request, _res: Response| async { Err(Error::msg("boom")) })
        .add_error_handler(|_context: ErrorContext| async { Ok(()) });

    let mut app = Application::new();
    app.add_controller(&controller).unwrap().add_error_handler(move |context: ErrorContext| {
        let counted = counted.clone();
        async move {
            assert_eq!(context.error.to_string(), "boom");
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });

    let (parts, body) = call(&app, get("/boom")).await;
    assert_eq!(parts.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, r#"{"error":"Internal Server Error"}"#);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

/// An error handler that records `label` and lets the error continue
fn record(seen: &Arc<Mutex<Vec<&'static str>>>, label: &'static str) -> impl Fn(ErrorContext) -> futures::future::BoxFuture<'static, Result<()>> + Send + Sync {
    use futures::FutureExt;
    let seen = seen.clone();
    move |_context: ErrorContext| {
        seen.lock().unwrap().push(label);
        async { Ok(()) }.boxed()
    }
}

#[tokio::test]
async fn test_nested_controller_errors_climb_every_scope() {
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut inner = Controller::new("/inner");
    inner
        .add_route("GET", "/fail", |_req: Request, _res: Response| async { Err(Error::msg("deep")) })
        .add_error_handler(record(&seen, "inner"));

    let mut outer = Controller::new("/outer");
    outer.add_error_handler(record(&seen, "outer")).add_controller(&inner);

    let mut app = Application::new();
    app.add_controller(&outer).unwrap().add_error_handler(record(&seen, "app"));

    let (parts, body) = call(&app, get("/outer/inner/fail")).await;
    assert_eq!(parts.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, r#"{"error":"Internal Server Error"}"#);
    assert_eq!(*seen.lock().unwrap(), vec!["inner", "outer", "app"]);
}

#[tokio::test]
async fn test_nested_controller_can_stop_outer_scopes() {
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut inner = Controller::new("/inner");
    let stopped = seen.clone();
    inner
        .add_route("GET", "/fail", |_req: Request, _res: Response| async { Err(Error::msg("deep")) })
        .add_error_handler(move |context: ErrorContext| {
            stopped.lock().unwrap().push("inner");
            async move {
                context.skip_remaining_handlers();
                context.response.send("recovered", StatusCode::SERVICE_UNAVAILABLE).await
            }
        })
        .add_error_handler(record(&seen, "inner-late"));

    let mut outer = Controller::new("/outer");
    outer.add_error_handler(record(&seen, "outer")).add_controller(&inner);

    let mut app = Application::new();
    app.add_controller(&outer).unwrap().add_error_handler(record(&seen, "app"));

    let (parts, body) = call(&app, get("/outer/inner/fail")).await;
    assert_eq!(parts.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, "recovered");
    assert_eq!(*seen.lock().unwrap(), vec!["inner"]);
}

#[tokio::test]
async fn test_failed_send_still_gets_an_error_response() {
    let mut app = Application::new();
    app.add_route("GET", "/bad-header", |_req: Request, res: Response| async move {
        res.send("hello", SendOptions::new().header("bad name", "v")).await
    })
    .unwrap();

    let (parts, body) = call(&app, get("/bad-header")).await;
    assert_eq!(parts.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(parts.headers["content-type"], "application/json");
    assert_eq!(body, r#"{"error":"Internal Server Error"}"#);
}

#[tokio::test]
async fn test_unmatched_request_is_not_found() {
    let app = Application::new();

    let (parts, body) = call(&app, get("/nope")).await;
    assert_eq!(parts.status, StatusCode::NOT_FOUND);
    assert_eq!(body, r#"{"error":"Not Found"}"#);
}

#[tokio::test]
async fn test_most_specific_route_wins() {
    let mut app = Application::new();
    app.add_route("GET", "/foo/bar", |_req: Request, res: Response| async move {
        res.send("literal", SendOptions::new()).await
    })
    .unwrap()
    .add_route("GET", "/foo/{x}", |_req: Request, res: Response| async move {
        res.send("single", SendOptions::new()).await
    })
    .unwrap()
    .add_route("GET", "/foo/{x+}", |_req: Request, res: Response| async move {
        res.send("wildcard", SendOptions::new()).await
    })
    .unwrap();

    assert_eq!(call(&app, get("/foo/bar")).await.1, "literal");
    assert_eq!(call(&app, get("/foo/baz")).await.1, "single");
    assert_eq!(call(&app, get("/foo/baz/qux")).await.1, "wildcard");
}

#[tokio::test]
async fn test_wrong_method_falls_through_to_default_handlers() {
    let mut app = Application::new();
    app.add_route("POST", "/items", |_req: Request, res: Response| async move {
        res.send((), StatusCode::CREATED).await
    })
    .unwrap()
    .add_default_handler(|req: Request, res: Response| async move {
        let message = format!("no {} here", req.method());
        res.send(message, StatusCode::METHOD_NOT_ALLOWED).await
    });

    let (parts, body) = call(&app, get("/items")).await;
    assert_eq!(parts.status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body, "no GET here");
}

#[tokio::test]
async fn test_application_filter_short_circuits_routing() {
    let mut app = Application::new();
    app.add_filter(|req: Request, res: Response| async move {
        if req.header("authorization").is_none() {
            res.send((), StatusCode::UNAUTHORIZED).await?;
        }
        Ok(())
    })
    .add_route("GET", "/secret", |_req: Request, res: Response| async move {
        res.send("secret", SendOptions::new()).await
    })
    .unwrap();

    assert_eq!(call(&app, get("/secret")).await.0.status, StatusCode::UNAUTHORIZED);

    let authorized =
        http::Request::get("/secret").header("authorization", "Bearer x").body(Full::new(Bytes::new())).unwrap();
    assert_eq!(call(&app, authorized).await.1, "secret");
}

#[tokio::test]
async fn test_typed_body_validation_failure_is_400() {
    #[derive(serde::Deserialize)]
    #[allow(dead_code)]
    struct NewItem {
        name: String,
        price: f64,
    }

    let mut app = Application::new();
    app.add_route("POST", "/items", |req: Request, res: Response| async move {
        let item: NewItem = req.body().await?;
        res.send(item.name, StatusCode::CREATED).await
    })
    .unwrap();

    let request = http::Request::post("/items")
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from_static(br#"{"name":"cup"}"#)))
        .unwrap();
    let (parts, body) = call(&app, request).await;
    assert_eq!(parts.status, StatusCode::BAD_REQUEST);

    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"], "Invalid Request");
    assert_eq!(body["issues"][0]["path"][0], "body");

    let request = http::Request::post("/items")
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from_static(br#"{"name":"cup","price":2.5}"#)))
        .unwrap();
    let (parts, body) = call(&app, request).await;
    assert_eq!(parts.status, StatusCode::CREATED);
    assert_eq!(body, "cup");
}

fn compressing_app() -> Application {
    let mut app = Application::new();
    app.add_route("GET", "/text", |_req: Request, res: Response| async move {
        res.send("espresso ".repeat(500), SendOptions::new()).await
    })
    .unwrap()
    .add_route("GET", "/short", |_req: Request, res: Response| async move {
        res.send("espresso", SendOptions::new()).await
    })
    .unwrap()
    .add_route("GET", "/no-transform", |_req: Request, res: Response| async move {
        res.set_header("cache-control", "no-transform")?;
        res.send("espresso ".repeat(500), SendOptions::new()).await
    })
    .unwrap()
    .add_route("GET", "/encoded", |_req: Request, res: Response| async move {
        res.set_header("content-encoding", "identity")?;
        res.send("espresso ".repeat(500), SendOptions::new()).await
    })
    .unwrap();
    app
}

fn accepting_gzip(uri: &str) -> http::Request<Full<Bytes>> {
    http::Request::get(uri).header("accept-encoding", "gzip").body(Full::new(Bytes::new())).unwrap()
}

#[tokio::test]
async fn test_large_text_is_gzipped() {
    let app = compressing_app();

    let (parts, body) = call(&app, accepting_gzip("/text")).await;
    assert_eq!(parts.headers["content-encoding"], "gzip");
    assert_eq!(parts.headers["vary"], "Accept-Encoding");
    assert!(!parts.headers.contains_key("content-length"));

    let mut decoded = String::new();
    flate2::read::GzDecoder::new(body.as_ref()).read_to_string(&mut decoded).unwrap();
    assert_eq!(decoded, "espresso ".repeat(500));
}

#[tokio::test]
async fn test_compression_is_skipped_when_it_does_not_apply() {
    let app = compressing_app();

    let (parts, body) = call(&app, accepting_gzip("/short")).await;
    assert!(!parts.headers.contains_key("content-encoding"));
    assert_eq!(parts.headers["content-length"], "8");
    assert_eq!(body, "espresso");

    let (parts, _) = call(&app, accepting_gzip("/no-transform")).await;
    assert!(!parts.headers.contains_key("content-encoding"));

    let (parts, _) = call(&app, accepting_gzip("/encoded")).await;
    assert_eq!(parts.headers["content-encoding"], "identity");

    let (parts, _) = call(&app, get("/text")).await;
    assert!(!parts.headers.contains_key("content-encoding"));
}

#[tokio::test]
async fn test_disabled_compression() {
    let mut app = compressing_app();
    app.disable_compression();

    let (parts, _) = call(&app, accepting_gzip("/text")).await;
    assert!(!parts.headers.contains_key("content-encoding"));
}

#[tokio::test]
async fn test_streamed_body_is_chunked() {
    let mut app = Application::new();
    app.add_route("GET", "/stream", |_req: Request, res: Response| async move {
        let chunks = vec![Bytes::from_static(b"one,"), Bytes::from_static(b"two")];
        let stream = futures::stream::iter(chunks.into_iter().map(Ok::<_, espresso_core::error::BoxError>));
        res.send(Body::stream(stream), SendOptions::new()).await
    })
    .unwrap();

    let (parts, body) = call(&app, get("/stream")).await;
    assert!(!parts.headers.contains_key("content-length"));
    assert_eq!(body, "one,two");
}

fn static_app(root: std::path::PathBuf) -> Application {
    let root = Arc::new(root);
    let escape_root = root.clone();

    let mut app = Application::new();
    app.add_route(["GET", "HEAD"], "/static/{file+}", move |req: Request, res: Response| {
        let root = root.clone();
        async move {
            let file = req.path_parameter("file").unwrap_or_default().to_string();
            let headers = FileHeaders::by_filename(|name| {
                if name.ends_with(".css") {
                    vec![("cache-control".to_string(), "max-age=3600".to_string())]
                } else {
                    Vec::new()
                }
            });
            res.send_file(root.as_path(), &file, SendFileOptions::new().headers(headers)).await
        }
    })
    .unwrap()
    .add_route("GET", "/escape", move |_req: Request, res: Response| {
        let root = escape_root.clone();
        async move { res.send_file(root.as_path(), "../outside.txt", SendFileOptions::new()).await }
    })
    .unwrap();
    app
}

fn site() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("css")).unwrap();
    std::fs::write(dir.path().join("css/site.css"), "body{color:#333}").unwrap();
    dir
}

#[tokio::test]
async fn test_file_etag_revalidation() {
    let dir = site();
    let app = static_app(dir.path().to_path_buf());

    let (parts, body) = call(&app, get("/static/css/site.css")).await;
    assert_eq!(parts.status, StatusCode::OK);
    assert_eq!(parts.headers["content-type"], "text/css");
    assert_eq!(parts.headers["cache-control"], "max-age=3600");
    assert_eq!(body, "body{color:#333}");
    let etag = parts.headers["etag"].to_str().unwrap().to_string();

    let revalidate = http::Request::get("/static/css/site.css")
        .header("if-none-match", etag.as_str())
        .body(Full::new(Bytes::new()))
        .unwrap();
    let (parts, body) = call(&app, revalidate).await;
    assert_eq!(parts.status, StatusCode::NOT_MODIFIED);
    assert!(body.is_empty());

    let stale = http::Request::get("/static/css/site.css")
        .header("if-none-match", "W/\"0-0\"")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let (parts, body) = call(&app, stale).await;
    assert_eq!(parts.status, StatusCode::OK);
    assert_eq!(body, "body{color:#333}");
}

#[tokio::test]
async fn test_file_outside_root_is_forbidden() {
    let dir = site();
    let app = static_app(dir.path().join("css"));

    let (parts, body) = call(&app, get("/escape")).await;
    assert_eq!(parts.status, StatusCode::FORBIDDEN);
    assert_eq!(body, r#"{"error":"Forbidden"}"#);
}

#[tokio::test]
async fn test_missing_file_is_not_found() {
    let dir = site();
    let app = static_app(dir.path().to_path_buf());

    let (parts, body) = call(&app, get("/static/css/missing.css")).await;
    assert_eq!(parts.status, StatusCode::NOT_FOUND);
    assert_eq!(body, r#"{"error":"Not Found"}"#);
}

#[tokio::test]
async fn test_head_sends_headers_only() {
    let dir = site();
    let app = static_app(dir.path().to_path_buf());

    let head = http::Request::head("/static/css/site.css").body(Full::new(Bytes::new())).unwrap();
    let (parts, body) = call(&app, head).await;
    assert_eq!(parts.status, StatusCode::OK);
    assert_eq!(parts.headers["content-length"], "16");
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_factories_compose_with_the_application() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<main></main>").unwrap();

    let mut app = Application::new();
    app.add(info_route(&serde_json::json!({ "name": "espresso" }), InfoOptions::new()).unwrap())
        .unwrap()
        .add(spa_route(dir.path(), SpaOptions::new().prefix("/app").exclude(|name, _| name.starts_with("api/"))))
        .unwrap();

    let (parts, body) = call(&app, get("/_info")).await;
    assert_eq!(parts.status, StatusCode::OK);
    assert_eq!(body, r#"{"name":"espresso"}"#);

    let (parts, body) = call(&app, get("/app/some/client/route")).await;
    assert_eq!(parts.status, StatusCode::OK);
    assert_eq!(body, "<main></main>");

    let (parts, _) = call(&app, get("/app/api/items")).await;
    assert_eq!(parts.status, StatusCode::NOT_FOUND);
}
