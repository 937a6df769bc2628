//! Health check route
//!
//! Every check runs on its own task, on its own interval, and never overlaps
//! itself. The route only reports the latest results; requests never wait for
//! a check. The tasks end once every clone of the route is gone.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use http::StatusCode;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::http::conditional::format_http_date;
use crate::http::route::{IntoStrings, Route};
use crate::http::{Request, Response, SendOptions};

const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Ordered from least to most severe; the route reports the worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Unhealthy,
}

pub type HealthCheck = Arc<dyn Fn() -> BoxFuture<'static, Result<bool>> + Send + Sync>;

/// Invoked after every check with `(name, healthy, error)`
pub type OnCheck = Arc<dyn Fn(&str, bool, Option<&Error>) + Send + Sync>;

/// A check and its schedule
#[derive(Clone)]
pub struct HealthCheckConfig {
    pub check: HealthCheck,
    /// Wait before the first run (default none)
    pub initial_delay: Duration,
    /// Time between the starts of two runs (default 30 seconds)
    pub interval: Duration,
}

impl HealthCheckConfig {
    pub fn new<F, Fut>(check: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool>> + Send + 'static,
    {
        Self { check: Arc::new(move || check().boxed()), initial_delay: Duration::ZERO, interval: DEFAULT_INTERVAL }
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

#[derive(Clone)]
pub struct HealthOptions {
    /// Default `/_health`
    pub paths: Vec<String>,
    pub headers: Vec<(String, String)>,
    /// Defaults to logging failed checks
    pub on_check: OnCheck,
}

impl Default for HealthOptions {
    fn default() -> Self {
        Self { paths: vec!["/_health".to_string()], headers: Vec::new(), on_check: Arc::new(log_failures) }
    }
}

impl HealthOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, paths: impl IntoStrings) -> Self {
        self.paths = paths.into_strings();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn on_check<F>(mut self, on_check: F) -> Self
    where
        F: Fn(&str, bool, Option<&Error>) + Send + Sync + 'static,
    {
        self.on_check = Arc::new(on_check);
        self
    }
}

fn log_failures(name: &str, healthy: bool, error: Option<&Error>) {
    match (healthy, error) {
        (true, _) => {}
        (false, Some(error)) => log::error!("Health check {} failed: {}", name, error),
        (false, None) => log::error!("Health check {} failed", name),
    }
}

struct HealthState {
    report: Mutex<HealthReport>,
}

#[derive(Clone)]
struct HealthReport {
    checks: BTreeMap<String, HealthStatus>,
    last_modified: DateTime<Utc>,
}

impl HealthReport {
    fn status(&self) -> HealthStatus {
        self.checks.values().copied().max().unwrap_or(HealthStatus::Unknown)
    }
}

#[derive(Serialize)]
struct HealthBody<'a> {
    status: HealthStatus,
    checks: &'a BTreeMap<String, HealthStatus>,
}

impl HealthState {
    fn snapshot(&self) -> HealthReport {
        self.report.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn record(&self, name: &str, healthy: bool) {
        let status = if healthy { HealthStatus::Healthy } else { HealthStatus::Unhealthy };
        let mut report = self.report.lock().unwrap_or_else(PoisonError::into_inner);
        report.checks.insert(name.to_string(), status);
        report.last_modified = Utc::now();
    }
}

/// A `GET` route reporting the aggregate of `checks`
///
/// Responds `{"status":..,"checks":{name:..}}` with `503` while any check is
/// unhealthy and `200` otherwise.
///
/// # Panics
///
/// When called outside a Tokio runtime.
pub fn health_route<I, N>(checks: I, options: HealthOptions) -> Route
where
    I: IntoIterator<Item = (N, HealthCheckConfig)>,
    N: Into<String>,
{
    let checks = checks.into_iter().map(|(name, config)| (name.into(), config)).collect::<Vec<_>>();
    let state = Arc::new(HealthState {
        report: Mutex::new(HealthReport {
            checks: checks.iter().map(|(name, _)| (name.clone(), HealthStatus::Unknown)).collect(),
            last_modified: Utc::now(),
        }),
    });

    for (name, config) in checks {
        tokio::spawn(run_check(Arc::downgrade(&state), name, config, options.on_check.clone()));
    }

    let headers = options.headers;
    Route::new("GET", options.paths, move |_request: Request, response: Response| {
        let report = state.snapshot();
        let headers = headers.clone();
        async move {
            response
                .set_header("cache-control", "no-store")?
                .set_header("last-modified", &format_http_date(&report.last_modified))?;

            let status = report.status();
            let code = if status == HealthStatus::Unhealthy {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::OK
            };
            let body = HealthBody { status, checks: &report.checks };
            response.send_json(&body, SendOptions { status: Some(code), headers }).await
        }
    })
}

async fn run_check(state: Weak<HealthState>, name: String, config: HealthCheckConfig, on_check: OnCheck) {
    tokio::time::sleep(config.initial_delay).await;

    while state.strong_count() > 0 {
        let started = Instant::now();
        let (healthy, error) = match (config.check)().await {
            Ok(healthy) => (healthy, None),
            Err(error) => (false, Some(error)),
        };

        let Some(current) = state.upgrade() else { break };
        current.record(&name, healthy);
        drop(current);
        on_check(&name, healthy, error.as_ref());

        tokio::time::sleep(config.interval.saturating_sub(started.elapsed())).await;
    }
    log::debug!("Health check {} stopped", name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::{BodyExt, Full};
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn call(route: &Route) -> (StatusCode, http::HeaderMap, serde_json::Value) {
        let request = Request::from_http(http::Request::get("/_health").body(Full::new(Bytes::new())).unwrap());
        let (response, outlet) = Response::for_request(&request);
        route.handle(request, response.clone()).await.unwrap();
        response.finish();

        let sent = outlet.await.unwrap();
        let (parts, body) = sent.into_parts();
        let body = body.collect().await.unwrap().to_bytes();
        (parts.status, parts.headers, serde_json::from_slice(&body).unwrap())
    }

    async fn settle(route: &Route, expected: &str) -> (StatusCode, serde_json::Value) {
        for _ in 0..100 {
            let (status, _, body) = call(route).await;
            if body["status"] == expected {
                return (status, body);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("health never became {}", expected);
    }

    #[test]
    fn test_status_order() {
        assert!(HealthStatus::Unknown < HealthStatus::Healthy);
        assert!(HealthStatus::Healthy < HealthStatus::Unhealthy);
        assert_eq!(serde_json::to_string(&HealthStatus::Unhealthy).unwrap(), r#""UNHEALTHY""#);
    }

    #[tokio::test]
    async fn test_starts_unknown() {
        let check = HealthCheckConfig::new(|| async { Ok(true) }).initial_delay(Duration::from_secs(60));
        let route = health_route([("db", check)], HealthOptions::new());

        let (status, headers, body) = call(&route).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["cache-control"], "no-store");
        assert!(headers.contains_key("last-modified"));
        assert_eq!(body, serde_json::json!({ "status": "UNKNOWN", "checks": { "db": "UNKNOWN" } }));
    }

    #[tokio::test]
    async fn test_reports_worst_status() {
        let route = health_route(
            [
                ("db", HealthCheckConfig::new(|| async { Ok(true) })),
                ("queue", HealthCheckConfig::new(|| async { Err(Error::msg("unreachable")) })),
            ],
            HealthOptions::new().on_check(|_, _, _| {}),
        );

        let (status, body) = settle(&route, "UNHEALTHY").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["checks"]["db"], "HEALTHY");
        assert_eq!(body["checks"]["queue"], "UNHEALTHY");
    }

    #[tokio::test]
    async fn test_checks_stop_with_the_route() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counted = runs.clone();
        let check = HealthCheckConfig::new(move || {
            let counted = counted.clone();
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }
        })
        .interval(Duration::from_millis(10));

        let route = health_route([("ping", check)], HealthOptions::new());
        settle(&route, "HEALTHY").await;
        drop(route);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let after_drop = runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), after_drop);
    }
}
