//! Single page application route
//!
//! Serves the files of a directory and answers every other path below the
//! prefix with the index document, so client side routing survives a reload.

use std::path::PathBuf;
use std::sync::Arc;

use crate::http::route::{IntoStrings, Route};
use crate::http::{FileHeaders, Request, Response, SendFileOptions};

/// Decides over `(filename, request)`
pub type SpaMatcher = Arc<dyn Fn(&str, &Request) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct SpaOptions {
    /// Mount points (default the root)
    pub prefixes: Vec<String>,
    pub headers: FileHeaders,
    /// Default `index.html`
    pub index: String,
    /// When not empty, only matching filenames (and the index) are served
    pub include: Vec<SpaMatcher>,
    /// Matching filenames are never served
    pub exclude: Vec<SpaMatcher>,
}

impl Default for SpaOptions {
    fn default() -> Self {
        Self {
            prefixes: vec![String::new()],
            headers: FileHeaders::None,
            index: "index.html".to_string(),
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

impl SpaOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefix(mut self, prefixes: impl IntoStrings) -> Self {
        self.prefixes = prefixes.into_strings();
        self
    }

    pub fn headers(mut self, headers: FileHeaders) -> Self {
        self.headers = headers;
        self
    }

    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.index = index.into();
        self
    }

    pub fn include<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&str, &Request) -> bool + Send + Sync + 'static,
    {
        self.include.push(Arc::new(matcher));
        self
    }

    pub fn exclude<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&str, &Request) -> bool + Send + Sync + 'static,
    {
        self.exclude.push(Arc::new(matcher));
        self
    }

    fn serves(&self, filename: &str, request: &Request) -> bool {
        let included = filename == self.index
            || self.include.is_empty()
            || self.include.iter().any(|matcher| matcher(filename, request));
        included && !self.exclude.iter().any(|matcher| matcher(filename, request))
    }
}

/// `GET`/`HEAD` on `<prefix>/` and `<prefix>/{filename+}` for every prefix
///
/// Filenames the options don't serve are left unanswered, so default
/// handlers (or the `404`) take over.
pub fn spa_route(root: impl Into<PathBuf>, options: SpaOptions) -> Route {
    let root = root.into();
    let paths = ["/", "/{filename+}"]
        .iter()
        .flat_map(|suffix| {
            options.prefixes.iter().map(move |prefix| format!("{}{}", prefix.trim_end_matches('/'), suffix))
        })
        .collect::<Vec<_>>();
    let options = Arc::new(options);

    Route::new(["GET", "HEAD"], paths, move |request: Request, response: Response| {
        let root = root.clone();
        let options = options.clone();
        async move {
            let filename = request
                .path_parameter("filename")
                .filter(|filename| !filename.is_empty())
                .unwrap_or(options.index.as_str())
                .to_string();

            if !options.serves(&filename, &request) {
                return Ok(());
            }

            response.set_header("cache-control", "max-age=0")?;
            let file_options = SendFileOptions::new()
                .headers(options.headers.clone())
                .not_found_document(options.index.clone());
            response.send_file(&root, &filename, file_options).await
        }
    })
}
