//! # ShellKit Net
//!
//! Request and response model plus the network collaborator used by the
//! offline worker.
//!
//! ## Design Goals
//!
//! 1. **Opaque HTTP**: responses are status, headers and a frozen body
//! 2. **Cheap duplication**: bodies are `Bytes`, so a response can be stored
//!    and returned at the same time
//! 3. **Swappable network**: everything fetches through the [`Fetcher`] trait

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use mime::Mime;
use thiserror::Error;
use url::Url;

pub mod loader;

pub use loader::{Fetcher, LoaderConfig, ResourceLoader};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// How a request was initiated by the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level document load.
    Navigate,
    /// Same-origin sub-resource.
    #[default]
    SameOrigin,
    /// Cross-origin request with CORS.
    Cors,
    /// Opaque cross-origin request.
    NoCors,
}

/// HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub mode: RequestMode,
    pub timeout: Option<Duration>,
    pub referrer: Option<Url>,
}

impl Request {
    /// Create a GET request for a sub-resource.
    pub fn get(url: Url) -> Self {
        Self::with_method(Method::GET, url)
    }

    /// Create a top-level navigation request.
    pub fn navigate(url: Url) -> Self {
        Self {
            mode: RequestMode::Navigate,
            ..Self::get(url)
        }
    }

    /// Create a POST request.
    pub fn post(url: Url, body: Bytes) -> Self {
        Self {
            body: Some(body),
            ..Self::with_method(Method::POST, url)
        }
    }

    /// Create a request with an arbitrary method.
    pub fn with_method(method: Method, url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method,
            headers: HeaderMap::new(),
            body: None,
            mode: RequestMode::default(),
            timeout: None,
            referrer: None,
        }
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Set referrer.
    pub fn referrer(mut self, referrer: Url) -> Self {
        self.referrer = Some(referrer);
        self
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// URL used as the cache identity: the request URL without its fragment.
    pub fn cache_key(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        url.into()
    }
}

/// HTTP response with a fully buffered body.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub content_type: Option<Mime>,
    body: Bytes,
    /// Set when the response was answered from a cache generation.
    pub from_cache: bool,
}

impl Response {
    /// Build a response from its parts.
    pub fn new(url: Url, status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        let content_type = headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<Mime>().ok());

        Self {
            url,
            status,
            headers,
            content_type,
            body: body.into(),
            from_cache: false,
        }
    }

    /// Shorthand for a 200 response with the given body.
    pub fn ok_with_body(url: Url, body: impl Into<Bytes>) -> Self {
        Self::new(url, StatusCode::OK, HeaderMap::new(), body)
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Borrow the body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }

    /// Mark this copy as served from cache.
    pub fn into_cached(mut self) -> Self {
        self.from_cache = true;
        self
    }

    /// True when status, headers and body all match, ignoring provenance.
    pub fn same_content(&self, other: &Response) -> bool {
        self.status == other.status && self.headers == other.headers && self.body == other.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_request_builder() {
        let request = Request::get(url("https://example.com"))
            .header(
                HeaderName::from_static("accept"),
                HeaderValue::from_static("text/html"),
            )
            .timeout(Duration::from_secs(10));

        assert_eq!(request.method, Method::GET);
        assert_eq!(request.mode, RequestMode::SameOrigin);
        assert!(request.headers.contains_key("accept"));
        assert_eq!(request.timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_navigation_request() {
        let request = Request::navigate(url("https://example.com/app/"));
        assert!(request.is_navigation());
        assert_eq!(request.method, Method::GET);
        assert!(!Request::get(url("https://example.com/")).is_navigation());
    }

    #[test]
    fn test_request_id_uniqueness() {
        assert_ne!(RequestId::new(), RequestId::new());
    }

    #[test]
    fn test_cache_key_drops_fragment() {
        let request = Request::get(url("https://example.com/index.html?x=1#top"));
        assert_eq!(request.cache_key(), "https://example.com/index.html?x=1");
    }

    #[test]
    fn test_response_content_type_and_status() {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        );
        let response = Response::new(
            url("https://example.com/"),
            StatusCode::NOT_FOUND,
            headers,
            "missing",
        );

        assert!(!response.ok());
        assert_eq!(response.content_type.as_ref().map(|m| m.essence_str()), Some("text/html"));
        assert_eq!(response.text().unwrap(), "missing");
    }

    #[test]
    fn test_cached_copy_keeps_content() {
        let response = Response::ok_with_body(url("https://example.com/a.js"), "let a;");
        let cached = response.clone().into_cached();
        assert!(cached.from_cache);
        assert!(!response.from_cache);
        assert!(cached.same_content(&response));
    }
}
