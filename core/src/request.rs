use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use url::Url;

use crate::error::{Error, Result};

/// Meta key carrying the name of the spider that owns a request.
pub const META_SPIDER: &str = "spider";

/// Meta key carrying the crawl depth of a request.
pub const META_DEPTH: &str = "depth";

/// HTTP methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Method {
    #[default]
    GET,
    POST,
    PUT,
    DELETE,
    HEAD,
    OPTIONS,
    PATCH,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The `(method, url)` pair that defines a request's dedup identity.
///
/// Two requests with equal fingerprints are duplicates regardless of any
/// other field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    method: Method,
    url: String,
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Represents an HTTP request to be made by the crawler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// The URL to request
    pub url: Url,

    /// The HTTP method to use
    #[serde(default)]
    pub method: Method,

    /// HTTP headers to include
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Cookies to be sent with the request
    #[serde(default)]
    pub cookies: HashMap<String, String>,

    /// Request body (for POST, PUT, etc.)
    #[serde(default)]
    pub body: Option<Vec<u8>>,

    /// Metadata associated with this request (spider name, depth, ...)
    #[serde(default)]
    pub meta: HashMap<String, serde_json::Value>,

    /// Name of the spider callback to route the response to; `None` means
    /// the spider's default `parse`
    #[serde(default)]
    pub callback: Option<String>,

    /// Declared body encoding
    #[serde(default)]
    pub encoding: Option<String>,

    /// When true the request bypasses the duplicate filter. Retries are new
    /// requests with an already-seen fingerprint and rely on this.
    #[serde(default)]
    pub dont_filter: bool,

    /// Per-request timeout; overrides the downloader default
    #[serde(default)]
    pub timeout: Option<Duration>,
}

impl Request {
    /// Create a new GET request
    pub fn get<U: AsRef<str>>(url: U) -> Result<Self> {
        let url = Url::parse(url.as_ref()).map_err(Error::UrlParse)?;
        Ok(Self {
            url,
            method: Method::GET,
            headers: HashMap::new(),
            cookies: HashMap::new(),
            body: None,
            meta: HashMap::new(),
            callback: None,
            encoding: None,
            dont_filter: false,
            timeout: None,
        })
    }

    /// Create a new POST request
    pub fn post<U: AsRef<str>, B: Into<Vec<u8>>>(url: U, body: B) -> Result<Self> {
        let mut request = Self::get(url)?;
        request.method = Method::POST;
        request.body = Some(body.into());
        Ok(request)
    }

    /// Add a header to the request
    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Add a cookie to the request
    pub fn with_cookie<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    /// Add metadata to the request
    pub fn with_meta<K: Into<String>, V: Into<serde_json::Value>>(
        mut self,
        key: K,
        value: V,
    ) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Set the callback for this request
    pub fn with_callback<C: Into<String>>(mut self, callback: C) -> Self {
        self.callback = Some(callback.into());
        self
    }

    /// Set whether this request bypasses the duplicate filter
    pub fn with_dont_filter(mut self, dont_filter: bool) -> Self {
        self.dont_filter = dont_filter;
        self
    }

    /// Set the timeout for this request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the encoding for this request
    pub fn with_encoding<E: Into<String>>(mut self, encoding: E) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    /// The dedup identity of this request
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            method: self.method,
            url: self.url.to_string(),
        }
    }

    /// Name of the spider that owns this request, if stamped
    pub fn spider_name(&self) -> Option<&str> {
        self.meta.get(META_SPIDER).and_then(|v| v.as_str())
    }

    /// Stamp the owning spider's name into the request meta
    pub fn set_spider_name(&mut self, name: &str) {
        self.meta
            .insert(META_SPIDER.to_string(), serde_json::json!(name));
    }

    /// Crawl depth of this request; unset reads as 0
    pub fn depth(&self) -> u64 {
        self.meta
            .get(META_DEPTH)
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    }

    /// Record the crawl depth of this request
    pub fn set_depth(&mut self, depth: u64) {
        self.meta
            .insert(META_DEPTH.to_string(), serde_json::json!(depth));
    }
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url && self.method == other.method
    }
}

impl Eq for Request {}

impl Hash for Request {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.as_str().hash(state);
        self.method.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_request_get() {
        let req = Request::get("https://example.com").unwrap();
        assert_eq!(req.url.as_str(), "https://example.com/");
        assert_eq!(req.method, Method::GET);
        assert!(req.body.is_none());
        assert!(!req.dont_filter);
    }

    #[test]
    fn test_request_post() {
        let req = Request::post("https://example.com", "payload").unwrap();
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.body.unwrap(), b"payload");
    }

    #[test]
    fn test_identity_ignores_other_fields() {
        let a = Request::get("https://example.com/page").unwrap();
        let b = Request::get("https://example.com/page")
            .unwrap()
            .with_header("User-Agent", "patan/0.1.0")
            .with_meta("depth", 3)
            .with_callback("parse_page");

        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_identity_distinguishes_method() {
        let get = Request::get("https://example.com").unwrap();
        let post = Request::post("https://example.com", "").unwrap();
        assert_ne!(get, post);
        assert_ne!(get.fingerprint(), post.fingerprint());
    }

    #[test]
    fn test_spider_name_stamp() {
        let mut req = Request::get("https://example.com").unwrap();
        assert!(req.spider_name().is_none());
        req.set_spider_name("quotes");
        assert_eq!(req.spider_name(), Some("quotes"));
    }

    #[test]
    fn test_depth_defaults_to_zero() {
        let mut req = Request::get("https://example.com").unwrap();
        assert_eq!(req.depth(), 0);
        req.set_depth(2);
        assert_eq!(req.depth(), 2);
    }

    #[test]
    fn test_request_with_timeout() {
        let req = Request::get("https://example.com")
            .unwrap()
            .with_timeout(Duration::from_secs(30));
        assert_eq!(req.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_request_with_cookie() {
        let req = Request::get("https://example.com")
            .unwrap()
            .with_cookie("session", "abc123");
        assert_eq!(req.cookies.get("session").unwrap(), "abc123");
    }
}
