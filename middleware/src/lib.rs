use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use rand::Rng;
use regex::Regex;
use tokio::time::sleep;

use patan_core::async_trait;
use patan_core::error::{Error, Result};
use patan_core::request::Request;
use patan_core::response::Response;
use patan_core::spider::{ParseOutput, Spider};

/// Meta key counting how often a request has been retried.
pub const META_RETRIES: &str = "retry_count";

/// Value returned by a downloader-middleware hook to divert the normal
/// fetch flow.
///
/// `Response` short-circuits the fetch (pre-fetch) or threads on through the
/// chain (post-fetch); `Request` asks the engine to re-route the given
/// request instead of continuing with this one.
#[derive(Debug)]
pub enum Intercept {
    /// Re-route this request through the scheduler
    Request(Request),
    /// Use this response without (further) fetching
    Response(Response),
}

/// Hooks around the downloader's fetch step.
///
/// All hooks default to "no action" so implementations override only the
/// stages they care about.
#[async_trait]
pub trait DownloaderMiddleware: Send + Sync + 'static {
    /// Name used in logs and error messages
    fn name(&self) -> &str;

    /// Pre-fetch hook. Returning `Some` stops the chain and skips the
    /// network fetch entirely.
    async fn process_request(
        &self,
        _request: &mut Request,
        _spider: &dyn Spider,
    ) -> Result<Option<Intercept>> {
        Ok(None)
    }

    /// Post-fetch hook. Returning `Intercept::Response` threads the
    /// (possibly replaced) response to the next stage; `Intercept::Request`
    /// stops the chain and re-routes.
    async fn process_response(
        &self,
        _request: &Request,
        response: Response,
        _spider: &dyn Spider,
    ) -> Result<Intercept> {
        Ok(Intercept::Response(response))
    }

    /// Exception hook, consulted in order until one middleware returns a
    /// recovery value.
    async fn process_exception(
        &self,
        _request: &Request,
        _error: &Error,
        _spider: &dyn Spider,
    ) -> Option<Intercept> {
        None
    }
}

/// An ordered chain of downloader middlewares. Order is caller-declared and
/// significant.
#[derive(Default)]
pub struct DownloaderMiddlewareManager {
    chain: Vec<Arc<dyn DownloaderMiddleware>>,
}

impl std::fmt::Debug for DownloaderMiddlewareManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloaderMiddlewareManager")
            .field("chain", &self.names())
            .finish()
    }
}

impl DownloaderMiddlewareManager {
    /// Create a manager over the given chain, executed in vector order
    pub fn new(chain: Vec<Arc<dyn DownloaderMiddleware>>) -> Self {
        Self { chain }
    }

    /// Append a middleware to the end of the chain
    pub fn push(&mut self, middleware: Arc<dyn DownloaderMiddleware>) {
        self.chain.push(middleware);
    }

    /// Names of the chained middlewares, in execution order
    pub fn names(&self) -> Vec<&str> {
        self.chain.iter().map(|m| m.name()).collect()
    }

    /// Run every pre-fetch hook in order; the first `Some` short-circuits
    /// and is returned without invoking later hooks.
    pub async fn handle_request(
        &self,
        request: &mut Request,
        spider: &dyn Spider,
    ) -> Result<Option<Intercept>> {
        for middleware in &self.chain {
            if let Some(intercept) = middleware.process_request(request, spider).await? {
                debug!(
                    "downloader middleware {} intercepted {}",
                    middleware.name(),
                    request.url
                );
                return Ok(Some(intercept));
            }
        }
        Ok(None)
    }

    /// Thread the response through every post-fetch hook in order; a hook
    /// returning `Intercept::Request` stops the chain immediately.
    pub async fn handle_response(
        &self,
        request: &Request,
        response: Response,
        spider: &dyn Spider,
    ) -> Result<Intercept> {
        let mut current = response;
        for middleware in &self.chain {
            match middleware.process_response(request, current, spider).await? {
                Intercept::Response(response) => current = response,
                Intercept::Request(rerouted) => {
                    debug!(
                        "downloader middleware {} re-routed {} -> {}",
                        middleware.name(),
                        request.url,
                        rerouted.url
                    );
                    return Ok(Intercept::Request(rerouted));
                }
            }
        }
        Ok(Intercept::Response(current))
    }

    /// Consult exception hooks in order; the first non-`None` value becomes
    /// the recovery result.
    pub async fn handle_exception(
        &self,
        request: &Request,
        error: &Error,
        spider: &dyn Spider,
    ) -> Option<Intercept> {
        for middleware in &self.chain {
            if let Some(intercept) = middleware.process_exception(request, error, spider).await {
                warn!(
                    "downloader middleware {} recovered {} from: {}",
                    middleware.name(),
                    request.url,
                    error
                );
                return Some(intercept);
            }
        }
        None
    }
}

/// Hooks around the spider's parse step.
#[async_trait]
pub trait SpiderMiddleware: Send + Sync + 'static {
    /// Name used in logs and error messages
    fn name(&self) -> &str;

    /// Pre-parse hook; side-effecting only. An error aborts the chain and is
    /// routed to [`SpiderMiddleware::process_exception`].
    async fn process_input(&self, _response: &Response, _spider: &dyn Spider) -> Result<()> {
        Ok(())
    }

    /// Post-parse hook; threads the callback's output through each stage.
    async fn process_output(
        &self,
        _response: &Response,
        output: ParseOutput,
        _spider: &dyn Spider,
    ) -> Result<ParseOutput> {
        Ok(output)
    }

    /// Exception hook, consulted in order until one middleware returns a
    /// replacement output.
    async fn process_exception(
        &self,
        _response: &Response,
        _error: &Error,
        _spider: &dyn Spider,
    ) -> Option<ParseOutput> {
        None
    }
}

/// An ordered chain of spider middlewares, symmetric to
/// [`DownloaderMiddlewareManager`] but wrapped around the parse step.
#[derive(Default)]
pub struct SpiderMiddlewareManager {
    chain: Vec<Arc<dyn SpiderMiddleware>>,
}

impl std::fmt::Debug for SpiderMiddlewareManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpiderMiddlewareManager")
            .field("chain", &self.names())
            .finish()
    }
}

impl SpiderMiddlewareManager {
    /// Create a manager over the given chain, executed in vector order
    pub fn new(chain: Vec<Arc<dyn SpiderMiddleware>>) -> Self {
        Self { chain }
    }

    /// Append a middleware to the end of the chain
    pub fn push(&mut self, middleware: Arc<dyn SpiderMiddleware>) {
        self.chain.push(middleware);
    }

    /// Names of the chained middlewares, in execution order
    pub fn names(&self) -> Vec<&str> {
        self.chain.iter().map(|m| m.name()).collect()
    }

    /// Run every pre-parse hook in order; errors propagate to the caller
    pub async fn handle_input(&self, response: &Response, spider: &dyn Spider) -> Result<()> {
        for middleware in &self.chain {
            middleware.process_input(response, spider).await?;
        }
        Ok(())
    }

    /// Thread the parse output through every post-parse hook in order
    pub async fn handle_output(
        &self,
        response: &Response,
        output: ParseOutput,
        spider: &dyn Spider,
    ) -> Result<ParseOutput> {
        let mut current = output;
        for middleware in &self.chain {
            current = middleware.process_output(response, current, spider).await?;
        }
        Ok(current)
    }

    /// Consult exception hooks in order; the first non-`None` value becomes
    /// the parse output.
    pub async fn handle_exception(
        &self,
        response: &Response,
        error: &Error,
        spider: &dyn Spider,
    ) -> Option<ParseOutput> {
        for middleware in &self.chain {
            if let Some(output) = middleware.process_exception(response, error, spider).await {
                warn!(
                    "spider middleware {} recovered {} from: {}",
                    middleware.name(),
                    response.url,
                    error
                );
                return Some(output);
            }
        }
        None
    }
}

/// A middleware that injects default headers into requests that do not
/// already carry them
pub struct DefaultHeadersMiddleware {
    headers: HashMap<String, String>,
}

impl DefaultHeadersMiddleware {
    /// Create a new DefaultHeadersMiddleware with the given headers
    pub fn new(headers: HashMap<String, String>) -> Self {
        Self { headers }
    }

    /// Create a new DefaultHeadersMiddleware with common headers
    pub fn common() -> Self {
        let mut headers = HashMap::new();
        headers.insert("User-Agent".to_string(), "patan/0.1.0".to_string());
        headers.insert(
            "Accept".to_string(),
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
        );
        headers.insert("Accept-Language".to_string(), "en".to_string());
        Self::new(headers)
    }

    /// Add a header to the middleware
    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl DownloaderMiddleware for DefaultHeadersMiddleware {
    fn name(&self) -> &str {
        "DefaultHeadersMiddleware"
    }

    async fn process_request(
        &self,
        request: &mut Request,
        _spider: &dyn Spider,
    ) -> Result<Option<Intercept>> {
        for (key, value) in &self.headers {
            request
                .headers
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        Ok(None)
    }
}

/// A middleware that sleeps for a random interval before each fetch
pub struct RandomDelayMiddleware {
    min_delay_ms: u64,
    max_delay_ms: u64,
}

impl RandomDelayMiddleware {
    /// Create a new RandomDelayMiddleware with the given delay range
    pub fn new(min_delay_ms: u64, max_delay_ms: u64) -> Self {
        if min_delay_ms > max_delay_ms {
            panic!("min_delay_ms must be less than or equal to max_delay_ms");
        }
        Self {
            min_delay_ms,
            max_delay_ms,
        }
    }
}

#[async_trait]
impl DownloaderMiddleware for RandomDelayMiddleware {
    fn name(&self) -> &str {
        "RandomDelayMiddleware"
    }

    async fn process_request(
        &self,
        _request: &mut Request,
        _spider: &dyn Spider,
    ) -> Result<Option<Intercept>> {
        let delay = self.min_delay_ms
            + rand::thread_rng().gen_range(0..=self.max_delay_ms - self.min_delay_ms);
        debug!("random delay middleware: sleeping for {}ms", delay);
        sleep(Duration::from_millis(delay)).await;
        Ok(None)
    }
}

/// A middleware that filters requests based on URL patterns
pub struct UrlFilterMiddleware {
    allowed_patterns: Vec<Regex>,
    denied_patterns: Vec<Regex>,
}

impl UrlFilterMiddleware {
    /// Create a new UrlFilterMiddleware with the given patterns
    pub fn new(allowed_patterns: Vec<Regex>, denied_patterns: Vec<Regex>) -> Self {
        Self {
            allowed_patterns,
            denied_patterns,
        }
    }

    /// Create a new UrlFilterMiddleware from string patterns
    pub fn from_strings(allowed: &[String], denied: &[String]) -> Result<Self> {
        let compile = |patterns: &[String]| -> Result<Vec<Regex>> {
            patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| Error::config(format!("invalid URL pattern: {}", e)))
                })
                .collect()
        };
        Ok(Self::new(compile(allowed)?, compile(denied)?))
    }
}

#[async_trait]
impl DownloaderMiddleware for UrlFilterMiddleware {
    fn name(&self) -> &str {
        "UrlFilterMiddleware"
    }

    async fn process_request(
        &self,
        request: &mut Request,
        _spider: &dyn Spider,
    ) -> Result<Option<Intercept>> {
        let url_str = request.url.as_str();

        for pattern in &self.denied_patterns {
            if pattern.is_match(url_str) {
                return Err(Error::middleware(
                    self.name(),
                    format!("URL {} matched denied pattern {}", url_str, pattern),
                ));
            }
        }

        if !self.allowed_patterns.is_empty()
            && !self.allowed_patterns.iter().any(|p| p.is_match(url_str))
        {
            return Err(Error::middleware(
                self.name(),
                format!("URL {} did not match any allowed pattern", url_str),
            ));
        }

        Ok(None)
    }
}

/// A middleware that re-routes retryable failures as fresh requests.
///
/// A retry is a new request object: it carries `dont_filter` so the
/// scheduler's permanent dedup does not swallow it, and a bounded attempt
/// counter in its meta.
pub struct RetryMiddleware {
    retry_status_codes: Vec<u16>,
    max_retries: u32,
}

impl RetryMiddleware {
    /// Create a new RetryMiddleware with the given parameters
    pub fn new(retry_status_codes: Vec<u16>, max_retries: u32) -> Self {
        Self {
            retry_status_codes,
            max_retries,
        }
    }

    /// Create a new RetryMiddleware with common settings
    pub fn common() -> Self {
        Self::new(vec![500, 502, 503, 504, 408, 429], 3)
    }

    fn retry_request(&self, request: &Request) -> Option<Request> {
        let attempts = request
            .meta
            .get(META_RETRIES)
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        if attempts >= self.max_retries as u64 {
            return None;
        }

        let mut retry = request.clone();
        retry.dont_filter = true;
        retry
            .meta
            .insert(META_RETRIES.to_string(), serde_json::json!(attempts + 1));
        Some(retry)
    }
}

#[async_trait]
impl DownloaderMiddleware for RetryMiddleware {
    fn name(&self) -> &str {
        "RetryMiddleware"
    }

    async fn process_response(
        &self,
        request: &Request,
        response: Response,
        _spider: &dyn Spider,
    ) -> Result<Intercept> {
        if !self.retry_status_codes.contains(&response.status) {
            return Ok(Intercept::Response(response));
        }

        match self.retry_request(request) {
            Some(retry) => {
                info!(
                    "retrying {} (status {}), attempt {}/{}",
                    request.url,
                    response.status,
                    retry
                        .meta
                        .get(META_RETRIES)
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0),
                    self.max_retries
                );
                Ok(Intercept::Request(retry))
            }
            None => {
                warn!(
                    "maximum retries reached for {} (status {})",
                    request.url, response.status
                );
                Ok(Intercept::Response(response))
            }
        }
    }

    async fn process_exception(
        &self,
        request: &Request,
        error: &Error,
        _spider: &dyn Spider,
    ) -> Option<Intercept> {
        if !error.is_transient() {
            return None;
        }

        match self.retry_request(request) {
            Some(retry) => {
                info!("retrying {} after transient error: {}", request.url, error);
                Some(Intercept::Request(retry))
            }
            None => {
                warn!("maximum retries reached for {}: {}", request.url, error);
                None
            }
        }
    }
}

/// A spider middleware that tags follow-up requests with their crawl depth
/// and filters those past the configured limit.
pub struct DepthLimitMiddleware {
    limit: u64,
}

impl DepthLimitMiddleware {
    /// Create a new DepthLimitMiddleware with the given limit
    pub fn new(limit: u64) -> Self {
        Self { limit }
    }
}

#[async_trait]
impl SpiderMiddleware for DepthLimitMiddleware {
    fn name(&self) -> &str {
        "DepthLimitMiddleware"
    }

    async fn process_output(
        &self,
        response: &Response,
        mut output: ParseOutput,
        _spider: &dyn Spider,
    ) -> Result<ParseOutput> {
        let child_depth = response.depth() + 1;
        if child_depth > self.limit {
            for request in &output.requests {
                info!(
                    "depth limit {} reached, dropping request: {}",
                    self.limit, request.url
                );
            }
            output.requests.clear();
            return Ok(output);
        }

        for request in &mut output.requests {
            request.set_depth(child_depth);
        }
        Ok(output)
    }
}

type DownloaderFactory =
    Box<dyn Fn(&serde_json::Value) -> Result<Arc<dyn DownloaderMiddleware>> + Send + Sync>;
type SpiderFactory =
    Box<dyn Fn(&serde_json::Value) -> Result<Arc<dyn SpiderMiddleware>> + Send + Sync>;

/// Maps middleware names from configuration to constructors.
///
/// Chains are built in the declared name order, which the managers preserve
/// for execution; an unknown name is a configuration error, fatal at
/// bootstrap.
#[derive(Default)]
pub struct MiddlewareRegistry {
    downloader: HashMap<String, DownloaderFactory>,
    spider: HashMap<String, SpiderFactory>,
}

impl MiddlewareRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with every built-in middleware registered.
    ///
    /// Factories read their parameters from the entry of the shared params
    /// object keyed by their own name.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.register_downloader("default_headers", |params| {
            let headers: HashMap<String, String> = params
                .get("default_headers")
                .map(|v| serde_json::from_value(v.clone()))
                .transpose()
                .map_err(|e| Error::config(format!("default_headers: {}", e)))?
                .unwrap_or_default();
            Ok(if headers.is_empty() {
                Arc::new(DefaultHeadersMiddleware::common())
            } else {
                Arc::new(DefaultHeadersMiddleware::new(headers))
            })
        });

        registry.register_downloader("random_delay", |params| {
            let min = params
                .pointer("/random_delay/min_ms")
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            let max = params
                .pointer("/random_delay/max_ms")
                .and_then(|v| v.as_u64())
                .unwrap_or(250);
            if min > max {
                return Err(Error::config("random_delay: min_ms exceeds max_ms"));
            }
            Ok(Arc::new(RandomDelayMiddleware::new(min, max)))
        });

        registry.register_downloader("url_filter", |params| {
            let patterns = |key: &str| -> Vec<String> {
                params
                    .pointer(&format!("/url_filter/{}", key))
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .unwrap_or_default()
            };
            Ok(Arc::new(UrlFilterMiddleware::from_strings(
                &patterns("allow"),
                &patterns("deny"),
            )?))
        });

        registry.register_downloader("retry", |params| {
            let statuses: Vec<u16> = params
                .pointer("/retry/statuses")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_else(|| vec![500, 502, 503, 504, 408, 429]);
            let max_retries = params
                .pointer("/retry/max_retries")
                .and_then(|v| v.as_u64())
                .unwrap_or(3) as u32;
            Ok(Arc::new(RetryMiddleware::new(statuses, max_retries)))
        });

        registry.register_spider("depth_limit", |params| {
            let limit = params
                .get("depth_limit")
                .and_then(|v| v.as_u64())
                .ok_or_else(|| {
                    Error::config("depth_limit middleware requires spider.depth_limit")
                })?;
            Ok(Arc::new(DepthLimitMiddleware::new(limit)))
        });

        registry
    }

    /// Register a downloader-middleware constructor under a name
    pub fn register_downloader<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&serde_json::Value) -> Result<Arc<dyn DownloaderMiddleware>> + Send + Sync + 'static,
    {
        self.downloader.insert(name.to_string(), Box::new(factory));
    }

    /// Register a spider-middleware constructor under a name
    pub fn register_spider<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&serde_json::Value) -> Result<Arc<dyn SpiderMiddleware>> + Send + Sync + 'static,
    {
        self.spider.insert(name.to_string(), Box::new(factory));
    }

    /// Build a downloader-middleware chain in the declared order
    pub fn build_downloader_chain(
        &self,
        names: &[String],
        params: &serde_json::Value,
    ) -> Result<DownloaderMiddlewareManager> {
        let mut chain = Vec::with_capacity(names.len());
        for name in names {
            let factory = self
                .downloader
                .get(name)
                .ok_or_else(|| Error::config(format!("unknown downloader middleware: {}", name)))?;
            chain.push(factory(params)?);
        }
        Ok(DownloaderMiddlewareManager::new(chain))
    }

    /// Build a spider-middleware chain in the declared order
    pub fn build_spider_chain(
        &self,
        names: &[String],
        params: &serde_json::Value,
    ) -> Result<SpiderMiddlewareManager> {
        let mut chain = Vec::with_capacity(names.len());
        for name in names {
            let factory = self
                .spider
                .get(name)
                .ok_or_else(|| Error::config(format!("unknown spider middleware: {}", name)))?;
            chain.push(factory(params)?);
        }
        Ok(SpiderMiddlewareManager::new(chain))
    }
}
