use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use reqwest::Client;
use tokio::sync::Semaphore;

use patan_core::async_trait;
use patan_core::error::{Error, Result};
use patan_core::request::{Method, Request};
use patan_core::response::Response;
use patan_core::spider::Spider;
use patan_middleware::{DownloaderMiddlewareManager, Intercept};

pub mod mock;

/// Configuration for the downloader
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Maximum number of concurrent in-flight fetches
    pub concurrent_requests: usize,

    /// User agent string
    pub user_agent: String,

    /// Default request timeout in seconds, used when a request carries none
    pub timeout_secs: u64,

    /// Optional proxy URL applied to every fetch
    pub proxy: Option<String>,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            concurrent_requests: 16,
            user_agent: format!("patan/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 30,
            proxy: None,
        }
    }
}

/// The opaque fetch primitive: given a request, produce status, headers and
/// body, or an error. The crawl engine treats everything below this seam as
/// an external collaborator.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Perform one network fetch
    async fn execute(&self, request: &Request) -> Result<Response>;
}

/// [`HttpClient`] backed by a pooled reqwest client
pub struct ReqwestClient {
    client: Client,
    default_timeout: Duration,
}

impl ReqwestClient {
    /// Build a client from the downloader configuration
    pub fn new(config: &DownloaderConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs));

        if let Some(proxy_url) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| Error::config(format!("invalid proxy {}: {}", proxy_url, e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| Error::config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            default_timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    fn method_of(request: &Request) -> reqwest::Method {
        match request.method {
            Method::GET => reqwest::Method::GET,
            Method::POST => reqwest::Method::POST,
            Method::PUT => reqwest::Method::PUT,
            Method::DELETE => reqwest::Method::DELETE,
            Method::HEAD => reqwest::Method::HEAD,
            Method::OPTIONS => reqwest::Method::OPTIONS,
            Method::PATCH => reqwest::Method::PATCH,
        }
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn execute(&self, request: &Request) -> Result<Response> {
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let mut builder = self
            .client
            .request(Self::method_of(request), request.url.clone())
            .timeout(timeout);

        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }

        if !request.cookies.is_empty() {
            let cookie_header = request
                .cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; ");
            builder = builder.header("Cookie", cookie_header);
        }

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let url = request.url.to_string();
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout {
                    url: url.clone(),
                    timeout,
                }
            } else {
                Error::fetch(url.clone(), e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::fetch(url, format!("failed to read response body: {}", e)))?
            .to_vec();

        Ok(Response::new(request.clone(), status, headers, body))
    }
}

/// Concurrency-limited fetch worker running the downloader-middleware chain.
///
/// Admission is a counting semaphore: `fetch` suspends until one of the
/// `concurrent_requests` permits frees up, and the permit spans the whole
/// middleware + network sequence. Network and middleware failures never
/// escape `fetch`; they surface as a logged `None` or a middleware recovery
/// value.
pub struct Downloader {
    client: Arc<dyn HttpClient>,
    middlewares: Arc<DownloaderMiddlewareManager>,
    permits: Semaphore,
    closed: AtomicBool,
}

impl Downloader {
    /// Create a downloader with a reqwest client and no middlewares
    pub fn new(config: DownloaderConfig) -> Result<Self> {
        Self::with_middlewares(config, DownloaderMiddlewareManager::default())
    }

    /// Create a downloader with a reqwest client and the given middleware
    /// chain
    pub fn with_middlewares(
        config: DownloaderConfig,
        middlewares: DownloaderMiddlewareManager,
    ) -> Result<Self> {
        let client = Arc::new(ReqwestClient::new(&config)?);
        Ok(Self::with_client(
            client,
            middlewares,
            config.concurrent_requests,
        ))
    }

    /// Create a downloader over an arbitrary fetch primitive
    pub fn with_client(
        client: Arc<dyn HttpClient>,
        middlewares: DownloaderMiddlewareManager,
        concurrent_requests: usize,
    ) -> Self {
        Self {
            client,
            middlewares: Arc::new(middlewares),
            permits: Semaphore::new(concurrent_requests.max(1)),
            closed: AtomicBool::new(false),
        }
    }

    /// Fetch one request through the middleware chain, subject to the
    /// concurrency gate.
    ///
    /// Returns `Some(Intercept::Response)` for a response to parse,
    /// `Some(Intercept::Request)` when a middleware asked to re-route, and
    /// `None` when the request was dropped (fetch failed without recovery,
    /// or the downloader is closed).
    pub async fn fetch(&self, request: Request, spider: &dyn Spider) -> Option<Intercept> {
        let permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                debug!("downloader closed, dropping request: {}", request.url);
                return None;
            }
        };

        let mut request = request;
        let result = self.try_fetch(&mut request, spider).await;
        drop(permit);

        match result {
            Ok(intercept) => Some(intercept),
            Err(error) => {
                match self
                    .middlewares
                    .handle_exception(&request, &error, spider)
                    .await
                {
                    Some(recovered) => Some(recovered),
                    None => {
                        info!("dropping request {}: {}", request.url, error);
                        None
                    }
                }
            }
        }
    }

    async fn try_fetch(&self, request: &mut Request, spider: &dyn Spider) -> Result<Intercept> {
        if let Some(intercept) = self.middlewares.handle_request(request, spider).await? {
            return Ok(intercept);
        }

        debug!("downloading URL: {}", request.url);
        let response = self.client.execute(request).await?;
        self.middlewares
            .handle_response(request, response, spider)
            .await
    }

    /// Number of free fetch slots
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Whether a fetch could start without suspending
    pub fn available(&self) -> bool {
        self.available_permits() > 0
    }

    /// Tear down the admission gate; later fetches drain as `None`.
    /// Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.permits.close();
            info!("downloader closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patan_middleware::{DownloaderMiddleware, RetryMiddleware, UrlFilterMiddleware};
    use patan_core::spider::BasicSpider;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn spider() -> BasicSpider {
        BasicSpider::new("test", vec![])
    }

    fn chain_of(middleware: Arc<dyn DownloaderMiddleware>) -> DownloaderMiddlewareManager {
        DownloaderMiddlewareManager::new(vec![middleware])
    }

    #[tokio::test]
    async fn test_fetch_success_and_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/success"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Success"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/not-found"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
            .mount(&server)
            .await;

        let downloader = Downloader::new(DownloaderConfig {
            concurrent_requests: 2,
            ..DownloaderConfig::default()
        })
        .unwrap();
        let spider = spider();

        let request = Request::get(format!("{}/success", server.uri())).unwrap();
        match downloader.fetch(request, &spider).await {
            Some(Intercept::Response(response)) => {
                assert_eq!(response.status, 200);
                assert_eq!(response.text().unwrap(), "Success");
            }
            other => panic!("unexpected fetch outcome: {:?}", other),
        }

        // Error statuses are responses, not errors
        let request = Request::get(format!("{}/not-found", server.uri())).unwrap();
        match downloader.fetch(request, &spider).await {
            Some(Intercept::Response(response)) => assert_eq!(response.status, 404),
            other => panic!("unexpected fetch outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connection_error_is_dropped_not_raised() {
        // Nothing listens on this port
        let downloader = Downloader::new(DownloaderConfig {
            timeout_secs: 2,
            ..DownloaderConfig::default()
        })
        .unwrap();
        let spider = spider();

        let request = Request::get("http://127.0.0.1:1/unreachable").unwrap();
        assert!(downloader.fetch(request, &spider).await.is_none());
    }

    #[tokio::test]
    async fn test_per_request_timeout_is_recoverable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200).set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let downloader = Downloader::new(DownloaderConfig::default()).unwrap();
        let spider = spider();

        let request = Request::get(format!("{}/slow", server.uri()))
            .unwrap()
            .with_timeout(Duration::from_millis(50));
        assert!(downloader.fetch(request, &spider).await.is_none());
    }

    #[tokio::test]
    async fn test_url_filter_denial_drops_request() {
        let middleware = UrlFilterMiddleware::from_strings(&[], &["denied".to_string()]).unwrap();
        let downloader = Downloader::with_client(
            Arc::new(mock::StubClient::new()),
            chain_of(Arc::new(middleware)),
            4,
        );
        let spider = spider();

        let request = Request::get("http://example.com/denied/path").unwrap();
        assert!(downloader.fetch(request, &spider).await.is_none());

        let request = Request::get("http://example.com/fine").unwrap();
        assert!(downloader.fetch(request, &spider).await.is_some());
    }

    #[tokio::test]
    async fn test_retry_middleware_reroutes_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let downloader = Downloader::with_middlewares(
            DownloaderConfig::default(),
            chain_of(Arc::new(RetryMiddleware::common())),
        )
        .unwrap();
        let spider = spider();

        let request = Request::get(format!("{}/flaky", server.uri())).unwrap();
        match downloader.fetch(request, &spider).await {
            Some(Intercept::Request(retry)) => assert!(retry.dont_filter),
            other => panic!("expected a retry re-route, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_drains() {
        let downloader = Downloader::with_client(
            Arc::new(mock::StubClient::new()),
            DownloaderMiddlewareManager::default(),
            2,
        );
        downloader.close();
        downloader.close();

        let spider = spider();
        let request = Request::get("http://example.com/").unwrap();
        assert!(downloader.fetch(request, &spider).await.is_none());
    }

    #[tokio::test]
    async fn test_concurrency_gate_suspends_excess_fetches() {
        use tokio_test::{assert_pending, task};

        let downloader = Arc::new(Downloader::with_client(
            Arc::new(mock::BlockedClient::new()),
            DownloaderMiddlewareManager::default(),
            1,
        ));
        let spider = Arc::new(spider());

        // Occupy the single permit with a fetch that never completes
        let first = {
            let downloader = Arc::clone(&downloader);
            let spider = Arc::clone(&spider);
            tokio::spawn(async move {
                let request = Request::get("http://example.com/a").unwrap();
                downloader.fetch(request, &*spider).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(downloader.available_permits(), 0);

        // A second fetch must suspend on the gate rather than start
        let request = Request::get("http://example.com/b").unwrap();
        let mut second = task::spawn(downloader.fetch(request, &*spider));
        assert_pending!(second.poll());

        first.abort();
        let _ = first.await;
    }
}
