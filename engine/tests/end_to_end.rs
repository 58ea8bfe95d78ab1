use std::sync::Arc;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use patan_core::async_trait;
use patan_core::error::Result;
use patan_core::item::DynamicItem;
use patan_core::request::Request;
use patan_core::response::Response;
use patan_core::spider::{ParseOutput, Spider};
use patan_downloader::{Downloader, DownloaderConfig};
use patan_engine::{Engine, EngineConfig};
use patan_middleware::{
    DefaultHeadersMiddleware, DownloaderMiddlewareManager, RetryMiddleware,
    SpiderMiddlewareManager,
};
use patan_pipeline::PipelineManager;
use patan_scheduler::{Scheduler, SchedulerConfig};

struct LinkedPagesSpider {
    base: String,
}

#[async_trait]
impl Spider for LinkedPagesSpider {
    fn name(&self) -> &str {
        "linked_pages"
    }

    fn start_urls(&self) -> Vec<String> {
        vec![format!("{}/page1", self.base)]
    }

    async fn parse(&self, response: Response) -> Result<ParseOutput> {
        let mut output = ParseOutput::new();

        let mut item = DynamicItem::new("page");
        item.set("url", response.url.to_string());
        item.set("status", response.status as u64);
        output.items.push(item);

        if response.url.path() == "/page1" {
            output.add_request(Request::get(format!("{}/page2", self.base))?);
        }

        Ok(output)
    }
}

fn engine_config() -> EngineConfig {
    EngineConfig {
        workers_num: 2,
        poll_interval_ms: 10,
        log_stats: false,
        ..EngineConfig::default()
    }
}

fn build_engine(spider: Arc<dyn Spider>, downloader: Downloader) -> Engine {
    Engine::with_components(
        vec![spider],
        Arc::new(Scheduler::new(SchedulerConfig::default())),
        Arc::new(downloader),
        Arc::new(SpiderMiddlewareManager::default()),
        Arc::new(PipelineManager::default()),
        engine_config(),
    )
}

#[tokio::test]
async fn crawl_follows_links_and_terminates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Page 1"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/page2"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Page 2"))
        .mount(&server)
        .await;

    let spider = Arc::new(LinkedPagesSpider { base: server.uri() });

    let mut chain = DownloaderMiddlewareManager::default();
    chain.push(Arc::new(DefaultHeadersMiddleware::common()));
    let downloader = Downloader::with_middlewares(DownloaderConfig::default(), chain).unwrap();

    let mut engine = build_engine(spider, downloader);
    let stats = engine.run().await.unwrap();

    assert_eq!(stats.request_count, 2);
    assert_eq!(stats.response_count, 2);
    assert_eq!(stats.item_count, 2);
    assert_eq!(stats.error_count, 0);
}

#[tokio::test]
async fn retry_middleware_recovers_flaky_endpoint() {
    let server = MockServer::start().await;

    // The first two hits fail with 503, then the endpoint recovers
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
        .mount(&server)
        .await;

    struct FlakySpider {
        base: String,
    }

    #[async_trait]
    impl Spider for FlakySpider {
        fn name(&self) -> &str {
            "flaky"
        }

        fn start_urls(&self) -> Vec<String> {
            vec![format!("{}/flaky", self.base)]
        }

        async fn parse(&self, response: Response) -> Result<ParseOutput> {
            assert_eq!(response.status, 200);
            let mut output = ParseOutput::new();
            let mut item = DynamicItem::new("page");
            item.set("body", response.text()?);
            output.items.push(item);
            Ok(output)
        }
    }

    let spider = Arc::new(FlakySpider { base: server.uri() });

    let mut chain = DownloaderMiddlewareManager::default();
    chain.push(Arc::new(RetryMiddleware::common()));
    let downloader = Downloader::with_middlewares(DownloaderConfig::default(), chain).unwrap();

    let mut engine = build_engine(spider, downloader);
    let stats = engine.run().await.unwrap();

    // Initial attempt plus two retries, the last of which succeeds
    assert_eq!(stats.request_count, 3);
    assert_eq!(stats.response_count, 1);
    assert_eq!(stats.item_count, 1);
}
