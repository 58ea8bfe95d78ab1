use std::sync::Arc;

use patan::prelude::*;

/// Follows same-site links it finds in href attributes, letting the
/// depth_limit middleware decide how far to descend.
struct LinkSpider {
    start: String,
}

fn extract_hrefs(body: &str) -> Vec<String> {
    let mut links = Vec::new();
    for chunk in body.split("href=\"").skip(1) {
        if let Some(end) = chunk.find('"') {
            links.push(chunk[..end].to_string());
        }
    }
    links
}

#[async_trait::async_trait]
impl Spider for LinkSpider {
    fn name(&self) -> &str {
        "link_spider"
    }

    fn start_urls(&self) -> Vec<String> {
        vec![self.start.clone()]
    }

    async fn parse(&self, response: Response) -> Result<ParseOutput> {
        let mut output = ParseOutput::new();

        let mut item = DynamicItem::new("page");
        item.set("url", response.url.to_string());
        item.set("depth", response.depth());
        output.items.push(item);

        let body = response.text().unwrap_or_default();
        for href in extract_hrefs(&body) {
            if let Ok(url) = response.url.join(&href) {
                if url.host_str() == response.url.host_str() {
                    output.add_request(Request::get(url.as_str())?);
                }
            }
        }

        Ok(output)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let settings = Settings::from_toml(
        r#"
        [engine]
        workers_num = 4

        [scheduler.queue]
        capacity = 128
        on_full = "drop"

        [downloader]
        concurrent_requests = 8
        middlewares = ["default_headers"]

        [spider]
        depth_limit = 1
        middlewares = ["depth_limit"]

        [pipelines]
        names = ["log"]
    "#,
    )
    .map_err(|e| Error::Config(e.to_string()))?;

    let spider = Arc::new(LinkSpider {
        start: "https://example.com".to_string(),
    });

    let mut engine = build_engine(&settings, vec![spider])?;
    let stats = engine.run().await?;

    println!("crawl completed: {} pages, {} links followed", stats.item_count, stats.request_count);
    Ok(())
}
