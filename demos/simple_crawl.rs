use std::sync::Arc;

use patan::prelude::*;

struct PageSpider {
    name: String,
    start_urls: Vec<String>,
}

#[async_trait::async_trait]
impl Spider for PageSpider {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_urls(&self) -> Vec<String> {
        self.start_urls.clone()
    }

    async fn parse(&self, response: Response) -> Result<ParseOutput> {
        let mut item = DynamicItem::new("page");
        item.set("url", response.url.to_string());
        item.set("status", response.status);
        item.set("bytes", response.body.len());

        let mut output = ParseOutput::new();
        output.items.push(item);
        Ok(output)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let spider = Arc::new(PageSpider {
        name: "simple".to_string(),
        start_urls: vec!["https://example.com".to_string()],
    });

    let mut engine = Engine::new(vec![spider])?;
    let stats = engine.run().await?;

    println!("crawl completed");
    println!("requests:  {}", stats.request_count);
    println!("responses: {}", stats.response_count);
    println!("items:     {}", stats.item_count);
    println!("errors:    {}", stats.error_count);
    Ok(())
}
