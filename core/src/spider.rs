use crate::async_trait;
use crate::error::Result;
use crate::item::{to_dynamic_item, DynamicItem, Item};
use crate::request::Request;
use crate::response::Response;

/// Trait for spiders that crawl websites.
///
/// A spider is an external collaborator of the engine: it supplies start
/// requests, receives downloaded responses through its callbacks, and is
/// closed exactly once during engine shutdown.
#[async_trait]
pub trait Spider: Send + Sync + 'static {
    /// Unique name of the spider
    fn name(&self) -> &str;

    /// Get the start URLs for this spider
    fn start_urls(&self) -> Vec<String> {
        Vec::new()
    }

    /// Produce the finite sequence of start requests
    fn start_requests(&self) -> Vec<Result<Request>> {
        self.start_urls()
            .into_iter()
            .map(Request::get)
            .collect()
    }

    /// Process a response and return new requests and/or items
    async fn parse(&self, response: Response) -> Result<ParseOutput>;

    /// Route a response to the callback named on its request.
    ///
    /// Spiders with multiple parse stages override this and dispatch on
    /// `name`; the default routes everything to [`Spider::parse`].
    async fn callback(&self, name: &str, response: Response) -> Result<ParseOutput> {
        let _ = name;
        self.parse(response).await
    }

    /// Called once when the spider is closed during engine shutdown
    async fn closed(&self) -> Result<()> {
        Ok(())
    }
}

/// Output from parsing a response: follow-up requests and scraped items
#[derive(Debug, Default)]
pub struct ParseOutput {
    /// Requests to follow
    pub requests: Vec<Request>,

    /// Items extracted from the response
    pub items: Vec<DynamicItem>,
}

impl ParseOutput {
    /// Create a new empty parse output
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item to the output
    pub fn add_item<I: Item>(&mut self, item: I) -> &mut Self {
        if let Ok(dynamic) = to_dynamic_item(&item) {
            self.items.push(dynamic);
        }
        self
    }

    /// Add a request to the output
    pub fn add_request(&mut self, request: Request) -> &mut Self {
        self.requests.push(request);
        self
    }

    /// Create a parse output with a single item
    pub fn item<I: Item>(item: I) -> Self {
        let mut output = Self::new();
        output.add_item(item);
        output
    }

    /// Create a parse output with a single request
    pub fn request(request: Request) -> Self {
        let mut output = Self::new();
        output.add_request(request);
        output
    }

    /// Whether the output carries neither requests nor items
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.items.is_empty()
    }
}

/// A basic spider that fetches its start URLs and extracts nothing.
///
/// Useful as a building block and in tests; real spiders override `parse`.
pub struct BasicSpider {
    name: String,
    start_urls: Vec<String>,
}

impl BasicSpider {
    /// Create a new basic spider
    pub fn new<S: Into<String>>(name: S, start_urls: Vec<String>) -> Self {
        Self {
            name: name.into(),
            start_urls,
        }
    }
}

#[async_trait]
impl Spider for BasicSpider {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_urls(&self) -> Vec<String> {
        self.start_urls.clone()
    }

    async fn parse(&self, _response: Response) -> Result<ParseOutput> {
        Ok(ParseOutput::new())
    }
}
