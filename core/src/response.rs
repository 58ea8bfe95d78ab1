use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

use crate::error::{Error, Result};
use crate::request::Request;

/// Represents an HTTP response received by the crawler.
///
/// Responses are immutable after construction; they live from the moment the
/// downloader finishes a fetch until spider-middleware processing of that one
/// response completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// The URL of the response
    pub url: Url,

    /// The HTTP status code
    pub status: u16,

    /// HTTP headers received
    pub headers: HashMap<String, String>,

    /// Response body
    pub body: Vec<u8>,

    /// The request that generated this response
    pub request: Request,
}

impl Response {
    /// Create a new response
    pub fn new(
        request: Request,
        status: u16,
        headers: HashMap<String, String>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            url: request.url.clone(),
            status,
            headers,
            body,
            request,
        }
    }

    /// Get the response body as a string
    pub fn text(&self) -> Result<String> {
        String::from_utf8(self.body.clone())
            .map_err(|e| Error::Parse(format!("failed to decode UTF-8: {}", e)))
    }

    /// Parse the response body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let text = self.text()?;
        serde_json::from_str(&text).map_err(|e| Error::Serde(e.to_string()))
    }

    /// Check if the response was successful (status code 200-299)
    pub fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Check if the response is a redirect
    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }

    /// Crawl depth of the originating request
    pub fn depth(&self) -> u64 {
        self.request.depth()
    }
}
