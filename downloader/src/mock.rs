//! Stub fetch primitives for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use patan_core::async_trait;
use patan_core::error::{Error, Result};
use patan_core::request::Request;
use patan_core::response::Response;

use crate::HttpClient;

/// A stub client returning canned responses and recording every fetch
pub struct StubClient {
    responses: Mutex<HashMap<String, (u16, String)>>,
    fetched: Mutex<Vec<String>>,
}

impl StubClient {
    /// Create a new stub client
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            fetched: Mutex::new(Vec::new()),
        }
    }

    /// Register a canned response for a URL
    pub fn with_response(self, url: &str, status: u16, body: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), (status, body.to_string()));
        self
    }

    /// URLs fetched so far, in fetch order
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

impl Default for StubClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for StubClient {
    async fn execute(&self, request: &Request) -> Result<Response> {
        let url = request.url.to_string();
        self.fetched.lock().unwrap().push(url.clone());

        let (status, body) = self
            .responses
            .lock()
            .unwrap()
            .get(&url)
            .cloned()
            .unwrap_or_else(|| {
                (
                    200,
                    format!("<html><body><h1>Stub response for {}</h1></body></html>", url),
                )
            });

        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "text/html".to_string());
        Ok(Response::new(
            request.clone(),
            status,
            headers,
            body.into_bytes(),
        ))
    }
}

/// A client that always fails with a transient fetch error
pub struct FailingClient;

#[async_trait]
impl HttpClient for FailingClient {
    async fn execute(&self, request: &Request) -> Result<Response> {
        Err(Error::fetch(
            request.url.to_string(),
            "stub fetch failure",
        ))
    }
}

/// A client whose fetches never complete; useful for gate tests
pub struct BlockedClient;

impl BlockedClient {
    /// Create a new blocked client
    pub fn new() -> Self {
        Self
    }
}

impl Default for BlockedClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for BlockedClient {
    async fn execute(&self, _request: &Request) -> Result<Response> {
        std::future::pending().await
    }
}
