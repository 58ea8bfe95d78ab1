//! # Patan
//!
//! Patan is a cooperative producer-consumer crawl engine written in Rust: a
//! bounded deduplicating scheduler, a concurrency-limited downloader,
//! ordered middleware chains, and a worker-pool engine that glues them
//! together.
//!
//! ## Components
//!
//! - **Core**: requests, responses, items, the spider contract and the
//!   error taxonomy.
//! - **Scheduler**: the bounded dedup queue with ack/join accounting.
//! - **Downloader**: the concurrency-gated fetch worker and its middleware
//!   chain.
//! - **Middleware**: ordered interceptor chains for requests, responses and
//!   parse output.
//! - **Pipeline**: the ordered item sinks.
//! - **Engine**: worker pool, monitor and lifecycle orchestration.
//! - **Settings**: the configuration surface and assembly adapters.
//!
//! ## Example
//!
//! ```rust,no_run
//! use patan::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     env_logger::init();
//!
//!     let spider = Arc::new(BasicSpider::new(
//!         "example",
//!         vec!["https://example.com".to_string()],
//!     ));
//!
//!     let mut engine = Engine::new(vec![spider])?;
//!     let stats = engine.run().await?;
//!
//!     println!("requests: {}", stats.request_count);
//!     println!("items:    {}", stats.item_count);
//!     Ok(())
//! }
//! ```

pub use patan_core as core;
pub use patan_downloader as downloader;
pub use patan_engine as engine;
pub use patan_middleware as middleware;
pub use patan_pipeline as pipeline;
pub use patan_scheduler as scheduler;

// Settings module for configuration management
pub mod settings;

// Adapters assembling engines out of settings
pub mod assemble;

/// Prelude module that re-exports commonly used types
pub mod prelude {
    pub use patan_core::error::{Error, Result};
    pub use patan_core::item::{DynamicItem, Item};
    pub use patan_core::request::{Fingerprint, Method, Request};
    pub use patan_core::response::Response;
    pub use patan_core::spider::{BasicSpider, ParseOutput, Spider};
    pub use patan_downloader::{Downloader, DownloaderConfig, HttpClient, ReqwestClient};
    pub use patan_engine::{Engine, EngineConfig, EngineStats};
    pub use patan_middleware::{
        DefaultHeadersMiddleware, DepthLimitMiddleware, DownloaderMiddleware,
        DownloaderMiddlewareManager, Intercept, MiddlewareRegistry, RandomDelayMiddleware,
        RetryMiddleware, SpiderMiddleware, SpiderMiddlewareManager, UrlFilterMiddleware,
    };
    pub use patan_pipeline::{
        JsonFilePipeline, LogPipeline, Pipeline, PipelineManager, PipelineRegistry,
    };
    pub use patan_scheduler::{
        AckGuard, DuplicateFilter, OverflowPolicy, Scheduler, SchedulerConfig,
    };

    pub use crate::assemble::{build_engine, build_engine_with_registries};
    pub use crate::settings::{Settings, SettingsError, SettingsFormat};
}
