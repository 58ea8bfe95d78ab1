use std::sync::Arc;

use patan_core::error::Result;
use patan_core::spider::Spider;
use patan_downloader::{Downloader, DownloaderConfig};
use patan_engine::{Engine, EngineConfig};
use patan_middleware::MiddlewareRegistry;
use patan_pipeline::PipelineRegistry;
use patan_scheduler::{OverflowPolicy, Scheduler, SchedulerConfig};

use crate::settings::{OnFull, Settings};

/// Build an [`EngineConfig`] from settings
pub fn engine_config_from_settings(settings: &Settings) -> EngineConfig {
    EngineConfig {
        workers_num: settings.engine.workers_num,
        poll_interval_ms: settings.engine.poll_interval_ms,
        log_stats: settings.engine.log_stats,
        stats_interval_secs: settings.engine.stats_interval_secs,
        ..EngineConfig::default()
    }
}

/// Build a [`SchedulerConfig`] from settings
pub fn scheduler_config_from_settings(settings: &Settings) -> SchedulerConfig {
    SchedulerConfig {
        capacity: settings.scheduler.queue.capacity,
        on_full: match settings.scheduler.queue.on_full {
            OnFull::Reject => OverflowPolicy::Reject,
            OnFull::Drop => OverflowPolicy::Drop,
        },
    }
}

/// Build a [`DownloaderConfig`] from settings
pub fn downloader_config_from_settings(settings: &Settings) -> DownloaderConfig {
    DownloaderConfig {
        concurrent_requests: settings.downloader.concurrent_requests,
        user_agent: settings.downloader.http.user_agent.clone(),
        timeout_secs: settings.downloader.http.timeout_secs,
        proxy: settings.downloader.http.proxy.clone(),
    }
}

/// The factory-parameter object handed to middleware and pipeline
/// constructors: the free-form `params` section plus the typed settings the
/// built-ins consume.
pub fn factory_params(settings: &Settings) -> serde_json::Value {
    let mut params = if settings.params.is_object() {
        settings.params.clone()
    } else {
        serde_json::json!({})
    };

    if let Some(limit) = settings.spider.depth_limit {
        params["depth_limit"] = serde_json::json!(limit);
    }

    params
}

/// Assemble a ready-to-run engine from settings, using the default
/// middleware and pipeline registries.
///
/// Unknown middleware or pipeline names fail here, before any worker is
/// spawned.
pub fn build_engine(settings: &Settings, spiders: Vec<Arc<dyn Spider>>) -> Result<Engine> {
    build_engine_with_registries(
        settings,
        spiders,
        &MiddlewareRegistry::with_defaults(),
        &PipelineRegistry::with_defaults(),
    )
}

/// Assemble a ready-to-run engine from settings and caller-provided
/// registries, for projects that register their own middlewares or
/// pipelines.
pub fn build_engine_with_registries(
    settings: &Settings,
    spiders: Vec<Arc<dyn Spider>>,
    middlewares: &MiddlewareRegistry,
    pipelines: &PipelineRegistry,
) -> Result<Engine> {
    let params = factory_params(settings);

    let downloader_chain =
        middlewares.build_downloader_chain(&settings.downloader.middlewares, &params)?;
    let spider_chain = middlewares.build_spider_chain(&settings.spider.middlewares, &params)?;
    let pipeline_chain = pipelines.build_chain(&settings.pipelines.names, &params)?;

    let downloader =
        Downloader::with_middlewares(downloader_config_from_settings(settings), downloader_chain)?;
    let scheduler = Scheduler::new(scheduler_config_from_settings(settings));

    Ok(Engine::with_components(
        spiders,
        Arc::new(scheduler),
        Arc::new(downloader),
        Arc::new(spider_chain),
        Arc::new(pipeline_chain),
        engine_config_from_settings(settings),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use patan_core::spider::BasicSpider;

    fn spiders() -> Vec<Arc<dyn Spider>> {
        vec![Arc::new(BasicSpider::new(
            "basic",
            vec!["https://example.com".to_string()],
        ))]
    }

    #[test]
    fn test_build_engine_from_settings() {
        let settings = Settings::from_toml(
            r#"
            [engine]
            workers_num = 2

            [downloader]
            middlewares = ["default_headers", "retry"]

            [spider]
            depth_limit = 3
            middlewares = ["depth_limit"]

            [pipelines]
            names = ["log"]
        "#,
        )
        .unwrap();

        assert!(build_engine(&settings, spiders()).is_ok());
    }

    #[test]
    fn test_unknown_middleware_fails_at_assembly() {
        let settings = Settings::from_toml(
            r#"
            [downloader]
            middlewares = ["no_such_middleware"]
        "#,
        )
        .unwrap();

        assert!(build_engine(&settings, spiders()).is_err());
    }

    #[test]
    fn test_depth_limit_flows_into_factory_params() {
        let settings = Settings::from_toml(
            r#"
            [spider]
            depth_limit = 2
        "#,
        )
        .unwrap();

        let params = factory_params(&settings);
        assert_eq!(params.get("depth_limit").and_then(|v| v.as_u64()), Some(2));
    }
}
