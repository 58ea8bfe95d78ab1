use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use futures::future::join_all;
use log::{debug, error, info};
use tokio::sync::Mutex;

use patan_core::async_trait;
use patan_core::error::{Error, Result};
use patan_core::item::DynamicItem;
use patan_core::spider::Spider;

/// Trait for item pipelines.
///
/// Pipelines receive every item a spider produces, in registration order.
/// They may observe items from different workers in arbitrary interleavings,
/// so cross-item state must tolerate that.
#[async_trait]
pub trait Pipeline: Send + Sync + 'static {
    /// Name used in logs and error messages
    fn name(&self) -> &str;

    /// Process one item, returning it (possibly transformed) for the next
    /// pipeline in the chain
    async fn process_item(&self, item: DynamicItem, spider: &dyn Spider) -> Result<DynamicItem>;

    /// Called once when the spider is opened
    async fn open_spider(&self, _spider: &dyn Spider) -> Result<()> {
        Ok(())
    }

    /// Called once when the spider is closed
    async fn close_spider(&self, _spider: &dyn Spider) -> Result<()> {
        Ok(())
    }
}

/// An ordered, non-short-circuiting chain of pipelines.
///
/// Every registered pipeline sees every item: a failing pipeline is logged
/// and the chain continues with the item value from the last successful
/// stage.
#[derive(Default)]
pub struct PipelineManager {
    pipelines: Vec<Arc<dyn Pipeline>>,
}

impl std::fmt::Debug for PipelineManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineManager")
            .field("pipelines", &self.names())
            .finish()
    }
}

impl PipelineManager {
    /// Create a manager over the given pipelines, run in vector order
    pub fn new(pipelines: Vec<Arc<dyn Pipeline>>) -> Self {
        Self { pipelines }
    }

    /// Append a pipeline to the end of the chain
    pub fn push(&mut self, pipeline: Arc<dyn Pipeline>) {
        self.pipelines.push(pipeline);
    }

    /// Names of the registered pipelines, in execution order
    pub fn names(&self) -> Vec<&str> {
        self.pipelines.iter().map(|p| p.name()).collect()
    }

    /// Run the item through every pipeline in order. Failures are logged and
    /// never abort the chain for the remaining pipelines.
    pub async fn process_item(&self, item: DynamicItem, spider: &dyn Spider) -> DynamicItem {
        let mut current = item;
        for pipeline in &self.pipelines {
            match pipeline.process_item(current.clone(), spider).await {
                Ok(processed) => current = processed,
                Err(e) => {
                    error!("pipeline {} failed: {}", pipeline.name(), e);
                }
            }
        }
        current
    }

    /// Open every pipeline; failures are logged and reported but do not stop
    /// the others from opening
    pub async fn open_all(&self, spider: &dyn Spider) -> Result<()> {
        let results = join_all(
            self.pipelines
                .iter()
                .map(|pipeline| pipeline.open_spider(spider)),
        )
        .await;

        for (pipeline, result) in self.pipelines.iter().zip(results) {
            if let Err(e) = result {
                error!("failed to open pipeline {}: {}", pipeline.name(), e);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Close every pipeline; failures are logged and never propagated so one
    /// broken sink cannot block the teardown of the others
    pub async fn close_all(&self, spider: &dyn Spider) {
        let results = join_all(
            self.pipelines
                .iter()
                .map(|pipeline| pipeline.close_spider(spider)),
        )
        .await;

        for (pipeline, result) in self.pipelines.iter().zip(results) {
            match result {
                Ok(()) => debug!("pipeline {} closed", pipeline.name()),
                Err(e) => error!("error closing pipeline {}: {}", pipeline.name(), e),
            }
        }
    }
}

/// Pipeline that logs items
pub struct LogPipeline {
    level: log::Level,
}

impl LogPipeline {
    /// Create a new log pipeline
    pub fn new(level: log::Level) -> Self {
        Self { level }
    }

    /// Create a new log pipeline with INFO level
    pub fn info() -> Self {
        Self::new(log::Level::Info)
    }

    /// Create a new log pipeline with DEBUG level
    pub fn debug() -> Self {
        Self::new(log::Level::Debug)
    }
}

#[async_trait]
impl Pipeline for LogPipeline {
    fn name(&self) -> &str {
        "LogPipeline"
    }

    async fn process_item(&self, item: DynamicItem, spider: &dyn Spider) -> Result<DynamicItem> {
        match self.level {
            log::Level::Debug => debug!("spider '{}' scraped item: {:?}", spider.name(), item),
            _ => info!("spider '{}' scraped item: {:?}", spider.name(), item),
        }
        Ok(item)
    }
}

/// Pipeline that writes items to a JSON-lines file
pub struct JsonFilePipeline {
    file_path: String,
    file: Arc<Mutex<Option<File>>>,
    append: bool,
}

impl JsonFilePipeline {
    /// Create a new JSON file pipeline
    pub fn new<P: AsRef<Path>>(file_path: P, append: bool) -> Self {
        Self {
            file_path: file_path.as_ref().to_string_lossy().to_string(),
            file: Arc::new(Mutex::new(None)),
            append,
        }
    }
}

#[async_trait]
impl Pipeline for JsonFilePipeline {
    fn name(&self) -> &str {
        "JsonFilePipeline"
    }

    async fn open_spider(&self, _spider: &dyn Spider) -> Result<()> {
        let mut guard = self.file.lock().await;

        let file = if self.append {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.file_path)?
        } else {
            File::create(&self.file_path)?
        };

        *guard = Some(file);
        Ok(())
    }

    async fn process_item(&self, item: DynamicItem, _spider: &dyn Spider) -> Result<DynamicItem> {
        let mut guard = self.file.lock().await;

        if let Some(file) = guard.as_mut() {
            let json = serde_json::to_string(&item).map_err(|e| Error::Serde(e.to_string()))?;
            file.write_all(json.as_bytes())?;
            file.write_all(b"\n")?;
            file.flush()?;
        }

        Ok(item)
    }

    async fn close_spider(&self, _spider: &dyn Spider) -> Result<()> {
        let mut guard = self.file.lock().await;
        if let Some(mut file) = guard.take() {
            file.flush()?;
        }
        Ok(())
    }
}

type PipelineFactory =
    Box<dyn Fn(&serde_json::Value) -> Result<Arc<dyn Pipeline>> + Send + Sync>;

/// Maps pipeline names from configuration to constructors, mirroring the
/// middleware registry. Unknown names are a configuration error, fatal at
/// bootstrap.
#[derive(Default)]
pub struct PipelineRegistry {
    factories: HashMap<String, PipelineFactory>,
}

impl PipelineRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in pipelines registered
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.register("log", |_params| Ok(Arc::new(LogPipeline::info())));

        registry.register("json_file", |params| {
            let path = params
                .pointer("/json_file/path")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::config("json_file pipeline requires a path"))?;
            let append = params
                .pointer("/json_file/append")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            Ok(Arc::new(JsonFilePipeline::new(path, append)))
        });

        registry
    }

    /// Register a pipeline constructor under a name
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&serde_json::Value) -> Result<Arc<dyn Pipeline>> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// Build a pipeline chain in the declared order
    pub fn build_chain(
        &self,
        names: &[String],
        params: &serde_json::Value,
    ) -> Result<PipelineManager> {
        let mut pipelines = Vec::with_capacity(names.len());
        for name in names {
            let factory = self
                .factories
                .get(name)
                .ok_or_else(|| Error::config(format!("unknown pipeline: {}", name)))?;
            pipelines.push(factory(params)?);
        }
        Ok(PipelineManager::new(pipelines))
    }
}
