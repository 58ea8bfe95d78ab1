use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinSet;

use patan_core::error::{Error, Result};
use patan_core::request::Request;
use patan_core::response::Response;
use patan_core::spider::{ParseOutput, Spider};
use patan_downloader::{Downloader, DownloaderConfig};
use patan_middleware::{
    DefaultHeadersMiddleware, DownloaderMiddlewareManager, Intercept, SpiderMiddlewareManager,
};
use patan_pipeline::{LogPipeline, Pipeline, PipelineManager};
use patan_scheduler::{Scheduler, SchedulerConfig};

pub mod config;
pub mod stats;

pub use config::EngineConfig;
pub use stats::EngineStats;

/// Timeout applied to each teardown step so a stuck collaborator cannot
/// hang the whole shutdown
const SHUTDOWN_STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// The crawler engine: owns the worker pool, the bootstrap/shutdown
/// lifecycle, and glues scheduler, downloader, spider middleware and
/// pipelines together.
///
/// Lifecycle: bootstrap (seed start requests, spawn workers and monitor) →
/// running → shutting down (monitor detected queue empty with nothing in
/// flight) → terminated. Shutdown teardown always runs, success or failure.
pub struct Engine {
    spiders: Vec<Arc<dyn Spider>>,
    scheduler: Arc<Scheduler>,
    downloader: Arc<Downloader>,
    spider_middlewares: Arc<SpiderMiddlewareManager>,
    pipelines: Arc<PipelineManager>,
    config: EngineConfig,
    stats: Arc<RwLock<EngineStats>>,
    running: AtomicBool,
}

impl Engine {
    /// Create an engine over the given spiders with default components:
    /// a default scheduler, a reqwest downloader with common default
    /// headers, no spider middlewares, and a log pipeline.
    pub fn new(spiders: Vec<Arc<dyn Spider>>) -> Result<Self> {
        let config = EngineConfig::default();

        let mut downloader_chain = DownloaderMiddlewareManager::default();
        downloader_chain.push(Arc::new(DefaultHeadersMiddleware::common()));
        let downloader = Downloader::with_middlewares(DownloaderConfig::default(), downloader_chain)?;

        let pipelines = if config.log_items {
            PipelineManager::new(vec![Arc::new(LogPipeline::info()) as Arc<dyn Pipeline>])
        } else {
            PipelineManager::default()
        };

        Ok(Self::with_components(
            spiders,
            Arc::new(Scheduler::new(SchedulerConfig::default())),
            Arc::new(downloader),
            Arc::new(SpiderMiddlewareManager::default()),
            Arc::new(pipelines),
            config,
        ))
    }

    /// Create an engine with explicitly assembled components
    pub fn with_components(
        spiders: Vec<Arc<dyn Spider>>,
        scheduler: Arc<Scheduler>,
        downloader: Arc<Downloader>,
        spider_middlewares: Arc<SpiderMiddlewareManager>,
        pipelines: Arc<PipelineManager>,
        config: EngineConfig,
    ) -> Self {
        Self {
            spiders,
            scheduler,
            downloader,
            spider_middlewares,
            pipelines,
            config,
            stats: Arc::new(RwLock::new(EngineStats::default())),
            running: AtomicBool::new(false),
        }
    }

    /// Replace the engine configuration
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Run the crawl to completion and return the final statistics.
    ///
    /// Terminates once the monitor observes that the scheduler holds no
    /// queued or in-flight work and no re-enqueue forks are pending.
    /// Teardown (downloader, pipelines, spiders) runs on every path.
    pub async fn run(&mut self) -> Result<EngineStats> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::config("engine is already running"));
        }

        self.stats.write().await.start_time = Some(Instant::now());

        let crawl_result = self.crawl().await;

        // Shutdown always runs, whether the crawl succeeded or not
        self.shutdown().await;

        self.stats.write().await.end_time = Some(Instant::now());
        self.log_final_stats().await;

        crawl_result?;
        Ok(self.stats.read().await.clone())
    }

    /// Current engine statistics
    pub async fn stats(&self) -> EngineStats {
        self.stats.read().await.clone()
    }

    async fn crawl(&self) -> Result<()> {
        // Bootstrap: configuration fatals first
        if self.spiders.is_empty() {
            return Err(Error::config("no spiders registered"));
        }

        let mut spiders = HashMap::new();
        for spider in &self.spiders {
            if spiders
                .insert(spider.name().to_string(), Arc::clone(spider))
                .is_some()
            {
                return Err(Error::config(format!(
                    "duplicate spider name: {}",
                    spider.name()
                )));
            }
        }

        for spider in &self.spiders {
            self.pipelines.open_all(&**spider).await?;
        }

        self.seed_start_requests().await?;

        let ctx = Arc::new(WorkerContext {
            scheduler: Arc::clone(&self.scheduler),
            downloader: Arc::clone(&self.downloader),
            spider_middlewares: Arc::clone(&self.spider_middlewares),
            pipelines: Arc::clone(&self.pipelines),
            spiders,
            forks: ForkSet::new(),
            stats: Arc::clone(&self.stats),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut workers = JoinSet::new();
        for id in 0..self.config.workers_num.max(1) {
            workers.spawn(worker_loop(id, Arc::clone(&ctx), shutdown_rx.clone()));
        }
        drop(shutdown_rx);

        let monitor = tokio::spawn(monitor_loop(
            Arc::clone(&ctx),
            shutdown_tx,
            self.config.clone(),
        ));

        if let Err(e) = monitor.await {
            error!("monitor task failed: {}", e);
        }
        while workers.join_next().await.is_some() {}
        ctx.forks.drain().await;

        Ok(())
    }

    async fn seed_start_requests(&self) -> Result<()> {
        let mut seeded = 0usize;
        for spider in &self.spiders {
            for result in spider.start_requests() {
                match result {
                    Ok(mut request) => {
                        request.set_spider_name(spider.name());
                        // Seeding must not suspend against not-yet-started
                        // workers, so overflow follows the configured policy
                        // and a rejection is fatal here.
                        if self.scheduler.try_enqueue(request).await? {
                            seeded += 1;
                        }
                    }
                    Err(e) => {
                        error!(
                            "error creating start request for spider {}: {}",
                            spider.name(),
                            e
                        );
                        self.stats.write().await.error_count += 1;
                    }
                }
            }
        }
        info!("seeded {} start requests", seeded);
        Ok(())
    }

    async fn shutdown(&self) {
        info!("shutting down engine");
        self.downloader.close();

        for spider in &self.spiders {
            match tokio::time::timeout(
                SHUTDOWN_STEP_TIMEOUT,
                self.pipelines.close_all(&**spider),
            )
            .await
            {
                Ok(()) => {}
                Err(_) => warn!("timeout closing pipelines for spider {}", spider.name()),
            }

            match tokio::time::timeout(SHUTDOWN_STEP_TIMEOUT, spider.closed()).await {
                Ok(Ok(())) => debug!("spider {} closed", spider.name()),
                Ok(Err(e)) => warn!("error closing spider {}: {}", spider.name(), e),
                Err(_) => warn!("timeout closing spider {}", spider.name()),
            }
        }
        info!("engine shutdown completed");
    }

    async fn log_final_stats(&self) {
        let stats = self.stats.read().await;
        if let Some(duration) = stats.duration() {
            info!(
                "crawl finished: {} requests, {} responses, {} items, {} dropped, {} errors, {:.2}s elapsed",
                stats.request_count,
                stats.response_count,
                stats.item_count,
                stats.dropped_count,
                stats.error_count,
                duration.as_secs_f64(),
            );
        }
    }
}

/// Shared state handed to every worker and the monitor
struct WorkerContext {
    scheduler: Arc<Scheduler>,
    downloader: Arc<Downloader>,
    spider_middlewares: Arc<SpiderMiddlewareManager>,
    pipelines: Arc<PipelineManager>,
    spiders: HashMap<String, Arc<dyn Spider>>,
    forks: ForkSet,
    stats: Arc<RwLock<EngineStats>>,
}

/// Supervised group of forked re-enqueue tasks.
///
/// Workers hand follow-up requests to these forks so a full queue never
/// stalls a worker that is ready to fetch again; the monitor refuses to
/// declare the crawl finished while any fork is pending, and the engine
/// drains the set before teardown.
struct ForkSet {
    tasks: Mutex<JoinSet<()>>,
    pending: Arc<AtomicUsize>,
}

impl ForkSet {
    fn new() -> Self {
        Self {
            tasks: Mutex::new(JoinSet::new()),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    async fn spawn_enqueue(
        &self,
        scheduler: Arc<Scheduler>,
        stats: Arc<RwLock<EngineStats>>,
        request: Request,
    ) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let pending = Arc::clone(&self.pending);
        self.tasks.lock().await.spawn(async move {
            if let Err(e) = scheduler.enqueue(request).await {
                error!("failed to re-enqueue request: {}", e);
                stats.write().await.error_count += 1;
            }
            pending.fetch_sub(1, Ordering::SeqCst);
        });
    }

    fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    async fn drain(&self) {
        let mut tasks = self.tasks.lock().await;
        while tasks.join_next().await.is_some() {}
    }
}

async fn worker_loop(id: usize, ctx: Arc<WorkerContext>, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        let dequeued = tokio::select! {
            _ = shutdown_rx.changed() => {
                debug!("worker {} received shutdown signal", id);
                break;
            }
            dequeued = ctx.scheduler.dequeue() => dequeued,
        };

        match dequeued {
            Some((request, ack)) => {
                process_request(&ctx, request).await;
                // One ack per dequeue, on every exit path of the processing
                ack.ack();
            }
            None => {
                debug!("worker {} stopping: scheduler closed", id);
                break;
            }
        }
    }
    debug!("worker {} exited", id);
}

async fn process_request(ctx: &WorkerContext, request: Request) {
    let spider = match request.spider_name().and_then(|name| ctx.spiders.get(name)) {
        Some(spider) => Arc::clone(spider),
        None => {
            warn!("dropping request without a known spider: {}", request.url);
            ctx.stats.write().await.dropped_count += 1;
            return;
        }
    };

    ctx.stats.write().await.request_count += 1;

    match ctx.downloader.fetch(request, &*spider).await {
        None => {
            // Fetch failed without recovery; already logged at the source
            ctx.stats.write().await.dropped_count += 1;
        }
        Some(Intercept::Request(mut rerouted)) => {
            rerouted.set_spider_name(spider.name());
            ctx.forks
                .spawn_enqueue(
                    Arc::clone(&ctx.scheduler),
                    Arc::clone(&ctx.stats),
                    rerouted,
                )
                .await;
        }
        Some(Intercept::Response(response)) => {
            ctx.stats.write().await.response_count += 1;
            let output = parse_response(ctx, &*spider, response).await;

            for mut follow in output.requests {
                follow.set_spider_name(spider.name());
                ctx.forks
                    .spawn_enqueue(Arc::clone(&ctx.scheduler), Arc::clone(&ctx.stats), follow)
                    .await;
            }

            for item in output.items {
                ctx.pipelines.process_item(item, &*spider).await;
                ctx.stats.write().await.item_count += 1;
            }
        }
    }
}

async fn parse_response(
    ctx: &WorkerContext,
    spider: &dyn Spider,
    response: Response,
) -> ParseOutput {
    let result = async {
        ctx.spider_middlewares
            .handle_input(&response, spider)
            .await?;
        let output = match response.request.callback.clone() {
            Some(name) => spider.callback(&name, response.clone()).await?,
            None => spider.parse(response.clone()).await?,
        };
        ctx.spider_middlewares
            .handle_output(&response, output, spider)
            .await
    }
    .await;

    match result {
        Ok(output) => output,
        Err(error) => {
            ctx.stats.write().await.error_count += 1;
            match ctx
                .spider_middlewares
                .handle_exception(&response, &error, spider)
                .await
            {
                Some(output) => output,
                None => {
                    error!("error processing response {}: {}", response.url, error);
                    ParseOutput::new()
                }
            }
        }
    }
}

async fn monitor_loop(
    ctx: Arc<WorkerContext>,
    shutdown_tx: watch::Sender<bool>,
    config: EngineConfig,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(config.poll_interval_ms.max(1)));
    let stats_interval = Duration::from_secs(config.stats_interval_secs.max(1));
    let mut last_stats = Instant::now();

    loop {
        ticker.tick().await;

        if config.log_stats && last_stats.elapsed() >= stats_interval {
            let stats = ctx.stats.read().await;
            info!(
                "crawl stats: {} requests, {} responses, {} items, {} errors, {} queued, {} fetch slots free",
                stats.request_count,
                stats.response_count,
                stats.item_count,
                stats.error_count,
                ctx.scheduler.len().await,
                ctx.downloader.available_permits(),
            );
            last_stats = Instant::now();
        }

        // Finished when no request is queued or unacked and no re-enqueue
        // fork is still pending. The in-flight accounting makes this
        // race-free: a dequeued-but-unacked request keeps the scheduler
        // busy no matter what the workers are doing.
        if ctx.scheduler.is_idle() && ctx.forks.pending() == 0 {
            info!("no pending work left, stopping workers");
            let _ = shutdown_tx.send(true);
            // Unblock workers suspended inside dequeue
            ctx.scheduler.close();
            break;
        }
    }
}
