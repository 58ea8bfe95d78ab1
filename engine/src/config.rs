use serde::{Deserialize, Serialize};

/// Configuration for the crawler engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of worker tasks pulling from the scheduler
    pub workers_num: usize,

    /// Monitor wake interval in milliseconds
    pub poll_interval_ms: u64,

    /// Whether to log periodic crawl statistics
    pub log_stats: bool,

    /// Interval for logging stats in seconds
    pub stats_interval_secs: u64,

    /// Whether the default engine wiring logs scraped items
    pub log_items: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers_num: 8,
            poll_interval_ms: 100,
            log_stats: true,
            stats_interval_secs: 60,
            log_items: true,
        }
    }
}
