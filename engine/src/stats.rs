use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Statistics for one crawl run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStats {
    /// Number of requests handed to the downloader
    pub request_count: usize,

    /// Number of responses received
    pub response_count: usize,

    /// Number of items scraped
    pub item_count: usize,

    /// Number of requests dropped (fetch failures without recovery,
    /// unresolvable spiders)
    pub dropped_count: usize,

    /// Number of errors
    pub error_count: usize,

    /// Start time of the crawl
    #[serde(skip)]
    pub start_time: Option<Instant>,

    /// End time of the crawl
    #[serde(skip)]
    pub end_time: Option<Instant>,
}

impl EngineStats {
    /// Calculate the duration of the crawl
    pub fn duration(&self) -> Option<Duration> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(end.duration_since(start)),
            (Some(start), None) => Some(Instant::now().duration_since(start)),
            _ => None,
        }
    }

    /// Calculate the requests per second
    pub fn requests_per_second(&self) -> Option<f64> {
        self.duration().map(|duration| {
            let seconds = duration.as_secs_f64();
            if seconds > 0.0 {
                self.request_count as f64 / seconds
            } else {
                0.0
            }
        })
    }
}
