use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for settings operations
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Unknown file format: {0}")]
    UnknownFormat(String),
}

/// Result type for settings operations
pub type Result<T> = std::result::Result<T, SettingsError>;

/// Settings file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsFormat {
    /// TOML format
    Toml,
    /// JSON format
    Json,
}

impl SettingsFormat {
    /// Detect the format from a file path
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension().and_then(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            match ext.as_str() {
                "toml" => Some(Self::Toml),
                "json" => Some(Self::Json),
                _ => None,
            }
        })
    }
}

fn default_user_agent() -> String {
    format!("patan/{}", env!("CARGO_PKG_VERSION"))
}

fn default_workers_num() -> usize {
    8
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

fn default_stats_interval_secs() -> u64 {
    60
}

fn default_queue_capacity() -> usize {
    256
}

fn default_concurrent_requests() -> usize {
    16
}

fn default_timeout_secs() -> u64 {
    30
}

/// Engine section of the configuration surface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Worker pool size
    #[serde(default = "default_workers_num")]
    pub workers_num: usize,

    /// Monitor wake interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Whether to log periodic crawl statistics
    #[serde(default = "default_true")]
    pub log_stats: bool,

    /// Interval for logging stats in seconds
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            workers_num: default_workers_num(),
            poll_interval_ms: default_poll_interval_ms(),
            log_stats: true,
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

/// Overflow behavior for the bounded queue's non-blocking enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OnFull {
    /// Fail fast on a full queue
    #[default]
    Reject,
    /// Log and discard on a full queue
    Drop,
}

/// Queue subsection of the scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Bounded queue capacity
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,

    /// Overflow policy for seeding-time enqueues
    #[serde(default)]
    pub on_full: OnFull,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
            on_full: OnFull::default(),
        }
    }
}

/// Scheduler section of the configuration surface
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Bounded queue settings
    pub queue: QueueSettings,
}

/// HTTP subsection of the downloader settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Optional proxy URL applied to every fetch
    pub proxy: Option<String>,

    /// User agent string
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Default request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            proxy: None,
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Downloader section of the configuration surface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderSettings {
    /// Maximum number of concurrent in-flight fetches
    #[serde(default = "default_concurrent_requests")]
    pub concurrent_requests: usize,

    /// Downloader middleware names, in chain order
    #[serde(default)]
    pub middlewares: Vec<String>,

    /// Wire-level options
    pub http: HttpSettings,
}

impl Default for DownloaderSettings {
    fn default() -> Self {
        Self {
            concurrent_requests: default_concurrent_requests(),
            middlewares: Vec::new(),
            http: HttpSettings::default(),
        }
    }
}

/// Spider section of the configuration surface
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SpiderSettings {
    /// Maximum crawl depth, consumed by the depth_limit middleware
    pub depth_limit: Option<u64>,

    /// Spider middleware names, in chain order
    pub middlewares: Vec<String>,
}

/// Pipeline section of the configuration surface
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineSettings {
    /// Pipeline names, in chain order
    pub names: Vec<String>,
}

/// Settings for the crawler, the configuration surface the core consumes.
///
/// Middleware and pipeline lists are ordered; the declared order is the
/// chain execution order.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    /// Engine settings
    pub engine: EngineSettings,

    /// Scheduler settings
    pub scheduler: SchedulerSettings,

    /// Downloader settings
    pub downloader: DownloaderSettings,

    /// Spider settings
    pub spider: SpiderSettings,

    /// Pipeline settings
    pub pipelines: PipelineSettings,

    /// Free-form parameters handed to middleware and pipeline factories,
    /// keyed by component name
    pub params: serde_json::Value,

    /// Path to the settings file, if loaded from a file
    #[serde(skip)]
    pub file_path: Option<PathBuf>,
}

impl Settings {
    /// Create settings with every default applied
    pub fn new() -> Self {
        Self::default()
    }

    /// Load settings from a TOML or JSON file, detected by extension
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let format = SettingsFormat::from_path(path)
            .ok_or_else(|| SettingsError::UnknownFormat(path.to_string_lossy().to_string()))?;

        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        let mut settings = match format {
            SettingsFormat::Toml => Self::from_toml(&contents)?,
            SettingsFormat::Json => Self::from_json(&contents)?,
        };

        settings.file_path = Some(path.to_path_buf());
        Ok(settings)
    }

    /// Load settings from TOML
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| SettingsError::TomlParse(e.to_string()))
    }

    /// Load settings from JSON
    pub fn from_json(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }
}
