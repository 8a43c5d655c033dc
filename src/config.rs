//! Configuration types for pmkit

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub bot: BotSettings,
    #[serde(default)]
    pub stream: StreamSettings,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub trade_log: TradeLogConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Bot loop and window settings
#[derive(Debug, Clone, Deserialize)]
pub struct BotSettings {
    /// Assets whose market boundaries the bot tracks
    #[serde(default = "default_assets")]
    pub assets: Vec<String>,

    /// Venue the built-in watcher runs against
    #[serde(default = "default_venue")]
    pub venue: String,

    /// Milliseconds between ticks
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Market window length in seconds
    #[serde(default = "default_window_length_secs")]
    pub window_length_secs: u64,

    /// Remaining-time threshold below which selection flips to the next window
    #[serde(default = "default_rollover_guard_secs")]
    pub rollover_guard_secs: u64,
}

fn default_assets() -> Vec<String> {
    vec!["BTC".to_string()]
}
fn default_venue() -> String {
    "polymarket".to_string()
}
fn default_tick_interval_ms() -> u64 {
    1000
}
fn default_window_length_secs() -> u64 {
    900
}
fn default_rollover_guard_secs() -> u64 {
    30
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            assets: default_assets(),
            venue: default_venue(),
            tick_interval_ms: default_tick_interval_ms(),
            window_length_secs: default_window_length_secs(),
            rollover_guard_secs: default_rollover_guard_secs(),
        }
    }
}

impl BotSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn window_length(&self) -> Duration {
        Duration::from_secs(self.window_length_secs)
    }

    pub fn rollover_guard(&self) -> Duration {
        Duration::from_secs(self.rollover_guard_secs)
    }
}

/// Reconnect backoff settings shared by every stream
#[derive(Debug, Clone, Deserialize)]
pub struct StreamSettings {
    /// Milliseconds before the first reconnect attempt
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Multiplier applied after each failed attempt
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u32,

    /// Cap on the reconnect delay, in seconds
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

fn default_initial_backoff_ms() -> u64 {
    1000
}
fn default_backoff_multiplier() -> u32 {
    2
}
fn default_max_backoff_secs() -> u64 {
    30
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

impl StreamSettings {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

/// Execution mode: dry-run or live
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    #[default]
    DryRun,
    Live,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::DryRun => write!(f, "dry-run"),
            ExecutionMode::Live => write!(f, "live"),
        }
    }
}

/// Execution configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub mode: ExecutionMode,
}

/// Trade log configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TradeLogConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory trade CSVs are written into
    #[serde(default = "default_trade_log_dir")]
    pub dir: PathBuf,
}

fn default_true() -> bool {
    true
}
fn default_trade_log_dir() -> PathBuf {
    PathBuf::from("./trades")
}

impl Default for TradeLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_trade_log_dir(),
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Prometheus exporter port; 0 disables the exporter
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_metrics_port() -> u16 {
    9090
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            metrics_port: default_metrics_port(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
