use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::paths;

/// Reconnect policy for a supervised transcoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Consecutive failed cycles before a stream is marked failed (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first reconnect in milliseconds (default: 1000)
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Growth factor applied per consecutive failure (default: 2.0)
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Upper bound for any single delay in milliseconds (default: 30000)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Where output goes and how the transcoder is run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Shared directory for every camera's playlist and segments
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Prefix of the externally routable playlist URL
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    /// File name prefix: `<prefix>_<camera>.m3u8`
    #[serde(default = "default_segment_prefix")]
    pub segment_prefix: String,
    /// Transcoder binary (name on PATH or absolute path)
    #[serde(default = "default_transcoder")]
    pub transcoder: PathBuf,
    /// Seconds a new process must survive before it counts as connected
    #[serde(default = "default_connect_grace_secs")]
    pub connect_grace_secs: u64,
    #[serde(default = "default_quality")]
    pub default_quality: String,
    /// Segments kept in the live playlist
    #[serde(default = "default_playlist_size")]
    pub playlist_size: u32,
    #[serde(default = "default_rtsp_transport")]
    pub rtsp_transport: String,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("/tmp/hls")
}

fn default_public_base_url() -> String {
    "/hls".to_string()
}

fn default_segment_prefix() -> String {
    "stream".to_string()
}

fn default_transcoder() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_connect_grace_secs() -> u64 {
    3
}

fn default_quality() -> String {
    "medium".to_string()
}

fn default_playlist_size() -> u32 {
    6
}

fn default_rtsp_transport() -> String {
    "tcp".to_string()
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            public_base_url: default_public_base_url(),
            segment_prefix: default_segment_prefix(),
            transcoder: default_transcoder(),
            connect_grace_secs: default_connect_grace_secs(),
            default_quality: default_quality(),
            playlist_size: default_playlist_size(),
            rtsp_transport: default_rtsp_transport(),
            retry: RetryConfig::default(),
        }
    }
}

impl StreamingConfig {
    /// Use a different output directory (builder pattern)
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.segment_prefix.is_empty() {
            return Err(ConfigError::Invalid("segment_prefix must not be empty".to_string()));
        }
        // `_` and `.` delimit the per-camera file namespace
        if self.segment_prefix.contains(['_', '.', '/', '\\']) {
            return Err(ConfigError::Invalid(format!(
                "segment_prefix '{}' may not contain '_', '.' or path separators",
                self.segment_prefix
            )));
        }
        if self.transcoder.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("transcoder must not be empty".to_string()));
        }
        if self.playlist_size == 0 {
            return Err(ConfigError::Invalid("playlist_size must be at least 1".to_string()));
        }

        let retry = &self.retry;
        if retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".to_string()));
        }
        if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry.multiplier must be >= 1.0, got {}",
                retry.multiplier
            )));
        }
        if retry.initial_delay_ms > retry.max_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.initial_delay_ms exceeds retry.max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}

/// Daemon configuration (`server.toml`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address of the control API
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// SQLite event journal; defaults to the XDG data directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal_path: Option<PathBuf>,
    #[serde(default = "default_journal_retention_days")]
    pub journal_retention_days: u32,
    /// tracing filter directive, overridden by RUST_LOG
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default)]
    pub streaming: StreamingConfig,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8090".to_string()
}

fn default_journal_retention_days() -> u32 {
    30
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            journal_path: None,
            journal_retention_days: default_journal_retention_days(),
            log_filter: default_log_filter(),
            streaming: StreamingConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Check if config exists at default location
    pub fn exists() -> bool {
        paths::server_config_path()
            .map(|p| p.exists())
            .unwrap_or(false)
    }

    /// Load config from default XDG location
    pub fn load() -> Result<Self, ConfigError> {
        let path = paths::server_config_path()?;
        Self::load_from(&path)
    }

    /// Load config from specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to specific path
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_addr.trim().is_empty() {
            return Err(ConfigError::Invalid("bind_addr must not be empty".to_string()));
        }
        self.streaming.validate()
    }
}
