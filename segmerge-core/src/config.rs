use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// 2 GiB, the largest file a standard bot may send.
pub const DEFAULT_UPLOAD_LIMIT_BYTES: u64 = 2 * 1024 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SegmergeConfig {
    pub telegram: TelegramSection,
    #[serde(default)]
    pub download: DownloadSection,
    #[serde(default)]
    pub ffmpeg: FfmpegSection,
    #[serde(default)]
    pub limits: LimitsSection,
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramSection {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Usually supplied through `SEGMERGE_BOT_TOKEN` instead of the file.
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default = "default_poll_timeout_seconds")]
    pub poll_timeout_seconds: u64,
    #[serde(default = "default_poll_backoff_seconds")]
    pub poll_backoff_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadSection {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub connect_timeout_seconds: Option<u64>,
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    #[serde(default)]
    pub allow_file_urls: bool,
}

impl DownloadSection {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(1))
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_seconds.map(Duration::from_secs)
    }
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout_seconds: None,
            progress_interval_ms: default_progress_interval_ms(),
            allow_file_urls: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FfmpegSection {
    #[serde(default = "default_ffmpeg_path")]
    pub path: PathBuf,
    #[serde(default = "default_ffmpeg_log_level")]
    pub log_level: String,
}

impl Default for FfmpegSection {
    fn default() -> Self {
        Self {
            path: default_ffmpeg_path(),
            log_level: default_ffmpeg_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsSection {
    #[serde(default = "default_upload_limit_bytes")]
    pub upload_limit_bytes: u64,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            upload_limit_bytes: DEFAULT_UPLOAD_LIMIT_BYTES,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsSection {
    /// Parent directory for per-request scratch areas; the system temp dir when unset.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_api_base_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_timeout_seconds() -> u64 {
    30
}

fn default_poll_backoff_seconds() -> u64 {
    5
}

fn default_user_agent() -> String {
    format!("segmerge/{}", env!("CARGO_PKG_VERSION"))
}

fn default_progress_interval_ms() -> u64 {
    1000
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffmpeg_log_level() -> String {
    "error".to_string()
}

fn default_upload_limit_bytes() -> u64 {
    DEFAULT_UPLOAD_LIMIT_BYTES
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn load_segmerge_config<P: AsRef<Path>>(path: P) -> Result<SegmergeConfig> {
    let config: SegmergeConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

impl SegmergeConfig {
    fn validate(&self) -> Result<()> {
        if self.telegram.api_base_url.trim().is_empty() {
            return Err(ConfigError::Missing("telegram.api_base_url"));
        }
        if self.ffmpeg.path.as_os_str().is_empty() {
            return Err(ConfigError::Missing("ffmpeg.path"));
        }
        Ok(())
    }
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
