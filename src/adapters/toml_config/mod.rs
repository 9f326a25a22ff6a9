// TOML config adapter - Configuration loading with environment overrides

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::model::VideoQuality;
use crate::domain::rules::DEFAULT_MIN_SELECTION_MS;
use crate::error::{VtrimError, VtrimResult};
use crate::utils::logging::{LogFormat, LogLevel, LoggingConfig};

/// File name searched in the working directory
pub const LOCAL_CONFIG_FILE: &str = "vtrim.toml";

/// Resolved application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VtrimConfig {
    /// Encoder executable
    pub ffmpeg_path: PathBuf,
    /// Probe executable
    pub ffprobe_path: PathBuf,
    /// Where outputs go when no destination is given
    pub destination_dir: PathBuf,
    /// Re-encode quality
    pub quality: VideoQuality,
    /// Shortest accepted selection
    pub min_selection_ms: u64,
    /// Scheduler pool size; `None` means twice the core count
    pub worker_threads: Option<usize>,
    pub log_level: LogLevel,
    pub log_format: LogFormat,
}

impl Default for VtrimConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            destination_dir: PathBuf::from("."),
            quality: VideoQuality::default(),
            min_selection_ms: DEFAULT_MIN_SELECTION_MS,
            worker_threads: None,
            log_level: LogLevel::Warn,
            log_format: LogFormat::Compact,
        }
    }
}

impl VtrimConfig {
    /// Parse a TOML document; missing keys take their defaults
    pub fn from_toml_str(content: &str) -> VtrimResult<Self> {
        toml::from_str(content).map_err(|e| VtrimError::Config {
            message: format!("failed to parse TOML config: {}", e),
        })
    }

    /// Read a TOML config file
    pub fn from_file(path: &Path) -> VtrimResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| VtrimError::Config {
            message: format!("failed to read config file {}: {}", path.display(), e),
        })?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Defaults, overlaid by the first config file found, then by `VTRIM_*`
    ///
    /// An explicit `path` must exist; otherwise `./vtrim.toml` and
    /// `$XDG_CONFIG_HOME/vtrim/config.toml` are tried in that order.
    pub fn load(path: Option<&Path>) -> VtrimResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match search_paths().into_iter().find(|p| p.is_file()) {
                Some(found) => Self::from_file(&found)?,
                None => {
                    debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };
        config.apply_env(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `VTRIM_*` overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> VtrimResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(value) = get("VTRIM_FFMPEG_PATH") {
            self.ffmpeg_path = PathBuf::from(value);
        }
        if let Some(value) = get("VTRIM_FFPROBE_PATH") {
            self.ffprobe_path = PathBuf::from(value);
        }
        if let Some(value) = get("VTRIM_DESTINATION_DIR") {
            self.destination_dir = PathBuf::from(value);
        }
        if let Some(value) = get("VTRIM_QUALITY") {
            self.quality = value.parse().map_err(|e: VtrimError| VtrimError::Config {
                message: format!("VTRIM_QUALITY: {}", e),
            })?;
        }
        if let Some(value) = get("VTRIM_MIN_SELECTION_MS") {
            self.min_selection_ms = parse_number("VTRIM_MIN_SELECTION_MS", &value)?;
        }
        if let Some(value) = get("VTRIM_WORKER_THREADS") {
            self.worker_threads = Some(parse_number("VTRIM_WORKER_THREADS", &value)?);
        }
        if let Some(value) = get("VTRIM_LOG_LEVEL") {
            self.log_level = value.parse()?;
        }
        if let Some(value) = get("VTRIM_LOG_FORMAT") {
            self.log_format = value.parse()?;
        }
        self.validate()
    }

    pub fn validate(&self) -> VtrimResult<()> {
        if self.worker_threads == Some(0) {
            return Err(VtrimError::Config {
                message: "worker_threads must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn logging(&self) -> LoggingConfig {
        LoggingConfig {
            level: self.log_level,
            format: self.log_format,
            ..LoggingConfig::default()
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> VtrimResult<T> {
    value.trim().parse().map_err(|_| VtrimError::Config {
        message: format!("{} must be a non-negative integer, got '{}'", key, value),
    })
}

/// Candidate config files, most specific first
fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
    let config_home = env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")));
    if let Some(dir) = config_home {
        paths.push(dir.join("vtrim").join("config.toml"));
    }
    paths
}
