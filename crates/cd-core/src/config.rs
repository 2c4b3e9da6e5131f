//! Runtime configuration
//!
//! Read once at startup and passed explicitly into the owners that need it.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment override for [`AudioConfig::stream_buffer_size`]
pub const ENV_STREAM_BUFFER_SIZE: &str = "CADENCE_STREAM_BUFFER_SIZE";
/// Environment override for [`AudioConfig::stream_num_buffers`]
pub const ENV_STREAM_NUM_BUFFERS: &str = "CADENCE_STREAM_NUM_BUFFERS";
/// Environment override for [`GraphicsConfig::debug_callback`]
pub const ENV_DEBUG_CALLBACK: &str = "CADENCE_DEBUG_CALLBACK";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
}

/// Audio owner and streaming settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capacity of one streaming buffer, in interleaved samples
    pub stream_buffer_size: usize,
    /// Number of streaming buffers per voice (at least 2)
    pub stream_num_buffers: usize,
    /// Sleep between audio owner ticks
    pub update_interval_ms: u64,
    /// Voices allocated for each one-shot clip
    pub clip_voices: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            stream_buffer_size: 8 * 1024,
            stream_num_buffers: 2,
            update_interval_ms: 30,
            clip_voices: 4,
        }
    }
}

/// Render owner settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Install a GPU debug-output callback during init
    pub debug_callback: bool,
    /// Frame pacing used by headless backends
    pub frame_interval_ms: u64,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            debug_callback: true,
            frame_interval_ms: 16,
        }
    }
}

/// Log verbosity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

/// Debugging and logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub log_level: LogLevel,
    pub log_to_file: bool,
    pub log_path: PathBuf,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_to_file: false,
            log_path: PathBuf::from("cadence.log"),
        }
    }
}

impl Config {
    /// Default location of the config file
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("cadence").join("config.toml"))
    }

    /// Load from the default location, falling back to defaults when no file exists
    pub fn load() -> Result<Self, ConfigError> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load and validate a config file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config as TOML, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.audio.stream_num_buffers < 2 {
            return Err(ConfigError::Invalid(format!(
                "audio.stream_num_buffers must be at least 2, got {}",
                self.audio.stream_num_buffers
            )));
        }
        if self.audio.stream_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "audio.stream_buffer_size must be non-zero".into(),
            ));
        }
        if self.audio.clip_voices == 0 {
            return Err(ConfigError::Invalid("audio.clip_voices must be non-zero".into()));
        }
        Ok(())
    }

    /// Apply `CADENCE_*` environment overrides on top of the loaded values
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_STREAM_BUFFER_SIZE) {
            self.audio.stream_buffer_size = parse_env(ENV_STREAM_BUFFER_SIZE, &value)?;
        }
        if let Some(value) = lookup(ENV_STREAM_NUM_BUFFERS) {
            self.audio.stream_num_buffers = parse_env(ENV_STREAM_NUM_BUFFERS, &value)?;
        }
        if let Some(value) = lookup(ENV_DEBUG_CALLBACK) {
            self.graphics.debug_callback = parse_env(ENV_DEBUG_CALLBACK, &value)?;
        }
        self.validate()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{key}={value:?}")))
}
