//! Error types for the cadence runtime

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type
#[derive(Error, Debug)]
pub enum CadenceError {
    #[error("Thread error: {0}")]
    Thread(#[from] ThreadError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Worker thread lifecycle errors
#[derive(Error, Debug)]
pub enum ThreadError {
    #[error("Thread '{0}' was already started")]
    AlreadyStarted(String),

    #[error("Thread '{0}' was never started")]
    NotStarted(String),

    #[error("Failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    /// A work item or loop step panicked and terminated the owner thread.
    #[error("Thread '{0}' panicked")]
    Panicked(String),

    /// The work item was dropped before it could produce a result.
    #[error("Work item was canceled before completion")]
    Canceled,

    #[error("Timed out waiting for result")]
    Timeout,
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    /// Device or context could not be created. The audio owner stays inert.
    #[error("Audio initialization failed: {0}")]
    InitializationFailure(String),

    #[error("Audio owner is not initialized")]
    NotReady,

    #[error("Audio source is empty")]
    EmptySource,

    #[error("Audio backend error: {0}")]
    Backend(String),
}

/// Render subsystem errors
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Render initialization failed: {0}")]
    InitializationFailure(String),
}

/// Asset decoding errors
#[derive(Error, Debug)]
pub enum AssetError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Unable to load image '{path}': {reason}")]
    Image { path: PathBuf, reason: String },

    #[error("Unable to decode audio '{path}': {reason}")]
    Audio { path: PathBuf, reason: String },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Asset loader error: {0}")]
    Loader(#[from] ThreadError),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, CadenceError>;
