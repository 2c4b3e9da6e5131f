//! Logging infrastructure for the cadence runtime

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{Config, LogLevel};

/// Initialize the logging system based on configuration
pub fn init(config: &Config) {
    let Some(level) = level_for(config.debug.log_level) else {
        return;
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true),
    );

    if config.debug.log_to_file {
        if let Ok(file) = std::fs::File::create(&config.debug.log_path) {
            let file_layer = fmt::layer().with_writer(file).with_ansi(false);
            let _ = subscriber.with(file_layer).try_init();
        } else {
            let _ = subscriber.try_init();
        }
    } else {
        let _ = subscriber.try_init();
    }
}

/// Initialize logging with default settings (for tests and quick starts)
pub fn init_default() {
    let filter = EnvFilter::from_default_env().add_directive(Level::INFO.into());

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

fn level_for(level: LogLevel) -> Option<Level> {
    match level {
        LogLevel::Off => None,
        LogLevel::Error => Some(Level::ERROR),
        LogLevel::Warn => Some(Level::WARN),
        LogLevel::Info => Some(Level::INFO),
        LogLevel::Debug => Some(Level::DEBUG),
        LogLevel::Trace => Some(Level::TRACE),
    }
}

// Convenience macros for component-specific logging

/// Log an audio owner trace message
#[macro_export]
macro_rules! audio_trace {
    ($($arg:tt)*) => {
        tracing::trace!(target: "audio", $($arg)*)
    };
}

/// Log an audio owner debug message
#[macro_export]
macro_rules! audio_debug {
    ($($arg:tt)*) => {
        tracing::debug!(target: "audio", $($arg)*)
    };
}

/// Log a render owner trace message
#[macro_export]
macro_rules! render_trace {
    ($($arg:tt)*) => {
        tracing::trace!(target: "render", $($arg)*)
    };
}

/// Log a render owner debug message
#[macro_export]
macro_rules! render_debug {
    ($($arg:tt)*) => {
        tracing::debug!(target: "render", $($arg)*)
    };
}

/// Log a thread lifecycle debug message
#[macro_export]
macro_rules! thread_debug {
    ($($arg:tt)*) => {
        tracing::debug!(target: "thread", $($arg)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_mapping() {
        assert_eq!(level_for(LogLevel::Off), None);
        assert_eq!(level_for(LogLevel::Warn), Some(Level::WARN));
        assert_eq!(level_for(LogLevel::Trace), Some(Level::TRACE));
    }
}
