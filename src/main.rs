//! Cadence - headless runtime demo
//!
//! Starts the audio, loader and render owners, optionally streams a WAV file
//! given on the command line, and shuts everything down in order.
//!
//! Usage: `cadence [file.wav] [seconds]`

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use cd_audio::{CpalBackend, Playback};
use cd_core::config::Config;
use cd_integration::Runtime;
use cd_render::GraphicsBackend;

const DEFAULT_RUN_SECONDS: u64 = 5;

fn main() -> anyhow::Result<()> {
    // Load config to get initial log level
    let loaded = Config::load();
    let mut config = loaded.as_ref().cloned().unwrap_or_default();
    let overrides = config.apply_env_overrides();

    cd_core::logging::init(&config);
    if let Err(e) = &loaded {
        tracing::warn!("Using default config: {}", e);
    }
    if let Err(e) = overrides {
        tracing::warn!("Ignoring environment overrides: {}", e);
        config = loaded.unwrap_or_default();
    }

    tracing::info!("Starting cadence");

    let mut args = std::env::args().skip(1);
    let path = args.next().map(PathBuf::from);
    let seconds = match args.next() {
        Some(arg) => arg
            .parse()
            .with_context(|| format!("Invalid run time '{}'", arg))?,
        None => DEFAULT_RUN_SECONDS,
    };

    let frame_interval = Duration::from_millis(config.graphics.frame_interval_ms);
    let mut runtime = Runtime::new(
        config,
        Box::new(CpalBackend::new()),
        Box::new(cd_render::NullBackend::new(frame_interval)),
        Box::new(|_: &mut dyn GraphicsBackend| {}),
    );
    runtime.start()?;

    let music = match &path {
        Some(path) => Some(
            runtime
                .stream_file(path, true)
                .with_context(|| format!("Failed to stream '{}'", path.display()))?,
        ),
        None => None,
    };

    let deadline = Instant::now() + Duration::from_secs(seconds);
    while Instant::now() < deadline {
        thread::sleep(Duration::from_secs(1));
        if let Some(music) = &music {
            let time = music.current_time(music.voice()).wait()?;
            tracing::info!("Playback at {:.2}s", time);
        }
    }

    if let Some(music) = music {
        music.close().wait()?;
    }
    runtime.shutdown()?;
    Ok(())
}
