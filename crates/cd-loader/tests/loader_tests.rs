//! Asset loader draining and audio affinity

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use cd_audio::{AudioThread, Decoder, NullBackend};
use cd_core::config::AudioConfig;
use cd_core::error::AssetError;
use cd_loader::{AssetLoader, LOADER_THREAD_NAME};

fn start() -> AssetLoader {
    let mut loader = AssetLoader::new();
    loader.start().unwrap();
    loader.wait_for_ready();
    loader
}

fn stop(mut loader: AssetLoader) {
    loader.interrupt();
    loader.allow_teardown();
    loader.join().unwrap();
}

fn write_wav(path: &Path, frames: usize) {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 44_100,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..frames * 2 {
        writer.write_sample(i as i16).unwrap();
    }
    writer.finalize().unwrap();
}

#[test]
fn test_load_runs_on_loader_thread() {
    let loader = start();
    let name = loader
        .handle()
        .load(|| Ok(thread::current().name().map(str::to_owned)))
        .wait()
        .unwrap()
        .unwrap();
    assert_eq!(name.as_deref(), Some(LOADER_THREAD_NAME));
    stop(loader);
}

#[test]
fn test_wait_for_drain_covers_every_submitter() {
    let loader = start();
    let handle = loader.handle();
    let done = Arc::new(AtomicUsize::new(0));

    let submitters: Vec<_> = (0..4)
        .map(|_| {
            let handle = handle.clone();
            let done = done.clone();
            thread::spawn(move || {
                for _ in 0..25 {
                    let done = done.clone();
                    drop(handle.load(move || {
                        done.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }));
                }
            })
        })
        .collect();
    for submitter in submitters {
        submitter.join().unwrap();
    }

    assert!(handle.wait_for_drain());
    assert_eq!(done.load(Ordering::SeqCst), 100);
    assert_eq!(handle.pending_len(), 0);
    stop(loader);
}

#[test]
fn test_load_wav_and_image() {
    let dir = tempfile::tempdir().unwrap();
    let wav = dir.path().join("loop.wav");
    write_wav(&wav, 300);
    let png = dir.path().join("tile.png");
    image::RgbImage::from_pixel(8, 8, image::Rgb([1, 2, 3]))
        .save(&png)
        .unwrap();

    let loader = start();
    let handle = loader.handle();
    let decoder = handle.load_wav(&wav);
    let pixels = handle.load_image(&png);

    let mut decoder = decoder.wait().unwrap().unwrap();
    assert!(decoder.is_owned());
    assert_eq!(decoder.with(|d| (d.channels(), d.total_samples())), (2, 300));
    decoder.close();

    let pixels = pixels.wait().unwrap().unwrap();
    assert!(!pixels.has_alpha);
    assert_eq!(&pixels.data[..3], &[1, 2, 3]);
    stop(loader);
}

#[test]
fn test_load_errors_reach_caller() {
    let loader = start();
    let handle = loader.handle();
    assert!(matches!(
        handle.load_image("/nonexistent/cadence.png").wait().unwrap(),
        Err(AssetError::Image { .. })
    ));
    assert!(matches!(
        handle.load_wav("/nonexistent/cadence.wav").wait().unwrap(),
        Err(AssetError::Audio { .. })
    ));
    stop(loader);
}

#[test]
fn test_loader_holds_audio_affinity() {
    let backend = NullBackend::new();
    let context = backend.context();
    let mut audio = AudioThread::new(&AudioConfig::default(), Box::new(backend));
    audio.start().unwrap();

    let mut loader = AssetLoader::new().with_affinity(Arc::new(audio.handle()));
    loader.start().unwrap();
    loader.wait_for_ready();
    assert_eq!(context.attached_threads(), 1);

    stop(loader);
    assert_eq!(context.attached_threads(), 0);

    audio.interrupt();
    audio.allow_teardown();
    audio.join().unwrap();
}
