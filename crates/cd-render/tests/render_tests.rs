//! Render owner lifecycle against the headless backend

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cd_core::config::GraphicsConfig;
use cd_core::error::ThreadError;
use cd_render::backend::GraphicsProbe;
use cd_render::{DebugApi, GraphicsBackend, GraphicsFeatures, NullBackend, RenderThread};
use cd_thread::{Affinity, Phase};

fn config(debug_callback: bool) -> GraphicsConfig {
    GraphicsConfig {
        debug_callback,
        frame_interval_ms: 1,
    }
}

fn start(backend: NullBackend, debug_callback: bool) -> (RenderThread, Arc<GraphicsProbe>) {
    let probe = backend.probe();
    let mut thread = RenderThread::new(
        &config(debug_callback),
        Box::new(backend),
        Box::new(|_: &mut dyn GraphicsBackend| {}),
    );
    thread.start().unwrap();
    thread.wait_for_ready();
    (thread, probe)
}

fn stop(mut thread: RenderThread) {
    thread.interrupt();
    thread.allow_teardown();
    thread.join().unwrap();
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

#[test]
fn test_init_creates_context_and_renders() {
    let frames = Arc::new(AtomicU64::new(0));
    let backend = NullBackend::new(Duration::from_millis(1));
    let probe = backend.probe();
    let render = {
        let frames = frames.clone();
        Box::new(move |_: &mut dyn GraphicsBackend| {
            frames.fetch_add(1, Ordering::SeqCst);
        })
    };
    let mut thread = RenderThread::new(&config(true), Box::new(backend), render);
    thread.start().unwrap();
    thread.wait_for_ready();

    assert!(thread.init_succeeded());
    let caps = thread.handle().capabilities().unwrap();
    assert!(caps.features.contains(GraphicsFeatures::CORE_43));
    assert_eq!(probe.installed_debug_api(), Some(DebugApi::Core43));
    assert!(probe.vsync().is_some());

    assert!(wait_until(|| frames.load(Ordering::SeqCst) >= 3));
    assert!(probe.frames() >= 3);

    stop(thread);
    assert!(probe.is_released());
}

#[test]
fn test_debug_callback_disabled() {
    let (thread, probe) = start(NullBackend::new(Duration::from_millis(1)), false);
    assert!(thread.init_succeeded());
    assert_eq!(probe.installed_debug_api(), None);
    stop(thread);
}

#[test]
fn test_failed_context_is_inert() {
    let (thread, probe) = start(NullBackend::without_context(), true);
    assert!(!thread.init_succeeded());
    assert!(thread.handle().capabilities().is_none());
    assert!(matches!(
        thread.handle().submit(|| ()).wait(),
        Err(ThreadError::Canceled)
    ));
    assert!(wait_until(|| thread.phase() == Phase::Destroy));
    assert!(!thread.vsync().await_vsync());

    stop(thread);
    assert_eq!(probe.frames(), 0);
    assert!(!probe.is_released());
}

#[test]
fn test_await_vsync_flushes_and_releases() {
    let (thread, probe) = start(NullBackend::new(Duration::from_millis(1)), true);
    let vsync = probe.vsync().unwrap();

    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let vsync = vsync.clone();
            thread::spawn(move || vsync.await_vsync())
        })
        .collect();
    for waiter in waiters {
        assert!(waiter.join().unwrap());
    }
    assert!(probe.flushes() >= 1);

    // Without waiters frames go by without a flush
    let flushes = probe.flushes();
    let frames = probe.frames();
    assert!(wait_until(|| probe.frames() >= frames + 5));
    assert_eq!(probe.flushes(), flushes);

    stop(thread);
}

#[test]
fn test_interrupt_releases_vsync_waiter() {
    let (thread, _probe) = start(NullBackend::new(Duration::from_millis(50)), true);
    thread.interrupt();
    let vsync = thread.vsync();
    assert!(!thread::spawn(move || vsync.await_vsync()).join().unwrap());
    stop(thread);
}

#[test]
fn test_one_item_per_frame() {
    let (thread, probe) = start(NullBackend::new(Duration::from_millis(1)), true);
    let handle = thread.handle();

    let seen: Vec<_> = (0..5)
        .map(|_| {
            let probe = probe.clone();
            handle.submit(move || probe.frames())
        })
        .collect();
    let frames: Vec<u64> = seen.into_iter().map(|p| p.wait().unwrap()).collect();
    for pair in frames.windows(2) {
        assert!(pair[1] > pair[0], "items shared a frame: {:?}", frames);
    }
    stop(thread);
}

#[derive(Default)]
struct CountingAffinity {
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl Affinity for CountingAffinity {
    fn acquire(&self) -> bool {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_affinity_held_for_lifetime() {
    let affinity = Arc::new(CountingAffinity::default());
    let mut thread = RenderThread::new(
        &config(false),
        Box::new(NullBackend::new(Duration::from_millis(1))),
        Box::new(|_: &mut dyn GraphicsBackend| {}),
    )
    .with_affinity(affinity.clone());
    thread.start().unwrap();
    thread.wait_for_ready();
    assert_eq!(affinity.acquired.load(Ordering::SeqCst), 1);
    assert_eq!(affinity.released.load(Ordering::SeqCst), 0);

    stop(thread);
    assert_eq!(affinity.released.load(Ordering::SeqCst), 1);
}
