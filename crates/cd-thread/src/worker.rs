//! Generic worker thread lifecycle
//!
//! ```text
//! start() ──► init() ──► [ready opens] ──► Phase::Loop
//!                                            │ step() until interrupted
//!                                            ▼
//!                                      Phase::Destroy
//!                                            │ wait for allow_teardown()
//!                                            ▼
//!                                       shutdown() ──► exit
//! ```

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cd_core::error::ThreadError;
use parking_lot::{Condvar, Mutex};
use tracing::{error, info, warn};

use crate::gate::{Gate, Wake};

/// Lifecycle phase of a worker. Advances monotonically, never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Phase {
    Init = 0,
    Loop = 1,
    Destroy = 2,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Phase::Init,
            1 => Phase::Loop,
            _ => Phase::Destroy,
        }
    }
}

/// Per-thread behaviour driven by a [`WorkerThread`]
pub trait ThreadBody: Send + 'static {
    /// Runs first on the new thread. Returning `false` marks the thread as
    /// failed; it still completes its lifecycle but never runs [`step`](Self::step).
    fn init(&mut self, _ctx: &ThreadContext) -> bool {
        true
    }

    /// One loop iteration. Called until the thread is interrupted.
    fn step(&mut self, ctx: &ThreadContext);

    /// Release thread-owned resources. Errors are logged and swallowed.
    fn shutdown(&mut self, _ctx: &ThreadContext) -> anyhow::Result<()> {
        Ok(())
    }
}

struct ThreadShared {
    name: String,
    phase: AtomicU8,
    init_success: AtomicBool,
    interrupted: AtomicBool,
    ready: Gate,
    teardown: Gate,
    sleep_lock: Mutex<()>,
    sleep_cond: Condvar,
    wakers: Mutex<Vec<Arc<dyn Wake>>>,
}

impl ThreadShared {
    fn advance(&self, phase: Phase) {
        self.phase.fetch_max(phase as u8, Ordering::AcqRel);
    }

    fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        {
            let _guard = self.sleep_lock.lock();
            self.sleep_cond.notify_all();
        }
        let wakers = self.wakers.lock().clone();
        for waker in wakers {
            waker.wake();
        }
    }
}

/// Cloneable cross-thread view of a worker
#[derive(Clone)]
pub struct ThreadControl {
    shared: Arc<ThreadShared>,
}

impl ThreadControl {
    fn new(name: &str) -> Self {
        Self {
            shared: Arc::new(ThreadShared {
                name: name.to_string(),
                phase: AtomicU8::new(Phase::Init as u8),
                init_success: AtomicBool::new(false),
                interrupted: AtomicBool::new(false),
                ready: Gate::new(),
                teardown: Gate::new(),
                sleep_lock: Mutex::new(()),
                sleep_cond: Condvar::new(),
                wakers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.shared.phase.load(Ordering::Acquire))
    }

    /// Block until the worker finished `init`, successfully or not
    pub fn wait_for_ready(&self) {
        self.shared.ready.wait();
    }

    /// Like [`wait_for_ready`](Self::wait_for_ready) with a bound. Returns whether ready.
    pub fn wait_for_ready_timeout(&self, timeout: Duration) -> bool {
        self.shared.ready.wait_timeout(timeout)
    }

    pub fn is_ready(&self) -> bool {
        self.shared.ready.is_open()
    }

    /// Result of `init`. Only meaningful once [`is_ready`](Self::is_ready).
    pub fn init_succeeded(&self) -> bool {
        self.shared.init_success.load(Ordering::Acquire)
    }

    /// Ask the loop to exit. In-flight work is not aborted.
    pub fn interrupt(&self) {
        self.shared.interrupt();
    }

    pub fn is_interrupted(&self) -> bool {
        self.shared.interrupted.load(Ordering::SeqCst)
    }

    /// Let the worker run its shutdown step once it reaches [`Phase::Destroy`]
    pub fn allow_teardown(&self) {
        self.shared.teardown.open();
    }

    /// Register a hook fired on interrupt. Fires immediately if already interrupted.
    pub fn add_waker(&self, waker: Arc<dyn Wake>) {
        self.shared.wakers.lock().push(waker.clone());
        if self.is_interrupted() {
            waker.wake();
        }
    }
}

/// Handle given to the body while it runs on the worker thread
pub struct ThreadContext {
    control: ThreadControl,
}

impl ThreadContext {
    pub fn name(&self) -> &str {
        self.control.name()
    }

    pub fn is_interrupted(&self) -> bool {
        self.control.is_interrupted()
    }

    /// Cancel the own loop
    pub fn interrupt(&self) {
        self.control.interrupt();
    }

    pub fn control(&self) -> &ThreadControl {
        &self.control
    }

    /// Sleep for `duration` unless interrupted first. Returns `false` when interrupted.
    pub fn sleep(&self, duration: Duration) -> bool {
        let shared = &self.control.shared;
        let deadline = Instant::now() + duration;
        let mut guard = shared.sleep_lock.lock();
        while !self.is_interrupted() {
            if shared.sleep_cond.wait_until(&mut guard, deadline).timed_out() {
                return !self.is_interrupted();
            }
        }
        false
    }
}

/// Keeps waiters from hanging when the body panics
struct UnwindGuard<'a> {
    shared: &'a ThreadShared,
}

impl Drop for UnwindGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("Thread '{}' terminated by a panic", self.shared.name);
            self.shared.ready.open();
            self.shared.advance(Phase::Destroy);
            self.shared.interrupt();
        }
    }
}

/// A single OS thread running a [`ThreadBody`] through its lifecycle
pub struct WorkerThread<B: ThreadBody> {
    control: ThreadControl,
    body: Option<B>,
    handle: Option<JoinHandle<()>>,
}

impl<B: ThreadBody> WorkerThread<B> {
    /// Create a worker. Nothing runs until [`start`](Self::start).
    pub fn new(name: &str, body: B) -> Self {
        Self {
            control: ThreadControl::new(name),
            body: Some(body),
            handle: None,
        }
    }

    pub fn control(&self) -> &ThreadControl {
        &self.control
    }

    /// Access the body before the thread starts
    pub fn body_mut(&mut self) -> Option<&mut B> {
        self.body.as_mut()
    }

    /// Spawn the OS thread
    pub fn start(&mut self) -> Result<(), ThreadError> {
        let Some(body) = self.body.take() else {
            return Err(ThreadError::AlreadyStarted(self.control.name().to_string()));
        };

        let control = self.control.clone();
        let handle = thread::Builder::new()
            .name(self.control.name().to_string())
            .spawn(move || run(body, control))
            .map_err(|source| ThreadError::Spawn {
                name: self.control.name().to_string(),
                source,
            })?;

        self.handle = Some(handle);
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.body.is_none()
    }

    pub fn phase(&self) -> Phase {
        self.control.phase()
    }

    pub fn wait_for_ready(&self) {
        self.control.wait_for_ready();
    }

    pub fn init_succeeded(&self) -> bool {
        self.control.init_succeeded()
    }

    pub fn interrupt(&self) {
        self.control.interrupt();
    }

    pub fn allow_teardown(&self) {
        self.control.allow_teardown();
    }

    /// Block until the OS thread exits. Does not return before
    /// [`allow_teardown`](Self::allow_teardown) unless the body panicked.
    pub fn join(&mut self) -> Result<(), ThreadError> {
        let Some(handle) = self.handle.take() else {
            return Err(ThreadError::NotStarted(self.control.name().to_string()));
        };
        handle
            .join()
            .map_err(|_| ThreadError::Panicked(self.control.name().to_string()))
    }
}

fn run<B: ThreadBody>(mut body: B, control: ThreadControl) {
    let shared = control.shared.clone();
    let _guard = UnwindGuard { shared: &shared };
    let ctx = ThreadContext { control };

    cd_core::thread_debug!("'{}' initializing", shared.name);
    let success = body.init(&ctx);
    if success {
        info!("'{}' ready", shared.name);
    } else {
        warn!("'{}' failed to initialize, skipping its loop", shared.name);
        ctx.interrupt();
    }
    shared.init_success.store(success, Ordering::Release);
    shared.ready.open();
    shared.advance(Phase::Loop);

    while !ctx.is_interrupted() {
        body.step(&ctx);
    }

    shared.advance(Phase::Destroy);
    cd_core::thread_debug!("'{}' waiting for teardown", shared.name);
    shared.teardown.wait();

    if let Err(e) = body.shutdown(&ctx) {
        warn!("'{}' failed while releasing its resources: {:#}", shared.name, e);
    }
    cd_core::thread_debug!("'{}' finished", shared.name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counting {
        steps: Arc<AtomicUsize>,
        init_ok: bool,
    }

    impl ThreadBody for Counting {
        fn init(&mut self, _ctx: &ThreadContext) -> bool {
            self.init_ok
        }

        fn step(&mut self, ctx: &ThreadContext) {
            self.steps.fetch_add(1, Ordering::SeqCst);
            ctx.sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_phase_progression() {
        let steps = Arc::new(AtomicUsize::new(0));
        let mut worker = WorkerThread::new(
            "test-worker",
            Counting {
                steps: steps.clone(),
                init_ok: true,
            },
        );
        assert_eq!(worker.phase(), Phase::Init);

        worker.start().unwrap();
        worker.wait_for_ready();
        assert!(worker.init_succeeded());

        while steps.load(Ordering::SeqCst) == 0 {
            thread::yield_now();
        }
        assert_eq!(worker.phase(), Phase::Loop);

        worker.interrupt();
        worker.allow_teardown();
        worker.join().unwrap();
        assert_eq!(worker.phase(), Phase::Destroy);
    }

    #[test]
    fn test_failed_init_skips_loop() {
        let steps = Arc::new(AtomicUsize::new(0));
        let mut worker = WorkerThread::new(
            "failing-worker",
            Counting {
                steps: steps.clone(),
                init_ok: false,
            },
        );
        worker.start().unwrap();
        worker.wait_for_ready();
        assert!(!worker.init_succeeded());

        worker.allow_teardown();
        worker.join().unwrap();
        assert_eq!(steps.load(Ordering::SeqCst), 0);
        assert_eq!(worker.phase(), Phase::Destroy);
    }

    #[test]
    fn test_start_twice_and_join_unstarted() {
        let steps = Arc::new(AtomicUsize::new(0));
        let mut worker = WorkerThread::new(
            "twice",
            Counting {
                steps,
                init_ok: true,
            },
        );
        assert!(matches!(worker.join(), Err(ThreadError::NotStarted(_))));

        worker.start().unwrap();
        assert!(matches!(worker.start(), Err(ThreadError::AlreadyStarted(_))));

        worker.interrupt();
        worker.allow_teardown();
        worker.join().unwrap();
    }

    #[test]
    fn test_sleep_interrupted() {
        let control = ThreadControl::new("sleeper");
        let ctx = ThreadContext {
            control: control.clone(),
        };
        let interrupter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            control.interrupt();
        });

        let started = Instant::now();
        assert!(!ctx.sleep(Duration::from_secs(30)));
        assert!(started.elapsed() < Duration::from_secs(10));
        interrupter.join().unwrap();
    }
}
