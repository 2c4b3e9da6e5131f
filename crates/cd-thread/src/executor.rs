//! Queue executors built on top of [`WorkerThread`]

use std::collections::VecDeque;
use std::sync::Arc;

use cd_core::error::ThreadError;
use parking_lot::{Condvar, Mutex};

use crate::gate::Wake;
use crate::pending::{pending, Pending};
use crate::worker::{Phase, ThreadBody, ThreadContext, ThreadControl, WorkerThread};

/// Opaque unit of work submitted to an executor
pub type WorkItem = Box<dyn FnOnce() + Send + 'static>;

/// How many queued items run per loop tick. Fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPolicy {
    /// Pop and run the head item only
    OnePerIteration,
    /// Swap the whole queue out and run the snapshot in order
    DrainAll,
}

/// Per-tick specialization of a [`QueueExecutor`]
pub trait TickStage: Send + 'static {
    fn init(&mut self, _ctx: &ThreadContext) -> bool {
        true
    }

    /// Runs after the queue was drained for this tick
    fn after_drain(&mut self, _ctx: &ThreadContext) {}

    fn shutdown(&mut self, _ctx: &ThreadContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Block between ticks while the queue is empty. Stages with their own
    /// cadence (sleeping, frame pacing) return `false`.
    fn park_when_idle(&self) -> bool {
        true
    }
}

impl TickStage for () {}

/// Something a worker acquires during init and gives back during shutdown,
/// typically affinity to a context owned by another thread.
pub trait Affinity: Send + Sync {
    /// Wait for the provider and try to acquire. Returns whether it was acquired.
    fn acquire(&self) -> bool;

    fn release(&self);
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<(u64, WorkItem)>,
    submitted: u64,
    drained: u64,
    terminated: bool,
}

struct WorkQueue {
    state: Mutex<QueueState>,
    work_ready: Condvar,
    drain_done: Condvar,
    completion_barrier: bool,
}

impl WorkQueue {
    fn new(completion_barrier: bool) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            work_ready: Condvar::new(),
            drain_done: Condvar::new(),
            completion_barrier,
        }
    }

    fn push(&self, item: WorkItem) {
        let mut state = self.state.lock();
        if state.terminated {
            drop(state);
            cd_core::thread_debug!("Dropping work item submitted after interrupt");
            return;
        }
        state.submitted += 1;
        let seq = state.submitted;
        state.items.push_back((seq, item));
        self.work_ready.notify_one();
    }

    fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    fn park_until_work(&self) {
        let mut state = self.state.lock();
        while state.items.is_empty() && !state.terminated {
            self.work_ready.wait(&mut state);
        }
    }

    fn take(&self, policy: ExecutionPolicy) -> VecDeque<(u64, WorkItem)> {
        let mut state = self.state.lock();
        match policy {
            ExecutionPolicy::OnePerIteration => state.items.pop_front().into_iter().collect(),
            ExecutionPolicy::DrainAll => std::mem::take(&mut state.items),
        }
    }

    fn mark_drained(&self, seq: u64) {
        let mut state = self.state.lock();
        if seq > state.drained {
            state.drained = seq;
        }
        self.drain_done.notify_all();
    }

    fn wait_for_drain(&self) -> bool {
        let mut state = self.state.lock();
        let target = state.submitted;
        while state.drained < target && !state.terminated {
            self.drain_done.wait(&mut state);
        }
        state.drained >= target
    }

    /// Refuse further work and drop everything still queued
    fn terminate(&self) {
        let leftovers = {
            let mut state = self.state.lock();
            state.terminated = true;
            self.work_ready.notify_all();
            self.drain_done.notify_all();
            std::mem::take(&mut state.items)
        };
        if !leftovers.is_empty() {
            cd_core::thread_debug!("Canceled {} queued work items", leftovers.len());
        }
    }
}

impl Wake for WorkQueue {
    fn wake(&self) {
        self.terminate();
    }
}

/// [`ThreadBody`] draining a [`WorkQueue`] and delegating to a [`TickStage`]
pub struct ExecutorBody<S: TickStage> {
    queue: Arc<WorkQueue>,
    policy: ExecutionPolicy,
    stage: S,
    affinity: Option<Arc<dyn Affinity>>,
    attached: bool,
}

impl<S: TickStage> ExecutorBody<S> {
    fn drain(&mut self, ctx: &ThreadContext) {
        let mut batch = self.queue.take(self.policy);
        let mut last = None;
        while let Some((seq, item)) = batch.pop_front() {
            item();
            last = Some(seq);
            if self.policy == ExecutionPolicy::DrainAll && ctx.is_interrupted() {
                if !batch.is_empty() {
                    cd_core::thread_debug!(
                        "'{}' interrupted with {} drained items left",
                        ctx.name(),
                        batch.len()
                    );
                }
                break;
            }
        }
        if let Some(seq) = last {
            self.queue.mark_drained(seq);
        }
    }
}

impl<S: TickStage> ThreadBody for ExecutorBody<S> {
    fn init(&mut self, ctx: &ThreadContext) -> bool {
        if let Some(affinity) = &self.affinity {
            self.attached = affinity.acquire();
        }
        self.stage.init(ctx)
    }

    fn step(&mut self, ctx: &ThreadContext) {
        if self.stage.park_when_idle() {
            self.queue.park_until_work();
        }
        self.drain(ctx);
        if !ctx.is_interrupted() {
            self.stage.after_drain(ctx);
        }
    }

    fn shutdown(&mut self, ctx: &ThreadContext) -> anyhow::Result<()> {
        self.queue.terminate();
        if self.attached {
            if let Some(affinity) = &self.affinity {
                affinity.release();
            }
            self.attached = false;
        }
        self.stage.shutdown(ctx)
    }
}

/// A worker thread that runs submitted closures
pub struct QueueExecutor<S: TickStage = ()> {
    worker: WorkerThread<ExecutorBody<S>>,
    queue: Arc<WorkQueue>,
}

impl<S: TickStage> QueueExecutor<S> {
    /// Create an executor. With `completion_barrier` set, submitters may block
    /// in [`wait_for_drain`](ExecutorHandle::wait_for_drain).
    pub fn new(name: &str, policy: ExecutionPolicy, completion_barrier: bool, stage: S) -> Self {
        let queue = Arc::new(WorkQueue::new(completion_barrier));
        let body = ExecutorBody {
            queue: queue.clone(),
            policy,
            stage,
            affinity: None,
            attached: false,
        };
        let worker = WorkerThread::new(name, body);
        worker.control().add_waker(queue.clone());
        Self { worker, queue }
    }

    /// Acquire `affinity` during init and release it during shutdown
    pub fn with_affinity(mut self, affinity: Arc<dyn Affinity>) -> Self {
        if let Some(body) = self.worker.body_mut() {
            body.affinity = Some(affinity);
        }
        self
    }

    /// Configure the stage before the thread starts
    pub fn stage_mut(&mut self) -> Option<&mut S> {
        self.worker.body_mut().map(|body| &mut body.stage)
    }

    pub fn start(&mut self) -> Result<(), ThreadError> {
        self.worker.start()
    }

    pub fn join(&mut self) -> Result<(), ThreadError> {
        self.worker.join()
    }

    pub fn handle(&self) -> ExecutorHandle {
        ExecutorHandle {
            queue: self.queue.clone(),
            control: self.worker.control().clone(),
        }
    }

    pub fn control(&self) -> &ThreadControl {
        self.worker.control()
    }

    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue.push(Box::new(f));
    }

    pub fn submit<T, F>(&self, f: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.handle().submit(f)
    }

    pub fn wait_for_drain(&self) -> bool {
        self.handle().wait_for_drain()
    }

    pub fn phase(&self) -> Phase {
        self.worker.phase()
    }

    pub fn wait_for_ready(&self) {
        self.worker.wait_for_ready();
    }

    pub fn init_succeeded(&self) -> bool {
        self.worker.init_succeeded()
    }

    pub fn interrupt(&self) {
        self.worker.interrupt();
    }

    pub fn allow_teardown(&self) {
        self.worker.allow_teardown();
    }
}

/// Cloneable submission side of a [`QueueExecutor`]
#[derive(Clone)]
pub struct ExecutorHandle {
    queue: Arc<WorkQueue>,
    control: ThreadControl,
}

impl ExecutorHandle {
    /// Queue `f` to run on the executor thread. Never blocks.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue.push(Box::new(f));
    }

    /// Queue `f` and get its result back as a [`Pending`]
    pub fn submit<T, F>(&self, f: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (completer, pending) = pending();
        self.execute(move || completer.complete(f()));
        pending
    }

    /// Block until everything submitted before this call has run.
    ///
    /// Returns `false` if the executor has no completion barrier or was
    /// interrupted before reaching that point.
    pub fn wait_for_drain(&self) -> bool {
        if !self.queue.completion_barrier {
            tracing::warn!(
                "'{}' was built without a completion barrier",
                self.control.name()
            );
            return false;
        }
        self.queue.wait_for_drain()
    }

    /// Number of items waiting to run
    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    pub fn control(&self) -> &ThreadControl {
        &self.control
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_returns_result() {
        let mut executor = QueueExecutor::new("submit", ExecutionPolicy::DrainAll, true, ());
        executor.start().unwrap();
        executor.wait_for_ready();

        let result = executor.submit(|| 6 * 7);
        assert_eq!(result.wait().unwrap(), 42);

        executor.interrupt();
        executor.allow_teardown();
        executor.join().unwrap();
    }

    #[test]
    fn test_wait_for_drain_requires_barrier() {
        let executor = QueueExecutor::new("no-barrier", ExecutionPolicy::OnePerIteration, false, ());
        assert!(!executor.wait_for_drain());
    }

    #[test]
    fn test_items_after_interrupt_are_canceled() {
        let mut executor = QueueExecutor::new("late", ExecutionPolicy::DrainAll, true, ());
        executor.start().unwrap();
        executor.wait_for_ready();
        executor.interrupt();

        let late = executor.submit(|| 1);
        assert!(matches!(late.wait(), Err(ThreadError::Canceled)));

        executor.allow_teardown();
        executor.join().unwrap();
    }
}
