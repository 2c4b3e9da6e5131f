//! Worker threads and queue executors
//!
//! A [`WorkerThread`] drives a three-phase lifecycle (init, loop, destroy) for
//! an injected [`ThreadBody`]. A [`QueueExecutor`] is a worker whose body
//! drains a work queue each tick and then hands control to a [`TickStage`],
//! which is how the audio, render and loader owners specialize it.

pub mod executor;
pub mod gate;
pub mod pending;
pub mod worker;

pub use executor::{
    Affinity, ExecutionPolicy, ExecutorHandle, QueueExecutor, TickStage, WorkItem,
};
pub use gate::{Gate, Rendezvous, Wake};
pub use pending::{pending, Completer, Pending};
pub use worker::{Phase, ThreadBody, ThreadContext, ThreadControl, WorkerThread};
