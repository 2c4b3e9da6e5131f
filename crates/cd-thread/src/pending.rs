//! One-shot results returned from work items

use std::time::Duration;

use cd_core::error::ThreadError;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};

/// Create a connected completer/pending pair
pub fn pending<T>() -> (Completer<T>, Pending<T>) {
    let (tx, rx) = channel::bounded(1);
    (Completer { tx }, Pending { rx })
}

/// Producer side. Dropping it without completing cancels the [`Pending`].
pub struct Completer<T> {
    tx: Sender<T>,
}

impl<T> Completer<T> {
    pub fn complete(self, value: T) {
        // Receiver gone means nobody cares about the result
        let _ = self.tx.send(value);
    }
}

/// Result of a submitted work item, filled once the item ran
pub struct Pending<T> {
    rx: Receiver<T>,
}

impl<T> Pending<T> {
    /// A pending value that is already complete
    pub fn ready(value: T) -> Self {
        let (completer, pending) = pending();
        completer.complete(value);
        pending
    }

    /// Block until the value is available
    pub fn wait(self) -> Result<T, ThreadError> {
        self.rx.recv().map_err(|_| ThreadError::Canceled)
    }

    pub fn wait_timeout(self, timeout: Duration) -> Result<T, ThreadError> {
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => ThreadError::Timeout,
            RecvTimeoutError::Disconnected => ThreadError::Canceled,
        })
    }

    /// Take the value if it is already there
    pub fn try_take(&self) -> Result<Option<T>, ThreadError> {
        match self.rx.try_recv() {
            Ok(value) => Ok(Some(value)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(ThreadError::Canceled),
        }
    }
}
