//! Cross-thread synchronization gates

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Hook fired when a worker is interrupted, used to release anything the
/// worker (or its waiters) may be blocked on.
pub trait Wake: Send + Sync {
    fn wake(&self);
}

/// Single-shot gate. Opens once and never resets; any number of threads may
/// wait on it, before or after it opened.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    cond: Condvar,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the gate, releasing every waiter. Opening twice is a no-op.
    pub fn open(&self) {
        let mut open = self.open.lock();
        if !*open {
            *open = true;
            self.cond.notify_all();
        }
    }

    pub fn is_open(&self) -> bool {
        *self.open.lock()
    }

    /// Block until the gate opens
    pub fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.cond.wait(&mut open);
        }
    }

    /// Block until the gate opens or `timeout` elapses. Returns whether it is open.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut open = self.open.lock();
        while !*open {
            if self.cond.wait_until(&mut open, deadline).timed_out() {
                return *open;
            }
        }
        true
    }
}

#[derive(Default)]
struct RendezvousState {
    generation: u64,
    waiting: usize,
    terminated: bool,
}

/// Reusable barrier where any number of threads register and wait for the
/// next phase, and a single releasing thread advances the phase.
#[derive(Default)]
pub struct Rendezvous {
    state: Mutex<RendezvousState>,
    cond: Condvar,
}

impl Rendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register and block until the next [`release`](Self::release).
    ///
    /// Returns `false` if the rendezvous was terminated instead.
    pub fn arrive_and_wait(&self) -> bool {
        let mut state = self.state.lock();
        if state.terminated {
            return false;
        }
        let generation = state.generation;
        state.waiting += 1;
        while state.generation == generation && !state.terminated {
            self.cond.wait(&mut state);
        }
        state.generation != generation
    }

    pub fn has_waiters(&self) -> bool {
        self.state.lock().waiting > 0
    }

    /// Advance the phase if anyone is waiting. Returns the number of released waiters.
    pub fn release(&self) -> usize {
        let mut state = self.state.lock();
        if state.waiting == 0 {
            return 0;
        }
        let released = std::mem::take(&mut state.waiting);
        state.generation = state.generation.wrapping_add(1);
        self.cond.notify_all();
        released
    }

    /// Release every current and future waiter with a `false` result
    pub fn terminate(&self) {
        let mut state = self.state.lock();
        state.terminated = true;
        state.waiting = 0;
        self.cond.notify_all();
    }

    pub fn is_terminated(&self) -> bool {
        self.state.lock().terminated
    }
}

impl Wake for Rendezvous {
    fn wake(&self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_gate_opens_once() {
        let gate = Arc::new(Gate::new());
        assert!(!gate.is_open());
        assert!(!gate.wait_timeout(Duration::from_millis(5)));

        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || gate.wait())
        };
        gate.open();
        gate.open();
        waiter.join().unwrap();

        // Waiting after the gate opened returns immediately
        gate.wait();
        assert!(gate.wait_timeout(Duration::ZERO));
    }

    #[test]
    fn test_rendezvous_release() {
        let rendezvous = Arc::new(Rendezvous::new());
        assert_eq!(rendezvous.release(), 0);

        let waiter = {
            let rendezvous = rendezvous.clone();
            thread::spawn(move || rendezvous.arrive_and_wait())
        };
        while !rendezvous.has_waiters() {
            thread::yield_now();
        }
        assert_eq!(rendezvous.release(), 1);
        assert!(waiter.join().unwrap());
        assert!(!rendezvous.has_waiters());
    }

    #[test]
    fn test_rendezvous_terminate() {
        let rendezvous = Arc::new(Rendezvous::new());
        let waiter = {
            let rendezvous = rendezvous.clone();
            thread::spawn(move || rendezvous.arrive_and_wait())
        };
        while !rendezvous.has_waiters() {
            thread::yield_now();
        }
        rendezvous.wake();
        assert!(!waiter.join().unwrap());
        assert!(!rendezvous.arrive_and_wait());
    }
}
