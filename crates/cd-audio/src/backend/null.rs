//! Null audio backend (no sound output)

use std::sync::Arc;

use anyhow::{bail, Result};

use super::{AudioBackend, AudioContext, ContextCaps, SoftContext};

/// Backend with a software context and a manual clock.
///
/// The context is created up front so callers can keep a reference to it and
/// drive playback with [`SoftContext::advance`] after the backend moved to the
/// audio owner thread.
pub struct NullBackend {
    context: Arc<SoftContext>,
    fail_open: bool,
    opened: bool,
}

impl NullBackend {
    /// Null backend supporting thread-local attachment and latency queries
    pub fn new() -> Self {
        Self::with_capabilities(ContextCaps::THREAD_LOCAL_CONTEXT | ContextCaps::SOURCE_LATENCY)
    }

    pub fn with_capabilities(caps: ContextCaps) -> Self {
        Self {
            context: Arc::new(SoftContext::new(caps)),
            fail_open: false,
            opened: false,
        }
    }

    /// A backend whose device never opens
    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::new()
        }
    }

    /// The context this backend hands out on open
    pub fn context(&self) -> Arc<SoftContext> {
        self.context.clone()
    }
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for NullBackend {
    fn name(&self) -> &str {
        "Null"
    }

    fn open(&mut self) -> Result<Arc<dyn AudioContext>> {
        if self.fail_open {
            bail!("null device configured to fail");
        }
        self.opened = true;
        Ok(self.context.clone())
    }

    fn close(&mut self) {
        if self.opened {
            self.context.close();
            self.opened = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_close() {
        let mut backend = NullBackend::new();
        let context = backend.context();

        let opened = backend.open().unwrap();
        assert!(opened.capabilities().contains(ContextCaps::THREAD_LOCAL_CONTEXT));
        assert!(opened.make_current());

        backend.close();
        assert!(context.is_closed());
        assert!(!opened.is_current());
    }

    #[test]
    fn test_failing_open() {
        let mut backend = NullBackend::failing();
        assert!(backend.open().is_err());
        backend.close();
        assert!(!backend.context().is_closed());
    }
}
