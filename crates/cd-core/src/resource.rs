//! Owned vs. borrowed resource handles
//!
//! Decoded assets cross thread boundaries wrapped in a [`ResourceHandle`], so
//! the receiving side knows whether closing the handle must release the
//! underlying resource or leave it to another owner.

use std::sync::Arc;

use parking_lot::Mutex;

/// A resource that holds something needing explicit release (native decoder,
/// file handle, device object).
pub trait Release {
    fn release(&mut self) -> anyhow::Result<()>;
}

impl<T: Release + ?Sized> Release for Box<T> {
    fn release(&mut self) -> anyhow::Result<()> {
        (**self).release()
    }
}

/// Ownership wrapper around a releasable resource.
///
/// `Owned` releases the resource on [`close`](Self::close); `Borrowed` points at
/// a resource owned elsewhere and closing it is a no-op. A borrowed handle must
/// not be used after its owner released the resource.
pub enum ResourceHandle<T: Release> {
    Owned(T),
    Borrowed(Arc<Mutex<T>>),
}

impl<T: Release> ResourceHandle<T> {
    pub fn owned(value: T) -> Self {
        Self::Owned(value)
    }

    pub fn borrowed(shared: Arc<Mutex<T>>) -> Self {
        Self::Borrowed(shared)
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }

    /// Run `f` with access to the resource
    pub fn with<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> R {
        match self {
            Self::Owned(value) => f(value),
            Self::Borrowed(shared) => f(&mut shared.lock()),
        }
    }

    /// Close the handle. Release failures are logged, never propagated.
    pub fn close(self) {
        match self {
            Self::Owned(mut value) => {
                if let Err(e) = value.release() {
                    tracing::warn!("Unable to close resource: {:#}", e);
                }
            }
            Self::Borrowed(_) => {}
        }
    }
}
