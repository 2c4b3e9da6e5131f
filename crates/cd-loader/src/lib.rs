//! Asset loader thread
//!
//! Decoding from disk runs on its own executor so long loads never stall the
//! audio or render cadence. The loader drains everything queued each tick and
//! lets callers wait until a batch has been processed.

pub mod image;
pub mod thread;

pub use image::{decode_image, PixelBuffer};
pub use thread::{AssetLoader, LoaderHandle, LOADER_THREAD_NAME};
