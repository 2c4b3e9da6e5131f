//! Core types shared by every cadence crate

pub mod config;
pub mod error;
pub mod logging;
pub mod resource;

pub use config::Config;
pub use error::{CadenceError, Result};
pub use resource::{Release, ResourceHandle};
