//! Landmark frames in, gesture labels and dispatched actions out.
//!
//! A [`session::RecognitionSession`] owns the per-client state (smoothing
//! buffers and wrist motion history); the [`mapping::MappingStore`] is the
//! only state shared between sessions.

pub mod analysis;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gesture;
pub mod interpret;
pub mod mapping;
pub mod preprocess;
pub mod session;
pub mod types;

pub use error::{Error, Result};
