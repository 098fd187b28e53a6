//! Cliptrim - Lossless MP4 trimming engine
//!
//! Cuts a time window out of an MP4 by copying coded samples between
//! containers, never through a codec. Seeking snaps to the sync sample
//! at or before the requested start, the window's samples are copied
//! with timestamps rebased to zero, and a failed job removes its
//! partial output instead of leaving it behind.
//!
//! [`service::trim`] is the one-call entry point; [`service::TrimService`]
//! spawns jobs with live progress; [`driver::TrimDriver`] is the
//! underlying synchronous engine.

pub mod driver;
pub mod error;
pub mod filter;
pub mod progress;
pub mod service;

pub use driver::{TrimDriver, SAMPLE_BUFFER_CAPACITY};
pub use error::{Result, TrimError};
pub use service::{trim, TrimJob, TrimRequest, TrimService};
