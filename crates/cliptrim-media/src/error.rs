//! Error types for cliptrim-media.

use std::io;
use thiserror::Error;

/// Result type for cliptrim-media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for cliptrim-media operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid MP4 file structure.
    #[error("Invalid MP4: {0}")]
    InvalidMp4(String),

    /// Missing required atom in MP4 file.
    #[error("Missing required atom: {0}")]
    MissingAtom(&'static str),

    /// Unsupported feature or codec.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Track index out of range.
    #[error("Invalid track index: {index} (track count: {count})")]
    InvalidTrackIndex { index: usize, count: usize },

    /// Sample read attempted on an unselected track.
    #[error("Track {index} is not selected")]
    TrackNotSelected { index: usize },

    /// Sample does not fit the caller-provided buffer.
    #[error("Sample of {size} bytes exceeds buffer capacity {capacity}")]
    SampleTooLarge { size: usize, capacity: usize },

    /// Muxer method called in the wrong state.
    #[error("Muxer state error: {0}")]
    MuxerState(String),
}

impl Error {
    /// Create an invalid MP4 error.
    pub fn invalid_mp4(msg: impl Into<String>) -> Self {
        Self::InvalidMp4(msg.into())
    }

    /// Create an unsupported error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create a muxer state error.
    pub fn muxer_state(msg: impl Into<String>) -> Self {
        Self::MuxerState(msg.into())
    }
}
