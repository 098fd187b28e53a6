//! Error types for the trim engine.

use std::path::PathBuf;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, TrimError>;

/// Errors that can occur while trimming a clip.
///
/// Every variant is terminal for the job that raised it: the driver
/// aborts, removes any partial destination file it created, and
/// surfaces the error to the caller.
#[derive(Debug, thiserror::Error)]
pub enum TrimError {
    /// The requested window is empty or negative.
    #[error("invalid trim range: start {start_ms} ms must be before end {end_ms} ms")]
    InvalidRange { start_ms: i64, end_ms: i64 },

    /// The source file could not be opened or parsed.
    #[error("cannot open source: {}", path.display())]
    SourceOpen {
        path: PathBuf,
        #[source]
        source: cliptrim_media::Error,
    },

    /// Reading sample data from the source failed mid-stream.
    #[error("source read failed")]
    FormatRead {
        #[source]
        source: cliptrim_media::Error,
    },

    /// No video or audio track was found in the source.
    #[error("source has no video or audio tracks")]
    NoEligibleTracks,

    /// The destination file could not be created.
    #[error("cannot create destination: {}", path.display())]
    DestinationCreate {
        path: PathBuf,
        #[source]
        source: cliptrim_media::Error,
    },

    /// Another job is already writing the same destination path.
    #[error("destination already in use: {}", path.display())]
    DestinationBusy { path: PathBuf },

    /// The muxer rejected an operation.
    #[error("muxer error")]
    MuxerState {
        #[source]
        source: cliptrim_media::Error,
    },

    /// Writing to the destination failed.
    #[error("destination write failed")]
    WriteIo {
        #[source]
        source: cliptrim_media::Error,
    },

    /// The background worker died before reporting a result.
    #[error("trim worker failed: {0}")]
    Worker(String),
}

impl TrimError {
    /// Create a source open error.
    pub fn source_open(path: impl Into<PathBuf>, source: cliptrim_media::Error) -> Self {
        Self::SourceOpen {
            path: path.into(),
            source,
        }
    }

    /// Create a destination create error.
    pub fn destination_create(path: impl Into<PathBuf>, source: cliptrim_media::Error) -> Self {
        Self::DestinationCreate {
            path: path.into(),
            source,
        }
    }

    /// Create a destination busy error.
    pub fn destination_busy(path: impl Into<PathBuf>) -> Self {
        Self::DestinationBusy { path: path.into() }
    }
}
