//! Cliptrim-Media: MP4 demuxing and muxing for lossless sample copy
//!
//! This crate provides the container layer for cliptrim. It reads samples
//! out of one MP4 and writes them into another without touching the coded
//! bitstream, which is what makes trimming lossless.
//!
//! # Modules
//!
//! - `mp4` - MP4 container parsing (atom walk, sample table resolution)
//! - `demux` - Cursor-based sample reader over a parsed container
//! - `mux` - Streaming MP4 writer with rebuilt sample tables
//!
//! # Architecture
//!
//! A trim pass runs entirely at the container level:
//!
//! 1. The demuxer parses moov once and resolves stts/stss/stsc/stsz/stco
//!    into a flat per-sample index
//! 2. Samples are read on demand into a caller-provided buffer, cursor
//!    per track
//! 3. The muxer streams payloads into a single mdat and finalizes moov
//!    on stop, carrying each track's sample description verbatim
//!
//! Sources that require presentation reordering (B-frames) are rejected
//! at parse time; the copy path has a single timestamp per sample.

pub mod demux;
pub mod error;
pub mod mp4;
pub mod mux;

pub use demux::{Demuxer, SampleInfo, SeekMode};
pub use error::{Error, Result};
pub use mp4::TrackFormat;
pub use mux::Muxer;
