//! MP4 container parsing.
//!
//! This module provides the structures for walking an MP4 atom tree and
//! resolving each track's sample tables into flat, directly addressable
//! sample indices. [`crate::demux::Demuxer`] and [`crate::mux::Muxer`]
//! are built on top of it.

mod atoms;
mod reader;
mod sample_table;

pub use atoms::{sample_entry_mime, Atom, AtomType, HandlerType, TrackFormat};
pub use reader::{Movie, Mp4Parser, ParsedTrack};
pub use sample_table::{RawSampleTables, SampleEntry, SampleTable};
