//! MP4 demuxer with per-track read cursors.
//!
//! [`Demuxer`] parses the container once at open, then serves samples
//! through a select/seek/read/advance cursor per track. Sample payloads
//! are read on demand into a caller-provided buffer; nothing from mdat
//! is held in memory.

use crate::mp4::{Movie, Mp4Parser, ParsedTrack, TrackFormat};
use crate::{Error, Result};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// Seek positioning mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    /// Position at the latest sync sample at or before the target time,
    /// falling back to the first sample when none exists.
    ClosestSyncBefore,
}

/// Metadata for one sample returned by [`Demuxer::read_sample`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleInfo {
    /// Presentation timestamp in microseconds.
    pub time_us: i64,
    /// Payload size in bytes (the valid prefix of the read buffer).
    pub size: usize,
    /// Whether the sample is a sync sample (keyframe).
    pub sync: bool,
}

/// Demuxer over any seekable byte source.
///
/// The cursor for a track exists only while the track is selected;
/// reads on an unselected track fail with [`Error::TrackNotSelected`].
/// Dropping the demuxer releases the underlying source.
pub struct Demuxer<R> {
    reader: R,
    movie: Movie,
    /// Per-track cursor position; `None` while the track is unselected.
    cursors: Vec<Option<u32>>,
}

impl Demuxer<BufReader<File>> {
    /// Open and parse an MP4 file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }
}

impl<R: Read + Seek> Demuxer<R> {
    /// Parse an MP4 from any seekable reader.
    pub fn from_reader(reader: R) -> Result<Self> {
        let mut parser = Mp4Parser::new(reader);
        let movie = parser.parse()?;
        let cursors = vec![None; movie.tracks.len()];
        Ok(Self {
            reader: parser.into_inner(),
            movie,
            cursors,
        })
    }

    /// Number of tracks in the container, including any whose metadata
    /// failed to parse.
    pub fn track_count(&self) -> usize {
        self.movie.tracks.len()
    }

    /// Movie duration in microseconds.
    pub fn duration_us(&self) -> i64 {
        self.movie.duration_us()
    }

    /// Descriptor for the given track.
    ///
    /// Fails with [`Error::InvalidTrackIndex`] when out of range and
    /// [`Error::InvalidMp4`] when that track's metadata did not parse.
    pub fn track_format(&self, index: usize) -> Result<&TrackFormat> {
        self.parsed_track(index).map(|t| &t.format)
    }

    /// Mark a track active for reads. The cursor starts at the first
    /// sample; re-selecting an already selected track resets it.
    pub fn select_track(&mut self, index: usize) -> Result<()> {
        self.parsed_track(index)?;
        self.cursors[index] = Some(0);
        Ok(())
    }

    /// Release a track's read state. Out-of-range indices are ignored,
    /// so this is safe to call even when the select failed.
    pub fn unselect_track(&mut self, index: usize) {
        if let Some(cursor) = self.cursors.get_mut(index) {
            *cursor = None;
        }
    }

    /// Position the track's cursor for the given target time.
    ///
    /// `ClosestSyncBefore` lands on the latest sync sample whose
    /// presentation time is at or before `time_us`, never past it; when
    /// no sample or no sync sample qualifies, it lands on the first
    /// sample.
    pub fn seek_to(&mut self, index: usize, time_us: i64, mode: SeekMode) -> Result<()> {
        let track = self.parsed_track(index)?;
        if self.cursors[index].is_none() {
            return Err(Error::TrackNotSelected { index });
        }

        let SeekMode::ClosestSyncBefore = mode;
        let target_ticks = us_to_ticks(time_us, track.format.timescale);
        let position = track
            .samples
            .find_sample_at_or_before(target_ticks)
            .and_then(|at| track.samples.find_keyframe_at_or_before(at))
            .unwrap_or(0);

        self.cursors[index] = Some(position);
        Ok(())
    }

    /// Copy the selected track's current sample into `buf`.
    ///
    /// Returns `Ok(None)` at end of stream. Does not advance the
    /// cursor. A sample larger than `buf` fails with
    /// [`Error::SampleTooLarge`] rather than truncating.
    pub fn read_sample(&mut self, index: usize, buf: &mut [u8]) -> Result<Option<SampleInfo>> {
        let track = self.parsed_track(index)?;
        let position = self.cursors[index].ok_or(Error::TrackNotSelected { index })?;

        let entry = match track.samples.get(position) {
            Some(entry) => *entry,
            None => return Ok(None),
        };

        let size = entry.size as usize;
        if size > buf.len() {
            return Err(Error::SampleTooLarge {
                size,
                capacity: buf.len(),
            });
        }

        let time_us = ticks_to_us(entry.pts(), track.format.timescale);
        self.reader.seek(SeekFrom::Start(entry.offset))?;
        self.reader.read_exact(&mut buf[..size])?;

        Ok(Some(SampleInfo {
            time_us,
            size,
            sync: entry.is_keyframe,
        }))
    }

    /// Move the cursor past the sample just read. Saturates at end of
    /// stream.
    pub fn advance(&mut self, index: usize) -> Result<()> {
        let len = self.parsed_track(index)?.samples.len();
        match self.cursors[index] {
            Some(ref mut position) => {
                *position = (*position + 1).min(len);
                Ok(())
            }
            None => Err(Error::TrackNotSelected { index }),
        }
    }

    fn parsed_track(&self, index: usize) -> Result<&ParsedTrack> {
        let slot = self
            .movie
            .tracks
            .get(index)
            .ok_or_else(|| Error::InvalidTrackIndex {
                index,
                count: self.movie.tracks.len(),
            })?;
        slot.as_ref()
            .map_err(|message| Error::invalid_mp4(format!("track {index}: {message}")))
    }
}

fn ticks_to_us(ticks: u64, timescale: u32) -> i64 {
    if timescale == 0 {
        return 0;
    }
    (ticks as i128 * 1_000_000 / timescale as i128) as i64
}

fn us_to_ticks(time_us: i64, timescale: u32) -> u64 {
    (time_us.max(0) as i128 * timescale as i128 / 1_000_000) as u64
}
