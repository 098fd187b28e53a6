//! MP4 muxer.
//!
//! [`Muxer`] streams sample payloads into a single `mdat` box as they
//! arrive and keeps only per-sample metadata in memory. `stop` then
//! backpatches the `mdat` size and appends a `moov` with rebuilt sample
//! tables. Sample description entries are carried verbatim from the
//! source track, so no bitstream is ever reinterpreted.

use crate::mp4::{HandlerType, TrackFormat};
use crate::{Error, Result};
use bytes::{BufMut, BytesMut};
use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

/// Movie timescale written into `mvhd` and `tkhd`.
const MOVIE_TIMESCALE: u32 = 1000;

/// Samples per chunk before the open chunk is flushed.
const CHUNK_SAMPLE_LIMIT: u32 = 32;

const UNITY_MATRIX: [u32; 9] = [
    0x0001_0000,
    0,
    0,
    0,
    0x0001_0000,
    0,
    0,
    0,
    0x4000_0000,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Configuring,
    Started,
    Stopped,
}

#[derive(Debug, Clone, Copy)]
struct PendingSample {
    size: u32,
    time_us: i64,
    sync: bool,
}

#[derive(Debug, Clone, Copy)]
struct ChunkInfo {
    offset: u64,
    sample_count: u32,
}

struct TrackState {
    format: TrackFormat,
    samples: Vec<PendingSample>,
    chunks: Vec<ChunkInfo>,
}

#[derive(Debug, Clone, Copy)]
struct OpenChunk {
    track: usize,
    offset: u64,
    sample_count: u32,
}

/// Streaming MP4 writer over any seekable sink.
///
/// Lifecycle is `add_track`* then `start`, `write_sample`*, `stop`.
/// Calls outside that order fail with [`Error::MuxerState`]. `release`
/// drops the sink without finalizing, for abandoning partial output.
pub struct Muxer<W> {
    writer: Option<W>,
    phase: Phase,
    tracks: Vec<TrackState>,
    /// Absolute offset of the mdat box header.
    mdat_start: u64,
    /// Absolute offset of the next payload byte.
    write_position: u64,
    samples_written: u64,
    current_chunk: Option<OpenChunk>,
}

impl Muxer<BufWriter<File>> {
    /// Create the destination file, replacing any previous file at the
    /// same path.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let file = File::create(path)?;
        Ok(Self::from_writer(BufWriter::new(file)))
    }
}

impl<W: Write + Seek> Muxer<W> {
    /// Wrap an existing sink. Writing starts at its current position.
    pub fn from_writer(writer: W) -> Self {
        Self {
            writer: Some(writer),
            phase: Phase::Configuring,
            tracks: Vec::new(),
            mdat_start: 0,
            write_position: 0,
            samples_written: 0,
            current_chunk: None,
        }
    }

    /// Register a track before `start` and return its index.
    pub fn add_track(&mut self, format: &TrackFormat) -> Result<usize> {
        if self.phase != Phase::Configuring {
            return Err(Error::muxer_state("add_track called after start"));
        }
        if format.timescale == 0 {
            return Err(Error::muxer_state(format!(
                "track {} has a zero timescale",
                format.track_id
            )));
        }
        if format.sample_entry.is_empty() {
            return Err(Error::muxer_state(format!(
                "track {} has no sample description entry",
                format.track_id
            )));
        }
        self.tracks.push(TrackState {
            format: format.clone(),
            samples: Vec::new(),
            chunks: Vec::new(),
        });
        Ok(self.tracks.len() - 1)
    }

    /// Write the file header and open the `mdat` box.
    pub fn start(&mut self) -> Result<()> {
        if self.phase != Phase::Configuring {
            return Err(Error::muxer_state("start called twice"));
        }
        if self.tracks.is_empty() {
            return Err(Error::muxer_state("start called with no tracks"));
        }
        let writer = self.writer_mut()?;

        let mut header = BytesMut::with_capacity(40);
        let ftyp = begin_box(&mut header, b"ftyp");
        header.put_slice(b"mp42");
        header.put_u32(0); // minor version
        header.put_slice(b"mp42");
        header.put_slice(b"isom");
        end_box(&mut header, ftyp);

        let mdat_start = header.len() as u64;
        // 64-bit mdat: size 1 marker, then the real size, patched at stop.
        header.put_u32(1);
        header.put_slice(b"mdat");
        header.put_u64(0);

        writer.write_all(&header)?;
        self.mdat_start = mdat_start;
        self.write_position = header.len() as u64;
        self.phase = Phase::Started;
        Ok(())
    }

    /// Append one sample payload to the given track.
    ///
    /// Timestamps must be non-decreasing per track. Chunks are cut when
    /// the destination track changes or the open chunk reaches
    /// [`CHUNK_SAMPLE_LIMIT`] samples.
    pub fn write_sample(
        &mut self,
        track: usize,
        data: &[u8],
        time_us: i64,
        sync: bool,
    ) -> Result<()> {
        if self.phase != Phase::Started {
            return Err(Error::muxer_state("write_sample called outside start/stop"));
        }
        if track >= self.tracks.len() {
            return Err(Error::InvalidTrackIndex {
                index: track,
                count: self.tracks.len(),
            });
        }
        if let Some(last) = self.tracks[track].samples.last() {
            if time_us < last.time_us {
                return Err(Error::muxer_state(format!(
                    "sample time {} us precedes {} us on track {}",
                    time_us, last.time_us, track
                )));
            }
        }

        let needs_new_chunk = match self.current_chunk {
            Some(ref chunk) => chunk.track != track || chunk.sample_count >= CHUNK_SAMPLE_LIMIT,
            None => true,
        };
        if needs_new_chunk {
            self.flush_chunk();
            self.current_chunk = Some(OpenChunk {
                track,
                offset: self.write_position,
                sample_count: 0,
            });
        }

        self.writer_mut()?.write_all(data)?;
        self.write_position += data.len() as u64;
        if let Some(ref mut chunk) = self.current_chunk {
            chunk.sample_count += 1;
        }
        self.tracks[track].samples.push(PendingSample {
            size: data.len() as u32,
            time_us,
            sync,
        });
        self.samples_written += 1;
        Ok(())
    }

    /// Finalize the file: backpatch the `mdat` size, append `moov`, and
    /// flush the sink.
    pub fn stop(&mut self) -> Result<()> {
        if self.phase != Phase::Started {
            return Err(Error::muxer_state("stop called outside start/stop"));
        }
        self.flush_chunk();

        let mdat_size = self.write_position - self.mdat_start;
        let moov = self.build_moov();
        let mdat_start = self.mdat_start;
        let moov_offset = self.write_position;

        let writer = self.writer_mut()?;
        writer.seek(SeekFrom::Start(mdat_start + 8))?;
        writer.write_all(&mdat_size.to_be_bytes())?;
        writer.seek(SeekFrom::Start(moov_offset))?;
        writer.write_all(&moov)?;
        writer.flush()?;

        self.write_position += moov.len() as u64;
        self.phase = Phase::Stopped;
        Ok(())
    }

    /// Drop the sink without finalizing. Idempotent; any buffered data
    /// not yet flushed is discarded with it.
    pub fn release(&mut self) {
        self.writer = None;
    }

    /// Total samples accepted across all tracks.
    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Consume the muxer and return the sink, `None` when released.
    pub fn into_writer(self) -> Option<W> {
        self.writer
    }

    fn writer_mut(&mut self) -> Result<&mut W> {
        self.writer
            .as_mut()
            .ok_or_else(|| Error::muxer_state("muxer already released"))
    }

    fn flush_chunk(&mut self) {
        if let Some(chunk) = self.current_chunk.take() {
            if chunk.sample_count > 0 {
                self.tracks[chunk.track].chunks.push(ChunkInfo {
                    offset: chunk.offset,
                    sample_count: chunk.sample_count,
                });
            }
        }
    }

    fn build_moov(&self) -> BytesMut {
        let tables: Vec<TrackTables> = self.tracks.iter().map(TrackTables::build).collect();
        let movie_duration = tables
            .iter()
            .zip(&self.tracks)
            .map(|(t, track)| rescale(t.media_duration, track.format.timescale, MOVIE_TIMESCALE))
            .max()
            .unwrap_or(0);

        let mut buf = BytesMut::with_capacity(4096);
        let moov = begin_box(&mut buf, b"moov");

        // mvhd
        let mvhd = begin_box(&mut buf, b"mvhd");
        put_full_header(&mut buf, 0, 0);
        buf.put_u32(0); // creation time
        buf.put_u32(0); // modification time
        buf.put_u32(MOVIE_TIMESCALE);
        buf.put_u32(clamp_u32(movie_duration));
        buf.put_u32(0x0001_0000); // rate 1.0
        buf.put_u16(0x0100); // volume 1.0
        buf.put_u16(0);
        buf.put_u64(0);
        for v in UNITY_MATRIX {
            buf.put_u32(v);
        }
        buf.put_bytes(0, 24); // pre-defined
        buf.put_u32(self.tracks.len() as u32 + 1); // next track ID
        end_box(&mut buf, mvhd);

        for (index, (track, t)) in self.tracks.iter().zip(&tables).enumerate() {
            write_trak(&mut buf, index, track, t);
        }

        end_box(&mut buf, moov);
        buf
    }
}

/// Rebuilt sample table data for one track.
struct TrackTables {
    /// Run-length (sample count, tick delta) pairs.
    time_deltas: Vec<(u32, u32)>,
    /// 1-based sync sample numbers, `None` when every sample is sync.
    sync_samples: Option<Vec<u32>>,
    /// Run-length (first chunk, samples per chunk) pairs.
    chunk_runs: Vec<(u32, u32)>,
    /// Track duration in media timescale ticks.
    media_duration: u64,
}

impl TrackTables {
    fn build(track: &TrackState) -> Self {
        let timescale = track.format.timescale;
        let ticks: Vec<u64> = track
            .samples
            .iter()
            .map(|s| us_to_ticks(s.time_us, timescale))
            .collect();

        // Successive deltas; the final sample reuses the previous delta
        // since its own end time is unknown.
        let mut deltas: Vec<u32> = ticks
            .windows(2)
            .map(|w| clamp_u32(w[1].saturating_sub(w[0])))
            .collect();
        if !ticks.is_empty() {
            deltas.push(deltas.last().copied().unwrap_or(0));
        }
        let media_duration = deltas.iter().map(|&d| d as u64).sum();

        let mut time_deltas: Vec<(u32, u32)> = Vec::new();
        for delta in deltas {
            match time_deltas.last_mut() {
                Some(run) if run.1 == delta => run.0 += 1,
                _ => time_deltas.push((1, delta)),
            }
        }

        let sync_samples = if track.samples.iter().all(|s| s.sync) {
            None
        } else {
            Some(
                track
                    .samples
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| s.sync)
                    .map(|(i, _)| i as u32 + 1)
                    .collect(),
            )
        };

        let mut chunk_runs: Vec<(u32, u32)> = Vec::new();
        for (i, chunk) in track.chunks.iter().enumerate() {
            match chunk_runs.last() {
                Some(&(_, count)) if count == chunk.sample_count => {}
                _ => chunk_runs.push((i as u32 + 1, chunk.sample_count)),
            }
        }

        Self {
            time_deltas,
            sync_samples,
            chunk_runs,
            media_duration,
        }
    }
}

fn write_trak(buf: &mut BytesMut, index: usize, track: &TrackState, tables: &TrackTables) {
    let format = &track.format;
    let track_duration = rescale(tables.media_duration, format.timescale, MOVIE_TIMESCALE);
    let trak = begin_box(buf, b"trak");

    // tkhd: flags 3 marks the track enabled and in the movie.
    let tkhd = begin_box(buf, b"tkhd");
    put_full_header(buf, 0, 3);
    buf.put_u32(0); // creation time
    buf.put_u32(0); // modification time
    buf.put_u32(index as u32 + 1);
    buf.put_u32(0);
    buf.put_u32(clamp_u32(track_duration));
    buf.put_u64(0);
    buf.put_u16(0); // layer
    buf.put_u16(0); // alternate group
    buf.put_u16(if format.handler_type.is_audio() { 0x0100 } else { 0 });
    buf.put_u16(0);
    for v in UNITY_MATRIX {
        buf.put_u32(v);
    }
    // 16.16 fixed point, zero for non-visual tracks.
    buf.put_u32((format.width.unwrap_or(0) & 0xFFFF) << 16);
    buf.put_u32((format.height.unwrap_or(0) & 0xFFFF) << 16);
    end_box(buf, tkhd);

    let mdia = begin_box(buf, b"mdia");

    let mdhd = begin_box(buf, b"mdhd");
    put_full_header(buf, 0, 0);
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_u32(format.timescale);
    buf.put_u32(clamp_u32(tables.media_duration));
    buf.put_u16(0x55C4); // language "und"
    buf.put_u16(0);
    end_box(buf, mdhd);

    let (handler, handler_name): (&[u8; 4], &str) = match format.handler_type {
        HandlerType::Video => (b"vide", "VideoHandler"),
        HandlerType::Audio => (b"soun", "SoundHandler"),
        _ => (b"meta", "DataHandler"),
    };
    let hdlr = begin_box(buf, b"hdlr");
    put_full_header(buf, 0, 0);
    buf.put_u32(0);
    buf.put_slice(handler);
    buf.put_bytes(0, 12);
    buf.put_slice(handler_name.as_bytes());
    buf.put_u8(0);
    end_box(buf, hdlr);

    let minf = begin_box(buf, b"minf");

    match format.handler_type {
        HandlerType::Video => {
            let vmhd = begin_box(buf, b"vmhd");
            put_full_header(buf, 0, 1);
            buf.put_u16(0); // graphics mode
            buf.put_bytes(0, 6); // opcolor
            end_box(buf, vmhd);
        }
        HandlerType::Audio => {
            let smhd = begin_box(buf, b"smhd");
            put_full_header(buf, 0, 0);
            buf.put_u16(0); // balance
            buf.put_u16(0);
            end_box(buf, smhd);
        }
        _ => {
            let nmhd = begin_box(buf, b"nmhd");
            put_full_header(buf, 0, 0);
            end_box(buf, nmhd);
        }
    }

    let dinf = begin_box(buf, b"dinf");
    let dref = begin_box(buf, b"dref");
    put_full_header(buf, 0, 0);
    buf.put_u32(1); // entry count
    let url = begin_box(buf, b"url ");
    put_full_header(buf, 0, 1); // flag 1: data in this file
    end_box(buf, url);
    end_box(buf, dref);
    end_box(buf, dinf);

    let stbl = begin_box(buf, b"stbl");

    let stsd = begin_box(buf, b"stsd");
    put_full_header(buf, 0, 0);
    buf.put_u32(1); // entry count
    buf.put_slice(&format.sample_entry);
    end_box(buf, stsd);

    let stts = begin_box(buf, b"stts");
    put_full_header(buf, 0, 0);
    buf.put_u32(tables.time_deltas.len() as u32);
    for &(count, delta) in &tables.time_deltas {
        buf.put_u32(count);
        buf.put_u32(delta);
    }
    end_box(buf, stts);

    if let Some(ref sync_samples) = tables.sync_samples {
        let stss = begin_box(buf, b"stss");
        put_full_header(buf, 0, 0);
        buf.put_u32(sync_samples.len() as u32);
        for &sample in sync_samples {
            buf.put_u32(sample);
        }
        end_box(buf, stss);
    }

    let stsc = begin_box(buf, b"stsc");
    put_full_header(buf, 0, 0);
    buf.put_u32(tables.chunk_runs.len() as u32);
    for &(first_chunk, samples_per_chunk) in &tables.chunk_runs {
        buf.put_u32(first_chunk);
        buf.put_u32(samples_per_chunk);
        buf.put_u32(1); // sample description index
    }
    end_box(buf, stsc);

    let stsz = begin_box(buf, b"stsz");
    put_full_header(buf, 0, 0);
    buf.put_u32(0); // per-sample sizes follow
    buf.put_u32(track.samples.len() as u32);
    for sample in &track.samples {
        buf.put_u32(sample.size);
    }
    end_box(buf, stsz);

    let needs_co64 = track.chunks.iter().any(|c| c.offset > u32::MAX as u64);
    if needs_co64 {
        let co64 = begin_box(buf, b"co64");
        put_full_header(buf, 0, 0);
        buf.put_u32(track.chunks.len() as u32);
        for chunk in &track.chunks {
            buf.put_u64(chunk.offset);
        }
        end_box(buf, co64);
    } else {
        let stco = begin_box(buf, b"stco");
        put_full_header(buf, 0, 0);
        buf.put_u32(track.chunks.len() as u32);
        for chunk in &track.chunks {
            buf.put_u32(chunk.offset as u32);
        }
        end_box(buf, stco);
    }

    end_box(buf, stbl);
    end_box(buf, minf);
    end_box(buf, mdia);
    end_box(buf, trak);
}

/// Write a placeholder size and the box type, returning the patch
/// position for [`end_box`].
fn begin_box(buf: &mut BytesMut, fourcc: &[u8; 4]) -> usize {
    let start = buf.len();
    buf.put_u32(0);
    buf.put_slice(fourcc);
    start
}

/// Patch the box size written by [`begin_box`].
fn end_box(buf: &mut BytesMut, start: usize) {
    let size = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

fn put_full_header(buf: &mut BytesMut, version: u8, flags: u32) {
    buf.put_u32((version as u32) << 24 | (flags & 0x00FF_FFFF));
}

fn us_to_ticks(time_us: i64, timescale: u32) -> u64 {
    (time_us.max(0) as i128 * timescale as i128 / 1_000_000) as u64
}

fn rescale(value: u64, from: u32, to: u32) -> u64 {
    if from == 0 {
        return 0;
    }
    (value as u128 * to as u128 / from as u128) as u64
}

fn clamp_u32(value: u64) -> u32 {
    value.min(u32::MAX as u64) as u32
}
