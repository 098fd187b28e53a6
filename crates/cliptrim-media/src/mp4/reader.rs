//! MP4 structure parsing.
//!
//! [`Mp4Parser`] walks the atom tree and resolves every trak into a
//! [`ParsedTrack`]. Sample payloads are never loaded here; the resolved
//! tables carry absolute file offsets for on-demand reads.

use super::atoms::{sample_entry_mime, Atom, AtomType, TrackFormat};
use super::sample_table::{RawSampleTables, SampleTable};
use crate::{Error, Result};
use bytes::Bytes;
use std::io::{Read, Seek, SeekFrom};

/// Maximum allowed atom data size (64 MB) to prevent OOM on malformed files.
const MAX_ATOM_DATA_SIZE: u64 = 64 * 1024 * 1024;

/// One fully parsed track: descriptor plus resolved sample index.
#[derive(Debug, Clone)]
pub struct ParsedTrack {
    /// Immutable track descriptor.
    pub format: TrackFormat,
    /// Resolved samples in decode order.
    pub samples: SampleTable,
}

/// Movie-level metadata plus every track in file order.
///
/// A malformed trak keeps its slot with the failure message recorded,
/// so track indices stay aligned with the file and the failure only
/// surfaces when that track's format is requested.
#[derive(Debug)]
pub struct Movie {
    /// Movie timescale (ticks per second).
    pub timescale: u32,
    /// Movie duration in movie timescale ticks.
    pub duration: u64,
    /// Per-track parse outcomes, in file order.
    pub tracks: Vec<std::result::Result<ParsedTrack, String>>,
}

impl Movie {
    /// Get movie duration in microseconds.
    pub fn duration_us(&self) -> i64 {
        if self.timescale == 0 {
            0
        } else {
            (self.duration as i128 * 1_000_000 / self.timescale as i128) as i64
        }
    }
}

/// MP4 atom-tree parser.
pub struct Mp4Parser<R> {
    reader: R,
    file_size: u64,
}

impl<R: Read + Seek> Mp4Parser<R> {
    /// Create a new parser.
    pub fn new(mut reader: R) -> Self {
        let file_size = reader.seek(SeekFrom::End(0)).unwrap_or(0);
        let _ = reader.seek(SeekFrom::Start(0));
        Self { reader, file_size }
    }

    /// Take back the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Parse the movie structure.
    ///
    /// Fails when no moov atom exists or when a track's presentation
    /// order cannot be reproduced without reordering (B-frames).
    pub fn parse(&mut self) -> Result<Movie> {
        let atoms = self.read_atoms(0, self.file_size)?;

        let moov = atoms
            .iter()
            .find(|a| a.atom_type == AtomType::MOOV)
            .ok_or(Error::MissingAtom("moov"))?;

        let movie = self.parse_moov(moov)?;

        for (index, track) in movie.tracks.iter().enumerate() {
            if let Ok(parsed) = track {
                if !parsed.samples.is_presentation_ordered() {
                    return Err(Error::unsupported(format!(
                        "track {} requires presentation reordering (B-frames)",
                        index
                    )));
                }
            }
        }

        Ok(movie)
    }

    /// Read atoms at the given level.
    fn read_atoms(&mut self, start: u64, end: u64) -> Result<Vec<Atom>> {
        let mut atoms = Vec::new();
        let mut pos = start;

        while pos < end {
            self.reader.seek(SeekFrom::Start(pos))?;

            // Read atom header
            let mut header = [0u8; 8];
            if self.reader.read_exact(&mut header).is_err() {
                break;
            }

            let size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as u64;
            let atom_type = AtomType::from_bytes([header[4], header[5], header[6], header[7]]);

            let (actual_size, header_size) = if size == 1 {
                // 64-bit extended size
                let mut ext = [0u8; 8];
                self.reader.read_exact(&mut ext)?;
                (u64::from_be_bytes(ext), 16u8)
            } else if size == 0 {
                // Atom extends to end of enclosing scope
                (end - pos, 8u8)
            } else {
                (size, 8u8)
            };

            if actual_size < header_size as u64 {
                break;
            }

            atoms.push(Atom {
                atom_type,
                size: actual_size,
                data_offset: pos + header_size as u64,
                header_size,
            });

            pos += actual_size;
        }

        Ok(atoms)
    }

    /// Read and validate atom data, rejecting oversized atoms.
    fn read_atom_data(&mut self, atom: &Atom) -> Result<Vec<u8>> {
        let size = atom.data_size();
        if size > MAX_ATOM_DATA_SIZE {
            return Err(Error::invalid_mp4(format!(
                "Atom {} data size {} exceeds maximum {}",
                atom.atom_type, size, MAX_ATOM_DATA_SIZE
            )));
        }
        self.reader.seek(SeekFrom::Start(atom.data_offset))?;
        let mut data = vec![0u8; size as usize];
        self.reader.read_exact(&mut data)?;
        Ok(data)
    }

    /// Parse moov atom.
    fn parse_moov(&mut self, moov: &Atom) -> Result<Movie> {
        let children = self.read_atoms(moov.data_offset, moov.data_offset + moov.data_size())?;

        let mut movie = Movie {
            timescale: 1000,
            duration: 0,
            tracks: Vec::new(),
        };

        for child in &children {
            match child.atom_type {
                AtomType::MVHD => {
                    self.parse_mvhd(child, &mut movie)?;
                }
                AtomType::TRAK => {
                    let track = self.parse_trak(child).map_err(|e| e.to_string());
                    movie.tracks.push(track);
                }
                _ => {}
            }
        }

        Ok(movie)
    }

    /// Parse mvhd (movie header).
    fn parse_mvhd(&mut self, atom: &Atom, movie: &mut Movie) -> Result<()> {
        let data = self.read_atom_data(atom)?;

        if data.is_empty() {
            return Ok(());
        }

        let version = data[0];

        if version == 0 {
            // 32-bit timestamps
            if data.len() >= 20 {
                movie.timescale = u32::from_be_bytes([data[12], data[13], data[14], data[15]]);
                movie.duration =
                    u32::from_be_bytes([data[16], data[17], data[18], data[19]]) as u64;
            }
        } else {
            // 64-bit timestamps
            if data.len() >= 32 {
                movie.timescale = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);
                movie.duration = u64::from_be_bytes([
                    data[24], data[25], data[26], data[27], data[28], data[29], data[30], data[31],
                ]);
            }
        }

        Ok(())
    }

    /// Parse trak (track) atom.
    fn parse_trak(&mut self, trak: &Atom) -> Result<ParsedTrack> {
        let children = self.read_atoms(trak.data_offset, trak.data_offset + trak.data_size())?;

        let mut format = TrackFormat::new(0);
        let mut raw = RawSampleTables::default();

        for child in &children {
            match child.atom_type {
                AtomType::TKHD => {
                    self.parse_tkhd(child, &mut format)?;
                }
                AtomType::MDIA => {
                    self.parse_mdia(child, &mut format, &mut raw)?;
                }
                _ => {}
            }
        }

        Ok(ParsedTrack {
            format,
            samples: raw.resolve(),
        })
    }

    /// Parse tkhd (track header).
    fn parse_tkhd(&mut self, atom: &Atom, format: &mut TrackFormat) -> Result<()> {
        let data = self.read_atom_data(atom)?;

        if data.is_empty() {
            return Ok(());
        }

        let version = data[0];

        if version == 0 {
            if data.len() >= 16 {
                format.track_id = u32::from_be_bytes([data[12], data[13], data[14], data[15]]);
            }
            if data.len() >= 84 {
                // Width and height at fixed point 16.16
                let w = u32::from_be_bytes([data[76], data[77], data[78], data[79]]);
                let h = u32::from_be_bytes([data[80], data[81], data[82], data[83]]);
                format.width = Some(w >> 16);
                format.height = Some(h >> 16);
            }
        } else {
            if data.len() >= 24 {
                format.track_id = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);
            }
            if data.len() >= 96 {
                let w = u32::from_be_bytes([data[88], data[89], data[90], data[91]]);
                let h = u32::from_be_bytes([data[92], data[93], data[94], data[95]]);
                format.width = Some(w >> 16);
                format.height = Some(h >> 16);
            }
        }

        Ok(())
    }

    /// Parse mdia (media) atom.
    fn parse_mdia(
        &mut self,
        mdia: &Atom,
        format: &mut TrackFormat,
        raw: &mut RawSampleTables,
    ) -> Result<()> {
        let children = self.read_atoms(mdia.data_offset, mdia.data_offset + mdia.data_size())?;

        for child in &children {
            match child.atom_type {
                AtomType::MDHD => {
                    self.parse_mdhd(child, format)?;
                }
                AtomType::HDLR => {
                    self.parse_hdlr(child, format)?;
                }
                AtomType::MINF => {
                    self.parse_minf(child, format, raw)?;
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Parse mdhd (media header).
    fn parse_mdhd(&mut self, atom: &Atom, format: &mut TrackFormat) -> Result<()> {
        let data = self.read_atom_data(atom)?;

        if data.is_empty() {
            return Ok(());
        }

        let version = data[0];

        if version == 0 {
            if data.len() >= 20 {
                format.timescale = u32::from_be_bytes([data[12], data[13], data[14], data[15]]);
                format.duration =
                    u32::from_be_bytes([data[16], data[17], data[18], data[19]]) as u64;
            }
        } else {
            if data.len() >= 24 {
                format.timescale = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);
            }
            if data.len() >= 32 {
                format.duration = u64::from_be_bytes([
                    data[24], data[25], data[26], data[27], data[28], data[29], data[30], data[31],
                ]);
            }
        }

        Ok(())
    }

    /// Parse hdlr (handler) atom.
    fn parse_hdlr(&mut self, atom: &Atom, format: &mut TrackFormat) -> Result<()> {
        let data = self.read_atom_data(atom)?;

        if data.len() >= 12 {
            format.handler_type =
                super::atoms::HandlerType::from_bytes([data[8], data[9], data[10], data[11]]);
        }

        Ok(())
    }

    /// Parse minf (media info) atom.
    fn parse_minf(
        &mut self,
        minf: &Atom,
        format: &mut TrackFormat,
        raw: &mut RawSampleTables,
    ) -> Result<()> {
        let children = self.read_atoms(minf.data_offset, minf.data_offset + minf.data_size())?;

        for child in &children {
            if child.atom_type == AtomType::STBL {
                self.parse_stbl(child, format, raw)?;
            }
        }

        Ok(())
    }

    /// Parse stbl (sample table) atom.
    fn parse_stbl(
        &mut self,
        stbl: &Atom,
        format: &mut TrackFormat,
        raw: &mut RawSampleTables,
    ) -> Result<()> {
        let children = self.read_atoms(stbl.data_offset, stbl.data_offset + stbl.data_size())?;

        for child in &children {
            match child.atom_type {
                AtomType::STTS => {
                    raw.time_to_sample = self.parse_stts(child)?;
                }
                AtomType::STSS => {
                    raw.sync_samples = self.parse_stss(child)?;
                }
                AtomType::STSC => {
                    raw.sample_to_chunk = self.parse_stsc(child)?;
                }
                AtomType::STSZ => {
                    let (uniform, sizes) = self.parse_stsz(child)?;
                    raw.uniform_size = uniform;
                    raw.sample_sizes = sizes;
                }
                AtomType::STCO => {
                    raw.chunk_offsets = self.parse_stco(child)?;
                }
                AtomType::CO64 => {
                    raw.chunk_offsets = self.parse_co64(child)?;
                }
                AtomType::CTTS => {
                    raw.composition_offsets = self.parse_ctts(child)?;
                }
                AtomType::STSD => {
                    self.parse_stsd(child, format)?;
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Parse stts (decoding time to sample).
    fn parse_stts(&mut self, atom: &Atom) -> Result<Vec<(u32, u32)>> {
        let data = self.read_atom_data(atom)?;

        if data.len() < 8 {
            return Ok(Vec::new());
        }

        let entry_count = u32::from_be_bytes([data[4], data[5], data[6], data[7]]) as usize;
        let mut entries = Vec::with_capacity(entry_count);

        for i in 0..entry_count {
            let offset = 8 + i * 8;
            if offset + 8 > data.len() {
                break;
            }
            let count = u32::from_be_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ]);
            let delta = u32::from_be_bytes([
                data[offset + 4],
                data[offset + 5],
                data[offset + 6],
                data[offset + 7],
            ]);
            entries.push((count, delta));
        }

        Ok(entries)
    }

    /// Parse stss (sync sample).
    fn parse_stss(&mut self, atom: &Atom) -> Result<Vec<u32>> {
        let data = self.read_atom_data(atom)?;

        if data.len() < 8 {
            return Ok(Vec::new());
        }

        let entry_count = u32::from_be_bytes([data[4], data[5], data[6], data[7]]) as usize;
        let mut sync_samples = Vec::with_capacity(entry_count);

        for i in 0..entry_count {
            let offset = 8 + i * 4;
            if offset + 4 > data.len() {
                break;
            }
            let sample = u32::from_be_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ]);
            sync_samples.push(sample);
        }

        Ok(sync_samples)
    }

    /// Parse stsc (sample to chunk).
    fn parse_stsc(&mut self, atom: &Atom) -> Result<Vec<(u32, u32, u32)>> {
        let data = self.read_atom_data(atom)?;

        if data.len() < 8 {
            return Ok(Vec::new());
        }

        let entry_count = u32::from_be_bytes([data[4], data[5], data[6], data[7]]) as usize;
        let mut entries = Vec::with_capacity(entry_count);

        for i in 0..entry_count {
            let offset = 8 + i * 12;
            if offset + 12 > data.len() {
                break;
            }
            let first_chunk = u32::from_be_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ]);
            let samples_per_chunk = u32::from_be_bytes([
                data[offset + 4],
                data[offset + 5],
                data[offset + 6],
                data[offset + 7],
            ]);
            let description_idx = u32::from_be_bytes([
                data[offset + 8],
                data[offset + 9],
                data[offset + 10],
                data[offset + 11],
            ]);
            entries.push((first_chunk, samples_per_chunk, description_idx));
        }

        Ok(entries)
    }

    /// Parse stsz (sample size).
    fn parse_stsz(&mut self, atom: &Atom) -> Result<(u32, Vec<u32>)> {
        let data = self.read_atom_data(atom)?;

        if data.len() < 12 {
            return Ok((0, Vec::new()));
        }

        let uniform_size = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let sample_count = u32::from_be_bytes([data[8], data[9], data[10], data[11]]) as usize;

        let sizes = if uniform_size == 0 {
            let mut sizes = Vec::with_capacity(sample_count);
            for i in 0..sample_count {
                let offset = 12 + i * 4;
                if offset + 4 > data.len() {
                    break;
                }
                let size = u32::from_be_bytes([
                    data[offset],
                    data[offset + 1],
                    data[offset + 2],
                    data[offset + 3],
                ]);
                sizes.push(size);
            }
            sizes
        } else {
            vec![]
        };

        Ok((uniform_size, sizes))
    }

    /// Parse stco (chunk offset, 32-bit).
    fn parse_stco(&mut self, atom: &Atom) -> Result<Vec<u64>> {
        let data = self.read_atom_data(atom)?;

        if data.len() < 8 {
            return Ok(Vec::new());
        }

        let entry_count = u32::from_be_bytes([data[4], data[5], data[6], data[7]]) as usize;
        let mut offsets = Vec::with_capacity(entry_count);

        for i in 0..entry_count {
            let offset = 8 + i * 4;
            if offset + 4 > data.len() {
                break;
            }
            let chunk_offset = u32::from_be_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ]) as u64;
            offsets.push(chunk_offset);
        }

        Ok(offsets)
    }

    /// Parse co64 (chunk offset, 64-bit).
    fn parse_co64(&mut self, atom: &Atom) -> Result<Vec<u64>> {
        let data = self.read_atom_data(atom)?;

        if data.len() < 8 {
            return Ok(Vec::new());
        }

        let entry_count = u32::from_be_bytes([data[4], data[5], data[6], data[7]]) as usize;
        let mut offsets = Vec::with_capacity(entry_count);

        for i in 0..entry_count {
            let offset = 8 + i * 8;
            if offset + 8 > data.len() {
                break;
            }
            let chunk_offset = u64::from_be_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
                data[offset + 4],
                data[offset + 5],
                data[offset + 6],
                data[offset + 7],
            ]);
            offsets.push(chunk_offset);
        }

        Ok(offsets)
    }

    /// Parse ctts (composition time to sample).
    fn parse_ctts(&mut self, atom: &Atom) -> Result<Vec<(u32, i32)>> {
        let data = self.read_atom_data(atom)?;

        if data.len() < 8 {
            return Ok(Vec::new());
        }

        let version = data[0];
        let entry_count = u32::from_be_bytes([data[4], data[5], data[6], data[7]]) as usize;
        let mut entries = Vec::with_capacity(entry_count);

        for i in 0..entry_count {
            let offset = 8 + i * 8;
            if offset + 8 > data.len() {
                break;
            }
            let count = u32::from_be_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ]);
            let cts_offset = if version == 0 {
                u32::from_be_bytes([
                    data[offset + 4],
                    data[offset + 5],
                    data[offset + 6],
                    data[offset + 7],
                ]) as i32
            } else {
                i32::from_be_bytes([
                    data[offset + 4],
                    data[offset + 5],
                    data[offset + 6],
                    data[offset + 7],
                ])
            };
            entries.push((count, cts_offset));
        }

        Ok(entries)
    }

    /// Parse stsd (sample description) - capture the raw entry and MIME.
    fn parse_stsd(&mut self, atom: &Atom, format: &mut TrackFormat) -> Result<()> {
        let data = self.read_atom_data(atom)?;

        // stsd header: version/flags (4) + entry count (4)
        if data.len() < 16 {
            return Ok(());
        }

        let entry_count = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        if entry_count == 0 {
            return Ok(());
        }

        // First sample entry starts right after the stsd header
        let entry_size = u32::from_be_bytes([data[8], data[9], data[10], data[11]]) as usize;
        if entry_size < 16 || 8 + entry_size > data.len() {
            return Ok(());
        }

        let entry = &data[8..8 + entry_size];
        let fourcc = [entry[4], entry[5], entry[6], entry[7]];

        format.sample_entry = Bytes::copy_from_slice(entry);
        format.mime = sample_entry_mime(&fourcc)
            .unwrap_or("application/octet-stream")
            .to_string();

        // AudioSampleEntry fixed fields (relative to entry start):
        // [24..26] channelCount, [32..36] sampleRate (16.16 fixed-point)
        if format.handler_type.is_audio() && entry.len() >= 36 {
            format.channels = Some(u16::from_be_bytes([entry[24], entry[25]]));
            format.sample_rate =
                Some(u32::from_be_bytes([entry[32], entry[33], entry[34], entry[35]]) >> 16);
        }

        Ok(())
    }
}
