//! MP4 atom definitions and track descriptors.

use bytes::Bytes;

/// Four-character atom type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtomType(pub [u8; 4]);

impl AtomType {
    pub const FTYP: Self = Self(*b"ftyp");
    pub const MOOV: Self = Self(*b"moov");
    pub const MDAT: Self = Self(*b"mdat");
    pub const MVHD: Self = Self(*b"mvhd");
    pub const TRAK: Self = Self(*b"trak");
    pub const TKHD: Self = Self(*b"tkhd");
    pub const MDIA: Self = Self(*b"mdia");
    pub const MDHD: Self = Self(*b"mdhd");
    pub const HDLR: Self = Self(*b"hdlr");
    pub const MINF: Self = Self(*b"minf");
    pub const STBL: Self = Self(*b"stbl");
    pub const STSD: Self = Self(*b"stsd");
    pub const STTS: Self = Self(*b"stts");
    pub const STSS: Self = Self(*b"stss");
    pub const STSC: Self = Self(*b"stsc");
    pub const STSZ: Self = Self(*b"stsz");
    pub const STCO: Self = Self(*b"stco");
    pub const CO64: Self = Self(*b"co64");
    pub const CTTS: Self = Self(*b"ctts");
    pub const FREE: Self = Self(*b"free");
    pub const SKIP: Self = Self(*b"skip");

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Get the 4-char code as a string.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl std::fmt::Display for AtomType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parsed atom header.
#[derive(Debug, Clone)]
pub struct Atom {
    /// Atom type code.
    pub atom_type: AtomType,
    /// Atom size including header.
    pub size: u64,
    /// File offset where atom data starts (after header).
    pub data_offset: u64,
    /// Size of the header (8 or 16 bytes).
    pub header_size: u8,
}

impl Atom {
    /// Get the data size (size - header).
    pub fn data_size(&self) -> u64 {
        self.size.saturating_sub(self.header_size as u64)
    }
}

/// Handler type for a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerType {
    Video,
    Audio,
    Hint,
    Meta,
    Text,
    Unknown([u8; 4]),
}

impl HandlerType {
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        match &bytes {
            b"vide" => Self::Video,
            b"soun" => Self::Audio,
            b"hint" => Self::Hint,
            b"meta" => Self::Meta,
            b"text" => Self::Text,
            _ => Self::Unknown(bytes),
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::Video)
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Self::Audio)
    }
}

/// MIME type for a sample description FourCC, `None` when unrecognized.
pub fn sample_entry_mime(fourcc: &[u8; 4]) -> Option<&'static str> {
    match fourcc {
        b"avc1" | b"avc3" => Some("video/avc"),
        b"hvc1" | b"hev1" => Some("video/hevc"),
        b"mp4v" => Some("video/mp4v-es"),
        b"av01" => Some("video/av01"),
        b"vp09" => Some("video/x-vnd.on2.vp9"),
        b"mp4a" => Some("audio/mp4a-latm"),
        b"ac-3" => Some("audio/ac3"),
        b"ec-3" => Some("audio/eac3"),
        b"Opus" => Some("audio/opus"),
        b"fLaC" => Some("audio/flac"),
        b"tx3g" => Some("text/3gpp"),
        _ => None,
    }
}

/// Track format descriptor extracted from a trak atom.
///
/// Immutable once parsed. Carries the raw sample description entry so a
/// writer can reproduce the codec configuration byte for byte without
/// understanding it.
#[derive(Debug, Clone)]
pub struct TrackFormat {
    /// Track ID.
    pub track_id: u32,
    /// MIME-like type string derived from the sample entry FourCC
    /// (`application/octet-stream` when unrecognized).
    pub mime: String,
    /// Handler type (video/audio/etc).
    pub handler_type: HandlerType,
    /// Media timescale (ticks per second for this track).
    pub timescale: u32,
    /// Track duration in media timescale ticks.
    pub duration: u64,
    /// Raw sample description entry, including its own box header.
    pub sample_entry: Bytes,
    /// Width (for video tracks).
    pub width: Option<u32>,
    /// Height (for video tracks).
    pub height: Option<u32>,
    /// Sample rate (for audio tracks).
    pub sample_rate: Option<u32>,
    /// Channel count (for audio tracks).
    pub channels: Option<u16>,
}

impl TrackFormat {
    /// Create an empty track format.
    pub fn new(track_id: u32) -> Self {
        Self {
            track_id,
            mime: "application/octet-stream".to_string(),
            handler_type: HandlerType::Unknown([0; 4]),
            timescale: 1,
            duration: 0,
            sample_entry: Bytes::new(),
            width: None,
            height: None,
            sample_rate: None,
            channels: None,
        }
    }

    /// Get duration in microseconds.
    pub fn duration_us(&self) -> i64 {
        if self.timescale == 0 {
            0
        } else {
            (self.duration as i128 * 1_000_000 / self.timescale as i128) as i64
        }
    }
}
