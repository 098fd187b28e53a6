//! Track selection for the copy pipeline.
//!
//! Only video and audio tracks survive a trim. Everything else in the
//! source (hint, timed text, metadata tracks) is dropped, since the
//! destination rebuilds its own timing and a partial copy of such
//! tracks would dangle.

use cliptrim_media::TrackFormat;

/// Whether a track's MIME type admits it into the output.
pub fn is_eligible(mime: &str) -> bool {
    mime.starts_with("video/") || mime.starts_with("audio/")
}

/// Pair each eligible track with its index in the source.
///
/// The returned order follows the source's track order, which is also
/// the order tracks are registered with the muxer.
pub fn eligible_tracks(formats: &[TrackFormat]) -> Vec<(usize, TrackFormat)> {
    formats
        .iter()
        .enumerate()
        .filter(|(_, format)| is_eligible(&format.mime))
        .map(|(index, format)| (index, format.clone()))
        .collect()
}
