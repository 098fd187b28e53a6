//! Shared fixtures for trim engine integration tests.
//!
//! Fixtures are synthesized with the media crate's own muxer: a hand
//! built sample description plus generated payload bytes, written to a
//! temp path and verified by re-opening with the demuxer. No binary
//! files are checked in.

use bytes::{BufMut, BytesMut};
use cliptrim_media::mp4::HandlerType;
use cliptrim_media::{Demuxer, Muxer, SampleInfo, TrackFormat};
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Video fixture timescale.
pub const VIDEO_TIMESCALE: u32 = 30_000;
/// Audio fixture timescale.
pub const AUDIO_TIMESCALE: u32 = 48_000;

/// Install a log subscriber so `RUST_LOG=cliptrim=debug cargo test`
/// shows driver state transitions. Safe to call from every test.
pub fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "cliptrim=info".to_string());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&env_filter))
        .with_test_writer()
        .try_init();
}

/// 640x360 avc1 descriptor with an opaque 86-byte visual sample entry.
pub fn video_track_format() -> TrackFormat {
    let mut entry = BytesMut::with_capacity(86);
    entry.put_u32(86);
    entry.put_slice(b"avc1");
    entry.put_bytes(0, 6); // reserved
    entry.put_u16(1); // data reference index
    entry.put_bytes(0, 16); // pre-defined + reserved
    entry.put_u16(640); // width
    entry.put_u16(360); // height
    entry.put_u32(0x0048_0000); // horizontal resolution
    entry.put_u32(0x0048_0000); // vertical resolution
    entry.put_u32(0); // reserved
    entry.put_u16(1); // frame count
    entry.put_bytes(0, 32); // compressor name
    entry.put_u16(0x0018); // depth
    entry.put_u16(0xFFFF); // pre-defined

    let mut format = TrackFormat::new(1);
    format.mime = "video/avc".to_string();
    format.handler_type = HandlerType::Video;
    format.timescale = VIDEO_TIMESCALE;
    format.sample_entry = entry.freeze();
    format.width = Some(640);
    format.height = Some(360);
    format
}

/// Stereo mp4a descriptor with a 36-byte audio sample entry.
pub fn audio_track_format() -> TrackFormat {
    let mut entry = BytesMut::with_capacity(36);
    entry.put_u32(36);
    entry.put_slice(b"mp4a");
    entry.put_bytes(0, 6); // reserved
    entry.put_u16(1); // data reference index
    entry.put_bytes(0, 8); // reserved
    entry.put_u16(2); // channel count
    entry.put_u16(16); // sample size
    entry.put_u32(0); // pre-defined + reserved
    entry.put_u32(AUDIO_TIMESCALE << 16); // sample rate, 16.16

    let mut format = TrackFormat::new(2);
    format.mime = "audio/mp4a-latm".to_string();
    format.handler_type = HandlerType::Audio;
    format.timescale = AUDIO_TIMESCALE;
    format.sample_entry = entry.freeze();
    format.sample_rate = Some(AUDIO_TIMESCALE);
    format.channels = Some(2);
    format
}

/// A descriptor whose FourCC maps to no known MIME type.
pub fn unknown_track_format() -> TrackFormat {
    let mut entry = BytesMut::with_capacity(16);
    entry.put_u32(16);
    entry.put_slice(b"zzzz");
    entry.put_bytes(0, 6);
    entry.put_u16(1);

    let mut format = TrackFormat::new(9);
    format.handler_type = HandlerType::Meta;
    format.timescale = 1000;
    format.sample_entry = entry.freeze();
    format
}

/// Ten seconds of video and audio: 100 ms video samples with a sync
/// sample every 1000 ms, 20 ms audio samples (every one sync).
pub fn write_two_track_fixture(path: &Path) {
    let mut muxer = Muxer::create(path).expect("failed to create fixture file");
    let video = muxer.add_track(&video_track_format()).expect("add video track");
    let audio = muxer.add_track(&audio_track_format()).expect("add audio track");
    muxer.start().expect("start fixture muxer");

    for i in 0..100i64 {
        let payload = vec![(i % 251) as u8; 600];
        muxer
            .write_sample(video, &payload, i * 100_000, i % 10 == 0)
            .expect("write video sample");
    }
    for i in 0..500i64 {
        let payload = vec![(i % 239) as u8; 96];
        muxer
            .write_sample(audio, &payload, i * 20_000, true)
            .expect("write audio sample");
    }
    muxer.stop().expect("finalize fixture");
}

/// Video-only fixture with configurable sample spacing and keyframe
/// cadence, both in milliseconds.
pub fn write_video_fixture(path: &Path, duration_ms: i64, sample_ms: i64, keyframe_every_ms: i64) {
    let mut muxer = Muxer::create(path).expect("failed to create fixture file");
    let video = muxer.add_track(&video_track_format()).expect("add video track");
    muxer.start().expect("start fixture muxer");

    for i in 0..duration_ms / sample_ms {
        let time_ms = i * sample_ms;
        let sync = time_ms % keyframe_every_ms == 0;
        muxer
            .write_sample(video, &[0x5A; 256], time_ms * 1000, sync)
            .expect("write video sample");
    }
    muxer.stop().expect("finalize fixture");
}

/// A structurally valid MP4 whose only track is neither audio nor
/// video.
pub fn write_unknown_track_fixture(path: &Path) {
    let mut muxer = Muxer::create(path).expect("failed to create fixture file");
    let track = muxer.add_track(&unknown_track_format()).expect("add track");
    muxer.start().expect("start fixture muxer");
    for i in 0..10i64 {
        muxer
            .write_sample(track, &[0u8; 32], i * 100_000, true)
            .expect("write sample");
    }
    muxer.stop().expect("finalize fixture");
}

/// Video fixture whose second sample is larger than the trim copy
/// buffer.
pub fn write_oversized_sample_fixture(path: &Path) {
    let mut muxer = Muxer::create(path).expect("failed to create fixture file");
    let video = muxer.add_track(&video_track_format()).expect("add video track");
    muxer.start().expect("start fixture muxer");

    muxer.write_sample(video, &[1u8; 512], 0, true).expect("write sample");
    let huge = vec![2u8; cliptrim::SAMPLE_BUFFER_CAPACITY + 1];
    muxer.write_sample(video, &huge, 100_000, false).expect("write oversized sample");
    muxer.write_sample(video, &[3u8; 512], 200_000, false).expect("write sample");
    muxer.stop().expect("finalize fixture");
}

/// Re-open a file and collect each track's MIME type and sample
/// timeline in track order.
pub fn collect_timelines(path: &Path) -> Vec<(String, Vec<SampleInfo>)> {
    let mut demuxer = Demuxer::open(path).expect("failed to reopen output");
    let mut buf = vec![0u8; cliptrim::SAMPLE_BUFFER_CAPACITY];
    let mut timelines = Vec::new();

    for index in 0..demuxer.track_count() {
        let mime = demuxer.track_format(index).expect("track format").mime.clone();
        demuxer.select_track(index).expect("select track");
        let mut samples = Vec::new();
        while let Some(info) = demuxer.read_sample(index, &mut buf).expect("read sample") {
            samples.push(info);
            demuxer.advance(index).expect("advance");
        }
        demuxer.unselect_track(index);
        timelines.push((mime, samples));
    }

    timelines
}

/// Movie duration of a file in milliseconds.
pub fn output_duration_ms(path: &Path) -> i64 {
    let demuxer = Demuxer::open(path).expect("failed to reopen output");
    demuxer.duration_us() / 1000
}
