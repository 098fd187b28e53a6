//! End-to-end trim tests over synthesized MP4 fixtures.
//!
//! Each test builds its source with the media crate's muxer in a temp
//! directory, runs a trim, and re-opens the result with the demuxer to
//! verify the copied window.

mod common;

use assert_matches::assert_matches;
use cliptrim::{trim, TrimDriver, TrimError, TrimRequest, TrimService};
use tempfile::TempDir;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Happy path: middle window out of a two-track source
// ---------------------------------------------------------------------------

#[test]
fn trim_window_copies_both_tracks() {
    common::init_tracing();
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("source.mp4");
    let output = dir.path().join("clip.mp4");
    common::write_two_track_fixture(&input);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let result = TrimDriver::new(&input, &output, 2000, 5000)
        .with_progress(tx)
        .run()
        .expect("trim failed");
    assert_eq!(result, output);

    // Percentages stay in range, finish at 100, and restart when the
    // driver moves from the video track to the audio track.
    let mut percents = Vec::new();
    while let Ok(value) = rx.try_recv() {
        percents.push(value);
    }
    assert!(!percents.is_empty());
    assert!(percents.iter().all(|p| *p <= 100));
    assert_eq!(percents.last().copied(), Some(100));
    assert!(percents.windows(2).any(|w| w[1] < w[0]));

    let timelines = common::collect_timelines(&output);
    assert_eq!(timelines.len(), 2);

    // 2000 ms lands on a keyframe, so the video window starts clean:
    // samples at 2000..=5000 ms, rebased to 0.
    let (video_mime, video) = &timelines[0];
    assert_eq!(video_mime, "video/avc");
    assert_eq!(video.len(), 31);
    assert_eq!(video[0].time_us, 0);
    assert!(video[0].sync);
    assert!(video.windows(2).all(|w| w[0].time_us <= w[1].time_us));

    let (audio_mime, audio) = &timelines[1];
    assert_eq!(audio_mime, "audio/mp4a-latm");
    assert_eq!(audio.len(), 151);
    assert_eq!(audio[0].time_us, 0);
    assert!(audio.iter().all(|s| s.sync));

    // 31 video samples at 100 ms each: the 3000 ms window plus the
    // final sample's display time.
    assert_eq!(common::output_duration_ms(&output), 3100);
}

#[test]
fn window_start_between_keyframes_drops_lead_in() {
    common::init_tracing();
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("source.mp4");
    let output = dir.path().join("clip.mp4");
    common::write_video_fixture(&input, 10_000, 100, 1000);

    TrimDriver::new(&input, &output, 2500, 4000)
        .run()
        .expect("trim failed");

    // Decoding starts at the 2000 ms keyframe but only samples inside
    // the window are copied, so the first output sample is the
    // non-sync one at 2500 ms.
    let timelines = common::collect_timelines(&output);
    assert_eq!(timelines.len(), 1);
    let (_, video) = &timelines[0];
    assert_eq!(video.len(), 16);
    assert_eq!(video[0].time_us, 0);
    assert!(!video[0].sync);
    assert_eq!(video.last().unwrap().time_us, 1_500_000);
    assert_eq!(common::output_duration_ms(&output), 1600);
}

#[test]
fn window_past_end_copies_until_eos() {
    common::init_tracing();
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("source.mp4");
    let output = dir.path().join("clip.mp4");
    common::write_two_track_fixture(&input);

    TrimDriver::new(&input, &output, 8000, 20_000)
        .run()
        .expect("trim failed");

    let timelines = common::collect_timelines(&output);
    assert_eq!(timelines[0].1.len(), 20);
    assert_eq!(timelines[1].1.len(), 100);
    assert_eq!(common::output_duration_ms(&output), 2000);
}

#[test]
fn rerunning_the_same_trim_is_equivalent() {
    common::init_tracing();
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("source.mp4");
    let output = dir.path().join("clip.mp4");
    common::write_two_track_fixture(&input);

    TrimDriver::new(&input, &output, 2000, 5000)
        .run()
        .expect("first run failed");
    let first = common::collect_timelines(&output);
    let first_duration = common::output_duration_ms(&output);

    TrimDriver::new(&input, &output, 2000, 5000)
        .run()
        .expect("second run failed");

    assert_eq!(common::collect_timelines(&output), first);
    assert_eq!(common::output_duration_ms(&output), first_duration);
}

// ---------------------------------------------------------------------------
// Failure paths leave no output behind
// ---------------------------------------------------------------------------

#[test]
fn inverted_range_is_rejected_before_any_io() {
    common::init_tracing();
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("source.mp4");
    let output = dir.path().join("clip.mp4");
    common::write_two_track_fixture(&input);

    let err = TrimDriver::new(&input, &output, 5000, 2000).run().unwrap_err();
    assert_matches!(
        err,
        TrimError::InvalidRange {
            start_ms: 5000,
            end_ms: 2000
        }
    );

    // Zero-length and negative windows are rejected the same way.
    assert_matches!(
        TrimDriver::new(&input, &output, 2000, 2000).run(),
        Err(TrimError::InvalidRange { .. })
    );
    assert_matches!(
        TrimDriver::new(&input, &output, -1, 2000).run(),
        Err(TrimError::InvalidRange { .. })
    );
    assert!(!output.exists());
}

#[test]
fn missing_input_reports_source_open() {
    common::init_tracing();
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("missing.mp4");
    let output = dir.path().join("clip.mp4");

    let err = TrimDriver::new(&input, &output, 0, 1000).run().unwrap_err();
    match err {
        TrimError::SourceOpen { path, .. } => assert_eq!(path, input),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!output.exists());
}

#[test]
fn source_without_av_tracks_is_rejected() {
    common::init_tracing();
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("data.mp4");
    let output = dir.path().join("clip.mp4");
    common::write_unknown_track_fixture(&input);

    let err = TrimDriver::new(&input, &output, 0, 500).run().unwrap_err();
    assert_matches!(err, TrimError::NoEligibleTracks);
    assert!(!output.exists());
}

#[test]
fn failure_mid_copy_removes_partial_output() {
    common::init_tracing();
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("source.mp4");
    let output = dir.path().join("clip.mp4");
    common::write_oversized_sample_fixture(&input);

    let err = TrimDriver::new(&input, &output, 0, 1000).run().unwrap_err();
    assert_matches!(err, TrimError::FormatRead { .. });
    assert!(!output.exists());
}

// ---------------------------------------------------------------------------
// Service layer
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_spawns_to_same_destination() {
    common::init_tracing();
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("source.mp4");
    let output = dir.path().join("clip.mp4");
    common::write_two_track_fixture(&input);

    let service = TrimService::new();
    let request = TrimRequest {
        input_path: input.clone(),
        output_path: output.clone(),
        start_ms: 0,
        end_ms: 10_000,
    };

    let job = service.spawn(request.clone()).expect("first spawn");
    assert_matches!(
        service.spawn(request.clone()),
        Err(TrimError::DestinationBusy { .. })
    );

    job.wait().await.expect("first trim failed");
    assert!(output.exists());

    // The reservation is released once the job resolves.
    let rerun = service.spawn(request).expect("sequential reuse");
    rerun.wait().await.expect("second trim failed");
}

#[tokio::test]
async fn trim_helper_drains_progress_and_returns_path() {
    common::init_tracing();
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("source.mp4");
    let output = dir.path().join("clip.mp4");
    common::write_two_track_fixture(&input);

    let request = TrimRequest {
        input_path: input.clone(),
        output_path: output.clone(),
        start_ms: 1000,
        end_ms: 2000,
    };
    let result = trim(request).await.expect("trim failed");
    assert_eq!(result, output);

    let timelines = common::collect_timelines(&output);
    assert_eq!(timelines.len(), 2);
    assert_eq!(timelines[0].1.len(), 11);
    assert_eq!(timelines[1].1.len(), 51);
    assert_eq!(common::output_duration_ms(&output), 1100);
}
