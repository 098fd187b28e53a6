//! Single-job trim driver.
//!
//! [`TrimDriver`] runs one lossless trim from start to finish: open the
//! source, map eligible tracks onto a fresh destination, copy the
//! requested window track by track, finalize. It is synchronous and
//! blocking; [`crate::service`] moves it onto a worker thread.

use crate::error::{Result, TrimError};
use crate::filter;
use crate::progress::progress_percent;
use cliptrim_media::{Demuxer, Error as MediaError, Muxer, SeekMode, TrackFormat};
use std::fs;
use std::io;
use std::path::PathBuf;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

/// Reusable sample buffer size. A single coded sample larger than this
/// aborts the job rather than growing the buffer.
pub const SAMPLE_BUFFER_CAPACITY: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriverState {
    Idle,
    Opened,
    TracksMapped,
    /// Copying the window for the given selected-track slot.
    Muxing(usize),
    Finalizing,
    Done,
    Failed,
}

/// One trim job: source path, destination path, and a window in
/// milliseconds.
///
/// The window is interpreted as `[start_ms, end_ms]` in presentation
/// time. Each track's cursor is positioned at the latest sync sample
/// at or before `start_ms`; samples read from there up to the window
/// start are discarded, so the output holds exactly the samples with
/// `start_ms <= time <= end_ms`, rebased to start at zero.
pub struct TrimDriver {
    input: PathBuf,
    output: PathBuf,
    start_ms: i64,
    end_ms: i64,
    progress_tx: Option<UnboundedSender<u8>>,
    state: DriverState,
    /// Set once the destination file exists, so failure cleanup never
    /// deletes a file this job did not create.
    destination_created: bool,
}

impl TrimDriver {
    pub fn new(
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        start_ms: i64,
        end_ms: i64,
    ) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            start_ms,
            end_ms,
            progress_tx: None,
            state: DriverState::Idle,
            destination_created: false,
        }
    }

    /// Report per-sample progress percentages over the given channel.
    ///
    /// Values restart from a lower percentage when the copy moves to
    /// the next track; a trailing `100` is sent exactly once after the
    /// destination is finalized.
    pub fn with_progress(mut self, tx: UnboundedSender<u8>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    /// Run the trim to completion and return the destination path.
    ///
    /// On any failure after the destination file was created, the
    /// partial file is removed before the error is returned.
    pub fn run(mut self) -> Result<PathBuf> {
        if self.start_ms < 0 || self.end_ms <= self.start_ms {
            return Err(TrimError::InvalidRange {
                start_ms: self.start_ms,
                end_ms: self.end_ms,
            });
        }

        match self.execute() {
            Ok(()) => {
                self.transition(DriverState::Done);
                Ok(self.output)
            }
            Err(e) => {
                self.transition(DriverState::Failed);
                error!(error = %e, input = %self.input.display(), "trim failed");
                self.remove_partial_output();
                Err(e)
            }
        }
    }

    fn execute(&mut self) -> Result<()> {
        info!(
            input = %self.input.display(),
            output = %self.output.display(),
            start_ms = self.start_ms,
            end_ms = self.end_ms,
            "starting trim"
        );

        let mut demuxer = Demuxer::open(&self.input)
            .map_err(|e| TrimError::source_open(&self.input, e))?;
        self.transition(DriverState::Opened);

        // Tracks whose metadata cannot be read take part as unknown
        // formats, which the eligibility filter drops; one bad track
        // does not fail the job.
        let mut formats = Vec::with_capacity(demuxer.track_count());
        for index in 0..demuxer.track_count() {
            match demuxer.track_format(index) {
                Ok(format) => formats.push(format.clone()),
                Err(e) => {
                    debug!(track = index, error = %e, "skipping unreadable track");
                    formats.push(TrackFormat::new(0));
                }
            }
        }

        let selected = filter::eligible_tracks(&formats);
        if selected.is_empty() {
            return Err(TrimError::NoEligibleTracks);
        }
        debug!(tracks = selected.len(), total = formats.len(), "mapped eligible tracks");
        self.transition(DriverState::TracksMapped);

        let mut muxer = Muxer::create(&self.output)
            .map_err(|e| TrimError::destination_create(&self.output, e))?;
        self.destination_created = true;

        let mut dst_indices = Vec::with_capacity(selected.len());
        for (_, format) in &selected {
            let dst = muxer
                .add_track(format)
                .map_err(|e| TrimError::MuxerState { source: e })?;
            dst_indices.push(dst);
        }
        muxer
            .start()
            .map_err(|e| TrimError::MuxerState { source: e })?;

        let mut buffer = vec![0u8; SAMPLE_BUFFER_CAPACITY];
        for (slot, (src_index, format)) in selected.iter().enumerate() {
            self.transition(DriverState::Muxing(slot));
            debug!(track = src_index, mime = %format.mime, "copying track window");
            let dst_index = dst_indices[slot];
            self.copy_track_window(&mut demuxer, &mut muxer, *src_index, dst_index, &mut buffer)?;
            demuxer.unselect_track(*src_index);
        }

        self.transition(DriverState::Finalizing);
        if let Err(e) = muxer.stop() {
            // With samples on disk the moov may still have landed short
            // of a clean flush; keep what was written, as the original
            // recorder semantics do.
            if muxer.samples_written() > 0 {
                warn!(error = %e, "finalize reported an error, keeping output");
            } else {
                return Err(classify_mux_error(e));
            }
        }
        self.emit_progress(100);

        info!(
            samples = muxer.samples_written(),
            output = %self.output.display(),
            "trim complete"
        );
        Ok(())
    }

    /// Copy one track's samples inside the requested window, rebasing
    /// timestamps to the window start.
    fn copy_track_window(
        &self,
        demuxer: &mut Demuxer<io::BufReader<fs::File>>,
        muxer: &mut Muxer<io::BufWriter<fs::File>>,
        src_index: usize,
        dst_index: usize,
        buffer: &mut [u8],
    ) -> Result<()> {
        let start_us = self.start_ms * 1000;
        let end_us = self.end_ms * 1000;
        let duration_us = end_us - start_us;

        demuxer
            .select_track(src_index)
            .map_err(|e| TrimError::FormatRead { source: e })?;
        demuxer
            .seek_to(src_index, start_us, SeekMode::ClosestSyncBefore)
            .map_err(|e| TrimError::FormatRead { source: e })?;

        loop {
            let info = match demuxer
                .read_sample(src_index, buffer)
                .map_err(|e| TrimError::FormatRead { source: e })?
            {
                Some(info) => info,
                None => break,
            };

            if info.time_us > end_us {
                break;
            }
            if info.time_us >= start_us {
                let rebased_us = info.time_us - start_us;
                muxer
                    .write_sample(dst_index, &buffer[..info.size], rebased_us, info.sync)
                    .map_err(classify_mux_error)?;
                self.emit_progress(progress_percent(info.time_us, start_us, duration_us));
            }
            // Samples before the window (sync-snapped seek) are skipped
            // but still advanced past.
            demuxer
                .advance(src_index)
                .map_err(|e| TrimError::FormatRead { source: e })?;
        }
        Ok(())
    }

    fn emit_progress(&self, percent: u8) {
        if let Some(tx) = &self.progress_tx {
            if tx.send(percent).is_err() {
                debug!(percent, "progress receiver dropped");
            }
        }
    }

    fn transition(&mut self, next: DriverState) {
        debug!(from = ?self.state, to = ?next, "driver state");
        self.state = next;
    }

    fn remove_partial_output(&self) {
        if !self.destination_created {
            return;
        }
        match fs::remove_file(&self.output) {
            Ok(()) => debug!(output = %self.output.display(), "removed partial output"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(error = %e, output = %self.output.display(), "cannot remove partial output")
            }
        }
    }
}

/// Split destination-side failures into transport and contract errors.
fn classify_mux_error(e: MediaError) -> TrimError {
    match e {
        MediaError::Io(_) => TrimError::WriteIo { source: e },
        _ => TrimError::MuxerState { source: e },
    }
}
