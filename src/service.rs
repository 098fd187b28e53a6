//! Async trim service.
//!
//! [`TrimService`] runs [`crate::driver::TrimDriver`] jobs on blocking
//! worker threads and hands back a [`TrimJob`] with a live progress
//! channel. At most one job per destination path is admitted at a time;
//! a second request for the same path fails fast instead of racing the
//! first for the file.

use crate::driver::TrimDriver;
use crate::error::{Result, TrimError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tracing::debug;

/// One trim request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrimRequest {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub start_ms: i64,
    pub end_ms: i64,
}

/// Handle to a spawned trim job.
#[derive(Debug)]
pub struct TrimJob {
    /// Per-sample progress percentages. The channel closes when the
    /// job finishes; the final value before close is `100` on success.
    pub progress: UnboundedReceiver<u8>,
    handle: JoinHandle<Result<PathBuf>>,
}

impl TrimJob {
    /// Wait for the job and return the destination path.
    pub async fn wait(self) -> Result<PathBuf> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(TrimError::Worker(e.to_string())),
        }
    }
}

/// Spawns trim jobs and tracks which destination paths are in flight.
///
/// Clones share the in-flight set, so one service value can be handed
/// to any number of request handlers.
#[derive(Clone, Default)]
pub struct TrimService {
    in_flight: Arc<Mutex<HashSet<PathBuf>>>,
}

impl TrimService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a trim on a blocking worker thread.
    ///
    /// Fails with [`TrimError::DestinationBusy`] when a job spawned
    /// from this service (or a clone of it) is already writing the
    /// same destination path. The reservation is released when the job
    /// finishes, however it finishes.
    pub fn spawn(&self, request: TrimRequest) -> Result<TrimJob> {
        let TrimRequest {
            input_path,
            output_path,
            start_ms,
            end_ms,
        } = request;

        let reservation = self.reserve(output_path.clone())?;
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::task::spawn_blocking(move || {
            let _reservation = reservation;
            TrimDriver::new(input_path, output_path, start_ms, end_ms)
                .with_progress(tx)
                .run()
        });

        Ok(TrimJob {
            progress: rx,
            handle,
        })
    }

    /// Claim a destination path. Paths are compared exactly as given;
    /// two spellings of the same file do not collide here.
    fn reserve(&self, path: PathBuf) -> Result<PathReservation> {
        let mut in_flight = self.in_flight.lock();
        if !in_flight.insert(path.clone()) {
            debug!(path = %path.display(), "destination already reserved");
            return Err(TrimError::DestinationBusy { path });
        }
        Ok(PathReservation {
            in_flight: Arc::clone(&self.in_flight),
            path,
        })
    }
}

/// Releases the destination path on drop, including when the worker
/// panics and unwinds.
#[derive(Debug)]
struct PathReservation {
    in_flight: Arc<Mutex<HashSet<PathBuf>>>,
    path: PathBuf,
}

impl Drop for PathReservation {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.path);
    }
}

/// Run a single trim to completion, discarding progress updates.
pub async fn trim(request: TrimRequest) -> Result<PathBuf> {
    let service = TrimService::new();
    let mut job = service.spawn(request)?;
    while job.progress.recv().await.is_some() {}
    job.wait().await
}
