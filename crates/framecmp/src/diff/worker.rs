//! Dedicated diff thread.
//!
//! Requests carry a correlation id and the pair generation they were issued
//! against; the thread answers each one independently and keeps no state
//! between requests.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use image::RgbaImage;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{DiffOptions, DiffResult, compute};
use crate::error::CompareError;

pub type RequestId = u64;

pub struct DiffRequest {
    pub id: RequestId,
    pub generation: u64,
    pub a: Arc<RgbaImage>,
    pub b: Arc<RgbaImage>,
    pub options: DiffOptions,
}

pub struct DiffResponse {
    pub id: RequestId,
    pub generation: u64,
    pub outcome: Result<DiffResult, CompareError>,
}

/// Handle to the diff thread. Dropping it closes the request channel and
/// the thread exits after its current job.
pub struct DiffWorker {
    requests: mpsc::UnboundedSender<DiffRequest>,
    _handle: thread::JoinHandle<()>,
}

impl DiffWorker {
    /// Spawn the thread; results are delivered on `responses`.
    pub fn spawn(responses: mpsc::UnboundedSender<DiffResponse>) -> std::io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<DiffRequest>();
        let handle = thread::Builder::new()
            .name("framecmp-diff".into())
            .spawn(move || {
                debug!("diff worker started");
                while let Some(request) = rx.blocking_recv() {
                    let response = process(request);
                    if responses.send(response).is_err() {
                        break;
                    }
                }
                debug!("diff worker stopped");
            })?;
        Ok(Self {
            requests: tx,
            _handle: handle,
        })
    }

    /// Queue a request. Fails only when the thread is gone.
    pub fn submit(&self, request: DiffRequest) -> Result<(), CompareError> {
        self.requests
            .send(request)
            .map_err(|_| CompareError::DiffUnavailable("diff worker has stopped".into()))
    }

    pub fn is_alive(&self) -> bool {
        !self.requests.is_closed()
    }
}

fn process(request: DiffRequest) -> DiffResponse {
    let started = Instant::now();
    let DiffRequest {
        id,
        generation,
        a,
        b,
        options,
    } = request;
    let outcome = catch_unwind(AssertUnwindSafe(|| compute(&a, &b, &options)))
        .unwrap_or_else(|_| Err(CompareError::DiffUnavailable("diff computation panicked".into())));
    match &outcome {
        Ok(result) => debug!(
            request_id = id,
            generation,
            diff_count = result.stats.diff_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "diff computed"
        ),
        Err(e) => warn!(request_id = id, generation, error = %e, "diff failed"),
    }
    DiffResponse {
        id,
        generation,
        outcome,
    }
}
