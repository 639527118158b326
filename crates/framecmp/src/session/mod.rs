//! Comparison session: owns the loaded pair, the compositor and the diff
//! worker, and routes input and diff results between them.

pub mod export;
pub mod input;

use std::fmt;
use std::path::Path;

use futures::future::try_join;
use image::RgbaImage;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::diff::{DiffOptions, DiffRequest, DiffResponse, DiffResult, DiffWorker, RequestId};
use crate::error::CompareError;
use crate::media::{FramePosition, FrameSource, MediaFrame, MediaHandle, MediaKind, MediaRef};
use crate::render::{BackendKind, Compositor, RenderParameters, shade};
use crate::server::{ParityMethod, ParityOutcome, ParityRequest, ServerClient};

pub use self::export::StatsReport;
pub use self::input::{Effect, InputEvent, Key};

/// Largest magnifier radius, in pixels.
pub const MAX_SAMPLE_RADIUS: u32 = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Empty,
    PairLoaded,
    Interacting,
    DiffRunning,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("empty"),
            Self::PairLoaded => f.write_str("pair-loaded"),
            Self::Interacting => f.write_str("interacting"),
            Self::DiffRunning => f.write_str("diff-running"),
        }
    }
}

/// Availability of the diff affordance.
#[derive(Clone, Debug, PartialEq)]
pub enum DiffStatus {
    Idle,
    Running(RequestId),
    Ready,
    /// The last diff failed; another request may succeed.
    Failed(String),
    /// The worker is gone; running a diff is disabled.
    Unavailable(String),
}

/// Session construction options.
#[derive(Clone, Copy, Debug, Default)]
pub struct SessionOptions {
    pub prefer_gpu: bool,
    pub prefer_reference: bool,
    pub params: RenderParameters,
}

struct LoadedPair {
    left: MediaRef,
    right: MediaRef,
    left_handle: MediaHandle,
    right_handle: MediaHandle,
    a: MediaFrame,
    b: MediaFrame,
}

/// Pixels under and around a pointer position on both frames.
#[derive(Debug, Clone)]
pub struct PixelSample {
    pub x: u32,
    pub y: u32,
    pub a: [u8; 4],
    pub b: [u8; 4],
    pub delta: f32,
    /// `(2 * radius + 1)` square patches centred on `(x, y)`; cells outside
    /// the frame are transparent.
    pub patch_a: RgbaImage,
    pub patch_b: RgbaImage,
}

pub struct Session {
    source: FrameSource,
    compositor: Compositor,
    prefer_gpu: bool,
    prefer_reference: bool,
    worker: Option<DiffWorker>,
    responses: mpsc::UnboundedReceiver<DiffResponse>,
    server: Option<ServerClient>,
    state: SessionState,
    pair: Option<LoadedPair>,
    position: FramePosition,
    generation: u64,
    next_request: RequestId,
    latest_request: Option<RequestId>,
    diff: Option<DiffResult>,
    diff_status: DiffStatus,
}

impl Session {
    pub fn new(source: FrameSource, options: SessionOptions) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (worker, diff_status) = match DiffWorker::spawn(tx) {
            Ok(worker) => (Some(worker), DiffStatus::Idle),
            Err(e) => {
                warn!(error = %e, "cannot start diff worker, diffing disabled");
                (None, DiffStatus::Unavailable(e.to_string()))
            }
        };
        let mut compositor = Compositor::new(options.prefer_gpu);
        compositor.set_parameters(options.params);
        Self {
            source,
            compositor,
            prefer_gpu: options.prefer_gpu,
            prefer_reference: options.prefer_reference,
            worker,
            responses: rx,
            server: None,
            state: SessionState::Empty,
            pair: None,
            position: FramePosition::default(),
            generation: 0,
            next_request: 1,
            latest_request: None,
            diff: None,
            diff_status,
        }
    }

    pub fn with_server(mut self, server: ServerClient) -> Self {
        self.server = Some(server);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn parameters(&self) -> &RenderParameters {
        self.compositor.parameters()
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.compositor.backend_kind()
    }

    pub fn position(&self) -> FramePosition {
        self.position
    }

    /// Identifiers of the loaded pair.
    pub fn labels(&self) -> Option<(String, String)> {
        self.pair
            .as_ref()
            .map(|p| (p.left.to_string(), p.right.to_string()))
    }

    pub fn frames(&self) -> Option<(&MediaFrame, &MediaFrame)> {
        self.pair.as_ref().map(|p| (&p.a, &p.b))
    }

    pub fn diff_status(&self) -> &DiffStatus {
        &self.diff_status
    }

    pub fn diff_result(&self) -> Option<&DiffResult> {
        self.diff.as_ref()
    }

    pub fn can_run_diff(&self) -> bool {
        self.pair.is_some() && !matches!(self.diff_status, DiffStatus::Unavailable(_))
    }

    /// Load a reference/candidate pair. On failure the previous pair, if
    /// any, stays loaded.
    pub async fn load_pair(&mut self, left: MediaRef, right: MediaRef) -> Result<(), CompareError> {
        self.load_pair_at(left, right, FramePosition::default()).await
    }

    /// Load a pair with video frames taken at `position`.
    pub async fn load_pair_at(
        &mut self,
        left: MediaRef,
        right: MediaRef,
        position: FramePosition,
    ) -> Result<(), CompareError> {
        let (left_handle, right_handle) = try_join(self.source.load(&left), self.source.load(&right))
            .await
            .inspect_err(|e| warn!(error = %e, "pair load failed"))?;
        self.install_pair(left, right, left_handle, right_handle, position)
            .await
    }

    /// Resolve `id` on the server and load the resulting pair.
    pub async fn load_server_pair(&mut self, id: &str, position: FramePosition) -> Result<(), CompareError> {
        let server = self
            .server
            .as_ref()
            .ok_or(CompareError::InvalidState("no server configured"))?;
        let (left, right) = server.resolve_pair(id).await?;
        self.load_pair_at(left, right, position).await
    }

    pub(crate) async fn install_pair(
        &mut self,
        left: MediaRef,
        right: MediaRef,
        left_handle: MediaHandle,
        right_handle: MediaHandle,
        position: FramePosition,
    ) -> Result<(), CompareError> {
        let (a, b) = try_join(
            self.source.frame(&left_handle, position),
            self.source.frame(&right_handle, position),
        )
        .await?;
        if a.dimensions() != b.dimensions() {
            let err = CompareError::mismatch(a.dimensions(), b.dimensions());
            warn!(error = %err, "pair rejected");
            return Err(err);
        }
        info!(left = %left, right = %right, width = a.dimensions().0, height = a.dimensions().1, "pair loaded");
        self.pair = Some(LoadedPair {
            left,
            right,
            left_handle,
            right_handle,
            a,
            b,
        });
        self.position = position;
        self.state = SessionState::PairLoaded;
        self.diff = None;
        self.invalidate_diffs();
        Ok(())
    }

    /// Extract both frames at a new position. Stills are unaffected.
    pub async fn seek(&mut self, position: FramePosition) -> Result<(), CompareError> {
        let pair = self
            .pair
            .as_ref()
            .ok_or(CompareError::InvalidState("no pair loaded"))?;
        let (a, b) = try_join(
            self.source.frame(&pair.left_handle, position),
            self.source.frame(&pair.right_handle, position),
        )
        .await?;
        if a.dimensions() != b.dimensions() {
            return Err(CompareError::mismatch(a.dimensions(), b.dimensions()));
        }
        if let Some(pair) = self.pair.as_mut() {
            pair.a = a;
            pair.b = b;
        }
        self.position = position;
        self.invalidate_diffs();
        if self.state == SessionState::DiffRunning {
            self.state = SessionState::Interacting;
        }
        Ok(())
    }

    /// New frames: results of requests issued before now no longer apply.
    fn invalidate_diffs(&mut self) {
        self.generation += 1;
        self.latest_request = None;
        if matches!(self.diff_status, DiffStatus::Running(_)) {
            self.diff_status = DiffStatus::Idle;
        }
    }

    /// Composite the current pair.
    pub fn render(&mut self) -> Result<&RgbaImage, CompareError> {
        let pair = self
            .pair
            .as_ref()
            .ok_or(CompareError::InvalidState("no pair loaded"))?;
        if self.state == SessionState::PairLoaded {
            self.state = SessionState::Interacting;
        }
        self.compositor.render(&pair.a, &pair.b)
    }

    /// Apply an input event and re-render when a pair is loaded.
    pub fn handle_input(&mut self, event: InputEvent) -> Result<Option<&RgbaImage>, CompareError> {
        let mut params = *self.compositor.parameters();
        match input::apply(&mut params, event) {
            Effect::Ignored => return Ok(None),
            Effect::Redraw => self.compositor.set_parameters(params),
            Effect::SetGpu(on) => self.set_gpu(on.unwrap_or(!self.prefer_gpu)),
        }
        if self.pair.is_none() {
            return Ok(None);
        }
        self.render().map(Some)
    }

    fn set_gpu(&mut self, on: bool) {
        if on == self.prefer_gpu {
            return;
        }
        let params = *self.compositor.parameters();
        self.prefer_gpu = on;
        self.compositor = Compositor::new(on);
        self.compositor.set_parameters(params);
        info!(backend = %self.compositor.backend_kind(), "compositor backend changed");
    }

    /// Post the current frames to the diff worker. Returns the request id;
    /// the result arrives through [`poll_diff`](Self::poll_diff) or
    /// [`next_diff_result`](Self::next_diff_result).
    pub fn run_diff(&mut self) -> Result<RequestId, CompareError> {
        if let DiffStatus::Unavailable(reason) = &self.diff_status {
            return Err(CompareError::DiffUnavailable(reason.clone()));
        }
        let pair = self
            .pair
            .as_ref()
            .ok_or(CompareError::InvalidState("no pair loaded"))?;
        let Some(worker) = self.worker.as_ref() else {
            return Err(CompareError::DiffUnavailable("no diff worker".into()));
        };
        let params = self.compositor.parameters();
        let id = self.next_request;
        let request = DiffRequest {
            id,
            generation: self.generation,
            a: pair.a.shared_image(),
            b: pair.b.shared_image(),
            options: DiffOptions {
                threshold: params.threshold,
                channel: params.channel,
                prefer_reference: self.prefer_reference,
            },
        };
        if let Err(e) = worker.submit(request) {
            self.mark_unavailable(&e);
            return Err(e);
        }
        self.next_request += 1;
        self.latest_request = Some(id);
        self.diff_status = DiffStatus::Running(id);
        self.state = SessionState::DiffRunning;
        debug!(request_id = id, generation = self.generation, "diff requested");
        Ok(id)
    }

    fn mark_unavailable(&mut self, err: &CompareError) {
        warn!(error = %err, "diff worker unavailable");
        self.diff_status = DiffStatus::Unavailable(err.to_string());
        self.worker = None;
        if self.state == SessionState::DiffRunning {
            self.state = SessionState::Interacting;
        }
    }

    /// Drain finished diffs without blocking. Returns the current result.
    pub fn poll_diff(&mut self) -> Option<&DiffResult> {
        loop {
            match self.responses.try_recv() {
                Ok(response) => {
                    self.accept(response);
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    if self.worker.is_some() {
                        self.mark_unavailable(&CompareError::DiffUnavailable("diff worker has stopped".into()));
                    }
                    break;
                }
            }
        }
        self.diff.as_ref()
    }

    /// Wait for the result of the most recent request.
    pub async fn next_diff_result(&mut self) -> Result<&DiffResult, CompareError> {
        if self.latest_request.is_none() {
            return self
                .diff
                .as_ref()
                .ok_or(CompareError::InvalidState("no diff requested"));
        }
        while self.latest_request.is_some() {
            match self.responses.recv().await {
                Some(response) => {
                    if let Some(Err(e)) = self.accept(response) {
                        return Err(e);
                    }
                }
                None => {
                    let err = CompareError::DiffUnavailable("diff worker has stopped".into());
                    self.mark_unavailable(&err);
                    return Err(err);
                }
            }
        }
        self.diff
            .as_ref()
            .ok_or(CompareError::InvalidState("no diff result"))
    }

    /// Take a response if it answers the latest request against the current
    /// frames. Returns `Some` for the current response, with its error if
    /// the diff failed.
    fn accept(&mut self, response: DiffResponse) -> Option<Result<(), CompareError>> {
        if response.generation != self.generation || Some(response.id) != self.latest_request {
            debug!(
                request_id = response.id,
                generation = response.generation,
                current_generation = self.generation,
                "discarding stale diff result"
            );
            return None;
        }
        self.latest_request = None;
        if self.state == SessionState::DiffRunning {
            self.state = SessionState::Interacting;
        }
        match response.outcome {
            Ok(result) => {
                info!(
                    request_id = response.id,
                    diff_count = result.stats.diff_count,
                    diff_percent = result.stats.diff_percent,
                    engine = %result.engine,
                    "diff ready"
                );
                self.diff = Some(result);
                self.diff_status = DiffStatus::Ready;
                Some(Ok(()))
            }
            Err(e) => {
                warn!(request_id = response.id, error = %e, "diff failed");
                self.diff_status = DiffStatus::Failed(e.to_string());
                Some(Err(e))
            }
        }
    }

    /// Magnifier data around pixel `(x, y)` of frame A. `radius` is capped at
    /// [`MAX_SAMPLE_RADIUS`].
    pub fn sample(&self, x: u32, y: u32, radius: u32) -> Result<PixelSample, CompareError> {
        let pair = self
            .pair
            .as_ref()
            .ok_or(CompareError::InvalidState("no pair loaded"))?;
        let (a, b) = (pair.a.image(), pair.b.image());
        if x >= a.width() || y >= a.height() {
            return Err(CompareError::InvalidState("sample point outside the frame"));
        }
        if radius > MAX_SAMPLE_RADIUS {
            return Err(CompareError::InvalidState("magnifier radius too large"));
        }
        let pa = a.get_pixel(x, y).0;
        let pb = b.get_pixel(x, y).0;
        Ok(PixelSample {
            x,
            y,
            a: pa,
            b: pb,
            delta: shade::delta_u8(&pa, &pb, self.parameters().channel),
            patch_a: patch(a, x, y, radius),
            patch_b: patch(b, x, y, radius),
        })
    }

    pub fn stats_report(&self) -> Result<StatsReport, CompareError> {
        let (left, right) = self
            .labels()
            .ok_or(CompareError::InvalidState("no pair loaded"))?;
        let result = self
            .diff
            .as_ref()
            .ok_or(CompareError::InvalidState("no diff result to export"))?;
        Ok(StatsReport::new(&left, &right, result, self.parameters()))
    }

    pub fn export_stats(&self, path: &Path) -> Result<(), CompareError> {
        let report = self.stats_report()?;
        export::write_stats(path, &report)?;
        info!(path = %path.display(), "stats exported");
        Ok(())
    }

    pub fn export_diff_image(&self, path: &Path) -> Result<(), CompareError> {
        let result = self
            .diff
            .as_ref()
            .ok_or(CompareError::InvalidState("no diff result to export"))?;
        export::write_png(path, &result.image)?;
        info!(path = %path.display(), "diff image exported");
        Ok(())
    }

    /// Submit the loaded pair for the server's parity check. Two stills use
    /// the pixel comparison; anything involving video uses full validation.
    pub async fn request_parity(&self, wait: bool) -> Result<ParityOutcome, CompareError> {
        let server = self
            .server
            .as_ref()
            .ok_or(CompareError::InvalidState("no server configured"))?;
        let pair = self
            .pair
            .as_ref()
            .ok_or(CompareError::InvalidState("no pair loaded"))?;
        let request = ParityRequest {
            left: pair.left.to_string(),
            right: pair.right.to_string(),
            method: ParityMethod::for_pair(
                pair.left_handle.kind() == MediaKind::Image,
                pair.right_handle.kind() == MediaKind::Image,
            ),
            wait,
        };
        server.parity(&request).await
    }
}

fn patch(image: &RgbaImage, cx: u32, cy: u32, radius: u32) -> RgbaImage {
    let size = radius.saturating_mul(2).saturating_add(1);
    RgbaImage::from_fn(size, size, |px, py| {
        let x = cx.checked_add(px).and_then(|v| v.checked_sub(radius));
        let y = cy.checked_add(py).and_then(|v| v.checked_sub(radius));
        match (x, y) {
            (Some(x), Some(y)) if x < image.width() && y < image.height() => *image.get_pixel(x, y),
            _ => image::Rgba([0, 0, 0, 0]),
        }
    })
}
