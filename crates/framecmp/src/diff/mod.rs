//! Dense pixel diff: classification against a threshold, error statistics
//! (MSE/PSNR) and a visual diff image. Runs on the diff worker thread.

pub mod engine;
pub mod reference;
pub mod worker;

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CompareError;
use crate::render::DiffChannel;

pub use self::engine::PixelEngine;
pub use self::reference::DifyEngine;
pub use self::worker::{DiffRequest, DiffResponse, DiffWorker, RequestId};

/// Which classifier produced a result.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    #[default]
    Builtin,
    Reference,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin => f.write_str("builtin"),
            Self::Reference => f.write_str("reference"),
        }
    }
}

/// Parameters of one diff request.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DiffOptions {
    /// Pixels with a delta strictly above this are different.
    pub threshold: f32,
    pub channel: DiffChannel,
    /// Prefer the reference library for classification and the visual.
    pub prefer_reference: bool,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            threshold: 0.02,
            channel: DiffChannel::Rgb,
            prefer_reference: false,
        }
    }
}

/// Pixel classification plus its visualization.
pub struct Classified {
    pub diff_count: u64,
    pub image: RgbaImage,
}

/// A pixel classifier. Inputs always share dimensions.
pub trait DiffEngine: Send + Sync {
    fn kind(&self) -> EngineKind;
    fn classify(
        &self,
        a: &RgbaImage,
        b: &RgbaImage,
        threshold: f32,
        channel: DiffChannel,
    ) -> Result<Classified, String>;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DiffStats {
    pub width: u32,
    pub height: u32,
    pub diff_count: u64,
    /// Percent of differing pixels, rounded to two decimals.
    pub diff_percent: f64,
    pub mse: f64,
    /// `f64::INFINITY` when the frames are identical.
    pub psnr: f64,
}

#[derive(Debug)]
pub struct DiffResult {
    pub stats: DiffStats,
    pub image: RgbaImage,
    pub engine: EngineKind,
    pub options: DiffOptions,
}

/// `round(count / total * 10000) / 100`; zero for an empty frame.
pub fn diff_percent(count: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (count as f64 / total as f64 * 10000.0).round() / 100.0
}

/// Run one diff. MSE and PSNR always come from the raw buffers, whichever
/// engine classified the pixels.
pub fn compute(a: &RgbaImage, b: &RgbaImage, options: &DiffOptions) -> Result<DiffResult, CompareError> {
    if a.dimensions() != b.dimensions() {
        return Err(CompareError::mismatch(a.dimensions(), b.dimensions()));
    }
    let reference = if options.prefer_reference {
        run_guarded(&DifyEngine, a, b, options)
            .inspect_err(|e| warn!(error = %e, "reference diff failed, using builtin classifier"))
            .ok()
    } else {
        None
    };
    let (classified, engine) = match reference {
        Some(c) => (c, EngineKind::Reference),
        None => (
            run_guarded(&PixelEngine, a, b, options).map_err(CompareError::DiffUnavailable)?,
            EngineKind::Builtin,
        ),
    };

    let (mse, psnr) = engine::error_stats(a, b);
    let (width, height) = a.dimensions();
    Ok(DiffResult {
        stats: DiffStats {
            width,
            height,
            diff_count: classified.diff_count,
            diff_percent: diff_percent(classified.diff_count, width as u64 * height as u64),
            mse,
            psnr,
        },
        image: classified.image,
        engine,
        options: *options,
    })
}

/// Classify, turning a panic inside a third-party engine into an error.
fn run_guarded(
    engine: &dyn DiffEngine,
    a: &RgbaImage,
    b: &RgbaImage,
    options: &DiffOptions,
) -> Result<Classified, String> {
    catch_unwind(AssertUnwindSafe(|| engine.classify(a, b, options.threshold, options.channel)))
        .unwrap_or_else(|_| Err(format!("{} engine panicked", engine.kind())))
}
