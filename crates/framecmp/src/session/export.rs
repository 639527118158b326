use std::path::Path;

use image::RgbaImage;
use serde::{Serialize, Serializer};

use crate::diff::{DiffResult, EngineKind};
use crate::error::CompareError;
use crate::render::{DiffChannel, RenderParameters, ViewMode};

/// Key-value summary of one diff, written as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub left: String,
    pub right: String,
    pub diff_count: u64,
    pub diff_percent: f64,
    pub mse: f64,
    #[serde(serialize_with = "finite_or_label")]
    pub psnr: f64,
    pub threshold: f32,
    pub channel: DiffChannel,
    pub blend: f32,
    pub view: ViewMode,
    pub engine: EngineKind,
    pub width: u32,
    pub height: u32,
}

impl StatsReport {
    /// Threshold and channel come from the diff request; blend and view from
    /// the parameters active at export time.
    pub fn new(left: &str, right: &str, result: &DiffResult, params: &RenderParameters) -> Self {
        let stats = &result.stats;
        Self {
            left: left.to_string(),
            right: right.to_string(),
            diff_count: stats.diff_count,
            diff_percent: stats.diff_percent,
            mse: stats.mse,
            psnr: stats.psnr,
            threshold: result.options.threshold,
            channel: result.options.channel,
            blend: params.blend,
            view: params.mode,
            engine: result.engine,
            width: stats.width,
            height: stats.height,
        }
    }

    pub fn to_json(&self) -> Result<String, CompareError> {
        serde_json::to_string_pretty(self).map_err(|e| CompareError::Export(e.to_string()))
    }
}

/// JSON has no infinity; infinite PSNR is written as the string `"Infinity"`.
fn finite_or_label<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
    if v.is_finite() {
        s.serialize_f64(*v)
    } else if *v > 0.0 {
        s.serialize_str("Infinity")
    } else {
        s.serialize_str("-Infinity")
    }
}

pub fn write_stats(path: &Path, report: &StatsReport) -> Result<(), CompareError> {
    let json = report.to_json()?;
    std::fs::write(path, json).map_err(|e| CompareError::Export(format!("{}: {e}", path.display())))
}

pub fn write_png(path: &Path, image: &RgbaImage) -> Result<(), CompareError> {
    image
        .save_with_format(path, image::ImageFormat::Png)
        .map_err(|e| CompareError::Export(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{DiffOptions, compute};
    use image::Rgba;

    fn result(a: u8, b: u8) -> DiffResult {
        compute(
            &RgbaImage::from_pixel(4, 2, Rgba([a, a, a, 255])),
            &RgbaImage::from_pixel(4, 2, Rgba([b, b, b, 255])),
            &DiffOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn infinite_psnr_is_labelled() {
        let report = StatsReport::new("a.png", "b.png", &result(9, 9), &RenderParameters::default());
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["psnr"], "Infinity");
        assert_eq!(json["diff_count"], 0);
        assert_eq!(json["view"], "split");
        assert_eq!(json["channel"], "rgb");
        assert_eq!(json["engine"], "builtin");
        assert_eq!(json["width"], 4);
    }

    #[test]
    fn finite_stats_are_numbers() {
        let params = RenderParameters {
            mode: ViewMode::Heatmap,
            blend: 0.5,
            ..Default::default()
        };
        let report = StatsReport::new("a.png", "b.png", &result(0, 255), &params);
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["psnr"], 0.0);
        assert_eq!(json["mse"], 65025.0);
        assert_eq!(json["diff_percent"], 100.0);
        assert_eq!(json["view"], "heatmap");
        assert_eq!(json["blend"], 0.5);
        assert_eq!(json["left"], "a.png");
    }

    #[test]
    fn files_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let r = result(0, 255);
        let report = StatsReport::new("a", "b", &r, &RenderParameters::default());
        write_stats(&dir.path().join("stats.json"), &report).unwrap();
        write_png(&dir.path().join("diff.png"), &r.image).unwrap();
        let back = image::open(dir.path().join("diff.png")).unwrap().to_rgba8();
        assert_eq!(back.dimensions(), (4, 2));
        assert!(std::fs::read_to_string(dir.path().join("stats.json")).unwrap().contains("\"mse\""));
    }

    #[test]
    fn unwritable_path_is_an_export_error() {
        let dir = tempfile::tempdir().unwrap();
        let r = result(0, 0);
        let err = write_png(&dir.path().join("missing/dir/diff.png"), &r.image).unwrap_err();
        assert!(matches!(err, CompareError::Export(_)));
    }
}
