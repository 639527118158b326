use std::collections::HashSet;

use image::RgbaImage;

use super::engine::PixelEngine;
use super::{Classified, DiffEngine, EngineKind};
use crate::render::DiffChannel;

/// Maximum possible delta in YIQ color space (used by dify internally).
const MAX_YIQ_POSSIBLE_DELTA: f32 = 35215.0;

/// Blend factor for unchanged pixels so the diff image keeps its context.
const UNCHANGED_BLEND: f32 = 0.1;

/// Perceptual classifier backed by dify (YIQ delta with anti-aliasing
/// detection). The channel setting does not apply; dify always compares in
/// YIQ space.
pub struct DifyEngine;

impl DiffEngine for DifyEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Reference
    }

    fn classify(
        &self,
        a: &RgbaImage,
        b: &RgbaImage,
        threshold: f32,
        channel: DiffChannel,
    ) -> Result<Classified, String> {
        // get_results expects threshold^2 * MAX_YIQ_POSSIBLE_DELTA
        let computed_threshold = MAX_YIQ_POSSIBLE_DELTA * threshold * threshold;
        let output_base = Some(dify::cli::OutputImageBase::LeftImage);
        let block_out: Option<HashSet<(u32, u32)>> = None;

        match dify::diff::get_results(
            a.clone(),
            b.clone(),
            computed_threshold,
            true,
            Some(UNCHANGED_BLEND),
            &output_base,
            &block_out,
        ) {
            Some((diff_count, image)) => Ok(Classified {
                diff_count: diff_count.max(0) as u64,
                image,
            }),
            // None means no pixel crossed the threshold; the builtin visual
            // of an unchanged frame is the gray context image.
            None => PixelEngine.classify(a, b, f32::INFINITY, channel),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn counts_scattered_changes() {
        let a = RgbaImage::from_pixel(50, 50, Rgba([200, 200, 200, 255]));
        let mut b = a.clone();
        for i in 0..5 {
            b.put_pixel(i * 10, i * 10, Rgba([255, 0, 0, 255]));
        }
        let c = DifyEngine.classify(&a, &b, 0.1, DiffChannel::Rgb).unwrap();
        assert!(c.diff_count > 0 && c.diff_count <= 5, "{}", c.diff_count);
        assert_eq!(c.image.dimensions(), (50, 50));
    }

    #[test]
    fn identical_frames_have_no_diff() {
        let a = RgbaImage::from_pixel(6, 6, Rgba([30, 60, 90, 255]));
        let c = DifyEngine.classify(&a, &a, 0.1, DiffChannel::Rgb).unwrap();
        assert_eq!(c.diff_count, 0);
        assert_eq!(c.image.dimensions(), (6, 6));
    }
}
