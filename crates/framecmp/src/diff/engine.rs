use image::RgbaImage;
use rayon::prelude::*;

use super::{Classified, DiffEngine, EngineKind};
use crate::render::DiffChannel;
use crate::render::shade;

const PEAK_SQUARED: f64 = 255.0 * 255.0;

/// Built-in classifier using the compositor's delta, so its count agrees
/// with what difference mode shows.
pub struct PixelEngine;

impl DiffEngine for PixelEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Builtin
    }

    fn classify(
        &self,
        a: &RgbaImage,
        b: &RgbaImage,
        threshold: f32,
        channel: DiffChannel,
    ) -> Result<Classified, String> {
        let (w, h) = a.dimensions();
        let mut image = RgbaImage::new(w, h);
        let stride = w as usize * 4;
        if stride == 0 || h == 0 {
            return Ok(Classified { diff_count: 0, image });
        }
        let buf: &mut [u8] = &mut image;
        let diff_count = buf
            .par_chunks_mut(stride)
            .zip(a.as_raw().par_chunks(stride))
            .zip(b.as_raw().par_chunks(stride))
            .map(|((out, ra), rb)| {
                let mut count = 0u64;
                for ((o, pa), pb) in out
                    .chunks_exact_mut(4)
                    .zip(ra.chunks_exact(4))
                    .zip(rb.chunks_exact(4))
                {
                    let d = shade::delta_u8(pa, pb, channel);
                    if d > threshold {
                        count += 1;
                        o.copy_from_slice(&diff_pixel(d));
                    } else {
                        o.copy_from_slice(&context_pixel(pa));
                    }
                }
                count
            })
            .sum();
        Ok(Classified { diff_count, image })
    }
}

/// Red scaled by the delta, blue inversely.
pub fn diff_pixel(d: f32) -> [u8; 4] {
    let d = d.clamp(0.0, 1.0);
    [shade::to_u8(0.5 + 0.5 * d), 0, shade::to_u8((1.0 - d) * 0.5), 255]
}

/// Unchanged pixels keep A's structure as gray.
pub fn context_pixel(px: &[u8]) -> [u8; 4] {
    let avg = ((px[0] as u16 + px[1] as u16 + px[2] as u16) / 3) as u8;
    [avg, avg, avg, 255]
}

/// Mean squared error over the RGB channels and the matching PSNR.
/// PSNR is infinite when the frames are identical.
pub fn error_stats(a: &RgbaImage, b: &RgbaImage) -> (f64, f64) {
    let samples = a.width() as u64 * a.height() as u64 * 3;
    if samples == 0 {
        return (0.0, f64::INFINITY);
    }
    let sum: u64 = a
        .as_raw()
        .par_chunks(4)
        .zip(b.as_raw().par_chunks(4))
        .map(|(pa, pb)| {
            (0..3)
                .map(|c| {
                    let e = pa[c] as i64 - pb[c] as i64;
                    (e * e) as u64
                })
                .sum::<u64>()
        })
        .sum();
    let mse = sum as f64 / samples as f64;
    (mse, psnr(mse))
}

pub fn psnr(mse: f64) -> f64 {
    if mse == 0.0 {
        f64::INFINITY
    } else {
        10.0 * (PEAK_SQUARED / mse).log10()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    use crate::media::MediaFrame;
    use crate::render::{Compositor, RenderParameters, ViewMode};

    #[test]
    fn delta_equal_to_threshold_is_unchanged_in_overlay_and_count() {
        let pa = Rgba([100, 100, 100, 255]);
        let pb = Rgba([150, 100, 100, 255]);
        let a = RgbaImage::from_pixel(2, 2, pa);
        let b = RgbaImage::from_pixel(2, 2, pb);
        let d = shade::delta_u8(&pa.0, &pb.0, DiffChannel::Rgb);

        let mut compositor = Compositor::raster();
        let overlay = |compositor: &mut Compositor, threshold: f32| {
            compositor.set_parameters(RenderParameters {
                mode: ViewMode::Difference,
                threshold,
                blend: 1.0,
                ..Default::default()
            });
            let out = compositor
                .render(&MediaFrame::still(a.clone()), &MediaFrame::still(b.clone()))
                .unwrap();
            *out.get_pixel(0, 0)
        };

        assert_eq!(overlay(&mut compositor, d), pa);
        assert_eq!(PixelEngine.classify(&a, &b, d, DiffChannel::Rgb).unwrap().diff_count, 0);

        let below = d - 1e-3;
        assert_ne!(overlay(&mut compositor, below), pa);
        assert_eq!(PixelEngine.classify(&a, &b, below, DiffChannel::Rgb).unwrap().diff_count, 4);
    }

    #[test]
    fn visual_marks_changed_pixels() {
        let a = RgbaImage::from_fn(4, 1, |x, _| Rgba([30 * x as u8, 60, 90, 255]));
        let mut b = a.clone();
        b.put_pixel(2, 0, Rgba([255, 255, 255, 255]));
        let c = PixelEngine.classify(&a, &b, 0.02, DiffChannel::Rgb).unwrap();
        assert_eq!(c.diff_count, 1);
        let marked = c.image.get_pixel(2, 0).0;
        assert!(marked[0] > 128 && marked[1] == 0);
        // unchanged pixel (0, 0): average of 0, 60, 90
        assert_eq!(c.image.get_pixel(0, 0).0, [50, 50, 50, 255]);
    }

    #[test]
    fn diff_pixel_scales_red_up_and_blue_down() {
        assert_eq!(diff_pixel(1.0), [255, 0, 0, 255]);
        assert_eq!(diff_pixel(0.0), [128, 0, 128, 255]);
        let mid = diff_pixel(0.5);
        assert!(mid[0] > 128 && mid[2] < 128);
    }

    #[test]
    fn luma_channel_ignores_hue_at_equal_luma() {
        // Same luma, different chroma: RGB sees a difference, luma does not.
        let gray: f64 = 0.2126 * 200.0 + 0.7152 * 100.0 + 0.0722 * 50.0;
        let g = gray.round() as u8;
        let a = RgbaImage::from_pixel(2, 2, Rgba([200, 100, 50, 255]));
        let b = RgbaImage::from_pixel(2, 2, Rgba([g, g, g, 255]));
        let rgb = PixelEngine.classify(&a, &b, 0.05, DiffChannel::Rgb).unwrap();
        let luma = PixelEngine.classify(&a, &b, 0.05, DiffChannel::Luma).unwrap();
        assert_eq!(rgb.diff_count, 4);
        assert_eq!(luma.diff_count, 0);
    }

    #[test]
    fn alpha_is_ignored_by_error_stats() {
        let a = RgbaImage::from_pixel(3, 3, Rgba([10, 10, 10, 0]));
        let b = RgbaImage::from_pixel(3, 3, Rgba([10, 10, 10, 255]));
        let (mse, psnr) = error_stats(&a, &b);
        assert_eq!(mse, 0.0);
        assert!(psnr.is_infinite());
    }

    #[test]
    fn empty_frames() {
        let e = RgbaImage::new(0, 0);
        assert_eq!(PixelEngine.classify(&e, &e, 0.0, DiffChannel::Rgb).unwrap().diff_count, 0);
        assert_eq!(error_stats(&e, &e).0, 0.0);
    }
}
