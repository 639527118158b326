//! CPU compositor used when no GPU context can be acquired.
//!
//! Geometric modes are drawn as span copies (the clip region of each row),
//! color modes shade rows in parallel with rayon.

use image::RgbaImage;
use rayon::prelude::*;

use super::params::{RenderParameters, ViewMode};
use super::shade;

/// Composite `a` and `b` into `canvas`. All three must share dimensions.
pub fn composite(canvas: &mut RgbaImage, a: &RgbaImage, b: &RgbaImage, params: &RenderParameters) {
    let (w, h) = canvas.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    match params.mode {
        ViewMode::Split => split(canvas, a, b, params.split),
        ViewMode::CircleReveal => circle(canvas, a, b, params),
        ViewMode::Checkerboard => checkerboard(canvas, a, b, params.tile_size),
        ViewMode::Difference | ViewMode::Heatmap => shade_rows(canvas, a, b, params),
    }
}

/// Copy columns `x0..x1` of row `y` from `src` into `dst`.
fn copy_span(dst: &mut RgbaImage, src: &RgbaImage, y: u32, x0: u32, x1: u32) {
    if x0 >= x1 {
        return;
    }
    let stride = dst.width() as usize * 4;
    let row = y as usize * stride;
    let (s, e) = (row + x0 as usize * 4, row + x1 as usize * 4);
    let buf: &mut [u8] = dst;
    buf[s..e].copy_from_slice(&src.as_raw()[s..e]);
}

fn split(canvas: &mut RgbaImage, a: &RgbaImage, b: &RgbaImage, split: f32) {
    let (w, h) = canvas.dimensions();
    let edge = (0..w)
        .take_while(|&x| shade::uv(x, 0, w, h).0 < split)
        .count() as u32;
    for y in 0..h {
        copy_span(canvas, a, y, 0, edge);
        copy_span(canvas, b, y, edge, w);
    }
}

fn circle(canvas: &mut RgbaImage, a: &RgbaImage, b: &RgbaImage, params: &RenderParameters) {
    let (w, h) = canvas.dimensions();
    for y in 0..h {
        // The clip is convex, so each row intersects it in at most one span.
        let mut inside = (0..w).filter(|&x| shade::inside_circle(shade::uv(x, y, w, h), params, w, h));
        let Some(first) = inside.next() else {
            copy_span(canvas, a, y, 0, w);
            continue;
        };
        let last = inside.last().unwrap_or(first);
        copy_span(canvas, a, y, 0, first);
        copy_span(canvas, b, y, first, last + 1);
        copy_span(canvas, a, y, last + 1, w);
    }
}

fn checkerboard(canvas: &mut RgbaImage, a: &RgbaImage, b: &RgbaImage, tile_size: u32) {
    let (w, h) = canvas.dimensions();
    let t = tile_size.max(1);
    for y in 0..h {
        let mut x0 = 0;
        while x0 < w {
            let x1 = (x0 / t + 1).saturating_mul(t).min(w);
            let src = if shade::checker_shows_b(x0, y, t) { b } else { a };
            copy_span(canvas, src, y, x0, x1);
            x0 = x1;
        }
    }
}

fn shade_rows(canvas: &mut RgbaImage, a: &RgbaImage, b: &RgbaImage, params: &RenderParameters) {
    let (w, h) = canvas.dimensions();
    let stride = w as usize * 4;
    let (a_raw, b_raw) = (a.as_raw(), b.as_raw());
    let buf: &mut [u8] = canvas;
    buf.par_chunks_mut(stride)
        .enumerate()
        .for_each(|(y, row)| {
            let offset = y * stride;
            for (x, out) in row.chunks_exact_mut(4).enumerate() {
                let i = offset + x * 4;
                let pa = [a_raw[i], a_raw[i + 1], a_raw[i + 2], a_raw[i + 3]];
                let pb = [b_raw[i], b_raw[i + 1], b_raw[i + 2], b_raw[i + 3]];
                out.copy_from_slice(&shade::shade_pixel(x as u32, y as u32, w, h, pa, pb, params));
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);

    fn run(params: RenderParameters, w: u32, h: u32) -> RgbaImage {
        let a = RgbaImage::from_pixel(w, h, RED);
        let b = RgbaImage::from_pixel(w, h, BLUE);
        let mut canvas = RgbaImage::new(w, h);
        composite(&mut canvas, &a, &b, &params);
        canvas
    }

    /// Every pixel of the raster output must agree with the reference shader.
    fn assert_matches_reference(params: RenderParameters, a: &RgbaImage, b: &RgbaImage) {
        let (w, h) = a.dimensions();
        let mut canvas = RgbaImage::new(w, h);
        composite(&mut canvas, a, b, &params);
        for (x, y, px) in canvas.enumerate_pixels() {
            let want = shade::shade_pixel(x, y, w, h, a.get_pixel(x, y).0, b.get_pixel(x, y).0, &params);
            assert_eq!(px.0, want, "({x},{y}) in {:?}", params.mode);
        }
    }

    fn gradient(w: u32, h: u32, phase: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| {
            Rgba([
                ((x * 7 + phase) % 256) as u8,
                ((y * 5 + phase * 3) % 256) as u8,
                ((x + y + phase) % 256) as u8,
                255,
            ])
        })
    }

    #[test]
    fn split_quarter_on_100px() {
        let p = RenderParameters {
            mode: ViewMode::Split,
            split: 0.25,
            ..Default::default()
        };
        let out = run(p, 100, 100);
        for y in [0, 50, 99] {
            for x in 0..25 {
                assert_eq!(*out.get_pixel(x, y), RED, "column {x}");
            }
            for x in 25..100 {
                assert_eq!(*out.get_pixel(x, y), BLUE, "column {x}");
            }
        }
    }

    #[test]
    fn split_edges_cover_whole_frame() {
        let all_b = run(
            RenderParameters {
                split: 0.0,
                ..Default::default()
            },
            10,
            4,
        );
        assert!(all_b.pixels().all(|p| *p == BLUE));
        let all_a = run(
            RenderParameters {
                split: 1.0,
                ..Default::default()
            },
            10,
            4,
        );
        assert!(all_a.pixels().all(|p| *p == RED));
    }

    #[test]
    fn split_is_exact_for_arbitrary_positions() {
        let (w, h) = (37, 11);
        let (a, b) = (gradient(w, h, 0), gradient(w, h, 91));
        for s in [0.013, 0.3, 0.5, 0.777, 0.99] {
            let p = RenderParameters {
                mode: ViewMode::Split,
                split: s,
                ..Default::default()
            };
            let mut canvas = RgbaImage::new(w, h);
            composite(&mut canvas, &a, &b, &p);
            for (x, y, px) in canvas.enumerate_pixels() {
                let nx = (x as f32 + 0.5) / w as f32;
                let want = if nx < s { a.get_pixel(x, y) } else { b.get_pixel(x, y) };
                assert_eq!(px, want, "split {s} at ({x},{y})");
            }
        }
    }

    #[test]
    fn checkerboard_tiles_alternate() {
        let p = RenderParameters {
            mode: ViewMode::Checkerboard,
            tile_size: 10,
            ..Default::default()
        };
        let out = run(p, 100, 100);
        // tile (0,0) = A, (1,0) = B, (0,1) = B, (1,1) = A
        assert_eq!(*out.get_pixel(5, 5), RED);
        assert_eq!(*out.get_pixel(15, 5), BLUE);
        assert_eq!(*out.get_pixel(5, 15), BLUE);
        assert_eq!(*out.get_pixel(15, 15), RED);
        // tile edges
        assert_eq!(*out.get_pixel(9, 9), RED);
        assert_eq!(*out.get_pixel(10, 9), BLUE);
    }

    #[test]
    fn checkerboard_partial_tiles_at_border() {
        let p = RenderParameters {
            mode: ViewMode::Checkerboard,
            tile_size: 7,
            ..Default::default()
        };
        assert_matches_reference(p, &gradient(23, 16, 1), &gradient(23, 16, 200));
    }

    #[test]
    fn circle_reveal_matches_predicate() {
        for (center, radius) in [((0.5, 0.5), 0.25), ((0.1, 0.9), 0.4), ((0.5, 0.5), 0.0), ((0.5, 0.5), 1.0)] {
            let p = RenderParameters {
                mode: ViewMode::CircleReveal,
                circle_center: center,
                circle_radius: radius,
                ..Default::default()
            };
            assert_matches_reference(p, &gradient(40, 30, 3), &gradient(40, 30, 150));
        }
    }

    #[test]
    fn circle_center_shows_b_and_corner_shows_a() {
        let p = RenderParameters {
            mode: ViewMode::CircleReveal,
            circle_center: (0.5, 0.5),
            circle_radius: 0.2,
            ..Default::default()
        };
        let out = run(p, 64, 64);
        assert_eq!(*out.get_pixel(32, 32), BLUE);
        assert_eq!(*out.get_pixel(0, 0), RED);
        assert_eq!(*out.get_pixel(63, 63), RED);
    }

    #[test]
    fn color_modes_match_reference() {
        for mode in [ViewMode::Difference, ViewMode::Heatmap] {
            let p = RenderParameters {
                mode,
                threshold: 0.1,
                blend: 0.7,
                ..Default::default()
            };
            assert_matches_reference(p, &gradient(17, 9, 0), &gradient(17, 9, 60));
        }
    }

    #[test]
    fn difference_of_identical_frames_is_a() {
        let a = gradient(12, 12, 5);
        let p = RenderParameters {
            mode: ViewMode::Difference,
            threshold: 0.02,
            ..Default::default()
        };
        let mut canvas = RgbaImage::new(12, 12);
        composite(&mut canvas, &a, &a, &p);
        assert_eq!(canvas, a);
    }
}
