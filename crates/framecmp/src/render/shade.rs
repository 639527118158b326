//! Per-pixel math shared by the raster compositor, the diff worker and (as a
//! WGSL mirror) the GPU shader. Colors are normalized `0..=1` floats.

use super::params::{DiffChannel, Palette, RenderParameters, ViewMode};

const INV_SQRT3: f32 = 0.577_350_26;

pub type Rgb = [f32; 3];

/// BT.709 luma.
pub fn luma(c: Rgb) -> f32 {
    0.2126 * c[0] + 0.7152 * c[1] + 0.0722 * c[2]
}

/// Normalized per-pixel delta in `0..=1`. Symmetric in `a` and `b`.
pub fn delta(a: Rgb, b: Rgb, channel: DiffChannel) -> f32 {
    match channel {
        DiffChannel::Rgb => {
            let dr = a[0] - b[0];
            let dg = a[1] - b[1];
            let db = a[2] - b[2];
            (dr * dr + dg * dg + db * db).sqrt() * INV_SQRT3
        }
        DiffChannel::Luma => (luma(a) - luma(b)).abs(),
    }
}

/// [`delta`] over RGBA8 pixels.
pub fn delta_u8(a: &[u8], b: &[u8], channel: DiffChannel) -> f32 {
    delta(to_rgb(a), to_rgb(b), channel)
}

pub fn to_rgb(px: &[u8]) -> Rgb {
    [
        px[0] as f32 / 255.0,
        px[1] as f32 / 255.0,
        px[2] as f32 / 255.0,
    ]
}

pub fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn mix(a: Rgb, b: Rgb, t: f32) -> Rgb {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
    ]
}

/// Red tint shown where the delta crosses the threshold.
pub fn diff_tint(d: f32) -> Rgb {
    [0.25 + 0.75 * d, 0.0, 0.0]
}

/// Heatmap ramp for a delta in `0..=1`.
pub fn palette(d: f32, palette: Palette) -> Rgb {
    let d = d.clamp(0.0, 1.0);
    match palette {
        // low = green, high = warm red
        Palette::RedGreen => mix([0.1, 0.8, 0.2], [1.0, 0.2, 0.05], d),
        Palette::BlueOrange => mix([0.1, 0.3, 1.0], [1.0, 0.55, 0.0], d),
        Palette::Grayscale => [d, d, d],
    }
}

/// Difference-mode color for one pixel pair.
pub fn shade_difference(a: Rgb, b: Rgb, params: &RenderParameters) -> Rgb {
    let d = delta(a, b, params.channel);
    if d <= params.threshold {
        return a;
    }
    mix(a, diff_tint(d), params.blend)
}

/// Heatmap-mode color for one pixel pair.
pub fn shade_heatmap(a: Rgb, b: Rgb, params: &RenderParameters) -> Rgb {
    let d = delta(a, b, params.channel);
    mix(a, palette(d, params.palette), d * params.blend)
}

/// Normalized coordinate of a pixel center.
pub fn uv(x: u32, y: u32, width: u32, height: u32) -> (f32, f32) {
    (
        (x as f32 + 0.5) / width as f32,
        (y as f32 + 0.5) / height as f32,
    )
}

/// Whether the pixel center lies strictly inside the reveal circle.
///
/// Distances are measured in UV space scaled so that one unit equals
/// `min(width, height)`; for square canvases this is plain UV distance.
pub fn inside_circle(uv: (f32, f32), params: &RenderParameters, width: u32, height: u32) -> bool {
    let min_side = width.min(height).max(1) as f32;
    let sx = width as f32 / min_side;
    let sy = height as f32 / min_side;
    let dx = (uv.0 - params.circle_center.0) * sx;
    let dy = (uv.1 - params.circle_center.1) * sy;
    (dx * dx + dy * dy).sqrt() < params.circle_radius
}

/// Checkerboard parity: `true` shows B.
pub fn checker_shows_b(x: u32, y: u32, tile_size: u32) -> bool {
    let t = tile_size.max(1);
    ((x / t) + (y / t)) % 2 == 1
}

/// Which source a geometric mode picks for a pixel. `None` for the
/// per-pixel color modes.
pub fn pick_b(x: u32, y: u32, width: u32, height: u32, params: &RenderParameters) -> Option<bool> {
    let p = uv(x, y, width, height);
    match params.mode {
        ViewMode::Split => Some(p.0 >= params.split),
        ViewMode::CircleReveal => Some(inside_circle(p, params, width, height)),
        ViewMode::Checkerboard => Some(checker_shows_b(x, y, params.tile_size)),
        ViewMode::Difference | ViewMode::Heatmap => None,
    }
}

/// Reference shading of a single output pixel, RGBA8 in and out.
pub fn shade_pixel(
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    a: [u8; 4],
    b: [u8; 4],
    params: &RenderParameters,
) -> [u8; 4] {
    if let Some(show_b) = pick_b(x, y, width, height, params) {
        return if show_b { b } else { a };
    }
    let (ca, cb) = (to_rgb(&a), to_rgb(&b));
    let c = match params.mode {
        ViewMode::Heatmap => shade_heatmap(ca, cb, params),
        _ => shade_difference(ca, cb, params),
    };
    [to_u8(c[0]), to_u8(c[1]), to_u8(c[2]), a[3]]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(mode: ViewMode) -> RenderParameters {
        RenderParameters {
            mode,
            ..Default::default()
        }
    }

    #[test]
    fn delta_is_symmetric() {
        let samples: [[u8; 3]; 5] = [
            [0, 0, 0],
            [255, 255, 255],
            [12, 200, 99],
            [255, 0, 128],
            [77, 77, 78],
        ];
        for a in &samples {
            for b in &samples {
                for channel in [DiffChannel::Rgb, DiffChannel::Luma] {
                    let da = delta_u8(a, b, channel);
                    let db = delta_u8(b, a, channel);
                    assert_eq!(da, db, "{a:?} vs {b:?} ({channel})");
                }
            }
        }
    }

    #[test]
    fn delta_extremes() {
        assert_eq!(delta([0.0; 3], [0.0; 3], DiffChannel::Rgb), 0.0);
        let d = delta([0.0; 3], [1.0; 3], DiffChannel::Rgb);
        assert!((d - 1.0).abs() < 1e-6);
        let l = delta([0.0; 3], [1.0; 3], DiffChannel::Luma);
        assert!((l - 1.0).abs() < 1e-6);
    }

    #[test]
    fn luma_uses_bt709_weights() {
        assert!((luma([1.0, 0.0, 0.0]) - 0.2126).abs() < 1e-6);
        assert!((luma([0.0, 1.0, 0.0]) - 0.7152).abs() < 1e-6);
        assert!((luma([0.0, 0.0, 1.0]) - 0.0722).abs() < 1e-6);
    }

    #[test]
    fn difference_below_threshold_keeps_a() {
        let p = RenderParameters {
            threshold: 0.5,
            ..params(ViewMode::Difference)
        };
        let a = [0.2, 0.4, 0.6];
        assert_eq!(shade_difference(a, [0.25, 0.4, 0.6], &p), a);
    }

    #[test]
    fn difference_at_exact_threshold_keeps_a() {
        let (a, b) = ([0.2, 0.4, 0.6], [0.7, 0.4, 0.6]);
        let p = RenderParameters {
            threshold: delta(a, b, DiffChannel::Rgb),
            blend: 1.0,
            ..params(ViewMode::Difference)
        };
        assert_eq!(shade_difference(a, b, &p), a);
    }

    #[test]
    fn difference_blend_zero_is_original() {
        let p = RenderParameters {
            threshold: 0.0,
            blend: 0.0,
            ..params(ViewMode::Difference)
        };
        let a = [0.2, 0.4, 0.6];
        assert_eq!(shade_difference(a, [1.0, 0.0, 0.0], &p), a);
    }

    #[test]
    fn difference_blend_one_is_pure_tint() {
        let p = RenderParameters {
            threshold: 0.0,
            blend: 1.0,
            ..params(ViewMode::Difference)
        };
        let c = shade_difference([0.0; 3], [1.0; 3], &p);
        assert!((c[0] - 1.0).abs() < 1e-6);
        assert_eq!(c[1], 0.0);
        assert_eq!(c[2], 0.0);
    }

    #[test]
    fn heatmap_zero_delta_is_original() {
        let p = params(ViewMode::Heatmap);
        let a = [0.3, 0.3, 0.3];
        assert_eq!(shade_heatmap(a, a, &p), a);
    }

    #[test]
    fn palettes_span_their_ramps() {
        assert_eq!(palette(0.0, Palette::RedGreen), [0.1, 0.8, 0.2]);
        let high = palette(1.0, Palette::BlueOrange);
        for (got, want) in high.iter().zip([1.0, 0.55, 0.0]) {
            assert!((got - want).abs() < 1e-6, "{high:?}");
        }
        assert_eq!(palette(0.5, Palette::Grayscale), [0.5, 0.5, 0.5]);
        // out-of-range deltas clamp to the ends of the ramp
        assert_eq!(palette(-1.0, Palette::Grayscale), [0.0, 0.0, 0.0]);
    }

    #[test]
    fn checker_parity() {
        assert!(!checker_shows_b(0, 0, 10));
        assert!(checker_shows_b(10, 0, 10));
        assert!(checker_shows_b(0, 10, 10));
        assert!(!checker_shows_b(10, 10, 10));
        assert!(!checker_shows_b(9, 9, 10));
    }

    #[test]
    fn circle_boundary_is_strict() {
        let w = 100;
        let at = |radius: f32| RenderParameters {
            circle_radius: radius,
            ..params(ViewMode::CircleReveal)
        };
        let p = uv(75, 50, w, w);
        let (dx, dy) = (p.0 - 0.5, p.1 - 0.5);
        let dist = (dx * dx + dy * dy).sqrt();
        assert!(inside_circle(p, &at(dist + 1e-4), w, w));
        assert!(!inside_circle(p, &at(dist - 1e-4), w, w));
        assert!(!inside_circle(p, &at(dist), w, w));
    }

    #[test]
    fn circle_radius_is_relative_to_short_side() {
        // 200x100: a radius of 0.5 spans 50 px in both directions.
        let p = RenderParameters {
            circle_radius: 0.5,
            ..params(ViewMode::CircleReveal)
        };
        assert!(inside_circle(uv(100 + 48, 50, 200, 100), &p, 200, 100));
        assert!(!inside_circle(uv(100 + 52, 50, 200, 100), &p, 200, 100));
    }
}
