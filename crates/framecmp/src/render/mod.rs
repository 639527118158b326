#[cfg(feature = "gpu")]
pub mod gpu;
pub mod params;
pub mod raster;
pub mod shade;

use std::fmt;

use image::RgbaImage;
use tracing::{debug, info};
#[cfg(feature = "gpu")]
use tracing::warn;

use crate::error::CompareError;
use crate::media::MediaFrame;

pub use self::params::{DiffChannel, Palette, RenderParameters, ViewMode};

/// Which compositing path a [`Compositor`] settled on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Gpu,
    Raster,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gpu => f.write_str("gpu"),
            Self::Raster => f.write_str("raster"),
        }
    }
}

enum Backend {
    #[cfg(feature = "gpu")]
    Gpu(Box<gpu::GpuCompositor>),
    Raster,
}

/// Composites two frames according to [`RenderParameters`].
///
/// The backend is chosen once at construction. The output canvas is owned
/// here and reused between calls; it is reallocated only when frame A's
/// dimensions change.
pub struct Compositor {
    backend: Backend,
    params: RenderParameters,
    canvas: RgbaImage,
}

impl Compositor {
    /// Try to acquire a GPU context when `prefer_gpu` is set, falling back to
    /// the raster path for the lifetime of this compositor.
    pub fn new(prefer_gpu: bool) -> Self {
        let backend = if prefer_gpu {
            Self::acquire_gpu()
        } else {
            Backend::Raster
        };
        let compositor = Self {
            backend,
            params: RenderParameters::default(),
            canvas: RgbaImage::new(0, 0),
        };
        info!(backend = %compositor.backend_kind(), "compositor ready");
        compositor
    }

    /// Raster-only compositor.
    pub fn raster() -> Self {
        Self::new(false)
    }

    #[cfg(feature = "gpu")]
    fn acquire_gpu() -> Backend {
        match gpu::GpuCompositor::acquire() {
            Some(gpu) => Backend::Gpu(Box::new(gpu)),
            None => {
                info!("no GPU adapter available, compositing on the CPU");
                Backend::Raster
            }
        }
    }

    #[cfg(not(feature = "gpu"))]
    fn acquire_gpu() -> Backend {
        info!("built without GPU support, compositing on the CPU");
        Backend::Raster
    }

    pub fn backend_kind(&self) -> BackendKind {
        match self.backend {
            #[cfg(feature = "gpu")]
            Backend::Gpu(_) => BackendKind::Gpu,
            Backend::Raster => BackendKind::Raster,
        }
    }

    pub fn set_mode(&mut self, mode: ViewMode) {
        self.params.mode = mode;
    }

    /// Replace the parameters; out-of-range values are clamped.
    pub fn set_parameters(&mut self, params: RenderParameters) {
        self.params = params.clamped();
    }

    pub fn parameters(&self) -> &RenderParameters {
        &self.params
    }

    /// Last rendered image.
    pub fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }

    /// Composite `a` and `b`. The canvas follows `a`'s size; `b` must match it.
    pub fn render(&mut self, a: &MediaFrame, b: &MediaFrame) -> Result<&RgbaImage, CompareError> {
        let (a, b) = (a.image(), b.image());
        if a.dimensions() != b.dimensions() {
            return Err(CompareError::mismatch(a.dimensions(), b.dimensions()));
        }
        if self.canvas.dimensions() != a.dimensions() {
            debug!(width = a.width(), height = a.height(), "resizing canvas");
            self.canvas = RgbaImage::new(a.width(), a.height());
        }

        match &mut self.backend {
            #[cfg(feature = "gpu")]
            Backend::Gpu(gpu) => {
                if let Err(e) = gpu.composite(&mut self.canvas, a, b, &self.params) {
                    warn!(error = %e, "GPU composite failed, switching to CPU compositing");
                    self.backend = Backend::Raster;
                    raster::composite(&mut self.canvas, a, b, &self.params);
                }
            }
            Backend::Raster => raster::composite(&mut self.canvas, a, b, &self.params),
        }
        Ok(&self.canvas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn frame(w: u32, h: u32, px: [u8; 4]) -> MediaFrame {
        MediaFrame::still(RgbaImage::from_pixel(w, h, Rgba(px)))
    }

    #[test]
    fn raster_backend_when_gpu_not_preferred() {
        assert_eq!(Compositor::raster().backend_kind(), BackendKind::Raster);
    }

    #[test]
    fn canvas_follows_frame_a() {
        let mut c = Compositor::raster();
        c.render(&frame(8, 4, [0; 4]), &frame(8, 4, [0; 4])).unwrap();
        assert_eq!(c.canvas().dimensions(), (8, 4));
        c.render(&frame(3, 5, [0; 4]), &frame(3, 5, [0; 4])).unwrap();
        assert_eq!(c.canvas().dimensions(), (3, 5));
    }

    #[test]
    fn mismatched_b_is_rejected() {
        let mut c = Compositor::raster();
        let err = c
            .render(&frame(8, 4, [0; 4]), &frame(4, 4, [0; 4]))
            .unwrap_err();
        assert!(matches!(err, CompareError::DimensionMismatch { .. }));
    }

    #[test]
    fn set_parameters_clamps() {
        let mut c = Compositor::raster();
        c.set_parameters(RenderParameters {
            split: 4.0,
            ..Default::default()
        });
        assert_eq!(c.parameters().split, 1.0);
        c.set_mode(ViewMode::Heatmap);
        assert_eq!(c.parameters().mode, ViewMode::Heatmap);
    }

    #[test]
    fn split_scenario_red_blue() {
        let mut c = Compositor::raster();
        c.set_parameters(RenderParameters {
            mode: ViewMode::Split,
            split: 0.25,
            ..Default::default()
        });
        let out = c
            .render(&frame(100, 100, [255, 0, 0, 255]), &frame(100, 100, [0, 0, 255, 255]))
            .unwrap();
        assert_eq!(out.get_pixel(24, 10).0, [255, 0, 0, 255]);
        assert_eq!(out.get_pixel(25, 10).0, [0, 0, 255, 255]);
    }

    #[test]
    fn circle_containment_around_radius() {
        // P6: B strictly inside the radius, A elsewhere, checked at radius +/- epsilon.
        let mut c = Compositor::raster();
        let a = frame(50, 50, [10, 10, 10, 255]);
        let b = frame(50, 50, [240, 240, 240, 255]);
        let (x, y) = (40, 25);
        let p = shade::uv(x, y, 50, 50);
        let (dx, dy) = (p.0 - 0.5, p.1 - 0.5);
        let dist = (dx * dx + dy * dy).sqrt();
        for (radius, want_b) in [(dist + 1e-3, true), (dist - 1e-3, false)] {
            c.set_parameters(RenderParameters {
                mode: ViewMode::CircleReveal,
                circle_center: (0.5, 0.5),
                circle_radius: radius,
                ..Default::default()
            });
            let out = c.render(&a, &b).unwrap();
            let want = if want_b { 240 } else { 10 };
            assert_eq!(out.get_pixel(x, y).0[0], want, "radius {radius}");
        }
    }
}
