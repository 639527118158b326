use std::fmt;

use serde::{Deserialize, Serialize};

/// Visualization mode of the compositor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViewMode {
    #[default]
    Split,
    Difference,
    Heatmap,
    CircleReveal,
    Checkerboard,
}

impl ViewMode {
    pub const ALL: [ViewMode; 5] = [
        Self::Split,
        Self::Difference,
        Self::Heatmap,
        Self::CircleReveal,
        Self::Checkerboard,
    ];

    /// Integer code shared with the GPU shader's mode uniform.
    pub fn code(self) -> u32 {
        match self {
            Self::Split => 0,
            Self::Difference => 1,
            Self::Heatmap => 2,
            Self::CircleReveal => 3,
            Self::Checkerboard => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Split => "split",
            Self::Difference => "difference",
            Self::Heatmap => "heatmap",
            Self::CircleReveal => "circle-reveal",
            Self::Checkerboard => "checkerboard",
        }
    }
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the per-pixel delta is measured.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiffChannel {
    /// `length(A.rgb - B.rgb) / sqrt(3)`
    #[default]
    Rgb,
    /// `abs(luma(A) - luma(B))`, BT.709 weights
    Luma,
}

impl DiffChannel {
    pub fn code(self) -> u32 {
        match self {
            Self::Rgb => 0,
            Self::Luma => 1,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Self::Rgb => Self::Luma,
            Self::Luma => Self::Rgb,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rgb => "rgb",
            Self::Luma => "luma",
        }
    }
}

impl fmt::Display for DiffChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Heatmap color ramp.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Palette {
    #[default]
    RedGreen,
    BlueOrange,
    Grayscale,
}

impl Palette {
    pub fn code(self) -> u32 {
        match self {
            Self::RedGreen => 0,
            Self::BlueOrange => 1,
            Self::Grayscale => 2,
        }
    }

    pub fn next(self) -> Self {
        match self {
            Self::RedGreen => Self::BlueOrange,
            Self::BlueOrange => Self::Grayscale,
            Self::Grayscale => Self::RedGreen,
        }
    }
}

/// Everything the compositor reads on each render call.
///
/// Normalized fields are in `0..=1`. `circle_radius` is relative to
/// `min(width, height)` of the canvas; `tile_size` is in canvas pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderParameters {
    pub mode: ViewMode,
    pub split: f32,
    pub circle_center: (f32, f32),
    pub circle_radius: f32,
    pub tile_size: u32,
    pub threshold: f32,
    pub channel: DiffChannel,
    pub palette: Palette,
    pub blend: f32,
}

impl Default for RenderParameters {
    fn default() -> Self {
        Self {
            mode: ViewMode::Split,
            split: 0.5,
            circle_center: (0.5, 0.5),
            circle_radius: 0.25,
            tile_size: 32,
            threshold: 0.02,
            channel: DiffChannel::Rgb,
            palette: Palette::RedGreen,
            blend: 1.0,
        }
    }
}

impl RenderParameters {
    /// Clamp every field into its legal range.
    pub fn clamped(mut self) -> Self {
        self.split = clamp_unit(self.split);
        self.circle_center = (clamp_unit(self.circle_center.0), clamp_unit(self.circle_center.1));
        self.circle_radius = clamp_unit(self.circle_radius);
        self.threshold = clamp_unit(self.threshold);
        self.blend = clamp_unit(self.blend);
        self.tile_size = self.tile_size.max(1);
        self
    }
}

fn clamp_unit(v: f32) -> f32 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
}
