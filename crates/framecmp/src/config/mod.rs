pub mod extract;
pub mod resolve;
pub mod template;

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::render::{DiffChannel, Palette, RenderParameters, ViewMode};

pub use self::extract::ExtractConfig;
pub use self::resolve::{CliOverrides, EnvLayer, ResolvedConfig};
pub use self::template::{config_file_exists, write_template};

pub(crate) const CONFIG_DIR: &str = ".framecmp";
pub(crate) const CONFIG_FILE: &str = "config.toml";

pub fn validate_unit(name: &str, v: f32) -> Result<f32, String> {
    if !(0.0..=1.0).contains(&v) {
        return Err(format!("{name} must be between 0.0 and 1.0, got {v}"));
    }
    Ok(v)
}

/// Render defaults.
///
/// Fields are `Option`; `None` means "use default".
/// Serves both TOML deserialization (`[render]`) and CLI argument parsing.
#[derive(Clone, Debug, Default, PartialEq, clap::Args, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Visualization mode
    #[arg(long, value_enum)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<ViewMode>,

    /// Split position (0.0-1.0)
    #[arg(long, value_parser = parse_unit)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split: Option<f32>,

    /// Circle radius relative to the shorter side (0.0-1.0)
    #[arg(long = "radius", value_parser = parse_unit)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circle_radius: Option<f32>,

    /// Checkerboard tile size in pixels
    #[arg(long = "tile")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tile_size: Option<u32>,

    /// Difference threshold (0.0-1.0)
    #[arg(long, value_parser = parse_unit)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,

    /// Blend factor (0.0-1.0)
    #[arg(long, value_parser = parse_unit)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blend: Option<f32>,

    /// Delta measure
    #[arg(long, value_enum)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<DiffChannel>,

    /// Heatmap palette
    #[arg(long, value_enum)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub palette: Option<Palette>,

    /// Prefer the GPU compositor
    #[arg(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<bool>,
}

fn parse_unit(s: &str) -> Result<f32, String> {
    let v: f32 = s.parse().map_err(|e| format!("{e}"))?;
    validate_unit("value", v)
}

impl RenderConfig {
    /// Overlay non-None fields from `other` onto self.
    pub fn merge(&mut self, other: &RenderConfig) {
        if other.view.is_some() {
            self.view = other.view;
        }
        if other.split.is_some() {
            self.split = other.split;
        }
        if other.circle_radius.is_some() {
            self.circle_radius = other.circle_radius;
        }
        if other.tile_size.is_some() {
            self.tile_size = other.tile_size;
        }
        if other.threshold.is_some() {
            self.threshold = other.threshold;
        }
        if other.blend.is_some() {
            self.blend = other.blend;
        }
        if other.channel.is_some() {
            self.channel = other.channel;
        }
        if other.palette.is_some() {
            self.palette = other.palette;
        }
        if other.gpu.is_some() {
            self.gpu = other.gpu;
        }
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("split", self.split),
            ("circle_radius", self.circle_radius),
            ("threshold", self.threshold),
            ("blend", self.blend),
        ] {
            if let Some(v) = value {
                validate_unit(name, v).map_err(|e| anyhow::anyhow!("render.{e}"))?;
            }
        }
        if self.tile_size == Some(0) {
            bail!("render.tile_size must be >= 1");
        }
        Ok(())
    }

    /// Parameters with every set field applied over the defaults.
    pub fn parameters(&self) -> RenderParameters {
        let d = RenderParameters::default();
        RenderParameters {
            mode: self.view.unwrap_or(d.mode),
            split: self.split.unwrap_or(d.split),
            circle_center: d.circle_center,
            circle_radius: self.circle_radius.unwrap_or(d.circle_radius),
            tile_size: self.tile_size.unwrap_or(d.tile_size),
            threshold: self.threshold.unwrap_or(d.threshold),
            channel: self.channel.unwrap_or(d.channel),
            palette: self.palette.unwrap_or(d.palette),
            blend: self.blend.unwrap_or(d.blend),
        }
    }

    pub fn gpu(&self) -> bool {
        self.gpu.unwrap_or(true)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffConfig {
    /// Prefer the reference diff library for classification and visuals.
    #[serde(default)]
    pub reference_engine: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub diff: DiffConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Validate semantic constraints that serde cannot express.
    fn validate(&self) -> Result<()> {
        self.render.validate()?;
        if let Some(url) = &self.server.url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                bail!("server.url must start with http:// or https://, got {url:?}");
            }
        }
        Ok(())
    }
}

/// Load `.framecmp/config.toml`. A missing file yields the defaults.
pub fn load() -> Result<Config> {
    load_from(&Path::new(CONFIG_DIR).join(CONFIG_FILE))
}

pub fn load_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config: Config =
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;
    config.validate()?;
    Ok(config)
}
