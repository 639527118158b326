use anyhow::{Context, Result};

use super::extract::ExtractConfig;
use super::{Config, RenderConfig, load, validate_unit};
use crate::render::RenderParameters;

/// Values extracted from the CLI that participate in the merge.
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub render: RenderConfig,
    pub extract: ExtractConfig,
    pub server_url: Option<String>,
    /// `Some(true)` forces the reference diff library.
    pub reference_engine: Option<bool>,
}

/// Values read from `FRAMECMP_*` environment variables.
#[derive(Clone, Debug, Default)]
pub struct EnvLayer {
    pub server_url: Option<String>,
    pub threshold: Option<f32>,
}

impl EnvLayer {
    pub fn from_env() -> Result<Self> {
        let server_url = std::env::var("FRAMECMP_SERVER_URL").ok();
        let threshold = std::env::var("FRAMECMP_DIFF_THRESHOLD")
            .ok()
            .map(|v| v.parse::<f32>())
            .transpose()
            .context("FRAMECMP_DIFF_THRESHOLD must be a valid float")?;
        Ok(Self {
            server_url,
            threshold,
        })
    }
}

/// Fully resolved config after CLI > env > file > defaults merge.
#[derive(Clone, Debug)]
pub struct ResolvedConfig {
    pub params: RenderParameters,
    pub prefer_gpu: bool,
    pub extract: ExtractConfig,
    pub prefer_reference: bool,
    pub server_url: Option<String>,
}

impl ResolvedConfig {
    pub fn new(cli: CliOverrides) -> Result<Self> {
        let file = load().context("Failed to load .framecmp/config.toml")?;
        let env = EnvLayer::from_env()?;
        Self::from_layers(file, env, cli)
    }

    pub fn from_layers(file: Config, env: EnvLayer, cli: CliOverrides) -> Result<Self> {
        // Render: file base, env threshold, then CLI overlay
        let mut render = file.render;
        if env.threshold.is_some() {
            render.threshold = env.threshold;
        }
        render.merge(&cli.render);
        if let Some(t) = render.threshold {
            validate_unit("threshold", t).map_err(|e| anyhow::anyhow!("{e}"))?;
        }

        let mut extract = file.extract;
        extract.merge(&cli.extract);

        let server_url = cli.server_url.or(env.server_url).or(file.server.url);
        let prefer_reference = cli.reference_engine.unwrap_or(file.diff.reference_engine);

        Ok(Self {
            params: render.parameters(),
            prefer_gpu: render.gpu(),
            extract,
            prefer_reference,
            server_url,
        })
    }
}
