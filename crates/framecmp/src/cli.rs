use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use framecmp::config::{ExtractConfig, RenderConfig, validate_unit};
use framecmp::media::{FramePosition, MediaRef};
use framecmp::render::DiffChannel;

fn parse_threshold(s: &str) -> Result<f32, String> {
    let v: f32 = s.parse().map_err(|e| format!("{e}"))?;
    validate_unit("threshold", v)
}

fn parse_pointer(s: &str) -> Result<(f32, f32), String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got {s:?}"))?;
    let x: f32 = x.trim().parse().map_err(|e| format!("x: {e}"))?;
    let y: f32 = y.trim().parse().map_err(|e| format!("y: {e}"))?;
    Ok((validate_unit("x", x)?, validate_unit("y", y)?))
}

#[derive(Parser)]
#[command(
    name = "framecmp",
    about = "Compare images and video frames: composite, diff and parity-check"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Either two media references or a server-side pair id.
#[derive(Args, Debug)]
pub struct PairArgs {
    /// Reference media (path or URL)
    #[arg(required_unless_present = "pair")]
    pub left: Option<String>,
    /// Candidate media (path or URL)
    #[arg(required_unless_present = "pair")]
    pub right: Option<String>,
    /// Resolve the pair by id on the server
    #[arg(long, conflicts_with_all = ["left", "right"])]
    pub pair: Option<String>,
    /// Backend URL (overrides config and FRAMECMP_SERVER_URL)
    #[arg(long)]
    pub server: Option<String>,
}

pub enum PairSource {
    Refs(MediaRef, MediaRef),
    Id(String),
}

impl PairArgs {
    pub fn source(&self) -> Option<PairSource> {
        match (&self.pair, &self.left, &self.right) {
            (Some(id), _, _) => Some(PairSource::Id(id.clone())),
            (None, Some(l), Some(r)) => Some(PairSource::Refs(MediaRef::parse(l), MediaRef::parse(r))),
            _ => None,
        }
    }
}

/// Which video frame to compare; stills ignore it.
#[derive(Args, Debug, Default)]
pub struct PositionArgs {
    /// Frame index
    #[arg(long, conflicts_with = "time")]
    pub index: Option<u64>,
    /// Frame rate used to convert --index (defaults to the stream's)
    #[arg(long, requires = "index")]
    pub fps: Option<f64>,
    /// Time in seconds
    #[arg(long)]
    pub time: Option<f64>,
}

impl PositionArgs {
    pub fn position(&self) -> FramePosition {
        match (self.index, self.time) {
            (Some(index), _) => FramePosition::Index { index, fps: self.fps },
            (None, Some(t)) => FramePosition::Time(t),
            (None, None) => FramePosition::default(),
        }
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Create .framecmp/config.toml with commented defaults
    Init {
        /// Backend URL written into [server]
        #[arg(long)]
        server: Option<String>,
        /// Overwrite an existing config
        #[arg(long, short = 'f')]
        force: bool,
    },

    /// Extract one frame and save it as PNG
    Frame {
        /// Media path or URL
        source: String,
        #[command(flatten)]
        position: PositionArgs,
        /// Output PNG
        #[arg(long, short = 'o')]
        out: PathBuf,
        #[command(flatten)]
        extract: ExtractConfig,
    },

    /// Composite a pair in one visualization mode and save it as PNG
    Render {
        #[command(flatten)]
        pair: PairArgs,
        #[command(flatten)]
        position: PositionArgs,
        #[command(flatten)]
        render: RenderConfig,
        /// Pointer position X,Y (normalized); sets split and circle center
        #[arg(long, value_parser = parse_pointer)]
        pointer: Option<(f32, f32)>,
        /// Composite on the CPU
        #[arg(long)]
        no_gpu: bool,
        /// Output PNG
        #[arg(long, short = 'o')]
        out: PathBuf,
        #[command(flatten)]
        extract: ExtractConfig,
    },

    /// Diff a pair off-thread; exit 1 when pixels differ
    Diff {
        #[command(flatten)]
        pair: PairArgs,
        #[command(flatten)]
        position: PositionArgs,
        /// Difference threshold (0.0-1.0)
        #[arg(long, value_parser = parse_threshold)]
        threshold: Option<f32>,
        /// Delta measure
        #[arg(long, value_enum)]
        channel: Option<DiffChannel>,
        /// Classify with the reference diff library
        #[arg(long)]
        reference: bool,
        /// Write the diff image here
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
        /// Write the statistics JSON here
        #[arg(long)]
        stats: Option<PathBuf>,
        #[command(flatten)]
        extract: ExtractConfig,
    },

    /// Submit a pair to the server parity check; exit 1 on failure
    Parity {
        #[command(flatten)]
        pair: PairArgs,
        /// Ask the server to finish the check before answering
        #[arg(long)]
        wait: bool,
        #[command(flatten)]
        extract: ExtractConfig,
    },
}
