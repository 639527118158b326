use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_SEEK_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_DECODE_TIMEOUT_MS: u64 = 4_000;
const DEFAULT_FRAME_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_DEMUX_MAX_BYTES: u64 = 50 * 1024 * 1024;
const DEFAULT_DEMUX_READ_CAP: u64 = 10 * 1024 * 1024;

/// Configuration for video frame extraction.
///
/// Fields are `Option`; `None` means "use default".
/// Serves both TOML deserialization (`[extract]`) and CLI argument parsing.
#[derive(Clone, Debug, Default, PartialEq, clap::Args, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Path to the ffmpeg binary
    #[arg(long)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ffmpeg: Option<String>,

    /// Path to the ffprobe binary
    #[arg(long)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ffprobe: Option<String>,

    /// How long to wait for a seek before capturing anyway
    #[arg(long)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seek_timeout_ms: Option<u64>,

    /// Decoder deadline of the demux path
    #[arg(long)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decode_timeout_ms: Option<u64>,

    /// Deadline for a single strategy to produce a frame
    #[arg(long)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_timeout_ms: Option<u64>,

    #[arg(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demux_max_bytes: Option<u64>,

    #[arg(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demux_read_cap: Option<u64>,
}

impl ExtractConfig {
    /// Overlay non-None fields from `other` onto self.
    pub fn merge(&mut self, other: &ExtractConfig) {
        if other.ffmpeg.is_some() {
            self.ffmpeg = other.ffmpeg.clone();
        }
        if other.ffprobe.is_some() {
            self.ffprobe = other.ffprobe.clone();
        }
        if other.seek_timeout_ms.is_some() {
            self.seek_timeout_ms = other.seek_timeout_ms;
        }
        if other.decode_timeout_ms.is_some() {
            self.decode_timeout_ms = other.decode_timeout_ms;
        }
        if other.frame_timeout_ms.is_some() {
            self.frame_timeout_ms = other.frame_timeout_ms;
        }
        if other.demux_max_bytes.is_some() {
            self.demux_max_bytes = other.demux_max_bytes;
        }
        if other.demux_read_cap.is_some() {
            self.demux_read_cap = other.demux_read_cap;
        }
    }

    pub fn ffmpeg(&self) -> &str {
        self.ffmpeg.as_deref().unwrap_or("ffmpeg")
    }

    pub fn ffprobe(&self) -> &str {
        self.ffprobe.as_deref().unwrap_or("ffprobe")
    }

    pub fn seek_timeout(&self) -> Duration {
        Duration::from_millis(self.seek_timeout_ms.unwrap_or(DEFAULT_SEEK_TIMEOUT_MS))
    }

    pub fn decode_timeout(&self) -> Duration {
        Duration::from_millis(self.decode_timeout_ms.unwrap_or(DEFAULT_DECODE_TIMEOUT_MS))
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms.unwrap_or(DEFAULT_FRAME_TIMEOUT_MS))
    }

    pub fn demux_max_bytes(&self) -> u64 {
        self.demux_max_bytes.unwrap_or(DEFAULT_DEMUX_MAX_BYTES)
    }

    pub fn demux_read_cap(&self) -> u64 {
        self.demux_read_cap.unwrap_or(DEFAULT_DEMUX_READ_CAP)
    }
}
