use std::process::Stdio;
use std::sync::Arc;

use image::RgbaImage;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::debug;

use super::VideoInfo;
use crate::config::ExtractConfig;
use crate::error::ExtractError;

/// ffmpeg/ffprobe process launcher.
#[derive(Clone, Debug)]
pub struct Ffmpeg {
    ffmpeg: String,
    ffprobe: String,
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

impl Ffmpeg {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    pub fn from_config(config: &ExtractConfig) -> Self {
        Self::new(config.ffmpeg(), config.ffprobe())
    }

    /// Whether `ffmpeg -version` runs successfully.
    pub async fn available(&self) -> bool {
        let status = Command::new(&self.ffmpeg)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;
        debug!(path = %self.ffmpeg, ok = ?status.as_ref().map(|s| s.success()), "ffmpeg -version");
        status.is_ok_and(|s| s.success())
    }

    /// Probe the first video stream of `input`.
    pub async fn probe(&self, input: &str) -> Result<VideoInfo, ExtractError> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,r_frame_rate,avg_frame_rate,duration:format=duration",
                "-of",
                "json",
            ])
            .arg(input)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ExtractError::Process(format!("failed to run {}: {e}", self.ffprobe)))?;
        if !output.status.success() {
            return Err(ExtractError::Decode(stderr_tail(&output.stderr)));
        }
        parse_probe(&output.stdout)
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-hide_banner", "-loglevel", "error"]).kill_on_drop(true);
        cmd
    }

    /// Run ffmpeg with `input_args` and decode the single PNG frame it writes
    /// to stdout. `stdin`, when given, is streamed to the process (`-i pipe:0`).
    pub async fn grab_png(
        &self,
        input_args: &[String],
        stdin: Option<Arc<[u8]>>,
    ) -> Result<RgbaImage, ExtractError> {
        let mut cmd = self.command();
        cmd.args(input_args)
            .args(["-frames:v", "1", "-f", "image2pipe", "-c:v", "png", "pipe:1"])
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd
            .spawn()
            .map_err(|e| ExtractError::Process(format!("failed to spawn {}: {e}", self.ffmpeg)))?;

        // ffmpeg may stop reading once it has its frame; a broken pipe is fine.
        let writer = match (stdin, child.stdin.take()) {
            (Some(bytes), Some(mut pipe)) => Some(tokio::spawn(async move {
                let _ = pipe.write_all(&bytes).await;
            })),
            _ => None,
        };

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ExtractError::Process(e.to_string()))?;
        if let Some(writer) = writer {
            let _ = writer.await;
        }

        // A truncated input makes ffmpeg exit non-zero after emitting the frame.
        if output.stdout.is_empty() {
            let reason = if output.status.success() {
                "no frame decoded".to_string()
            } else {
                stderr_tail(&output.stderr)
            };
            return Err(ExtractError::Decode(reason));
        }
        image::load_from_memory_with_format(&output.stdout, image::ImageFormat::Png)
            .map(|i| i.to_rgba8())
            .map_err(|e| ExtractError::Decode(e.to_string()))
    }

    /// Start a decoder streaming raw RGBA frames from `start` seconds.
    pub fn spawn_raw(&self, input: &str, start: f64) -> Result<Child, ExtractError> {
        self.command()
            .arg("-ss")
            .arg(format!("{start:.6}"))
            .args(["-i", input])
            .args(["-an", "-f", "rawvideo", "-pix_fmt", "rgba", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ExtractError::Process(format!("failed to spawn {}: {e}", self.ffmpeg)))
    }
}

fn parse_probe(json: &[u8]) -> Result<VideoInfo, ExtractError> {
    let probe: ProbeOutput = serde_json::from_slice(json)
        .map_err(|e| ExtractError::Decode(format!("unreadable ffprobe output: {e}")))?;
    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| ExtractError::Unsupported("no video stream".into()))?;
    let (Some(width), Some(height)) = (stream.width, stream.height) else {
        return Err(ExtractError::Unsupported("video stream has no dimensions".into()));
    };
    let fps = [stream.avg_frame_rate.as_deref(), stream.r_frame_rate.as_deref()]
        .into_iter()
        .flatten()
        .filter_map(parse_rate)
        .next()
        .unwrap_or(0.0);
    let duration = stream
        .duration
        .or(probe.format.and_then(|f| f.duration))
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0);
    Ok(VideoInfo {
        width,
        height,
        fps,
        duration,
    })
}

/// Parse an ffprobe rate like `30000/1001`. Zero or malformed rates are `None`.
fn parse_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num.trim().parse::<f64>().ok()? / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

fn stderr_tail(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .map(|l| l.trim().to_string())
        .unwrap_or_else(|| "process failed without output".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ffprobe_json() {
        let json = br#"{
            "programs": [],
            "streams": [{"width": 1920, "height": 1080, "r_frame_rate": "30000/1001", "avg_frame_rate": "24/1"}],
            "format": {"duration": "12.500000"}
        }"#;
        let info = parse_probe(json).unwrap();
        assert_eq!((info.width, info.height), (1920, 1080));
        assert_eq!(info.fps, 24.0);
        assert_eq!(info.duration, Some(12.5));
    }

    #[test]
    fn falls_back_to_r_frame_rate() {
        let json = br#"{"streams": [{"width": 2, "height": 2, "r_frame_rate": "25/1", "avg_frame_rate": "0/0", "duration": "N/A"}]}"#;
        let info = parse_probe(json).unwrap();
        assert_eq!(info.fps, 25.0);
        assert_eq!(info.duration, None);
    }

    #[test]
    fn no_stream_is_unsupported() {
        let err = parse_probe(br#"{"streams": []}"#).unwrap_err();
        assert!(matches!(err, ExtractError::Unsupported(_)));
    }

    #[test]
    fn rates() {
        assert!((parse_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_rate("0/0"), None);
        assert_eq!(parse_rate("60"), Some(60.0));
        assert_eq!(parse_rate("bogus"), None);
    }

    #[test]
    fn stderr_tail_picks_last_line() {
        assert_eq!(stderr_tail(b"first\nclip.mp4: Invalid data\n\n"), "clip.mp4: Invalid data");
        assert_eq!(stderr_tail(b""), "process failed without output");
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let ff = Ffmpeg::new("framecmp-no-such-ffmpeg", "framecmp-no-such-ffprobe");
        assert!(!ff.available().await);
        assert!(matches!(ff.probe("a.mp4").await, Err(ExtractError::Process(_))));
    }
}
