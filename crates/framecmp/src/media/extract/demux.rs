use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use image::RgbaImage;
use tokio::io::AsyncReadExt;
use tracing::debug;

use super::mp4::SampleTable;
use super::{ExtractMethod, FrameExtractor};
use crate::config::ExtractConfig;
use crate::error::ExtractError;
use crate::media::ffmpeg::Ffmpeg;
use crate::media::{VideoInput, VideoSource};

/// Reads a bounded prefix of the file, locates the target sample in the
/// container and decodes from its sync sample on ffmpeg's stdin.
///
/// Only progressive MP4 (`moov` ahead of the samples) can succeed; anything
/// else fails fast so the chain moves on.
pub struct Demux {
    ffmpeg: Arc<Ffmpeg>,
    http: reqwest::Client,
    max_bytes: u64,
    read_cap: u64,
    decode_timeout: Duration,
}

impl Demux {
    pub fn new(ffmpeg: Arc<Ffmpeg>, config: &ExtractConfig) -> Self {
        Self {
            ffmpeg,
            http: reqwest::Client::new(),
            max_bytes: config.demux_max_bytes(),
            read_cap: config.demux_read_cap(),
            decode_timeout: config.decode_timeout(),
        }
    }

    /// Total size of the source, when known.
    async fn source_size(&self, input: &VideoInput) -> Result<Option<u64>, ExtractError> {
        match input {
            VideoInput::File(path) => tokio::fs::metadata(path)
                .await
                .map(|m| Some(m.len()))
                .map_err(|e| ExtractError::Unsupported(format!("cannot stat {}: {e}", path.display()))),
            VideoInput::Url(url) => {
                let response = self
                    .http
                    .head(url)
                    .send()
                    .await
                    .map_err(|e| ExtractError::Unsupported(format!("HEAD {url} failed: {e}")))?;
                Ok(response
                    .headers()
                    .get(reqwest::header::CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok()))
            }
        }
    }

    /// First `read_cap` bytes of the source.
    async fn read_prefix(&self, input: &VideoInput) -> Result<Vec<u8>, ExtractError> {
        let cap = self.read_cap as usize;
        match input {
            VideoInput::File(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .map_err(|e| ExtractError::Unsupported(format!("cannot open {}: {e}", path.display())))?;
                let mut buf = Vec::new();
                file.take(self.read_cap)
                    .read_to_end(&mut buf)
                    .await
                    .map_err(|e| ExtractError::Decode(e.to_string()))?;
                Ok(buf)
            }
            VideoInput::Url(url) => {
                let mut response = self
                    .http
                    .get(url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| ExtractError::Unsupported(format!("GET {url} failed: {e}")))?;
                let mut buf = Vec::new();
                while buf.len() < cap {
                    match response.chunk().await {
                        Ok(Some(chunk)) => buf.extend_from_slice(&chunk),
                        Ok(None) => break,
                        Err(e) => return Err(ExtractError::Decode(format!("read {url}: {e}"))),
                    }
                }
                buf.truncate(cap);
                Ok(buf)
            }
        }
    }
}

impl FrameExtractor for Demux {
    fn method(&self) -> ExtractMethod {
        ExtractMethod::Demux
    }

    fn capture<'a>(
        &'a self,
        video: &'a VideoSource,
        time: f64,
    ) -> BoxFuture<'a, Result<RgbaImage, ExtractError>> {
        Box::pin(async move {
            let input = video.input();
            if let Some(size) = self.source_size(input).await? {
                if size > self.max_bytes {
                    return Err(ExtractError::TooLarge {
                        size,
                        limit: self.max_bytes,
                    });
                }
            }

            let mut prefix = self.read_prefix(input).await?;
            let table = SampleTable::parse(&prefix).map_err(|e| ExtractError::Unsupported(e.to_string()))?;
            let loc = table
                .locate(time)
                .map_err(|e| ExtractError::Unsupported(e.to_string()))?;
            if loc.end > prefix.len() as u64 {
                return Err(ExtractError::Unsupported(format!(
                    "sample {} ends at byte {}, past the {}-byte read cap",
                    loc.index,
                    loc.end,
                    prefix.len()
                )));
            }
            debug!(
                source = video.name(),
                sample = loc.index,
                sync_sample = loc.sync_index,
                bytes = loc.end,
                "decoding demuxed sample"
            );
            prefix.truncate(loc.end as usize);

            let args = [
                "-i".to_string(),
                "pipe:0".to_string(),
                "-ss".to_string(),
                format!("{:.6}", loc.decode_time),
            ];
            let decode = self.ffmpeg.grab_png(&args, Some(prefix.into()));
            match tokio::time::timeout(self.decode_timeout, decode).await {
                Ok(result) => result,
                Err(_) => Err(ExtractError::Timeout(self.decode_timeout.as_millis() as u64)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::VideoInfo;
    use crate::media::extract::mp4::tests::sample_movie;

    fn demux(config: ExtractConfig) -> Demux {
        Demux::new(Arc::new(Ffmpeg::new("framecmp-no-such-ffmpeg", "ffprobe")), &config)
    }

    fn file_video(path: std::path::PathBuf) -> VideoSource {
        VideoSource::new(
            "clip.mp4",
            VideoInput::File(path),
            VideoInfo {
                width: 4,
                height: 4,
                fps: 10.0,
                duration: Some(1.0),
            },
        )
    }

    #[tokio::test]
    async fn oversized_source_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, vec![0u8; 100]).unwrap();
        let d = demux(ExtractConfig {
            demux_max_bytes: Some(10),
            ..Default::default()
        });
        let err = d.capture(&file_video(path), 0.0).await.unwrap_err();
        assert!(matches!(err, ExtractError::TooLarge { size: 100, limit: 10 }));
    }

    #[tokio::test]
    async fn non_mp4_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.webm");
        std::fs::write(&path, b"\x1a\x45\xdf\xa3 matroska").unwrap();
        let err = demux(ExtractConfig::default())
            .capture(&file_video(path), 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Unsupported(ref m) if m.contains("moov")), "{err}");
    }

    #[tokio::test]
    async fn sample_beyond_prefix_is_unsupported() {
        // Samples live at byte 1000 and later, past the end of this file.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, sample_movie()).unwrap();
        let err = demux(ExtractConfig::default())
            .capture(&file_video(path), 0.75)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Unsupported(ref m) if m.contains("read cap")), "{err}");
    }

    #[tokio::test]
    async fn read_cap_bounds_the_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, vec![7u8; 4096]).unwrap();
        let d = demux(ExtractConfig {
            demux_read_cap: Some(1000),
            ..Default::default()
        });
        let prefix = d.read_prefix(&VideoInput::File(path)).await.unwrap();
        assert_eq!(prefix.len(), 1000);
    }
}
