//! Frame extraction strategies and the fallback chain that runs them.
//!
//! Strategies are tried in preference order. A failed seek, a failed
//! capture or a capture timeout moves on to the next strategy; a seek that
//! merely takes too long is logged and the capture proceeds anyway.

pub mod demux;
pub mod mp4;
pub mod seek;
pub mod stream;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use image::RgbaImage;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::ffmpeg::Ffmpeg;
use super::{MediaFrame, VideoSource};
use crate::config::ExtractConfig;
use crate::error::{CompareError, ExtractError};

/// Identifies an extraction strategy, most accurate first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractMethod {
    /// Accurate decode of the frame presented at the requested time.
    FramePresented,
    /// Forward reads from a decoder kept running per source.
    LiveStream,
    /// Container parse plus decode of the streamed file prefix.
    Demux,
    /// Nearest keyframe.
    Snapshot,
}

impl ExtractMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FramePresented => "frame-presented",
            Self::LiveStream => "live-stream",
            Self::Demux => "demux",
            Self::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for ExtractMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One way of turning a video position into a bitmap.
pub trait FrameExtractor: Send + Sync {
    fn method(&self) -> ExtractMethod;

    /// Position the strategy at `time`. The default only validates the time.
    fn seek<'a>(&'a self, video: &'a VideoSource, time: f64) -> BoxFuture<'a, Result<(), ExtractError>> {
        Box::pin(async move { video.check_time(time) })
    }

    /// Capture the frame at `time`, after [`seek`](Self::seek).
    fn capture<'a>(
        &'a self,
        video: &'a VideoSource,
        time: f64,
    ) -> BoxFuture<'a, Result<RgbaImage, ExtractError>>;
}

/// Ordered strategies, assembled once per session.
pub struct ExtractorChain {
    extractors: Vec<Arc<dyn FrameExtractor>>,
    seek_timeout: Duration,
    frame_timeout: Duration,
}

impl ExtractorChain {
    pub fn new(extractors: Vec<Arc<dyn FrameExtractor>>, config: &ExtractConfig) -> Self {
        Self {
            extractors,
            seek_timeout: config.seek_timeout(),
            frame_timeout: config.frame_timeout(),
        }
    }

    /// Build the chain from what is installed. Without ffmpeg the chain is
    /// empty and every video frame request fails with the reason.
    pub async fn detect(ffmpeg: Arc<Ffmpeg>, config: &ExtractConfig) -> Self {
        if !ffmpeg.available().await {
            warn!(path = config.ffmpeg(), "ffmpeg not available, video frames cannot be extracted");
            return Self::new(Vec::new(), config);
        }
        let extractors: Vec<Arc<dyn FrameExtractor>> = vec![
            Arc::new(seek::SeekGrab::presented(Arc::clone(&ffmpeg))),
            Arc::new(stream::LiveStream::new(Arc::clone(&ffmpeg))),
            Arc::new(demux::Demux::new(Arc::clone(&ffmpeg), config)),
            Arc::new(seek::SeekGrab::snapshot(ffmpeg)),
        ];
        let chain = Self::new(extractors, config);
        info!(methods = ?chain.methods(), "frame extractors ready");
        chain
    }

    pub fn methods(&self) -> Vec<ExtractMethod> {
        self.extractors.iter().map(|e| e.method()).collect()
    }

    /// Extract the frame at `time`, falling through the strategies in order.
    pub async fn extract(&self, video: &VideoSource, time: f64) -> Result<MediaFrame, CompareError> {
        let mut failures = Vec::new();
        for extractor in &self.extractors {
            let method = extractor.method();
            let started = Instant::now();

            match tokio::time::timeout(self.seek_timeout, extractor.seek(video, time)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(%method, time, error = %e, "seek failed, trying next method");
                    failures.push((method, e));
                    continue;
                }
                Err(_) => {
                    warn!(
                        %method,
                        time,
                        timeout_ms = self.seek_timeout.as_millis() as u64,
                        "seek did not settle in time, capturing anyway"
                    );
                }
            }

            match tokio::time::timeout(self.frame_timeout, extractor.capture(video, time)).await {
                Ok(Ok(image)) => {
                    debug!(
                        %method,
                        time,
                        source = video.name(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "frame extracted"
                    );
                    return Ok(MediaFrame::extracted(image, time, method));
                }
                Ok(Err(e)) => {
                    warn!(%method, time, error = %e, "extraction failed, trying next method");
                    failures.push((method, e));
                }
                Err(_) => {
                    let ms = self.frame_timeout.as_millis() as u64;
                    warn!(%method, time, timeout_ms = ms, "extraction timed out, trying next method");
                    failures.push((method, ExtractError::Timeout(ms)));
                }
            }
        }
        Err(CompareError::Extraction { time, failures })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::media::{FramePosition, FrameSource, MediaHandle, VideoInfo, VideoInput};

    /// Scripted strategy that records every call it receives.
    pub(crate) struct Scripted {
        pub method: ExtractMethod,
        pub seek: fn() -> Result<(), ExtractError>,
        pub capture: fn() -> Result<RgbaImage, ExtractError>,
        pub seek_delay: Duration,
        pub calls: Mutex<Vec<(&'static str, f64)>>,
    }

    impl Scripted {
        pub(crate) fn ok(method: ExtractMethod) -> Self {
            Self {
                method,
                seek: || Ok(()),
                capture: || Ok(RgbaImage::from_pixel(4, 4, image::Rgba([9, 9, 9, 255]))),
                seek_delay: Duration::ZERO,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn failing(method: ExtractMethod) -> Self {
            Self {
                capture: || Err(ExtractError::Decode("scripted".into())),
                ..Self::ok(method)
            }
        }

        pub(crate) fn calls(&self) -> Vec<(&'static str, f64)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl FrameExtractor for Scripted {
        fn method(&self) -> ExtractMethod {
            self.method
        }

        fn seek<'a>(&'a self, _video: &'a VideoSource, time: f64) -> BoxFuture<'a, Result<(), ExtractError>> {
            Box::pin(async move {
                self.calls.lock().unwrap().push(("seek", time));
                if !self.seek_delay.is_zero() {
                    tokio::time::sleep(self.seek_delay).await;
                }
                (self.seek)()
            })
        }

        fn capture<'a>(
            &'a self,
            _video: &'a VideoSource,
            time: f64,
        ) -> BoxFuture<'a, Result<RgbaImage, ExtractError>> {
            Box::pin(async move {
                self.calls.lock().unwrap().push(("capture", time));
                (self.capture)()
            })
        }
    }

    pub(crate) fn video(fps: f64, duration: f64) -> VideoSource {
        VideoSource::new(
            "clip.mp4",
            VideoInput::File("clip.mp4".into()),
            VideoInfo {
                width: 4,
                height: 4,
                fps,
                duration: Some(duration),
            },
        )
    }

    fn chain(extractors: Vec<Arc<dyn FrameExtractor>>) -> ExtractorChain {
        ExtractorChain::new(extractors, &ExtractConfig::default())
    }

    #[tokio::test]
    async fn index_48_at_24fps_seeks_to_two_seconds() {
        let scripted = Arc::new(Scripted::ok(ExtractMethod::FramePresented));
        let source = FrameSource::new(
            chain(vec![scripted.clone()]),
            Arc::new(Ffmpeg::new("ffmpeg", "ffprobe")),
        );
        let handle = MediaHandle::Video(Arc::new(video(30.0, 10.0)));
        let frame = source
            .frame(
                &handle,
                FramePosition::Index {
                    index: 48,
                    fps: Some(24.0),
                },
            )
            .await
            .unwrap();
        assert_eq!(scripted.calls(), vec![("seek", 2.0), ("capture", 2.0)]);
        assert_eq!(frame.timestamp(), Some(2.0));
        assert_eq!(frame.method(), Some(ExtractMethod::FramePresented));
    }

    #[tokio::test]
    async fn falls_through_to_next_method() {
        let first = Arc::new(Scripted::failing(ExtractMethod::FramePresented));
        let second = Arc::new(Scripted::ok(ExtractMethod::Demux));
        let frame = chain(vec![first.clone(), second.clone()])
            .extract(&video(25.0, 4.0), 1.0)
            .await
            .unwrap();
        assert_eq!(frame.method(), Some(ExtractMethod::Demux));
        assert_eq!(first.calls().len(), 2);
        assert_eq!(second.calls().len(), 2);
    }

    #[tokio::test]
    async fn seek_failure_skips_capture() {
        let first = Arc::new(Scripted {
            seek: || Err(ExtractError::Seek("no".into())),
            ..Scripted::ok(ExtractMethod::LiveStream)
        });
        let second = Arc::new(Scripted::ok(ExtractMethod::Snapshot));
        let frame = chain(vec![first.clone(), second])
            .extract(&video(25.0, 4.0), 1.0)
            .await
            .unwrap();
        assert_eq!(first.calls(), vec![("seek", 1.0)]);
        assert_eq!(frame.method(), Some(ExtractMethod::Snapshot));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_seek_proceeds_to_capture() {
        let slow = Arc::new(Scripted {
            seek_delay: Duration::from_secs(30),
            ..Scripted::ok(ExtractMethod::FramePresented)
        });
        let frame = chain(vec![slow.clone()])
            .extract(&video(25.0, 4.0), 0.5)
            .await
            .unwrap();
        assert_eq!(slow.calls(), vec![("seek", 0.5), ("capture", 0.5)]);
        assert_eq!(frame.method(), Some(ExtractMethod::FramePresented));
    }

    #[tokio::test]
    async fn all_methods_failing_reports_each() {
        let err = chain(vec![
            Arc::new(Scripted::failing(ExtractMethod::FramePresented)),
            Arc::new(Scripted::failing(ExtractMethod::Snapshot)),
        ])
        .extract(&video(25.0, 4.0), 3.0)
        .await
        .unwrap_err();
        let CompareError::Extraction { time, failures } = err else {
            panic!("expected extraction error");
        };
        assert_eq!(time, 3.0);
        let methods: Vec<_> = failures.iter().map(|(m, _)| *m).collect();
        assert_eq!(methods, vec![ExtractMethod::FramePresented, ExtractMethod::Snapshot]);
    }

    #[tokio::test]
    async fn empty_chain_fails() {
        let err = chain(Vec::new())
            .extract(&video(25.0, 4.0), 0.0)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no extractors available"));
    }

    #[tokio::test]
    async fn detect_without_ffmpeg_is_empty() {
        let config = ExtractConfig {
            ffmpeg: Some("framecmp-no-such-ffmpeg".into()),
            ..Default::default()
        };
        let ffmpeg = Arc::new(Ffmpeg::from_config(&config));
        assert!(ExtractorChain::detect(ffmpeg, &config).await.methods().is_empty());
    }

    #[test]
    fn method_names() {
        assert_eq!(ExtractMethod::FramePresented.to_string(), "frame-presented");
        assert_eq!(ExtractMethod::LiveStream.to_string(), "live-stream");
    }
}
