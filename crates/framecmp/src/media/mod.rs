//! Frame Source Abstraction: turns a media reference into a handle and a
//! handle plus a position into a decoded frame.

pub mod extract;
pub mod ffmpeg;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use image::RgbaImage;
use tracing::{debug, info};

use crate::config::ExtractConfig;
use crate::error::{CompareError, ExtractError};

use self::extract::{ExtractMethod, ExtractorChain};
use self::ffmpeg::Ffmpeg;

static SPILL_COUNTER: AtomicU64 = AtomicU64::new(0);

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp", "tif", "tiff", "ico"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "mov", "webm", "mkv", "avi", "ogv", "ts"];

/// Where a media source lives.
#[derive(Clone, Debug, PartialEq)]
pub enum MediaRef {
    Url(String),
    File(PathBuf),
    /// Already-read bytes, e.g. a file dropped into the session.
    Memory { name: String, bytes: Arc<[u8]> },
}

impl MediaRef {
    /// `http://` and `https://` become URLs, anything else a local path.
    pub fn parse(s: &str) -> Self {
        if s.starts_with("http://") || s.starts_with("https://") {
            Self::Url(s.to_string())
        } else {
            Self::File(PathBuf::from(s))
        }
    }

    fn extension(&self) -> Option<String> {
        let name = match self {
            Self::Url(url) => url_path(url),
            Self::File(path) => return path.extension().map(|e| e.to_string_lossy().to_lowercase()),
            Self::Memory { name, .. } => name.as_str(),
        };
        Path::new(name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
    }
}

impl fmt::Display for MediaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => f.write_str(url),
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Memory { name, .. } => f.write_str(name),
        }
    }
}

/// Strip scheme, query and fragment from a URL, keeping the path.
fn url_path(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, r)| r);
    let rest = rest.split(['?', '#']).next().unwrap_or(rest);
    rest.split_once('/').map_or("", |(_, p)| p)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    fn from_extension(ext: Option<&str>) -> Option<Self> {
        let ext = ext?;
        if IMAGE_EXTENSIONS.contains(&ext) {
            Some(Self::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext) {
            Some(Self::Video)
        } else {
            None
        }
    }

    /// Sniff the leading bytes; anything `image` does not recognize is
    /// treated as video.
    pub fn sniff(bytes: &[u8]) -> Self {
        match image::guess_format(bytes) {
            Ok(_) => Self::Image,
            Err(_) => Self::Video,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

/// One decoded frame. Cheap to clone; the bitmap is shared.
#[derive(Clone, Debug)]
pub struct MediaFrame {
    image: Arc<RgbaImage>,
    timestamp: Option<f64>,
    method: Option<ExtractMethod>,
}

impl MediaFrame {
    pub fn still(image: RgbaImage) -> Self {
        Self::shared(Arc::new(image))
    }

    pub fn shared(image: Arc<RgbaImage>) -> Self {
        Self {
            image,
            timestamp: None,
            method: None,
        }
    }

    pub fn extracted(image: RgbaImage, timestamp: f64, method: ExtractMethod) -> Self {
        Self {
            image: Arc::new(image),
            timestamp: Some(timestamp),
            method: Some(method),
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn shared_image(&self) -> Arc<RgbaImage> {
        Arc::clone(&self.image)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Presentation time the frame was extracted at; `None` for stills.
    pub fn timestamp(&self) -> Option<f64> {
        self.timestamp
    }

    /// Strategy that produced the frame; `None` for stills.
    pub fn method(&self) -> Option<ExtractMethod> {
        self.method
    }
}

/// Stream properties reported by ffprobe.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Seconds; `None` when the container does not say.
    pub duration: Option<f64>,
}

/// Which frame of a video to extract.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FramePosition {
    /// Frame number. `fps` overrides the stream's frame rate.
    Index { index: u64, fps: Option<f64> },
    /// Seconds from the start.
    Time(f64),
}

impl Default for FramePosition {
    fn default() -> Self {
        Self::Time(0.0)
    }
}

impl FramePosition {
    /// Convert to seconds (`time = index / fps`) and clamp into the
    /// stream: a position at or past the end lands on the last frame.
    pub fn resolve(self, info: &VideoInfo) -> f64 {
        let fps = |over: Option<f64>| over.filter(|f| *f > 0.0).unwrap_or(info.fps);
        let time = match self {
            Self::Index { index, fps: over } => {
                let fps = fps(over);
                if fps > 0.0 { index as f64 / fps } else { 0.0 }
            }
            Self::Time(t) if t.is_finite() => t.max(0.0),
            Self::Time(_) => 0.0,
        };
        match info.duration {
            Some(d) if time >= d => {
                let frame = if info.fps > 0.0 { 1.0 / info.fps } else { 0.0 };
                (d - frame).max(0.0)
            }
            _ => time,
        }
    }
}

/// What ffmpeg reads a video from.
#[derive(Clone, Debug, PartialEq)]
pub enum VideoInput {
    File(PathBuf),
    Url(String),
}

impl VideoInput {
    /// Argument passed to `-i`.
    pub fn as_arg(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Url(url) => url.clone(),
        }
    }
}

/// Temp file holding an in-memory video for ffmpeg, removed on drop.
#[derive(Debug)]
struct SpillFile(PathBuf);

impl SpillFile {
    async fn write(bytes: &[u8], ext: &str) -> std::io::Result<Self> {
        let id = SPILL_COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!("framecmp-{}-{id}.{ext}", std::process::id()));
        tokio::fs::write(&path, bytes).await?;
        Ok(Self(path))
    }
}

impl Drop for SpillFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

/// A probed video ready for frame extraction.
#[derive(Debug)]
pub struct VideoSource {
    name: String,
    input: VideoInput,
    info: VideoInfo,
    _spill: Option<SpillFile>,
}

impl VideoSource {
    pub fn new(name: impl Into<String>, input: VideoInput, info: VideoInfo) -> Self {
        Self {
            name: name.into(),
            input,
            info,
            _spill: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input(&self) -> &VideoInput {
        &self.input
    }

    pub fn info(&self) -> &VideoInfo {
        &self.info
    }

    /// Reject times outside the stream.
    pub fn check_time(&self, time: f64) -> Result<(), ExtractError> {
        if !time.is_finite() || time < 0.0 {
            return Err(ExtractError::Seek(format!("invalid time {time}")));
        }
        match self.info.duration {
            Some(d) if time > d => Err(ExtractError::Seek(format!(
                "{time:.3}s is past the end ({d:.3}s)"
            ))),
            _ => Ok(()),
        }
    }
}

/// A loaded source: a decoded still or a probed video.
#[derive(Clone, Debug)]
pub enum MediaHandle {
    Still(Arc<RgbaImage>),
    Video(Arc<VideoSource>),
}

impl MediaHandle {
    pub fn kind(&self) -> MediaKind {
        match self {
            Self::Still(_) => MediaKind::Image,
            Self::Video(_) => MediaKind::Video,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Still(image) => image.dimensions(),
            Self::Video(video) => (video.info.width, video.info.height),
        }
    }
}

/// Loads media and extracts frames through the extractor chain.
pub struct FrameSource {
    chain: ExtractorChain,
    ffmpeg: Arc<Ffmpeg>,
    http: reqwest::Client,
}

impl FrameSource {
    /// Probe the available tools once and build the extractor chain.
    pub async fn detect(config: &ExtractConfig) -> Self {
        let ffmpeg = Arc::new(Ffmpeg::from_config(config));
        let chain = ExtractorChain::detect(Arc::clone(&ffmpeg), config).await;
        Self::new(chain, ffmpeg)
    }

    pub fn new(chain: ExtractorChain, ffmpeg: Arc<Ffmpeg>) -> Self {
        Self {
            chain,
            ffmpeg,
            http: reqwest::Client::new(),
        }
    }

    pub fn chain(&self) -> &ExtractorChain {
        &self.chain
    }

    pub async fn load(&self, source: &MediaRef) -> Result<MediaHandle, CompareError> {
        let name = source.to_string();
        let ext = source.extension();
        let by_ext = MediaKind::from_extension(ext.as_deref());
        debug!(source = %name, kind = ?by_ext, "loading media");

        let bytes: Arc<[u8]> = match (source, by_ext) {
            (MediaRef::File(path), Some(MediaKind::Video)) => {
                return self.open_video(name, VideoInput::File(path.clone()), None).await;
            }
            (MediaRef::Url(url), Some(MediaKind::Video)) => {
                return self.open_video(name, VideoInput::Url(url.clone()), None).await;
            }
            (MediaRef::File(path), _) => tokio::fs::read(path)
                .await
                .map_err(|e| CompareError::load(&name, e))?
                .into(),
            (MediaRef::Url(url), _) => self.fetch(&name, url).await?,
            (MediaRef::Memory { bytes, .. }, _) => Arc::clone(bytes),
        };

        let kind = by_ext.unwrap_or_else(|| MediaKind::sniff(&bytes));
        match kind {
            MediaKind::Image => {
                let image = decode_image(&name, bytes).await?;
                info!(source = %name, width = image.width(), height = image.height(), "image loaded");
                Ok(MediaHandle::Still(Arc::new(image)))
            }
            MediaKind::Video => {
                let ext = ext.unwrap_or_else(|| "bin".to_string());
                let spill = SpillFile::write(&bytes, &ext)
                    .await
                    .map_err(|e| CompareError::load(&name, e))?;
                let input = VideoInput::File(spill.0.clone());
                self.open_video(name, input, Some(spill)).await
            }
        }
    }

    async fn fetch(&self, name: &str, url: &str) -> Result<Arc<[u8]>, CompareError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CompareError::load(name, e))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| CompareError::load(name, e))?;
        Ok(Arc::from(bytes.as_ref()))
    }

    async fn open_video(
        &self,
        name: String,
        input: VideoInput,
        spill: Option<SpillFile>,
    ) -> Result<MediaHandle, CompareError> {
        let info = self
            .ffmpeg
            .probe(&input.as_arg())
            .await
            .map_err(|e| CompareError::load(&name, e))?;
        info!(
            source = %name,
            width = info.width,
            height = info.height,
            fps = info.fps,
            duration = ?info.duration,
            "video probed"
        );
        Ok(MediaHandle::Video(Arc::new(VideoSource {
            name,
            input,
            info,
            _spill: spill,
        })))
    }

    /// Frame at `position`. Stills ignore the position and always return the
    /// same bitmap.
    pub async fn frame(
        &self,
        handle: &MediaHandle,
        position: FramePosition,
    ) -> Result<MediaFrame, CompareError> {
        match handle {
            MediaHandle::Still(image) => Ok(MediaFrame::shared(Arc::clone(image))),
            MediaHandle::Video(video) => {
                let time = position.resolve(video.info());
                self.chain.extract(video, time).await
            }
        }
    }
}

async fn decode_image(name: &str, bytes: Arc<[u8]>) -> Result<RgbaImage, CompareError> {
    tokio::task::spawn_blocking(move || image::load_from_memory(&bytes).map(|i| i.to_rgba8()))
        .await
        .map_err(|e| CompareError::load(name, e))?
        .map_err(|e| CompareError::load(name, e))
}
