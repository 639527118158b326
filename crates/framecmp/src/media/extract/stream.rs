use std::sync::Arc;

use futures::future::BoxFuture;
use image::RgbaImage;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout};
use tokio::sync::Mutex;
use tracing::debug;

use super::{ExtractMethod, FrameExtractor};
use crate::error::ExtractError;
use crate::media::VideoSource;
use crate::media::ffmpeg::Ffmpeg;

/// Forward distance (seconds) still cheaper to decode through than to restart.
const MAX_FORWARD_SKIP: f64 = 5.0;

/// Running decoders kept at once: one per side of the loaded pair.
const MAX_DECODERS: usize = 2;

/// Frame bookkeeping of a running decoder: frame `n` is presented at
/// `start + n / fps`.
#[derive(Clone, Copy, Debug, PartialEq)]
struct StreamClock {
    start: f64,
    fps: f64,
    frames_read: u64,
}

impl StreamClock {
    fn frame_index(&self, time: f64) -> u64 {
        ((time - self.start) * self.fps + 1e-6).max(0.0).floor() as u64
    }

    /// Whether `time` can be reached by reading forward.
    fn reachable(&self, time: f64) -> bool {
        time >= self.start
            && self.frame_index(time) >= self.frames_read
            && time - self.start - self.frames_read as f64 / self.fps <= MAX_FORWARD_SKIP
    }

    fn frames_until(&self, time: f64) -> u64 {
        self.frame_index(time).saturating_sub(self.frames_read)
    }
}

struct Decoder {
    _child: Child,
    stdout: ChildStdout,
    clock: StreamClock,
    frame_len: usize,
    /// Cleared while a read is in flight; a cancelled read leaves the pipe
    /// mid-frame and the decoder must be replaced.
    aligned: bool,
}

impl Decoder {
    async fn read_frame(&mut self, buf: &mut [u8]) -> Result<(), ExtractError> {
        self.aligned = false;
        self.stdout
            .read_exact(buf)
            .await
            .map_err(|e| ExtractError::Decode(format!("live stream ended: {e}")))?;
        self.clock.frames_read += 1;
        self.aligned = true;
        Ok(())
    }
}

/// Least-recently-used map from source to decoder. Evicted decoders are
/// dropped, which kills their ffmpeg process.
struct DecoderCache<T> {
    capacity: usize,
    /// Most recently used last.
    entries: Vec<(String, T)>,
}

impl<T> DecoderCache<T> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Vec::with_capacity(capacity),
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn get(&self, key: &str) -> Option<&T> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Look up `key` and mark it most recently used.
    fn touch(&mut self, key: &str) -> Option<&mut T> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        let entry = self.entries.remove(pos);
        self.entries.push(entry);
        self.entries.last_mut().map(|(_, v)| v)
    }

    fn insert(&mut self, key: String, value: T) {
        self.remove(&key);
        while self.entries.len() >= self.capacity.max(1) {
            let (evicted, _) = self.entries.remove(0);
            debug!(source = %evicted, "evicting live decoder");
        }
        self.entries.push((key, value));
    }

    fn remove(&mut self, key: &str) {
        self.entries.retain(|(k, _)| k != key);
    }
}

/// Keeps one ffmpeg decoder per source streaming raw RGBA frames, for at
/// most the two most recently used sources.
///
/// Forward seeks read and discard frames from the running decoder; backward
/// or distant seeks restart it at the new position.
pub struct LiveStream {
    ffmpeg: Arc<Ffmpeg>,
    decoders: Mutex<DecoderCache<Decoder>>,
}

impl LiveStream {
    pub fn new(ffmpeg: Arc<Ffmpeg>) -> Self {
        Self {
            ffmpeg,
            decoders: Mutex::new(DecoderCache::new(MAX_DECODERS)),
        }
    }

    fn spawn(&self, video: &VideoSource, time: f64) -> Result<Decoder, ExtractError> {
        let info = video.info();
        let mut child = self.ffmpeg.spawn_raw(&video.input().as_arg(), time)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractError::Process("decoder has no stdout".into()))?;
        Ok(Decoder {
            _child: child,
            stdout,
            clock: StreamClock {
                start: time,
                fps: info.fps,
                frames_read: 0,
            },
            frame_len: info.width as usize * info.height as usize * 4,
            aligned: true,
        })
    }
}

impl FrameExtractor for LiveStream {
    fn method(&self) -> ExtractMethod {
        ExtractMethod::LiveStream
    }

    fn seek<'a>(&'a self, video: &'a VideoSource, time: f64) -> BoxFuture<'a, Result<(), ExtractError>> {
        Box::pin(async move {
            video.check_time(time)?;
            if video.info().fps <= 0.0 {
                return Err(ExtractError::Unsupported("unknown frame rate".into()));
            }
            let key = video.input().as_arg();
            let mut decoders = self.decoders.lock().await;

            let reusable = decoders
                .get(&key)
                .is_some_and(|d| d.aligned && d.clock.reachable(time));
            if !reusable {
                debug!(source = video.name(), time, running = decoders.len(), "starting live decoder");
                decoders.insert(key, self.spawn(video, time)?);
                return Ok(());
            }

            let Some(decoder) = decoders.touch(&key) else {
                return Err(ExtractError::Seek("live decoder vanished".into()));
            };
            let skip = decoder.clock.frames_until(time);
            debug!(source = video.name(), time, skip, "reading forward");
            let mut scratch = vec![0u8; decoder.frame_len];
            for _ in 0..skip {
                if let Err(e) = decoder.read_frame(&mut scratch).await {
                    decoders.remove(&key);
                    return Err(e);
                }
            }
            Ok(())
        })
    }

    fn capture<'a>(
        &'a self,
        video: &'a VideoSource,
        _time: f64,
    ) -> BoxFuture<'a, Result<RgbaImage, ExtractError>> {
        Box::pin(async move {
            let key = video.input().as_arg();
            let mut decoders = self.decoders.lock().await;
            let Some(decoder) = decoders.touch(&key).filter(|d| d.aligned) else {
                return Err(ExtractError::Unsupported("no live decoder positioned".into()));
            };
            let mut buf = vec![0u8; decoder.frame_len];
            if let Err(e) = decoder.read_frame(&mut buf).await {
                decoders.remove(&key);
                return Err(e);
            }
            let info = video.info();
            RgbaImage::from_raw(info.width, info.height, buf)
                .ok_or_else(|| ExtractError::Decode("short frame".into()))
        })
    }
}
