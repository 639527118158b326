use std::sync::Arc;

use futures::future::BoxFuture;
use image::RgbaImage;

use super::{ExtractMethod, FrameExtractor};
use crate::error::ExtractError;
use crate::media::VideoSource;
use crate::media::ffmpeg::Ffmpeg;

/// One-shot ffmpeg decode at a seek point.
///
/// The accurate variant decodes from the preceding keyframe and discards
/// frames until the requested time, so the captured bitmap is the frame
/// presented at that time. The snapshot variant stops at the keyframe.
pub struct SeekGrab {
    ffmpeg: Arc<Ffmpeg>,
    accurate: bool,
}

impl SeekGrab {
    pub fn presented(ffmpeg: Arc<Ffmpeg>) -> Self {
        Self {
            ffmpeg,
            accurate: true,
        }
    }

    pub fn snapshot(ffmpeg: Arc<Ffmpeg>) -> Self {
        Self {
            ffmpeg,
            accurate: false,
        }
    }

    fn input_args(&self, input: &str, time: f64) -> Vec<String> {
        let mut args = Vec::with_capacity(6);
        if !self.accurate {
            args.push("-noaccurate_seek".to_string());
        }
        args.extend([
            "-ss".to_string(),
            format!("{time:.6}"),
            "-i".to_string(),
            input.to_string(),
        ]);
        args
    }
}

impl FrameExtractor for SeekGrab {
    fn method(&self) -> ExtractMethod {
        if self.accurate {
            ExtractMethod::FramePresented
        } else {
            ExtractMethod::Snapshot
        }
    }

    fn capture<'a>(
        &'a self,
        video: &'a VideoSource,
        time: f64,
    ) -> BoxFuture<'a, Result<RgbaImage, ExtractError>> {
        Box::pin(async move {
            let args = self.input_args(&video.input().as_arg(), time);
            self.ffmpeg.grab_png(&args, None).await
        })
    }
}
