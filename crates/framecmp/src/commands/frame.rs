use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};

use framecmp::config::ResolvedConfig;
use framecmp::media::{FramePosition, FrameSource, MediaRef};
use framecmp::session::export;

use crate::report::terminal;

/// `framecmp frame`: extract one frame and write it as PNG.
pub async fn frame(config: ResolvedConfig, source: &str, position: FramePosition, out: &Path) -> Result<()> {
    let started = Instant::now();
    let frames = FrameSource::detect(&config.extract).await;
    let media = MediaRef::parse(source);
    let handle = frames
        .load(&media)
        .await
        .with_context(|| format!("Failed to load {source}"))?;
    let frame = frames
        .frame(&handle, position)
        .await
        .with_context(|| format!("Failed to extract a frame from {source}"))?;
    export::write_png(out, frame.image())?;
    terminal::print_frame_line(source, &frame, out, started.elapsed());
    Ok(())
}
