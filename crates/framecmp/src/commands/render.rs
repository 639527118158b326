use std::path::Path;
use std::time::Instant;

use anyhow::Result;

use framecmp::config::ResolvedConfig;
use framecmp::media::FramePosition;
use framecmp::session::{InputEvent, export};

use super::open_session;
use crate::cli::PairArgs;
use crate::report::terminal;

/// `framecmp render`: composite one frame of the pair and write it as PNG.
pub async fn render(
    config: ResolvedConfig,
    pair: &PairArgs,
    position: FramePosition,
    pointer: Option<(f32, f32)>,
    out: &Path,
) -> Result<()> {
    let started = Instant::now();
    let mut session = open_session(&config, pair, position).await?;
    if let Some((x, y)) = pointer {
        session.handle_input(InputEvent::Pointer { x, y })?;
    }
    let mode = session.parameters().mode;
    let backend = session.backend_kind();
    let canvas = session.render()?;
    export::write_png(out, canvas)?;
    terminal::print_render_line(mode, backend, out, started.elapsed());
    Ok(())
}
