use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};

use framecmp::config::ResolvedConfig;
use framecmp::media::FramePosition;

use super::open_session;
use crate::cli::PairArgs;
use crate::report::terminal;

/// `framecmp diff`: run the off-thread diff and export its results.
///
/// Returns the process exit code: 0 when no pixel differs, 1 otherwise.
pub async fn diff(
    config: ResolvedConfig,
    pair: &PairArgs,
    position: FramePosition,
    out: Option<&Path>,
    stats: Option<&Path>,
) -> Result<i32> {
    let started = Instant::now();
    let mut session = open_session(&config, pair, position).await?;
    session.run_diff()?;
    session.next_diff_result().await.context("Diff failed")?;

    if let Some(path) = out {
        session.export_diff_image(path)?;
    }
    if let Some(path) = stats {
        session.export_stats(path)?;
    }

    let report = session.stats_report()?;
    terminal::print_diff_line(&report, started.elapsed());
    Ok(if report.diff_count > 0 { 1 } else { 0 })
}
