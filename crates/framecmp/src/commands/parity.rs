use std::time::Instant;

use anyhow::Result;

use framecmp::config::ResolvedConfig;
use framecmp::media::FramePosition;

use super::open_session;
use crate::cli::PairArgs;
use crate::report::terminal;

/// `framecmp parity`: submit the pair to the server parity check.
///
/// Returns the process exit code: 0 on pass, 1 on fail.
pub async fn parity(config: ResolvedConfig, pair: &PairArgs, wait: bool) -> Result<i32> {
    let started = Instant::now();
    let session = open_session(&config, pair, FramePosition::default()).await?;
    let outcome = session.request_parity(wait).await?;
    terminal::print_parity_line(&outcome, started.elapsed());
    Ok(if outcome.passed { 0 } else { 1 })
}
