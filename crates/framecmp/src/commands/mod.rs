mod diff;
mod frame;
mod init;
mod parity;
mod render;

use anyhow::{Context, Result, bail};

use framecmp::config::ResolvedConfig;
use framecmp::media::{FramePosition, FrameSource};
use framecmp::server::ServerClient;
use framecmp::session::{Session, SessionOptions};

use crate::cli::{PairArgs, PairSource};

pub use self::diff::diff;
pub use self::frame::frame;
pub use self::init::init;
pub use self::parity::parity;
pub use self::render::render;

/// Build a session from the resolved config and load the requested pair.
async fn open_session(config: &ResolvedConfig, pair: &PairArgs, position: FramePosition) -> Result<Session> {
    let frames = FrameSource::detect(&config.extract).await;
    let mut session = Session::new(
        frames,
        SessionOptions {
            prefer_gpu: config.prefer_gpu,
            prefer_reference: config.prefer_reference,
            params: config.params,
        },
    );
    if let Some(url) = &config.server_url {
        session = session.with_server(ServerClient::new(url.as_str()));
    }

    match pair.source() {
        Some(PairSource::Refs(left, right)) => {
            let what = format!("{left} / {right}");
            session
                .load_pair_at(left, right, position)
                .await
                .with_context(|| format!("Failed to load {what}"))?;
        }
        Some(PairSource::Id(id)) => {
            if config.server_url.is_none() {
                bail!("--pair needs a server: pass --server, set FRAMECMP_SERVER_URL or [server] url");
            }
            session
                .load_server_pair(&id, position)
                .await
                .with_context(|| format!("Failed to load pair {id}"))?;
        }
        None => bail!("Provide LEFT and RIGHT, or --pair ID"),
    }
    Ok(session)
}
