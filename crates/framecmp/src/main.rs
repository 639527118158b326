mod cli;
mod commands;
mod report;

use clap::Parser;
use framecmp::config::{CliOverrides, RenderConfig, ResolvedConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("framecmp=info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = cli::Cli::parse();

    match cli.command {
        cli::Command::Init { server, force } => {
            commands::init(server.as_deref(), force)?;
        }
        cli::Command::Frame {
            source,
            position,
            out,
            extract,
        } => {
            let overrides = CliOverrides {
                extract,
                ..Default::default()
            };
            let config = ResolvedConfig::new(overrides)?;
            commands::frame(config, &source, position.position(), &out).await?;
        }
        cli::Command::Render {
            pair,
            position,
            mut render,
            pointer,
            no_gpu,
            out,
            extract,
        } => {
            if no_gpu {
                render.gpu = Some(false);
            }
            let overrides = CliOverrides {
                render,
                extract,
                server_url: pair.server.clone(),
                reference_engine: None,
            };
            let config = ResolvedConfig::new(overrides)?;
            commands::render(config, &pair, position.position(), pointer, &out).await?;
        }
        cli::Command::Diff {
            pair,
            position,
            threshold,
            channel,
            reference,
            out,
            stats,
            extract,
        } => {
            let overrides = CliOverrides {
                render: RenderConfig {
                    threshold,
                    channel,
                    ..Default::default()
                },
                extract,
                server_url: pair.server.clone(),
                reference_engine: reference.then_some(true),
            };
            let config = ResolvedConfig::new(overrides)?;
            let code = commands::diff(config, &pair, position.position(), out.as_deref(), stats.as_deref()).await?;
            std::process::exit(code);
        }
        cli::Command::Parity {
            pair,
            wait,
            extract,
        } => {
            let overrides = CliOverrides {
                extract,
                server_url: pair.server.clone(),
                ..Default::default()
            };
            let config = ResolvedConfig::new(overrides)?;
            let code = commands::parity(config, &pair, wait).await?;
            std::process::exit(code);
        }
    }

    Ok(())
}
