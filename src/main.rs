use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use barrage::target::{self, TargetState};
use barrage::{Engine, Error, GlobalConfig};

#[derive(Debug, Parser)]
#[command(name = "barrage", version, about = "Programmable load generator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Runs the pools described by a JSON config.
    Run {
        config: PathBuf,
    },
    /// Runs the dummy HTTP target.
    Target {
        #[arg(long, default_value = "127.0.0.1:8080")]
        listen: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let ctx = CancellationToken::new();

    // ── Ctrl-C cancels everything ───────────────────────────────
    tokio::spawn({
        let ctx = ctx.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, stopping");
                ctx.cancel();
            }
        }
    });

    match cli.command {
        Command::Run { config } => run(&config, ctx).await,
        Command::Target { listen } => {
            let listener = target::bind(&listen)
                .await
                .with_context(|| format!("failed to bind {listen}"))?;
            target::serve(listener, Arc::new(TargetState::default()), ctx)
                .await
                .context("dummy target failed")
        }
    }
}

async fn run(path: &Path, ctx: CancellationToken) -> anyhow::Result<()> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config = GlobalConfig::from_json(&text)
        .with_context(|| format!("invalid config {}", path.display()))?;
    let engine = Engine::from_config(&config).context("failed to build engine")?;

    match engine.run(ctx).await {
        Ok(()) => info!("done"),
        Err(Error::Cancelled) => warn!("interrupted before the pools finished"),
        Err(err) => return Err(err).context("shooting failed"),
    }
    Ok(())
}
