//! `sideload` command-line entry point.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()                 -- TOML, defaults for anything missing
//!  └─ clean_work_root()             -- leftovers from a previous run
//!  └─ command
//!       ├─ check      -> TcpSessionFactory::connect (once)
//!       ├─ heartbeat  -> HeartbeatSession thread until Ctrl-C
//!       └─ install    -> heartbeat thread
//!                        └─ first live session
//!                        └─ InstallPipeline::spawn (blocking pool)
//! ```
//!
//! Every outcome reaches the user through the [`ChannelSink`]: it logs, and
//! forwards a [`Completion`] that the async loops below wait on.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sideload_agent::application::heartbeat::{HeartbeatHandle, HeartbeatSession};
use sideload_agent::application::install_app::InstallTrigger;
use sideload_agent::application::pipeline::InstallPipeline;
use sideload_agent::application::ports::ServiceProvider;
use sideload_agent::application::session::SessionSlot;
use sideload_agent::application::stage_transfer::{clean_work_root, StagingTransfer};
use sideload_agent::infrastructure::archive::ZipArchiver;
use sideload_agent::infrastructure::reporting::{ChannelSink, Completion, LogProgress};
use sideload_agent::infrastructure::storage::config::{load_config, AgentConfig};
use sideload_agent::infrastructure::transport::TcpSessionFactory;
use sideload_core::ErrorCode;

#[derive(Debug, Parser)]
#[command(name = "sideload", version, about = "Install apps on a paired device")]
struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Prove the pairing with the device and exit.
    Check,
    /// Keep the device session alive until Ctrl-C.
    Heartbeat,
    /// Package, upload and install an app (`.app` directory or `.ipa` file).
    Install { path: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref()).context("cannot load config")?;

    // Initialise structured logging; RUST_LOG wins over the config file.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.agent.log_level)),
        )
        .init();

    info!("sideload {} starting", env!("CARGO_PKG_VERSION"));

    let work_root = config.staging.work_root();
    if let Err(e) = clean_work_root(&work_root) {
        warn!("could not clean work directory {}: {e}", work_root.display());
    }

    let factory = Arc::new(TcpSessionFactory::from_config(&config).context("invalid device settings")?);

    match cli.command {
        Command::Check => check(factory).await,
        Command::Heartbeat => heartbeat(&config, factory).await,
        Command::Install { path } => install(&config, factory, work_root, path).await,
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

async fn check(factory: Arc<TcpSessionFactory>) -> anyhow::Result<()> {
    let session = tokio::task::spawn_blocking(move || factory.connect()).await?;
    match session {
        Ok(session) => {
            println!("paired: {}", session.describe());
            Ok(())
        }
        Err(e) => {
            let code = e.error_code();
            Err(anyhow::Error::new(e).context(code.to_string()))
        }
    }
}

async fn heartbeat(config: &AgentConfig, factory: Arc<TcpSessionFactory>) -> anyhow::Result<()> {
    let slot = Arc::new(SessionSlot::new());
    let (sink, mut completions) = ChannelSink::new();
    let handle = HeartbeatSession::new(factory, slot, Arc::new(sink), config.heartbeat.retry_policy())
        .spawn()
        .context("cannot start heartbeat thread")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            completion = completions.recv() => match completion {
                Some(Completion::Heartbeat(Some(ErrorCode::HeartbeatCircuitOpen))) | None => break,
                Some(_) => {}
            },
        }
    }

    shutdown(handle).await
}

async fn install(
    config: &AgentConfig,
    factory: Arc<TcpSessionFactory>,
    work_root: PathBuf,
    path: PathBuf,
) -> anyhow::Result<()> {
    let slot = Arc::new(SessionSlot::new());
    let (sink, mut completions) = ChannelSink::new();
    let sink = Arc::new(sink);
    let handle = HeartbeatSession::new(
        factory,
        Arc::clone(&slot),
        sink.clone(),
        config.heartbeat.retry_policy(),
    )
    .spawn()
    .context("cannot start heartbeat thread")?;

    if let Err(e) = wait_until_alive(&mut completions).await {
        shutdown(handle).await?;
        return Err(e);
    }

    let pipeline = Arc::new(InstallPipeline::new(
        slot,
        StagingTransfer::new(Arc::new(ZipArchiver::new()), work_root)
            .with_remote_directory(config.staging.remote_directory.clone()),
        InstallTrigger::new().with_progress(Arc::new(LogProgress)),
        sink,
    ));

    let outcome = pipeline.spawn(path.clone()).await;
    shutdown(handle).await?;

    match outcome {
        Ok(Ok(remote_path)) => {
            println!("installed {} (staged at {remote_path})", path.display());
            Ok(())
        }
        Ok(Err(e)) => {
            let code = e.error_code();
            Err(anyhow::Error::new(e).context(code.to_string()))
        }
        Err(join) => Err(anyhow::Error::new(join).context(ErrorCode::Internal.to_string())),
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Waits for the heartbeat's first live session.  Connection failures are
/// retried by the heartbeat itself; only a fatal report or Ctrl-C ends the
/// wait.
async fn wait_until_alive(completions: &mut UnboundedReceiver<Completion>) -> anyhow::Result<()> {
    info!("waiting for the device session");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => bail!("interrupted before the device session came up"),
            completion = completions.recv() => match completion {
                Some(Completion::Heartbeat(None)) => return Ok(()),
                Some(Completion::Heartbeat(Some(ErrorCode::HeartbeatCircuitOpen))) | None => {
                    bail!("{}: device unreachable", ErrorCode::HeartbeatCircuitOpen)
                }
                Some(Completion::Heartbeat(Some(ErrorCode::Credential))) => {
                    bail!("{}: pairing file is unusable", ErrorCode::Credential)
                }
                Some(Completion::Heartbeat(Some(code))) => {
                    warn!("device session not ready ({code}), still trying");
                }
                Some(Completion::Install(_)) => {}
            },
        }
    }
}

/// Stops the heartbeat thread and waits for it off the runtime.
async fn shutdown(handle: HeartbeatHandle) -> anyhow::Result<()> {
    handle.stop();
    let ended = tokio::task::spawn_blocking(move || handle.join()).await?;
    if let Err(e) = ended {
        warn!("heartbeat ended with: {e}");
    }
    Ok(())
}
