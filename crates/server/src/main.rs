//! remcache: remote build-artifact cache server
//!
//! Serves content-addressable storage, an action cache and resumable blob
//! transfer over HTTP/JSON for Bazel-style build clients.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use remcache_core::DigestFunction;
use remcache_server::{AppState, ServerSettings, SettingsOverrides};
use remcache_utils::{init_tracing, shutdown_signal, LogFormat};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Remote build-artifact cache server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the cache server
    Serve(SettingsArgs),
    /// Resolve and validate settings, print them, and exit
    CheckConfig(SettingsArgs),
}

#[derive(Args, Debug)]
struct SettingsArgs {
    /// JSON settings file (defaults to the XDG config file when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    listen: Option<String>,

    /// Store blobs in this directory
    #[arg(long)]
    disk_root: Option<PathBuf>,

    /// Hash algorithm for digests (sha256, sha384, sha512)
    #[arg(long)]
    digest_function: Option<DigestFunction>,

    /// Log output format (text or json)
    #[arg(long)]
    log_format: Option<LogFormat>,
}

impl SettingsArgs {
    fn resolve(&self) -> Result<ServerSettings> {
        let overrides = SettingsOverrides {
            listen: self.listen.clone(),
            disk_root: self.disk_root.clone(),
            digest_function: self.digest_function,
            log_format: self.log_format,
        };
        ServerSettings::load(self.config.as_deref(), &overrides).context("invalid settings")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => serve(args.resolve()?).await,
        Command::CheckConfig(args) => {
            let settings = args.resolve()?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

async fn serve(settings: ServerSettings) -> Result<()> {
    init_tracing(settings.log_format)
        .map_err(|e| anyhow::anyhow!("failed to initialise logging: {e}"))?;

    info!("Starting remcache {}", env!("CARGO_PKG_VERSION"));
    let addr = settings.listen_addr()?;

    let state = Arc::new(
        AppState::build(&settings)
            .await
            .context("failed to initialise cache engine")?,
    );
    let reaper = state.engine.bytestream.spawn_reaper();

    remcache_server::serve(state, addr, shutdown_signal())
        .await
        .context("server failed")?;

    reaper.abort();
    info!("shutdown complete");
    Ok(())
}
