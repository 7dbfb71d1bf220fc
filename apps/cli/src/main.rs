//! bytelift command-line uploader.

mod app;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Upload files with the multipart upload API.
#[derive(Parser)]
#[command(name = "bytelift", version, about)]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file, or standard input with `-`
    Upload(app::UploadArgs),
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the result.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = config::Config::load(cli.config.as_deref())?;

    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Commands::Upload(args) => {
            let file = rt.block_on(async {
                let cancel = CancellationToken::new();
                let on_interrupt = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::warn!("interrupted; cancelling upload");
                        on_interrupt.cancel();
                    }
                });
                app::upload(&config, args, cancel).await
            })?;
            println!("{}", serde_json::to_string_pretty(&file)?);
        }
    }

    Ok(())
}
