//! Wisty headless driver entry point.

mod app;
mod config;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Open a text file through the chunked transfer engine and optionally
/// save it back out.
#[derive(Debug, Parser)]
#[command(name = "wisty", version, about)]
pub struct Args {
    /// File to open.
    pub path: String,

    /// Save the document here after opening (save-as).
    #[arg(long, value_name = "PATH")]
    pub save_to: Option<String>,

    /// Save the document back to the path it was opened from.
    #[arg(long, conflicts_with = "save_to")]
    pub save: bool,

    /// Type this text at the end of the document before saving.
    #[arg(long, value_name = "TEXT")]
    pub append: Option<String>,

    /// Treat PATH as a launch argument: missing files open as empty named
    /// documents and reads go through the stream registry.
    #[arg(long)]
    pub launch: bool,

    /// Open files above the soft size limit without asking.
    #[arg(short, long)]
    pub yes: bool,

    /// Print transfer events and reports as JSON lines.
    #[arg(long)]
    pub json: bool,

    /// Configuration file (defaults to the platform config directory).
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,wisty=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting wisty");

    let config = config::Config::load(args.config.as_deref())?;
    tracing::debug!(?config, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(args, config))?;

    tracing::info!("wisty finished");
    Ok(())
}
