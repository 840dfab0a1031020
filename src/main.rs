mod cli;
mod download;
mod error;
mod model;
mod text_summary;
mod transfer;
#[cfg(feature = "tui")]
mod tui;
mod workflow;

#[cfg(test)]
mod tests;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Headless modes log to stderr. The TUI owns the terminal, so it logs to a file in
/// the cache directory, or nowhere if that is unavailable.
fn init_logging(args: &cli::Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.as_str()));

    if args.is_headless() || cfg!(not(feature = "tui")) {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return;
    }

    let log_file = dirs::cache_dir()
        .map(|d| d.join("hardhat-cli"))
        .and_then(|dir| {
            std::fs::create_dir_all(&dir).ok()?;
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join("hardhat-cli.log"))
                .ok()
        });
    if let Some(file) = log_file {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    init_logging(&args);
    let is_headless = args.is_headless();

    cli::run(args).await?;
    // Detached request tasks may still be parked on the runtime; don't wait for them.
    if is_headless {
        std::process::exit(0);
    }
    Ok(())
}
