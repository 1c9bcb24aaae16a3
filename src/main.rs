use ag_monitor::app::{self, Cli};
use ag_monitor::monitor_paths;
use anyhow::Result;
use clap::Parser;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Filter directives for the debug log, e.g. `AG_MONITOR_LOG=ag_monitor=debug`.
const LOG_ENV: &str = "AG_MONITOR_LOG";

fn init_tracing() {
    let file = match monitor_paths::debug_log_path().and_then(|path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(anyhow::Error::from)
    }) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("[agmon] Warning: debug log unavailable: {}", e);
            return;
        }
    };

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();
    tracing::info!(version = env!("AG_MONITOR_GIT_SHA"), "agmon starting");

    app::run(cli).await
}
