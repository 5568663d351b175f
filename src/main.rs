mod cli;
mod domain;
mod error;
mod features;
mod status_server;
mod utils;

use anyhow::Result;
use clap::Parser;

use crate::cli::Cli;
use crate::domain::config::MonitorConfig;
use crate::error::SyncError;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    cli::run(cli).await.inspect_err(|e| {
        if e.downcast_ref::<SyncError>().is_some_and(SyncError::is_fatal) {
            log::error!("Refusing to continue: {}", e);
        }
    })
}

fn init_logging(cli: &Cli) {
    let debug = cli.wants_debug_logging()
        || MonitorConfig::debug_requested(|key| std::env::var(key).ok());
    let default_filter = if debug { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}
