mod cli;
mod config;
mod encoura;
mod error;
mod logging;
mod orchestrator;
mod sanitize;
mod sftp;

use anyhow::Context;
use clap::Parser;

use cli::Cli;
use config::RelayConfig;
use encoura::EncouraClient;
use orchestrator::RelayOrchestrator;
use sftp::SftpConnector;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _cli = Cli::parse();

    let config = RelayConfig::load().context("failed to load configuration")?;
    let _guard = logging::init_logging(&config.paths.log_file)?;

    // From here on every failure ends up in the log and the exit status stays 0.
    let api = match EncouraClient::new(&config.api) {
        Ok(api) => api,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build HTTP client");
            return Ok(());
        }
    };
    let connector = SftpConnector::new(&config.sftp);

    RelayOrchestrator::new(&config, api, connector).run().await;
    Ok(())
}
