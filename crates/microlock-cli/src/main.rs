use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use microlock_cli::error::{EXIT_FAILURE, EXIT_OK};
use microlock_cli::{Cli, CliError, Settings, commands, logging};
use microlock_etcd::EtcdStore;
use tracing::{debug, error, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init_logging(logging::default_level(cli.verbose)) {
        eprintln!("failed to initialize logging: {}", e);
        return ExitCode::from(EXIT_FAILURE);
    }

    match run(&cli).await {
        Ok(output) => {
            println!("{}", output);
            ExitCode::from(EXIT_OK)
        }
        Err(e) => {
            error!("{} failed: {}", cli.command.as_str(), e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: &Cli) -> Result<String, CliError> {
    let settings = Settings::load(cli)?;
    debug!("settings: {:?}", settings.lock);

    let store = Arc::new(EtcdStore::new(settings.etcd.clone())?);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    commands::run(cli.command, &settings, store, shutdown).await
}
