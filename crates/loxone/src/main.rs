mod cli;
mod commands;
mod config;
mod error;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use loxone_core::Controller;

use crate::cli::{Cli, Command};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let cfg = loxone_config::load_config()?;

    match cli.command {
        // No session needed
        Command::Config(args) => commands::config_cmd::handle(args, &cli.global, cfg),
        Command::Info => commands::info::handle(&cli.global, &cfg).await,

        cmd => {
            let controller_config = config::build_controller_config(&cli.global, &cfg)?;
            let host = controller_config.host.clone();
            let controller = Controller::new(controller_config);

            tracing::debug!(command = ?cmd, %host, "connecting");
            controller
                .connect()
                .await
                .map_err(|e| CliError::from_core(e, &host))?;

            let result = commands::dispatch(cmd, &controller, &cli.global).await;
            controller.disconnect().await;
            result
        }
    }
}
