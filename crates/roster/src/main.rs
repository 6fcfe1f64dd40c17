mod cli;
mod commands;
mod engine;
mod error;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

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
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        // Config commands never touch the network.
        Command::Config(args) => commands::config_cmd::handle(args, &cli.global),

        // Everything else runs against the wired-up engine.
        cmd => {
            let engine = engine::Engine::build(&cli.global)?;
            tracing::debug!(command = ?cmd, owner = %engine.config.owner, "dispatching command");
            commands::dispatch(cmd, &engine, &cli.global).await
        }
    }
}
