//! Wayfarer CLI binary entrypoint.

use std::io;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use wayfarer_cli::cli::{Cli, Commands};
use wayfarer_cli::commands::{
    InitCommand, PeerCommand, ReconcileCommand, RegionStatusCommand, StatusCommand,
};
use wayfarer_cli::output::OutputFormat;
use wayfarer_cli::{CliError, Settings};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let settings = Settings::load(cli.config.as_deref())?;
    let format = OutputFormat::new(cli.format);
    let mut stdout = io::stdout().lock();

    match cli.command {
        Commands::Init(args) => {
            InitCommand::new(&settings).execute(&mut stdout, &format, &args)?;
        }
        Commands::AddPeer(args) => {
            PeerCommand::new(&settings)
                .add(&mut stdout, &format, &args)
                .await?;
        }
        Commands::RemovePeer { name } => {
            PeerCommand::new(&settings)
                .remove(&mut stdout, &format, &name)
                .await?;
        }
        Commands::ListPeers => {
            PeerCommand::new(&settings).list(&mut stdout, &format)?;
        }
        Commands::Status => {
            StatusCommand::new(&settings)
                .execute(&mut stdout, &format)
                .await?;
        }
        Commands::RegionStatus { region } => {
            RegionStatusCommand::new(&settings)
                .execute(&mut stdout, &format, &region)
                .await?;
        }
        Commands::Reconcile(args) => {
            ReconcileCommand::new(&settings)
                .execute(&mut stdout, &format, &args)
                .await?;
        }
    }

    Ok(())
}
