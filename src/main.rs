// ABOUTME: Entry point for the conveyor CLI application.
// ABOUTME: Parses arguments and dispatches to appropriate command handlers.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use conveyor::config::{self, CONFIG_FILENAME, Config};
use conveyor::error::Result;
use conveyor::output::Output;
use std::env;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing subscriber based on verbose flag
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let output_mode = cli.output;

    match run(cli).await {
        Ok(true) => {}
        // The run already reported why it did not ship
        Ok(false) => std::process::exit(1),
        Err(e) => {
            Output::new(output_mode).error(&e.to_string());
            std::process::exit(1);
        }
    }
}

/// Dispatch a command. `Ok(false)` means a run ended failed or rolled back.
async fn run(cli: Cli) -> Result<bool> {
    let dir = match cli.dir {
        Some(dir) => dir,
        None => env::current_dir()?,
    };
    let output = Output::new(cli.output);

    match cli.command {
        Commands::Init {
            app,
            registry,
            force,
        } => {
            config::init_config(&dir, app.as_deref(), registry.as_deref(), force)?;
            output.success(&format!("Created {}", CONFIG_FILENAME));
            Ok(true)
        }
        Commands::Run(args) => {
            let config = Config::discover(&dir)?;
            commands::run(config, &dir, args, output).await
        }
        Commands::Rollback {
            namespace,
            to,
            force_lock,
        } => {
            let config = Config::discover(&dir)?;
            commands::rollback(config, &dir, namespace, to, force_lock, output).await?;
            Ok(true)
        }
        Commands::History { namespace } => {
            let config = Config::discover(&dir)?;
            commands::history(config, namespace, output).await?;
            Ok(true)
        }
    }
}
