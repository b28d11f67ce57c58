// ABOUTME: Entry point for the stagehand CLI application.
// ABOUTME: Parses arguments, installs logging and signal handling, and dispatches commands.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use stagehand::config::{self, Config};
use stagehand::deploy::CancelToken;
use stagehand::error::Result;
use stagehand::output::{Output, OutputMode};
use std::env;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // --verbose wins over RUST_LOG; default is warnings only
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mode = if cli.json {
        OutputMode::Json
    } else if cli.quiet {
        OutputMode::Quiet
    } else {
        OutputMode::Normal
    };

    match run(cli, mode).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            Output::new(mode).error(&e.to_string());
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli, mode: OutputMode) -> Result<i32> {
    let output = Output::new(mode);
    match cli.command {
        Commands::Init { force } => {
            let cwd = env::current_dir()?;
            for path in config::init_config(&cwd, force)? {
                output.progress(&format!("Created {}", path.display()));
            }
            Ok(0)
        }
        Commands::Run { env, plan, force } => {
            let config = load_config(cli.config.as_deref())?;
            let cancel = CancelToken::new();
            spawn_interrupt_handler(cancel.clone());
            commands::run(config, &env, &plan, force, cancel, output).await
        }
        Commands::Rollback { target, backup } => {
            let config = load_config(cli.config.as_deref())?;
            commands::rollback(config, &target, &backup, output).await
        }
        Commands::Status { run } => {
            let config = load_config(cli.config.as_deref())?;
            commands::status(&config, run.as_deref(), &output)
        }
        Commands::Backups { env, target } => {
            let config = load_config(cli.config.as_deref())?;
            commands::backups(&config, env.as_deref(), target.as_deref(), &output)
        }
        Commands::Prune { env, target, keep } => {
            let config = load_config(cli.config.as_deref())?;
            commands::prune(&config, &env, &target, keep, &output).await
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => Config::discover(&env::current_dir()?),
    }
}

/// Cancel the run on Ctrl-C or SIGTERM.
fn spawn_interrupt_handler(cancel: CancelToken) {
    tokio::spawn(async move {
        wait_for_interrupt().await;
        tracing::warn!("interrupt received, cancelling run");
        cancel.cancel();
    });
}

async fn wait_for_interrupt() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => ctrl_c.await,
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;
}
