// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stagehand")]
#[command(about = "Staged multi-service deployments with backups, health checks and rollback")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print the final result
    #[arg(short, long, global = true, conflicts_with = "json")]
    pub quiet: bool,

    /// Print JSON lines instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Path to stagehand.yml (discovered in the current directory by default)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a template stagehand.yml and deploy-plan.yml
    Init {
        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },

    /// Execute a deployment plan against an environment
    Run {
        /// Environment to deploy to (defined in config)
        #[arg(short, long)]
        env: String,

        /// Plan file
        #[arg(short, long, default_value = "deploy-plan.yml")]
        plan: PathBuf,

        /// Break deploy locks held by other runs
        #[arg(long)]
        force: bool,
    },

    /// Restore one backup on its target
    Rollback {
        /// Service the backup belongs to
        #[arg(short, long)]
        target: String,

        /// Backup id (see `stagehand backups`)
        #[arg(short, long)]
        backup: String,
    },

    /// Show the report of a run (latest when omitted)
    Status {
        #[arg(short, long)]
        run: Option<String>,
    },

    /// List backup records
    Backups {
        #[arg(short, long)]
        env: Option<String>,

        #[arg(short, long)]
        target: Option<String>,
    },

    /// Delete all but the newest backups of a target
    Prune {
        #[arg(short, long)]
        env: String,

        #[arg(short, long)]
        target: String,

        /// Number of backups to keep
        #[arg(short, long, default_value_t = 3)]
        keep: usize,
    },
}
