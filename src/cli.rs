// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use conveyor::output::OutputMode;
use conveyor::types::{AppName, Environment, ImageTag, Namespace};

#[derive(Parser)]
#[command(name = "conveyor")]
#[command(about = "Build, scan, deploy and roll back container images from CI")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(long, global = true, value_enum, default_value = "normal")]
    pub output: OutputMode,

    /// Project directory containing conveyor.yml
    #[arg(short = 'C', long, global = true)]
    pub dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new conveyor.yml configuration file
    Init {
        /// Application name
        #[arg(long)]
        app: Option<String>,

        /// Image repository prefix, e.g. us.icr.io/acme
        #[arg(long)]
        registry: Option<String>,

        /// Overwrite an existing conveyor.yml
        #[arg(long)]
        force: bool,
    },

    /// Build, push, scan and deploy one commit
    Run(RunArgs),

    /// Reapply the latest healthy revision of a namespace
    Rollback {
        /// Namespace to roll back
        #[arg(short, long)]
        namespace: Namespace,

        /// Restore this revision instead of the latest healthy one
        #[arg(long)]
        to: Option<String>,

        /// Break a held namespace lock instead of waiting
        #[arg(long)]
        force_lock: bool,
    },

    /// Show the revision history of a namespace
    History {
        /// Namespace to show
        #[arg(short, long)]
        namespace: Namespace,
    },
}

#[derive(Args)]
pub struct RunArgs {
    /// Trigger event (push, pull_request, manual); defaults to GITHUB_EVENT_NAME
    #[arg(long)]
    pub event: Option<String>,

    /// Git ref; defaults to GITHUB_REF
    #[arg(long = "ref")]
    pub git_ref: Option<String>,

    /// Commit SHA; defaults to GITHUB_SHA
    #[arg(long)]
    pub sha: Option<String>,

    /// Repository as owner/name; defaults to GITHUB_REPOSITORY
    #[arg(long)]
    pub repo: Option<String>,

    /// Pull request number; defaults to the number in refs/pull/<n>/merge
    #[arg(long)]
    pub pr: Option<u64>,

    /// Deploy to this environment instead of the one derived from the ref
    #[arg(long)]
    pub environment: Option<Environment>,

    /// Use this image tag instead of the derived one
    #[arg(long)]
    pub image_tag: Option<ImageTag>,

    /// Application name override
    #[arg(long)]
    pub app_name: Option<AppName>,

    /// Namespace override; wins over environment derivation
    #[arg(long)]
    pub namespace: Option<Namespace>,

    /// Run acceptance tests after the health check (true/false)
    #[arg(long)]
    pub run_acceptance_tests: Option<bool>,

    /// Roll back automatically on failure (true/false)
    #[arg(long)]
    pub auto_rollback: Option<bool>,

    /// Break a held namespace lock instead of waiting
    #[arg(long)]
    pub force_lock: bool,
}
