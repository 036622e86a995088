// ABOUTME: Command line argument definitions and parsing using Clap
// ABOUTME: Defines the main CLI structure and subcommands for dagflow

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dagflow")]
#[command(about = "Dependency-aware workflow orchestration with resumable runs")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Path to configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Disable colored output")]
    pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create and execute a workflow from a YAML or JSON file
    Run {
        #[arg(help = "Path to workflow file")]
        workflow: PathBuf,

        #[arg(long, help = "Attempts per task when the workflow sets none")]
        retries: Option<u32>,

        #[arg(short, long, help = "Write the results as JSON to this file")]
        output: Option<PathBuf>,

        #[arg(long, help = "Dry run - validate without executing")]
        dry_run: bool,
    },

    /// Validate a workflow file without executing
    Validate {
        #[arg(help = "Path to workflow file")]
        workflow: PathBuf,
    },

    /// Show the persisted status of a workflow
    Status {
        #[arg(help = "Workflow id")]
        id: String,
    },

    /// Request a running workflow to stop
    Stop {
        #[arg(help = "Workflow id")]
        id: String,
    },

    /// Delete a workflow's persisted state
    Delete {
        #[arg(help = "Workflow id")]
        id: String,
    },

    /// Resume a stopped, failed or interrupted workflow
    Resume {
        #[arg(help = "Workflow id")]
        id: String,

        #[arg(short, long, help = "Write the results as JSON to this file")]
        output: Option<PathBuf>,
    },

    /// List workflows with persisted state
    List,

    /// Repair a damaged state record
    Repair {
        #[arg(help = "Workflow id")]
        id: String,
    },

    /// Initialize a new workflow file from a template
    Init {
        #[arg(help = "Name of the workflow to create")]
        name: String,

        #[arg(short, long, help = "Output directory", default_value = ".")]
        output_dir: PathBuf,
    },
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
