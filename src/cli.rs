use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use crate::engine::DEFAULT_ENGINE;

#[derive(Debug, Parser)]
#[command(
    name = "rowsift",
    about = "Full-text search maintenance over a record store"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Manifest declaring entity types, engines and registrations
    #[arg(long, global = true)]
    pub manifest: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Reindex every record of every registered type
    Rebuild(MaintenanceArgs),
    /// Delete index entries whose record is gone
    Prune(MaintenanceArgs),
    /// Search an engine
    Search(SearchArgs),
    /// Show engines, registrations and entry counts
    Status(StatusArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Rebuild / Prune --

#[derive(Debug, Parser)]
pub struct MaintenanceArgs {
    /// Only this engine (default: every engine)
    #[arg(short, long)]
    pub engine: Option<String>,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Engine to search
    #[arg(short, long, default_value = DEFAULT_ENGINE)]
    pub engine: String,

    /// Restrict to an entity type (repeatable)
    #[arg(short = 'm', long = "model")]
    pub models: Vec<String>,

    /// Leave out an entity type (repeatable)
    #[arg(short = 'x', long)]
    pub exclude: Vec<String>,

    /// Do not report ranks
    #[arg(long)]
    pub no_rank: bool,

    /// Number of results to return
    #[arg(short = 'n', long, default_value = "10")]
    pub count: usize,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "rowsift",
            &mut std::io::stdout(),
        );
    }
}
