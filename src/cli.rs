use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "docrag",
    version,
    about = "Offline document retrieval: ingest PDF, text and DOCX files and search them"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

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
    /// Ingest files or directories into the index
    Ingest(IngestArgs),
    /// Search ingested documents
    Search(SearchArgs),
    /// Delete a document and its chunks
    Delete {
        /// Document id (as shown by `list`)
        document_id: String,
    },
    /// List ingested documents
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show index statistics
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Refit the vocabulary and re-embed every chunk
    Rebuild,
    /// Check that the index is readable and embedding works
    Health {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage persisted settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Start MCP server for AI agent integration
    Mcp,
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print one persisted setting
    Get { key: String },
    /// Persist a setting in config.redb
    Set { key: String, value: String },
    /// Remove a persisted setting (revert to default)
    Unset { key: String },
}

#[derive(Debug, Parser)]
pub struct IngestArgs {
    /// Files or directories to ingest
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Format hint (MIME type or extension) applied to every file
    #[arg(long = "type")]
    pub type_hint: Option<String>,

    /// Output outcomes as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Number of results to return
    #[arg(short = 'n', long, default_value = "10")]
    pub count: usize,

    /// Restrict to this document id (repeatable)
    #[arg(long = "doc")]
    pub documents: Vec<String>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,

    /// Minimum score threshold
    #[arg(long, default_value = "-1.0", allow_hyphen_values = true)]
    pub min_score: f32,
}

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
            "docrag",
            &mut std::io::stdout(),
        );
    }
}
