//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "holocron",
    version,
    about = "Star Wars trivia answering over a hybrid vector and keyword index",
    long_about = "Holocron projects the Star Wars dataset to text, embeds every entity into a \
                  vector index, and answers questions with a hybrid search that favours exact \
                  attribute matches such as \"characters with yellow eyes\"."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/holocron/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Profile to apply (e.g., "offline", "local")
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Embed the corpus and rebuild the index table
    Ingest {
        /// Corpus file (defaults to storage.corpus_path)
        #[arg(short, long, value_name = "FILE")]
        corpus: Option<PathBuf>,
    },

    /// Search the index
    Query {
        /// Search query text
        query: String,

        /// Maximum number of results to return
        #[arg(short, long)]
        limit: Option<usize>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Ask a question with optional LLM assistance
    Ask {
        /// Question to ask
        question: String,

        /// Force offline mode (disable LLM even if configured)
        #[arg(long)]
        offline: bool,

        /// Show the answer in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Run the HTTP API server
    Serve {
        /// Bind host (defaults to server.host)
        #[arg(long)]
        host: Option<String>,

        /// Bind port (defaults to server.port)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Show index status
    Status,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only a specific section
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
