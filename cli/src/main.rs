//! `chatmem` command-line front end.
//!
//! Inspects budgets and maintains the per-model memory files that a chat
//! client writes through the `chatmem` library.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use chatmem::InteractionMode;
use clap::{Parser, Subcommand};
use colored::Colorize;

/// Conversation memory and context budgets for local models
#[derive(Parser, Debug)]
#[command(name = "chatmem")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Settings file (TOML). Defaults to <config dir>/chatmem/config.toml if present
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Override the memory directory
    #[arg(long, global = true, value_name = "DIR")]
    pub memory_dir: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by commands that prepare or size a request.
#[derive(clap::Args, Debug, Clone)]
pub struct RequestArgs {
    /// Interaction mode (chat or tools)
    #[arg(long)]
    pub mode: Option<InteractionMode>,

    /// Context window in tokens
    #[arg(long, value_name = "TOKENS")]
    pub window: Option<u64>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Estimate the token count of a text
    Estimate {
        /// Text to estimate
        text: String,

        /// Known token count to compare against
        #[arg(long, value_name = "TOKENS")]
        actual: Option<u64>,
    },

    /// Show the complexity breakdown of a query
    Analyze {
        /// The query to score
        query: String,

        /// Interaction mode (chat or tools)
        #[arg(long)]
        mode: Option<InteractionMode>,
    },

    /// Allocate and validate a budget for a query
    Budget {
        /// The query to size the budget for
        query: String,

        #[command(flatten)]
        request: RequestArgs,
    },

    /// Prepare the history messages that would accompany a query
    Context {
        /// The upcoming query
        query: String,

        /// Model identity (defaults to the configured model)
        #[arg(long)]
        model: Option<String>,

        #[command(flatten)]
        request: RequestArgs,
    },

    /// Record a completed exchange
    Record {
        /// User message
        #[arg(long)]
        user: String,

        /// Assistant reply
        #[arg(long)]
        assistant: String,

        /// Model identity (defaults to the configured model)
        #[arg(long)]
        model: Option<String>,

        /// Token count reported for the user message
        #[arg(long, value_name = "TOKENS")]
        user_tokens: Option<u64>,

        /// Token count reported for the assistant reply
        #[arg(long, value_name = "TOKENS")]
        assistant_tokens: Option<u64>,

        /// Context window used to trim the stored conversation
        #[arg(long, value_name = "TOKENS")]
        window: Option<u64>,
    },

    /// Show recent exchanges
    History {
        /// Model identity (defaults to the configured model)
        #[arg(long)]
        model: Option<String>,

        /// Number of exchanges to show (default: 10)
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Cap the shown exchanges by stored token count
        #[arg(long, value_name = "TOKENS")]
        max_tokens: Option<u64>,
    },

    /// Show memory statistics for a model
    Stats {
        /// Model identity (defaults to the configured model)
        #[arg(long)]
        model: Option<String>,
    },

    /// Clear a model's current conversation, keeping a summary
    Clear {
        /// Model identity (defaults to the configured model)
        #[arg(long)]
        model: Option<String>,
    },

    /// List models with stored memory
    Models,

    /// Import a legacy single-file memory into per-model files
    Migrate {
        /// Legacy file (defaults to memory.json in the memory directory)
        #[arg(long, value_name = "PATH")]
        path: Option<PathBuf>,
    },

    /// Print the effective settings as TOML
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    chatmem::telemetry::init_tracing(cli.verbose);

    match commands::run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {:#}", "error:".red().bold(), err);
            ExitCode::FAILURE
        }
    }
}
