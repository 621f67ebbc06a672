//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Understudy - resilience and degradation engine for AI text analysis
#[derive(Parser, Debug)]
#[command(name = "understudy")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "UNDERSTUDY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "UNDERSTUDY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "UNDERSTUDY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Analyze text with the fallback engine and print the quality-gated
    /// result
    Analyze {
        /// Text to analyze
        #[arg(required = true)]
        text: String,

        /// Context tag carried alongside the result (e.g. "relationship")
        #[arg(long)]
        context: Option<String>,

        /// Fallback reason tag (circuit_open, retries_exhausted,
        /// upstream_unavailable, manual)
        #[arg(long, default_value = "manual")]
        reason: String,

        /// Output JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Run the failure-pattern checks once over a recorded metrics snapshot
    Detect {
        /// Path to a metrics snapshot (JSON)
        #[arg(short, long, required = true)]
        metrics: PathBuf,

        /// Output JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Print the effective merged configuration
    Config {
        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },
}
