//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ritadel - terminal console for AI-driven financial analysis
///
/// Configure an analysis run, watch per-analyst progress, tail the backend
/// log stream and write the result as a Markdown or JSON report.
///
/// Examples:
///   ritadel --tickers AAPL,MSFT --model gpt-4o --analysts warren_buffett_agent
///   ritadel -t NVDA -m o1 --all-analysts --start 2024-01-01 --end 2024-03-01
///   ritadel -t BTC-USD --crypto --all-analysts --follow-logs
///   ritadel --logs-only
///   ritadel --list-analysts
///   ritadel --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Ticker symbols to analyze (comma-separated)
    ///
    /// Example: --tickers "AAPL, MSFT, NVDA"
    #[arg(short, long, value_name = "TICKERS")]
    pub tickers: Option<String>,

    /// Start of the analysis window (YYYY-MM-DD)
    #[arg(long = "start", value_name = "DATE")]
    pub start_date: Option<String>,

    /// End of the analysis window (YYYY-MM-DD)
    #[arg(long = "end", value_name = "DATE")]
    pub end_date: Option<String>,

    /// LLM model used by the analysts
    ///
    /// See --list-models. Can also be set via RITADEL_MODEL or .ritadel.toml.
    #[arg(short, long, env = "RITADEL_MODEL")]
    pub model: Option<String>,

    /// Analysts to run (comma-separated ids)
    ///
    /// See --list-analysts for the available ids.
    #[arg(short, long, value_name = "IDS", value_delimiter = ',', conflicts_with = "all_analysts")]
    pub analysts: Option<Vec<String>>,

    /// Run every known analyst
    #[arg(long)]
    pub all_analysts: bool,

    /// Starting portfolio cash
    #[arg(long, value_name = "AMOUNT")]
    pub initial_cash: Option<f64>,

    /// Treat tickers as crypto pairs
    #[arg(long)]
    pub crypto: bool,

    /// Ask the service to omit analyst reasoning
    #[arg(long)]
    pub hide_reasoning: bool,

    /// Run the round-table discussion after the analysts
    #[arg(long)]
    pub round_table: bool,

    /// Analysis service base URL
    #[arg(long, value_name = "URL", env = "RITADEL_API_URL")]
    pub api_url: Option<String>,

    /// Log stream URL (default: derived from the API URL)
    #[arg(long, value_name = "URL")]
    pub log_url: Option<String>,

    /// Request timeout in seconds
    ///
    /// How long to wait for the analysis service before falling back to a
    /// neutral result. Default: from config or 600s.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Tail the backend log stream while the run is in progress
    #[arg(long)]
    pub follow_logs: bool,

    /// Only tail the backend log stream; do not start a run
    #[arg(long, conflicts_with = "tickers")]
    pub logs_only: bool,

    /// Reopen the log stream up to N times after it closes (with --logs-only)
    #[arg(long, value_name = "N", default_value_t = 0, requires = "logs_only")]
    pub reconnect: u32,

    /// Output file path for the report
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<OutputFormat>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .ritadel.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// List the available models and exit
    #[arg(long)]
    pub list_models: bool,

    /// List the available analysts and exit
    #[arg(long)]
    pub list_analysts: bool,

    /// Generate a default .ritadel.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// True when the invocation only lists catalog entries.
    pub fn is_listing(&self) -> bool {
        self.list_models || self.list_analysts
    }

    /// Validate the parsed arguments.
    ///
    /// Run fields (tickers, dates, model, analysts) are left to the wizard
    /// gate so they are reported against their step.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if let Some(ref url) = self.api_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("API URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(ref url) = self.log_url {
            if !url.starts_with("ws://") && !url.starts_with("wss://") {
                return Err("Log stream URL must start with 'ws://' or 'wss://'".to_string());
            }
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        if !self.logs_only && !self.is_listing() && self.tickers.is_none() {
            return Err("--tickers is required unless --logs-only or a --list flag is used".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
