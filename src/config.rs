//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.ritadel.toml` files.

use crate::analysis::{CoordinatorConfig, ServiceConfig};
use crate::catalog;
use crate::cli::{Args, OutputFormat};
use crate::stream::log_stream_url;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Name of the configuration file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = ".ritadel.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Analysis service settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Defaults for a run.
    #[serde(default)]
    pub run: RunConfig,

    /// Console and report settings.
    #[serde(default)]
    pub console: ConsoleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the analysis service.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Log stream URL. Derived from `base_url` when unset.
    #[serde(default)]
    pub log_stream_url: Option<String>,

    /// How long to wait for the analysis response.
    #[serde(default = "default_timeout")]
    pub request_timeout_seconds: u64,

    /// Delay between a failed request and the fallback result.
    #[serde(default = "default_fallback_grace")]
    pub fallback_grace_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            log_stream_url: None,
            request_timeout_seconds: default_timeout(),
            fallback_grace_ms: default_fallback_grace(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_timeout() -> u64 {
    600 // analyst fan-out with large models can take minutes
}

fn default_fallback_grace() -> u64 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Default model id.
    #[serde(default)]
    pub model: Option<String>,

    /// Default analyst ids.
    #[serde(default)]
    pub analysts: Vec<String>,

    #[serde(default = "default_initial_cash")]
    pub initial_cash: f64,

    #[serde(default = "default_true")]
    pub show_reasoning: bool,

    #[serde(default)]
    pub is_crypto: bool,

    #[serde(default)]
    pub run_round_table: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            model: None,
            analysts: Vec::new(),
            initial_cash: default_initial_cash(),
            show_reasoning: true,
            is_crypto: false,
            run_round_table: false,
        }
    }
}

fn default_initial_cash() -> f64 {
    100_000.0
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    /// Tail the log stream during runs.
    #[serde(default)]
    pub follow_logs: bool,

    /// Ring size of the log buffer. `0` keeps every event.
    #[serde(default = "default_log_capacity")]
    pub log_buffer_capacity: usize,

    /// Progress redraw interval.
    #[serde(default = "default_refresh_ms")]
    pub refresh_ms: u64,

    /// Default report path.
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default)]
    pub format: OutputFormat,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            follow_logs: false,
            log_buffer_capacity: default_log_capacity(),
            refresh_ms: default_refresh_ms(),
            output: default_output(),
            format: OutputFormat::Markdown,
        }
    }
}

fn default_log_capacity() -> usize {
    1000
}

fn default_refresh_ms() -> u64 {
    250
}

fn default_output() -> String {
    "ritadel_report.md".to_string()
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        Self::load_from_dir(Path::new("."))
    }

    /// Try to load `.ritadel.toml` from a directory.
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(CONFIG_FILE_NAME);

        if path.exists() {
            Ok(Some(Self::load(&path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &Args) {
        if let Some(ref url) = args.api_url {
            self.api.base_url = url.clone();
        }
        if let Some(ref url) = args.log_url {
            self.api.log_stream_url = Some(url.clone());
        }
        if let Some(timeout) = args.timeout {
            self.api.request_timeout_seconds = timeout;
        }

        if let Some(ref model) = args.model {
            self.run.model = Some(model.clone());
        }
        if args.all_analysts {
            self.run.analysts = catalog::all_analyst_ids();
        } else if let Some(ref analysts) = args.analysts {
            self.run.analysts = analysts.clone();
        }
        if let Some(cash) = args.initial_cash {
            self.run.initial_cash = cash;
        }

        // Flags only ever switch a setting away from its default
        if args.crypto {
            self.run.is_crypto = true;
        }
        if args.hide_reasoning {
            self.run.show_reasoning = false;
        }
        if args.round_table {
            self.run.run_round_table = true;
        }
        if args.follow_logs || args.logs_only {
            self.console.follow_logs = true;
        }

        if let Some(ref output) = args.output {
            self.console.output = output.display().to_string();
        }
        if let Some(format) = args.format {
            self.console.format = format;
        }
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            base_url: self.api.base_url.clone(),
            timeout_seconds: self.api.request_timeout_seconds,
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            request_timeout: Duration::from_secs(self.api.request_timeout_seconds),
            fallback_grace: Duration::from_millis(self.api.fallback_grace_ms),
            ..CoordinatorConfig::default()
        }
    }

    /// Explicit log stream URL, or one derived from the API base URL.
    pub fn resolved_log_stream_url(&self) -> Result<String> {
        match self.api.log_stream_url {
            Some(ref url) => Ok(url.clone()),
            None => log_stream_url(&self.api.base_url)
                .with_context(|| format!("Cannot derive log stream URL from {}", self.api.base_url)),
        }
    }

    /// Ring capacity for the log buffer; `None` when unbounded.
    pub fn log_capacity(&self) -> Option<usize> {
        Some(self.console.log_buffer_capacity).filter(|&capacity| capacity > 0)
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api.base_url, "http://localhost:5000");
        assert_eq!(config.api.request_timeout_seconds, 600);
        assert_eq!(config.run.initial_cash, 100_000.0);
        assert!(config.run.show_reasoning);
        assert_eq!(config.log_capacity(), Some(1000));
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[api]
base_url = "https://analysis.internal:8443"
fallback_grace_ms = 250

[run]
model = "claude-3-5-sonnet-latest"
analysts = ["warren_buffett_agent", "cathie_wood_agent"]
is_crypto = true

[console]
log_buffer_capacity = 0
format = "json"
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.api.base_url, "https://analysis.internal:8443");
        assert_eq!(config.api.request_timeout_seconds, 600);
        assert_eq!(config.coordinator_config().fallback_grace, Duration::from_millis(250));
        assert_eq!(config.run.model.as_deref(), Some("claude-3-5-sonnet-latest"));
        assert_eq!(config.run.analysts.len(), 2);
        assert!(config.run.is_crypto);
        assert_eq!(config.log_capacity(), None);
        assert_eq!(config.console.format, OutputFormat::Json);
        assert_eq!(
            config.resolved_log_stream_url().unwrap(),
            "wss://analysis.internal:8443/ws/logs"
        );
    }

    #[test]
    fn test_load_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load_from_dir(dir.path()).unwrap().is_none());

        let mut file = std::fs::File::create(dir.path().join(CONFIG_FILE_NAME)).unwrap();
        writeln!(file, "[run]\nmodel = \"o1\"").unwrap();

        let config = Config::load_from_dir(dir.path()).unwrap().unwrap();
        assert_eq!(config.run.model.as_deref(), Some("o1"));
        assert_eq!(config.console.refresh_ms, 250);
    }

    #[test]
    fn test_load_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[api\nbase_url = ").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_cli_overrides_config() {
        let mut config: Config = toml::from_str("[run]\nmodel = \"o1\"\nanalysts = [\"a\"]").unwrap();
        let args = Args::parse_from([
            "ritadel",
            "--tickers",
            "AAPL",
            "--model",
            "gpt-4o",
            "--all-analysts",
            "--hide-reasoning",
            "--timeout",
            "30",
            "--api-url",
            "http://10.0.0.5:5000",
        ]);

        config.merge_with_args(&args);

        assert_eq!(config.run.model.as_deref(), Some("gpt-4o"));
        assert_eq!(config.run.analysts, catalog::all_analyst_ids());
        assert!(!config.run.show_reasoning);
        assert_eq!(config.api.request_timeout_seconds, 30);
        assert_eq!(config.service_config().base_url, "http://10.0.0.5:5000");
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[api]"));
        assert!(toml_str.contains("[run]"));
        assert!(toml_str.contains("[console]"));

        let round: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(round.api.base_url, "http://localhost:5000");
    }
}
