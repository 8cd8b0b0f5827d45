//! Data models for the analysis console.
//!
//! This module contains the core data structures shared by the validation
//! gate, the submission coordinator, the log stream client and the report
//! writer.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Optional analysis window. `start <= end` whenever both are present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

/// Boolean switches carried with every run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunFlags {
    pub is_crypto: bool,
    pub show_reasoning: bool,
    pub run_round_table: bool,
}

impl Default for RunFlags {
    fn default() -> Self {
        Self {
            is_crypto: false,
            show_reasoning: true,
            run_round_table: false,
        }
    }
}

/// A validated, immutable request for one analysis run.
///
/// The only way to obtain one is [`crate::validation::validate_all`], so a
/// `RunRequest` in hand has already passed every gate rule.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    subjects: Vec<String>,
    date_range: DateRange,
    model_id: String,
    agent_ids: Vec<String>,
    initial_cash: f64,
    flags: RunFlags,
}

impl RunRequest {
    pub(crate) fn new(
        subjects: Vec<String>,
        date_range: DateRange,
        model_id: String,
        agent_ids: Vec<String>,
        initial_cash: f64,
        flags: RunFlags,
    ) -> Self {
        Self {
            subjects,
            date_range,
            model_id,
            agent_ids,
            initial_cash,
            flags,
        }
    }

    pub fn subjects(&self) -> &[String] {
        &self.subjects
    }

    pub fn date_range(&self) -> DateRange {
        self.date_range
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn agent_ids(&self) -> &[String] {
        &self.agent_ids
    }

    pub fn initial_cash(&self) -> f64 {
        self.initial_cash
    }

    pub fn flags(&self) -> RunFlags {
        self.flags
    }
}

/// Stage of a single (agent, subject) analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgressStatus {
    Waiting,
    Starting,
    FetchingData,
    Analyzing,
    GeneratingReport,
    Finalizing,
    Complete,
}

impl ProgressStatus {
    /// Derive a stage from a completion percentage.
    pub fn for_percent(percent: u8) -> Self {
        match percent {
            0..=29 => ProgressStatus::FetchingData,
            30..=59 => ProgressStatus::Analyzing,
            60..=89 => ProgressStatus::GeneratingReport,
            90..=99 => ProgressStatus::Finalizing,
            _ => ProgressStatus::Complete,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProgressStatus::Waiting => "Waiting...",
            ProgressStatus::Starting => "Starting...",
            ProgressStatus::FetchingData => "Fetching data...",
            ProgressStatus::Analyzing => "Analyzing...",
            ProgressStatus::GeneratingReport => "Generating report...",
            ProgressStatus::Finalizing => "Finalizing...",
            ProgressStatus::Complete => "Complete",
        }
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

/// Progress record for one (agent, subject) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEntry {
    pub status: ProgressStatus,
    pub percent: u8,
}

impl ProgressEntry {
    pub fn is_complete(&self) -> bool {
        self.percent == 100
    }
}

impl Default for ProgressEntry {
    fn default() -> Self {
        Self {
            status: ProgressStatus::Waiting,
            percent: 0,
        }
    }
}

/// Directional call made by an analyst or by the run as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    #[serde(alias = "Bullish", alias = "BULLISH", alias = "buy", alias = "BUY")]
    Bullish,
    #[serde(alias = "Bearish", alias = "BEARISH", alias = "sell", alias = "SELL")]
    Bearish,
    #[serde(alias = "Neutral", alias = "NEUTRAL", alias = "hold", alias = "HOLD")]
    Neutral,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Bullish => f.pad("bullish"),
            Signal::Bearish => f.pad("bearish"),
            Signal::Neutral => f.pad("neutral"),
        }
    }
}

impl Signal {
    /// Returns an emoji representation of the signal.
    pub fn emoji(&self) -> &'static str {
        match self {
            Signal::Bullish => "🟢",
            Signal::Bearish => "🔴",
            Signal::Neutral => "⚪",
        }
    }
}

/// One analyst's verdict on one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSignal {
    pub agent_id: String,
    pub agent_label: String,
    pub signal: Signal,
    pub confidence: u8,
    pub reasoning: String,
}

/// Where a subject's signal came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalSource {
    Service,
    Fallback,
}

/// Consolidated verdict for one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectSignal {
    pub overall_signal: Signal,
    pub confidence: u8,
    pub per_agent: Vec<AgentSignal>,
    pub source: SignalSource,
}

/// Terminal result of a run, whether from the service or the fallback path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub subjects: Vec<String>,
    pub as_of_date: NaiveDate,
    pub signals: BTreeMap<String, SubjectSignal>,
}

impl AnalysisResult {
    /// Number of subjects that had to be filled in by the fallback path.
    pub fn fallback_count(&self) -> usize {
        self.signals
            .values()
            .filter(|s| s.source == SignalSource::Fallback)
            .count()
    }
}

/// Metadata about a finished run, written at the top of the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub model: String,
    pub analysts: Vec<String>,
    pub date_range: DateRange,
    pub initial_cash: f64,
    pub source: SignalSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    pub duration_seconds: f64,
}

/// Complete report for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub metadata: ReportMetadata,
    pub result: AnalysisResult,
    /// Whether per-analyst reasoning is included in the Markdown output.
    #[serde(skip)]
    pub show_reasoning: bool,
}

/// Severity of a log line coming from the backend log stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Info,
    Success,
    #[serde(alias = "warn")]
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => f.pad("INFO"),
            LogLevel::Success => f.pad("OK"),
            LogLevel::Warning => f.pad("WARN"),
            LogLevel::Error => f.pad("ERROR"),
        }
    }
}

/// A single line in the console log buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    #[serde(default)]
    pub level: LogLevel,
    pub message: String,
}

impl LogEvent {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, message)
    }
}

/// Lifecycle of the log stream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Errored,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Errored => write!(f, "errored"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_for_percent() {
        assert_eq!(ProgressStatus::for_percent(0), ProgressStatus::FetchingData);
        assert_eq!(ProgressStatus::for_percent(29), ProgressStatus::FetchingData);
        assert_eq!(ProgressStatus::for_percent(30), ProgressStatus::Analyzing);
        assert_eq!(ProgressStatus::for_percent(75), ProgressStatus::GeneratingReport);
        assert_eq!(ProgressStatus::for_percent(95), ProgressStatus::Finalizing);
        assert_eq!(ProgressStatus::for_percent(100), ProgressStatus::Complete);
    }

    #[test]
    fn test_signal_aliases() {
        let s: Signal = serde_json::from_str("\"BULLISH\"").unwrap();
        assert_eq!(s, Signal::Bullish);
        let s: Signal = serde_json::from_str("\"hold\"").unwrap();
        assert_eq!(s, Signal::Neutral);
        assert_eq!(Signal::Bearish.to_string(), "bearish");
    }

    #[test]
    fn test_log_event_defaults_to_info() {
        let event: LogEvent = serde_json::from_str(r#"{"message": "hello"}"#).unwrap();
        assert_eq!(event.level, LogLevel::Info);

        let event: LogEvent =
            serde_json::from_str(r#"{"level": "warn", "message": "careful"}"#).unwrap();
        assert_eq!(event.level, LogLevel::Warning);
    }
}
