//! Markdown and JSON report generation.
//!
//! This module renders a finished run, whether it came from the analysis
//! service or from the fallback path, into a report file.

use crate::analysis::{ResultOrigin, RunOutcome};
use crate::cli::OutputFormat;
use crate::models::{
    AgentSignal, ReportMetadata, RunReport, RunRequest, Signal, SignalSource, SubjectSignal,
};
use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;

/// Build the report for a concluded run.
pub fn build_report(request: &RunRequest, outcome: &RunOutcome, duration_seconds: f64) -> RunReport {
    let (source, fallback_reason) = match &outcome.origin {
        ResultOrigin::Service => (SignalSource::Service, None),
        ResultOrigin::Fallback { reason } => (SignalSource::Fallback, Some(reason.clone())),
    };

    RunReport {
        metadata: ReportMetadata {
            run_id: outcome.run_id.to_string(),
            generated_at: Utc::now(),
            model: request.model_id().to_string(),
            analysts: request.agent_ids().to_vec(),
            date_range: request.date_range(),
            initial_cash: request.initial_cash(),
            source,
            fallback_reason,
            duration_seconds,
        },
        result: outcome.result.clone(),
        show_reasoning: request.flags().show_reasoning,
    }
}

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &RunReport) -> String {
    let mut output = String::new();

    output.push_str("# Ritadel Analysis Report\n\n");
    output.push_str(&generate_metadata_section(&report.metadata));

    if let Some(ref reason) = report.metadata.fallback_reason {
        output.push_str(&format!(
            "> ⚠️ **Fallback result.** The analysis service failed ({}), so every \
             ticker was given a neutral stance.\n\n",
            reason
        ));
    }

    output.push_str(&generate_summary_section(report));
    output.push_str(&generate_signals_section(report));
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Run:** {}\n", metadata.run_id));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Model Used:** `{}`\n", metadata.model));
    section.push_str(&format!("- **Analysts:** {}\n", metadata.analysts.len()));

    let range = metadata.date_range;
    if range.start.is_some() || range.end.is_some() {
        let show = |d: Option<chrono::NaiveDate>| {
            d.map(|d| d.to_string()).unwrap_or_else(|| "open".to_string())
        };
        section.push_str(&format!(
            "- **Window:** {} → {}\n",
            show(range.start),
            show(range.end)
        ));
    }

    section.push_str(&format!("- **Initial Cash:** ${:.2}\n", metadata.initial_cash));
    section.push_str(&format!(
        "- **Source:** {}\n",
        match metadata.source {
            SignalSource::Service => "analysis service",
            SignalSource::Fallback => "fallback",
        }
    ));
    section.push_str(&format!(
        "- **Duration:** {:.1}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

/// Generate the per-ticker summary table.
fn generate_summary_section(report: &RunReport) -> String {
    let mut section = String::new();
    let result = &report.result;

    section.push_str("## Summary\n\n");
    section.push_str(&format!("*As of {}*\n\n", result.as_of_date));
    section.push_str("| Ticker | Signal | Confidence | Source |\n");
    section.push_str("|:---|:---:|:---:|:---:|\n");

    for subject in &result.subjects {
        if let Some(signal) = result.signals.get(subject) {
            section.push_str(&format!(
                "| {} | {} {} | {}% | {} |\n",
                subject,
                signal.overall_signal.emoji(),
                signal.overall_signal,
                signal.confidence,
                source_label(signal.source)
            ));
        }
    }
    section.push('\n');

    let count = |wanted: Signal| {
        result
            .signals
            .values()
            .filter(|s| s.overall_signal == wanted)
            .count()
    };
    section.push_str(&format!(
        "{} Bullish: {} | {} Bearish: {} | {} Neutral: {}\n\n",
        Signal::Bullish.emoji(),
        count(Signal::Bullish),
        Signal::Bearish.emoji(),
        count(Signal::Bearish),
        Signal::Neutral.emoji(),
        count(Signal::Neutral),
    ));

    section
}

/// Generate one section per ticker with the analyst breakdown.
fn generate_signals_section(report: &RunReport) -> String {
    let mut section = String::new();

    section.push_str("## Analyst Signals\n\n");

    for subject in &report.result.subjects {
        if let Some(signal) = report.result.signals.get(subject) {
            section.push_str(&generate_subject_block(subject, signal, report.show_reasoning));
        }
    }

    section
}

fn generate_subject_block(subject: &str, signal: &SubjectSignal, show_reasoning: bool) -> String {
    let mut block = String::new();

    block.push_str(&format!(
        "### {} {} ({}, {}%)\n\n",
        signal.overall_signal.emoji(),
        subject,
        signal.overall_signal,
        signal.confidence
    ));

    block.push_str("| Analyst | Signal | Confidence |\n");
    block.push_str("|:---|:---:|:---:|\n");
    for agent in &signal.per_agent {
        block.push_str(&format!(
            "| {} | {} | {}% |\n",
            agent.agent_label, agent.signal, agent.confidence
        ));
    }
    block.push('\n');

    if show_reasoning {
        for agent in signal.per_agent.iter().filter(|a| !a.reasoning.is_empty()) {
            block.push_str(&generate_reasoning(agent));
        }
    }

    block.push_str("---\n\n");
    block
}

fn generate_reasoning(agent: &AgentSignal) -> String {
    format!(
        "<details>\n<summary>{} reasoning</summary>\n\n{}\n</details>\n\n",
        agent.agent_label, agent.reasoning
    )
}

fn source_label(source: SignalSource) -> &'static str {
    match source {
        SignalSource::Service => "service",
        SignalSource::Fallback => "fallback",
    }
}

/// Generate the report footer.
fn generate_footer() -> String {
    "---\n\n*Report generated by Ritadel console*\n".to_string()
}

/// Generate a JSON report.
pub fn generate_json_report(report: &RunReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Render the report in `format` and write it to `path`.
pub fn write_report(report: &RunReport, format: OutputFormat, path: &Path) -> Result<()> {
    let content = match format {
        OutputFormat::Json => generate_json_report(report)?,
        OutputFormat::Markdown => generate_markdown_report(report),
    };

    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}
