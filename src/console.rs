//! Terminal presentation of run progress and log lines.
//!
//! Pure rendering: the view reads ledger snapshots and log events, it never
//! decides anything about the run.

use crate::analysis::LedgerSnapshot;
use crate::catalog::analyst_label;
use crate::models::{
    AnalysisResult, ConnectionState, LogEvent, LogLevel, ProgressStatus, SignalSource,
};
use crate::stream::LogStreamClient;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::BTreeMap;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::warn;

/// One progress bar per (agent, subject) pair plus an overall bar.
pub struct ProgressView {
    multi: MultiProgress,
    overall: ProgressBar,
    bars: BTreeMap<(String, String), ProgressBar>,
}

impl ProgressView {
    pub fn new(agents: &[String], subjects: &[String]) -> Self {
        Self::with_target(agents, subjects, ProgressDrawTarget::stderr())
    }

    /// A view that tracks state but draws nothing.
    pub fn hidden(agents: &[String], subjects: &[String]) -> Self {
        Self::with_target(agents, subjects, ProgressDrawTarget::hidden())
    }

    fn with_target(agents: &[String], subjects: &[String], target: ProgressDrawTarget) -> Self {
        let multi = MultiProgress::with_draw_target(target);

        let overall = multi.add(ProgressBar::new(100));
        overall.set_style(Self::overall_style());
        overall.set_prefix("Overall");

        let width = agents
            .iter()
            .map(|a| analyst_label(a).len())
            .max()
            .unwrap_or(0);

        let mut bars = BTreeMap::new();
        for agent in agents {
            for subject in subjects {
                let bar = multi.add(ProgressBar::new(100));
                bar.set_style(Self::pair_style());
                bar.set_prefix(format!("{:<width$} {:>8}", analyst_label(agent), subject));
                bar.set_message(ProgressStatus::Waiting.label());
                bars.insert((agent.clone(), subject.clone()), bar);
            }
        }

        Self {
            multi,
            overall,
            bars,
        }
    }

    fn overall_style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{spinner:.green} {prefix:.bold} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-")
    }

    fn pair_style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("  {prefix} [{bar:30.green/white}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-")
    }

    /// Redraw from a ledger snapshot.
    pub fn render(&self, snapshot: &LedgerSnapshot, overall_percent: f64) {
        for ((agent, subject), bar) in &self.bars {
            let entry = snapshot.entry_or_waiting(agent, subject);
            bar.set_position(u64::from(entry.percent));
            bar.set_message(entry.status.label());
        }
        self.overall.set_position(overall_percent.round().clamp(0.0, 100.0) as u64);
    }

    pub fn set_status(&self, message: impl Into<String>) {
        self.overall.set_message(message.into());
    }

    /// Print a line above the bars without breaking them.
    pub fn println(&self, line: &str) {
        // A hidden draw target swallows the line, which is what quiet mode wants.
        let _ = self.multi.println(line);
    }

    pub fn finish(&self, snapshot: &LedgerSnapshot, overall_percent: f64) {
        self.render(snapshot, overall_percent);
        for bar in self.bars.values() {
            bar.finish();
        }
        self.overall.finish_with_message("done");
    }

    #[cfg(test)]
    fn position(&self, agent: &str, subject: &str) -> Option<u64> {
        self.bars
            .get(&(agent.to_string(), subject.to_string()))
            .map(ProgressBar::position)
    }
}

/// Single-line rendering of a log event.
pub fn format_log_line(event: &LogEvent) -> String {
    let icon = match event.level {
        LogLevel::Info => "ℹ️ ",
        LogLevel::Success => "✅",
        LogLevel::Warning => "⚠️ ",
        LogLevel::Error => "❌",
    };
    format!("{} [{:<5}] {}", icon, event.level, event.message)
}

/// Hand every event from `feed` to `emit` until the stream has disconnected.
///
/// Events already queued when the disconnect is seen are still emitted, so
/// an error and the close that follows it both reach the operator. Returns
/// the number of error events emitted.
pub async fn follow_log_feed(
    client: &LogStreamClient,
    feed: &mut broadcast::Receiver<LogEvent>,
    mut emit: impl FnMut(&LogEvent),
) -> usize {
    let mut errors = 0;

    loop {
        if client.state() == ConnectionState::Disconnected {
            loop {
                match feed.try_recv() {
                    Ok(event) => {
                        errors += usize::from(event.level == LogLevel::Error);
                        emit(&event);
                    }
                    Err(TryRecvError::Lagged(skipped)) => {
                        warn!("Console fell behind, skipped {} log line(s)", skipped);
                    }
                    Err(TryRecvError::Empty | TryRecvError::Closed) => return errors,
                }
            }
        }

        match feed.recv().await {
            Ok(event) => {
                errors += usize::from(event.level == LogLevel::Error);
                emit(&event);
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("Console fell behind, skipped {} log line(s)", skipped);
            }
            Err(RecvError::Closed) => return errors,
        }
    }
}

/// Short terminal summary of a result.
pub fn summary_lines(result: &AnalysisResult) -> Vec<String> {
    result
        .subjects
        .iter()
        .filter_map(|subject| {
            result.signals.get(subject).map(|signal| {
                format!(
                    "   {} {:<8} {:<8} {:>3}%{}",
                    signal.overall_signal.emoji(),
                    subject,
                    signal.overall_signal,
                    signal.confidence,
                    if signal.source == SignalSource::Fallback {
                        "  (fallback)"
                    } else {
                        ""
                    }
                )
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ledger::ProgressLedger;
    use crate::stream::client::LogTransport;
    use crate::stream::testing::FakeTransport;
    use std::sync::Arc;

    const URL: &str = "ws://localhost:5000/ws/logs";

    fn log_client(transport: &Arc<FakeTransport>) -> LogStreamClient {
        let transport: Arc<dyn LogTransport> = transport.clone();
        LogStreamClient::new(URL, transport, None)
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_render_tracks_snapshot() {
        let agents = ids(&["warren_buffett_agent", "technical_analyst_agent"]);
        let subjects = ids(&["AAPL", "MSFT"]);
        let view = ProgressView::hidden(&agents, &subjects);

        let mut ledger = ProgressLedger::seeded(&agents, &subjects, 5);
        ledger.upsert("warren_buffett_agent", "AAPL", ProgressStatus::Analyzing, 40);
        view.render(&ledger.snapshot(), ledger.mean_percent(&agents, &subjects));

        assert_eq!(view.position("warren_buffett_agent", "AAPL"), Some(40));
        assert_eq!(view.position("technical_analyst_agent", "MSFT"), Some(5));
        assert_eq!(view.overall.position(), 14);
    }

    #[test]
    fn test_missing_pairs_render_as_waiting() {
        let agents = ids(&["a"]);
        let subjects = ids(&["AAPL"]);
        let view = ProgressView::hidden(&agents, &subjects);

        view.render(&ProgressLedger::new().snapshot(), 0.0);
        assert_eq!(view.position("a", "AAPL"), Some(0));
    }

    #[test]
    fn test_format_log_line() {
        let line = format_log_line(&LogEvent::warning("Rate limit reached"));
        assert!(line.contains("[WARN ]"));
        assert!(line.ends_with("Rate limit reached"));
    }

    #[tokio::test]
    async fn test_refused_stream_prints_error_and_close() {
        let transport = Arc::new(FakeTransport::refusing());
        let client = log_client(&transport);
        let mut feed = client.subscribe();
        client.connect();

        let mut printed = Vec::new();
        let errors = follow_log_feed(&client, &mut feed, |event| printed.push(event.level)).await;

        assert_eq!(
            printed,
            vec![LogLevel::Info, LogLevel::Error, LogLevel::Warning]
        );
        assert_eq!(errors, 1);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_follow_stops_after_peer_close() {
        let transport = Arc::new(FakeTransport::default());
        let client = log_client(&transport);
        let mut feed = client.subscribe();
        client.connect();

        let sender = Arc::clone(&transport);
        tokio::spawn(async move {
            // Let the pump open the connection first.
            while sender.senders.lock().unwrap().is_empty() {
                tokio::task::yield_now().await;
            }
            sender.send(0, Some(Ok(r#"{"level": "success", "message": "AAPL done"}"#.into())));
            sender.send(0, None);
        });

        let mut printed = Vec::new();
        let errors = follow_log_feed(&client, &mut feed, |event| printed.push(event.message.clone())).await;

        assert_eq!(errors, 0);
        assert_eq!(printed.len(), 4);
        assert_eq!(printed[2], "AAPL done");
        assert_eq!(printed[3], "Log stream closed");
    }
}
