//! Per-(agent, subject) progress tracking for a single run.
//!
//! The ledger is copy-on-write: [`ProgressLedger::snapshot`] hands out a cheap
//! immutable view that the renderer can hold while the coordinator keeps
//! updating its own copy.

use crate::models::{ProgressEntry, ProgressStatus};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

type Entries = BTreeMap<String, BTreeMap<String, ProgressEntry>>;

/// Mutable progress table owned by the submission coordinator.
#[derive(Debug, Clone, Default)]
pub struct ProgressLedger {
    entries: Arc<Entries>,
}

/// Immutable view of a ledger at one point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerSnapshot {
    entries: Arc<Entries>,
}

impl ProgressLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A ledger with every (agent, subject) pair at `Starting` / `percent`.
    pub fn seeded(agents: &[String], subjects: &[String], percent: u8) -> Self {
        let mut ledger = Self::new();
        for agent in agents {
            for subject in subjects {
                ledger.upsert(agent, subject, ProgressStatus::Starting, percent);
            }
        }
        ledger
    }

    /// Record progress for one pair.
    ///
    /// Returns `false` without touching the entry when `percent` is below the
    /// recorded value. Percent is capped at 100 and a 100% entry is always
    /// `Complete`.
    pub fn upsert(&mut self, agent: &str, subject: &str, status: ProgressStatus, percent: u8) -> bool {
        let (status, percent) = normalize(status, percent);

        if let Some(existing) = self.get(agent, subject) {
            if percent < existing.percent {
                debug!(
                    "Ignoring regressive progress for {}/{}: {} < {}",
                    agent, subject, percent, existing.percent
                );
                return false;
            }
            if existing.status == status && existing.percent == percent {
                return true;
            }
        }

        Arc::make_mut(&mut self.entries)
            .entry(agent.to_string())
            .or_default()
            .insert(subject.to_string(), ProgressEntry { status, percent });
        true
    }

    pub fn get(&self, agent: &str, subject: &str) -> Option<&ProgressEntry> {
        self.entries.get(agent).and_then(|subjects| subjects.get(subject))
    }

    /// Mark every pair of the matrix complete, creating missing entries.
    pub fn complete_all(&mut self, agents: &[String], subjects: &[String]) {
        for agent in agents {
            for subject in subjects {
                self.upsert(agent, subject, ProgressStatus::Complete, 100);
            }
        }
    }

    /// Mean percent over the full agent × subject matrix. Missing pairs count as zero.
    pub fn mean_percent(&self, agents: &[String], subjects: &[String]) -> f64 {
        mean_over(&self.entries, agents, subjects)
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl LedgerSnapshot {
    pub fn get(&self, agent: &str, subject: &str) -> Option<&ProgressEntry> {
        self.entries.get(agent).and_then(|subjects| subjects.get(subject))
    }

    /// Entry for a pair, or the `Waiting` placeholder if nothing was recorded.
    pub fn entry_or_waiting(&self, agent: &str, subject: &str) -> ProgressEntry {
        self.get(agent, subject).copied().unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &ProgressEntry)> {
        self.entries.iter().flat_map(|(agent, subjects)| {
            subjects
                .iter()
                .map(move |(subject, entry)| (agent.as_str(), subject.as_str(), entry))
        })
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mean_percent(&self, agents: &[String], subjects: &[String]) -> f64 {
        mean_over(&self.entries, agents, subjects)
    }
}

fn normalize(status: ProgressStatus, percent: u8) -> (ProgressStatus, u8) {
    let percent = percent.min(100);
    match (status, percent) {
        (_, 100) | (ProgressStatus::Complete, _) => (ProgressStatus::Complete, 100),
        (status, percent) => (status, percent),
    }
}

fn mean_over(entries: &Entries, agents: &[String], subjects: &[String]) -> f64 {
    let cells = agents.len() * subjects.len();
    if cells == 0 {
        return 0.0;
    }

    let total: u64 = agents
        .iter()
        .flat_map(|agent| subjects.iter().map(move |subject| (agent, subject)))
        .filter_map(|(agent, subject)| entries.get(agent).and_then(|s| s.get(subject)))
        .map(|entry| u64::from(entry.percent))
        .sum();

    total as f64 / cells as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_seeded_ledger_covers_matrix() {
        let agents = ids(&["warren_buffett_agent", "technical_analyst_agent"]);
        let subjects = ids(&["AAPL", "MSFT"]);
        let ledger = ProgressLedger::seeded(&agents, &subjects, 5);

        assert_eq!(ledger.len(), 4);
        for (_, _, entry) in ledger.snapshot().iter() {
            assert_eq!(entry.status, ProgressStatus::Starting);
            assert_eq!(entry.percent, 5);
        }
    }

    #[test]
    fn test_percent_never_regresses() {
        let mut ledger = ProgressLedger::new();
        let sequence = [10u8, 40, 25, 40, 0, 80, 79, 100, 50];
        let mut recorded = Vec::new();

        for percent in sequence {
            ledger.upsert("a", "AAPL", ProgressStatus::for_percent(percent), percent);
            recorded.push(ledger.get("a", "AAPL").unwrap().percent);
        }

        assert!(recorded.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(recorded.last(), Some(&100));
    }

    #[test]
    fn test_regressive_upsert_is_noop() {
        let mut ledger = ProgressLedger::new();
        assert!(ledger.upsert("a", "AAPL", ProgressStatus::Analyzing, 50));
        assert!(!ledger.upsert("a", "AAPL", ProgressStatus::FetchingData, 20));
        assert_eq!(
            ledger.get("a", "AAPL"),
            Some(&ProgressEntry {
                status: ProgressStatus::Analyzing,
                percent: 50
            })
        );
    }

    #[test]
    fn test_complete_iff_hundred() {
        let mut ledger = ProgressLedger::new();
        ledger.upsert("a", "AAPL", ProgressStatus::Finalizing, 100);
        assert_eq!(ledger.get("a", "AAPL").unwrap().status, ProgressStatus::Complete);

        ledger.upsert("a", "MSFT", ProgressStatus::Complete, 40);
        assert_eq!(ledger.get("a", "MSFT").unwrap().percent, 100);

        ledger.upsert("a", "GOOG", ProgressStatus::Analyzing, 250);
        assert!(ledger.get("a", "GOOG").unwrap().is_complete());
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_updates() {
        let mut ledger = ProgressLedger::new();
        ledger.upsert("a", "AAPL", ProgressStatus::Starting, 5);
        let before = ledger.snapshot();

        ledger.upsert("a", "AAPL", ProgressStatus::Analyzing, 45);

        assert_eq!(before.get("a", "AAPL").unwrap().percent, 5);
        assert_eq!(ledger.snapshot().get("a", "AAPL").unwrap().percent, 45);
    }

    #[test]
    fn test_mean_counts_missing_cells_as_zero() {
        let agents = ids(&["a", "b"]);
        let subjects = ids(&["AAPL", "MSFT"]);
        let mut ledger = ProgressLedger::new();
        ledger.upsert("a", "AAPL", ProgressStatus::Complete, 100);
        ledger.upsert("b", "MSFT", ProgressStatus::Analyzing, 50);

        assert_eq!(ledger.mean_percent(&agents, &subjects), 37.5);
        assert_eq!(ledger.mean_percent(&[], &subjects), 0.0);

        ledger.complete_all(&agents, &subjects);
        assert_eq!(ledger.snapshot().mean_percent(&agents, &subjects), 100.0);
    }

    #[test]
    fn test_entry_or_waiting() {
        let snapshot = ProgressLedger::new().snapshot();
        let entry = snapshot.entry_or_waiting("a", "AAPL");
        assert_eq!(entry.status, ProgressStatus::Waiting);
        assert_eq!(entry.percent, 0);
        assert!(snapshot.is_empty());
    }
}
