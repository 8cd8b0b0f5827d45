//! Shaping service output into an [`AnalysisResult`].
//!
//! Success and fallback go through the same assembler: the fallback path is
//! simply an assembly with no service data, so every subject takes the
//! neutral branch.

use crate::analysis::service::{AnalysisResponse, TickerAnalysis};
use crate::catalog::analyst_label;
use crate::models::{AgentSignal, AnalysisResult, RunRequest, Signal, SignalSource, SubjectSignal};
use chrono::{NaiveDate, Utc};
use std::collections::BTreeMap;

/// Confidence assigned to every fallback verdict.
pub const FALLBACK_CONFIDENCE: u8 = 50;

/// Prefix that marks reasoning text as produced by the fallback path.
pub const FALLBACK_REASONING_PREFIX: &str = "[fallback]";

/// Builds results for one request.
pub struct ResultAssembler<'a> {
    request: &'a RunRequest,
    as_of_date: NaiveDate,
    fallback_reason: String,
}

impl<'a> ResultAssembler<'a> {
    pub fn new(request: &'a RunRequest) -> Self {
        let as_of_date = request
            .date_range()
            .end
            .unwrap_or_else(|| Utc::now().date_naive());

        Self {
            request,
            as_of_date,
            fallback_reason: "no analysis returned for this ticker".to_string(),
        }
    }

    pub fn with_fallback_reason(mut self, reason: impl Into<String>) -> Self {
        self.fallback_reason = reason.into();
        self
    }

    /// Result built from a successful service response.
    ///
    /// Tickers the service left out, or sent nothing usable for, fall back
    /// individually.
    pub fn success(mut self, response: &AnalysisResponse) -> AnalysisResult {
        if let Some(date) = response.date {
            self.as_of_date = date;
        }
        self.assemble(|subject| response.analysis.get(subject))
    }

    /// Result used when the service could not be reached at all.
    pub fn fallback(self) -> AnalysisResult {
        self.assemble(|_| None)
    }

    fn assemble<'r, F>(&self, lookup: F) -> AnalysisResult
    where
        F: Fn(&str) -> Option<&'r TickerAnalysis>,
    {
        let signals: BTreeMap<String, SubjectSignal> = self
            .request
            .subjects()
            .iter()
            .map(|subject| {
                let signal = lookup(subject)
                    .and_then(|analysis| self.service_subject(analysis))
                    .unwrap_or_else(|| self.neutral_subject());
                (subject.clone(), signal)
            })
            .collect();

        AnalysisResult {
            subjects: self.request.subjects().to_vec(),
            as_of_date: self.as_of_date,
            signals,
        }
    }

    fn service_subject(&self, analysis: &TickerAnalysis) -> Option<SubjectSignal> {
        if analysis.signals.is_empty() {
            return None;
        }

        let per_agent: Vec<AgentSignal> = self
            .ordered_agents(analysis)
            .into_iter()
            .map(|agent_id| {
                let verdict = &analysis.signals[&agent_id];
                AgentSignal {
                    agent_label: analyst_label(&agent_id),
                    agent_id,
                    signal: verdict.signal,
                    confidence: clamp_confidence(verdict.confidence.unwrap_or(0.0)),
                    reasoning: verdict.reasoning_text(),
                }
            })
            .collect();

        let (overall_signal, confidence) = if let [only] = per_agent.as_slice() {
            // A lone analyst is the consensus.
            let confidence = analysis.confidence.map(clamp_confidence).unwrap_or(only.confidence);
            (only.signal, confidence)
        } else {
            let overall = analysis.overall_signal.unwrap_or_else(|| majority(&per_agent));
            let confidence = analysis
                .confidence
                .map(clamp_confidence)
                .unwrap_or_else(|| mean_confidence(&per_agent));
            (overall, confidence)
        };

        Some(SubjectSignal {
            overall_signal,
            confidence,
            per_agent,
            source: SignalSource::Service,
        })
    }

    /// Requested agents first, in request order, then any extras the service sent.
    fn ordered_agents(&self, analysis: &TickerAnalysis) -> Vec<String> {
        let requested = self.request.agent_ids();
        let mut ordered: Vec<String> = requested
            .iter()
            .filter(|id| analysis.signals.contains_key(id.as_str()))
            .cloned()
            .collect();
        ordered.extend(
            analysis
                .signals
                .keys()
                .filter(|id| !requested.contains(id))
                .cloned(),
        );
        ordered
    }

    fn neutral_subject(&self) -> SubjectSignal {
        let per_agent = self
            .request
            .agent_ids()
            .iter()
            .map(|agent_id| AgentSignal {
                agent_id: agent_id.clone(),
                agent_label: analyst_label(agent_id),
                signal: Signal::Neutral,
                confidence: FALLBACK_CONFIDENCE,
                reasoning: format!(
                    "{} Neutral stance assumed: {}.",
                    FALLBACK_REASONING_PREFIX, self.fallback_reason
                ),
            })
            .collect();

        SubjectSignal {
            overall_signal: Signal::Neutral,
            confidence: FALLBACK_CONFIDENCE,
            per_agent,
            source: SignalSource::Fallback,
        }
    }
}

fn clamp_confidence(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 100.0) as u8
}

fn mean_confidence(agents: &[AgentSignal]) -> u8 {
    if agents.is_empty() {
        return 0;
    }
    let total: u32 = agents.iter().map(|a| u32::from(a.confidence)).sum();
    clamp_confidence(f64::from(total) / agents.len() as f64)
}

/// Most common signal; ties resolve to neutral.
fn majority(agents: &[AgentSignal]) -> Signal {
    let count = |wanted: Signal| agents.iter().filter(|a| a.signal == wanted).count();
    let bullish = count(Signal::Bullish);
    let bearish = count(Signal::Bearish);
    let neutral = count(Signal::Neutral);

    if bullish > bearish && bullish > neutral {
        Signal::Bullish
    } else if bearish > bullish && bearish > neutral {
        Signal::Bearish
    } else {
        Signal::Neutral
    }
}
