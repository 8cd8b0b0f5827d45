//! Wizard step validation.
//!
//! Each step of the run wizard owns a subset of the draft fields. A step may
//! only advance when its own rules pass, and the final submission re-checks
//! every rule so that a run is never started on stale state.

use crate::models::{DateRange, RunFlags, RunRequest};
use chrono::NaiveDate;
use thiserror::Error;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Why a wizard step refused to advance.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Enter at least one ticker symbol")]
    MissingSubjects,

    #[error("{field} date '{value}' is not a valid YYYY-MM-DD date")]
    InvalidDate { field: &'static str, value: String },

    #[error("Start date {start} is after end date {end}")]
    DateOrder { start: NaiveDate, end: NaiveDate },

    #[error("Choose exactly one model")]
    MissingModel,

    #[error("Select at least one analyst")]
    MissingAgents,

    #[error("Initial cash must be a positive amount (got {0})")]
    InvalidCash(f64),
}

impl ValidationError {
    /// The draft field this error should be shown against.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::MissingSubjects => "tickers",
            ValidationError::InvalidDate { field, .. } => field,
            ValidationError::DateOrder { .. } => "end",
            ValidationError::MissingModel => "model",
            ValidationError::MissingAgents => "analysts",
            ValidationError::InvalidCash(_) => "initial_cash",
        }
    }
}

/// Steps of the run wizard, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WizardStep {
    Subjects,
    Model,
    Agents,
}

impl WizardStep {
    pub const ALL: [WizardStep; 3] = [WizardStep::Subjects, WizardStep::Model, WizardStep::Agents];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(&self) -> usize {
        match self {
            WizardStep::Subjects => 0,
            WizardStep::Model => 1,
            WizardStep::Agents => 2,
        }
    }

    pub fn next(&self) -> Option<Self> {
        Self::from_index(self.index() + 1)
    }

    pub fn previous(&self) -> Option<Self> {
        self.index().checked_sub(1).and_then(Self::from_index)
    }

    pub fn label(&self) -> &'static str {
        match self {
            WizardStep::Subjects => "Select Stocks",
            WizardStep::Model => "Select LLM Model",
            WizardStep::Agents => "Choose Analysts",
        }
    }
}

/// Raw form values as the user entered them.
#[derive(Debug, Clone, PartialEq)]
pub struct RunDraft {
    /// Comma-separated ticker list.
    pub tickers: String,
    pub start_date: String,
    pub end_date: String,
    pub model: Option<String>,
    pub analysts: Vec<String>,
    pub initial_cash: f64,
    pub flags: RunFlags,
}

impl Default for RunDraft {
    fn default() -> Self {
        Self {
            tickers: String::new(),
            start_date: String::new(),
            end_date: String::new(),
            model: None,
            analysts: Vec::new(),
            initial_cash: 100_000.0,
            flags: RunFlags::default(),
        }
    }
}

impl RunDraft {
    /// Tickers split on commas, trimmed, blanks dropped.
    pub fn subjects(&self) -> Vec<String> {
        self.tickers
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect()
    }
}

/// Check the rules owned by a single step.
pub fn validate_step(step: WizardStep, draft: &RunDraft) -> Result<(), ValidationError> {
    match step {
        WizardStep::Subjects => check_subjects(draft).map(|_| ()),
        WizardStep::Model => check_model(draft).map(|_| ()),
        WizardStep::Agents => check_agents(draft).map(|_| ()),
    }
}

/// Re-run every step's rules and build the immutable request.
pub fn validate_all(draft: &RunDraft) -> Result<RunRequest, ValidationError> {
    let (subjects, date_range) = check_subjects(draft)?;
    let model_id = check_model(draft)?;
    let agent_ids = check_agents(draft)?;

    Ok(RunRequest::new(
        subjects,
        date_range,
        model_id,
        agent_ids,
        draft.initial_cash,
        draft.flags,
    ))
}

fn check_subjects(draft: &RunDraft) -> Result<(Vec<String>, DateRange), ValidationError> {
    let subjects = draft.subjects();
    if draft.tickers.trim().is_empty() || subjects.is_empty() {
        return Err(ValidationError::MissingSubjects);
    }

    let start = parse_date("start", &draft.start_date)?;
    let end = parse_date("end", &draft.end_date)?;

    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(ValidationError::DateOrder { start, end });
        }
    }

    Ok((subjects, DateRange { start, end }))
}

fn check_model(draft: &RunDraft) -> Result<String, ValidationError> {
    match draft.model.as_deref().map(str::trim) {
        Some(model) if !model.is_empty() && !model.contains(',') => Ok(model.to_string()),
        _ => Err(ValidationError::MissingModel),
    }
}

fn check_agents(draft: &RunDraft) -> Result<Vec<String>, ValidationError> {
    let mut agents: Vec<String> = Vec::with_capacity(draft.analysts.len());
    for agent in draft.analysts.iter().map(|a| a.trim()).filter(|a| !a.is_empty()) {
        if !agents.iter().any(|a| a == agent) {
            agents.push(agent.to_string());
        }
    }

    if agents.is_empty() {
        return Err(ValidationError::MissingAgents);
    }

    if !draft.initial_cash.is_finite() || draft.initial_cash <= 0.0 {
        return Err(ValidationError::InvalidCash(draft.initial_cash));
    }

    Ok(agents)
}

fn parse_date(field: &'static str, value: &str) -> Result<Option<NaiveDate>, ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }

    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map(Some)
        .map_err(|_| ValidationError::InvalidDate {
            field,
            value: value.to_string(),
        })
}

/// Forward-only wizard cursor over a draft.
#[derive(Debug, Clone)]
pub struct Wizard {
    step: WizardStep,
}

impl Default for Wizard {
    fn default() -> Self {
        Self {
            step: WizardStep::Subjects,
        }
    }
}

impl Wizard {
    pub fn step(&self) -> WizardStep {
        self.step
    }

    /// Move to the next step if the current one passes.
    ///
    /// Returns `Ok(None)` once the last step has passed, meaning the draft is
    /// ready for the full pre-submission check.
    pub fn advance(&mut self, draft: &RunDraft) -> Result<Option<WizardStep>, ValidationError> {
        validate_step(self.step, draft)?;
        match self.step.next() {
            Some(next) => {
                self.step = next;
                Ok(Some(next))
            }
            None => Ok(None),
        }
    }

    pub fn back(&mut self) -> WizardStep {
        if let Some(prev) = self.step.previous() {
            self.step = prev;
        }
        self.step
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn valid_draft() -> RunDraft {
        RunDraft {
            tickers: "AAPL, MSFT".to_string(),
            start_date: "2024-01-01".to_string(),
            end_date: "2024-03-01".to_string(),
            model: Some("gpt-4o".to_string()),
            analysts: vec![
                "warren_buffett_agent".to_string(),
                "technical_analyst_agent".to_string(),
            ],
            ..RunDraft::default()
        }
    }

    #[test]
    fn test_valid_draft_builds_request() {
        let request = assert_ok!(validate_all(&valid_draft()));
        assert_eq!(request.subjects(), &["AAPL".to_string(), "MSFT".to_string()]);
        assert_eq!(request.model_id(), "gpt-4o");
        assert_eq!(request.agent_ids().len(), 2);
        assert!(request.date_range().start.is_some());
    }

    #[test]
    fn test_blank_tickers_fail_subject_step() {
        let mut draft = valid_draft();
        draft.tickers = "   ".to_string();
        assert_eq!(
            validate_step(WizardStep::Subjects, &draft),
            Err(ValidationError::MissingSubjects)
        );

        draft.tickers = " , ,".to_string();
        assert_eq!(
            validate_step(WizardStep::Subjects, &draft),
            Err(ValidationError::MissingSubjects)
        );
    }

    #[test]
    fn test_dates_are_optional() {
        let mut draft = valid_draft();
        draft.start_date.clear();
        draft.end_date.clear();
        let request = assert_ok!(validate_all(&draft));
        assert_eq!(request.date_range(), DateRange::default());
    }

    #[test]
    fn test_malformed_date_rejected() {
        let mut draft = valid_draft();
        draft.start_date = "03/01/2024".to_string();
        let err = assert_err!(validate_step(WizardStep::Subjects, &draft));
        assert_eq!(err.field(), "start");
    }

    #[test]
    fn test_start_after_end_rejected() {
        let mut draft = valid_draft();
        draft.start_date = "2024-05-01".to_string();
        let err = assert_err!(validate_step(WizardStep::Subjects, &draft));
        assert!(matches!(err, ValidationError::DateOrder { .. }));
    }

    #[test]
    fn test_model_step() {
        let mut draft = valid_draft();
        draft.model = None;
        assert_eq!(validate_step(WizardStep::Model, &draft), Err(ValidationError::MissingModel));

        draft.model = Some("gpt-4o,o1".to_string());
        assert_eq!(validate_step(WizardStep::Model, &draft), Err(ValidationError::MissingModel));
    }

    #[test]
    fn test_agents_step_owns_cash() {
        let mut draft = valid_draft();
        draft.analysts.clear();
        assert_eq!(validate_step(WizardStep::Agents, &draft), Err(ValidationError::MissingAgents));

        let mut draft = valid_draft();
        draft.initial_cash = 0.0;
        assert!(matches!(
            validate_step(WizardStep::Agents, &draft),
            Err(ValidationError::InvalidCash(_))
        ));
    }

    #[test]
    fn test_steps_only_check_their_own_fields() {
        let mut draft = valid_draft();
        draft.model = None;
        draft.analysts.clear();
        assert_ok!(validate_step(WizardStep::Subjects, &draft));
    }

    #[test]
    fn test_full_check_ignores_active_step() {
        let mut draft = valid_draft();
        draft.tickers.clear();
        // Later steps pass on their own, the full check still fails.
        assert_ok!(validate_step(WizardStep::Agents, &draft));
        assert_eq!(validate_all(&draft), Err(ValidationError::MissingSubjects));
    }

    #[test]
    fn test_duplicate_agents_collapse() {
        let mut draft = valid_draft();
        draft.analysts.push("warren_buffett_agent".to_string());
        let request = assert_ok!(validate_all(&draft));
        assert_eq!(request.agent_ids().len(), 2);
    }

    #[test]
    fn test_wizard_advances_only_on_pass() {
        let mut draft = valid_draft();
        draft.model = None;
        let mut wizard = Wizard::default();

        assert_eq!(wizard.advance(&draft), Ok(Some(WizardStep::Model)));
        assert!(wizard.advance(&draft).is_err());
        assert_eq!(wizard.step(), WizardStep::Model);

        draft.model = Some("o1".to_string());
        assert_eq!(wizard.advance(&draft), Ok(Some(WizardStep::Agents)));
        assert_eq!(wizard.advance(&draft), Ok(None));
        assert_eq!(wizard.back(), WizardStep::Model);
    }

    #[test]
    fn test_step_index_round_trip() {
        assert_eq!(WizardStep::from_index(1), Some(WizardStep::Model));
        assert_eq!(WizardStep::from_index(3), None);
        assert_eq!(WizardStep::Subjects.previous(), None);
    }
}
