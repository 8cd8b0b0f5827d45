//! Submission coordinator: one analysis run from request to terminal result.
//!
//! A run is seeded into a fresh [`ProgressLedger`], the request is sent once,
//! and the run resolves to either the service's result or a neutral fallback.
//! Every continuation is tagged with its [`RunId`] and checked against the
//! current run before it touches shared state, so a cancelled or replaced run
//! can never leak into a newer one.

use crate::analysis::ledger::{LedgerSnapshot, ProgressLedger};
use crate::analysis::result::ResultAssembler;
use crate::analysis::service::{AnalysisResponse, AnalysisService, ServiceError};
use crate::models::{AnalysisResult, ProgressStatus, RunRequest};
use crate::validation::{validate_all, RunDraft, ValidationError};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Identity of one run within a coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(u64);

impl RunId {
    #[cfg(test)]
    pub(crate) fn from_raw(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

/// Timing knobs for the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Upper bound on the wait for the service response.
    pub request_timeout: Duration,
    /// Delay between surfacing a failure and producing the fallback result.
    pub fallback_grace: Duration,
    /// Percent every ledger entry starts at.
    pub seed_percent: u8,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(600),
            fallback_grace: Duration::from_millis(1000),
            seed_percent: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResultOrigin {
    Service,
    Fallback { reason: String },
}

/// Terminal outcome of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub run_id: RunId,
    pub result: AnalysisResult,
    pub origin: ResultOrigin,
}

impl RunOutcome {
    pub fn is_fallback(&self) -> bool {
        matches!(self.origin, ResultOrigin::Fallback { .. })
    }
}

/// Latest observable state of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    Pending,
    /// The request failed; a fallback result is on its way.
    Degraded { error: String },
    Concluded(RunOutcome),
    Cancelled,
}

#[derive(Debug, Error, PartialEq)]
pub enum CoordinatorError {
    #[error("{0} is still in progress; cancel it before starting another run")]
    RunInProgress(RunId),

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Caller's view of a started run.
#[derive(Debug)]
pub struct RunHandle {
    id: RunId,
    status: watch::Receiver<RunStatus>,
}

impl RunHandle {
    pub fn id(&self) -> RunId {
        self.id
    }

    pub fn status(&self) -> RunStatus {
        self.status.borrow().clone()
    }

    /// Suspend until the run concludes. `None` means it was cancelled or replaced.
    pub async fn wait(&mut self) -> Option<RunOutcome> {
        loop {
            let current = self.status.borrow_and_update().clone();
            match current {
                RunStatus::Concluded(outcome) => return Some(outcome),
                RunStatus::Cancelled => return None,
                RunStatus::Pending | RunStatus::Degraded { .. } => {}
            }

            if self.status.changed().await.is_err() {
                return match &*self.status.borrow() {
                    RunStatus::Concluded(outcome) => Some(outcome.clone()),
                    _ => None,
                };
            }
        }
    }
}

struct ActiveRun {
    id: RunId,
    request: Arc<RunRequest>,
    ledger: ProgressLedger,
    outcome: Option<RunOutcome>,
    last_error: Option<String>,
    status_tx: watch::Sender<RunStatus>,
    task: Option<JoinHandle<()>>,
}

impl ActiveRun {
    fn is_live(&self) -> bool {
        self.outcome.is_none()
    }

    fn conclude(&mut self, outcome: RunOutcome) {
        self.ledger
            .complete_all(self.request.agent_ids(), self.request.subjects());
        self.outcome = Some(outcome.clone());
        self.task = None;
        self.status_tx.send_replace(RunStatus::Concluded(outcome));
    }
}

#[derive(Default)]
struct CoordinatorState {
    next_id: u64,
    run: Option<ActiveRun>,
}

/// Shared state plus config, cloned into each run's task.
#[derive(Clone)]
struct RunContext {
    state: Arc<Mutex<CoordinatorState>>,
    config: CoordinatorConfig,
}

impl RunContext {
    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` only if `id` is still the current, unresolved run.
    fn with_live_run<R>(&self, id: RunId, f: impl FnOnce(&mut ActiveRun) -> R) -> Option<R> {
        let mut state = self.lock();
        match state.run.as_mut() {
            Some(run) if run.id == id && run.is_live() => Some(f(run)),
            _ => {
                debug!("Discarding continuation for stale {}", id);
                None
            }
        }
    }

    fn resolve_success(&self, id: RunId, response: &AnalysisResponse) -> bool {
        self.with_live_run(id, |run| {
            let result = ResultAssembler::new(&run.request).success(response);
            let fallbacks = result.fallback_count();
            if fallbacks > 0 {
                warn!("{}: {} ticker(s) missing from response, using neutral fallback", id, fallbacks);
            }
            run.conclude(RunOutcome {
                run_id: id,
                result,
                origin: ResultOrigin::Service,
            });
        })
        .is_some()
    }

    fn record_failure(&self, id: RunId, error: &ServiceError) -> bool {
        self.with_live_run(id, |run| {
            let message = error.to_string();
            run.last_error = Some(message.clone());
            run.status_tx.send_replace(RunStatus::Degraded { error: message });
        })
        .is_some()
    }

    fn resolve_fallback(&self, id: RunId, reason: &str) -> bool {
        self.with_live_run(id, |run| {
            let result = ResultAssembler::new(&run.request)
                .with_fallback_reason(reason)
                .fallback();
            run.conclude(RunOutcome {
                run_id: id,
                result,
                origin: ResultOrigin::Fallback {
                    reason: reason.to_string(),
                },
            });
        })
        .is_some()
    }
}

async fn drive(
    ctx: RunContext,
    service: Arc<dyn AnalysisService>,
    id: RunId,
    request: Arc<RunRequest>,
) {
    let timeout = ctx.config.request_timeout;
    let failure = match tokio::time::timeout(timeout, service.run_analysis(&request)).await {
        Ok(Ok(response)) => {
            if ctx.resolve_success(id, &response) {
                info!("{} completed by analysis service", id);
            }
            return;
        }
        Ok(Err(e)) => e,
        Err(_) => ServiceError::Timeout(timeout),
    };

    if !ctx.record_failure(id, &failure) {
        return;
    }
    warn!(
        "{} failed: {}. Falling back in {:?}",
        id, failure, ctx.config.fallback_grace
    );

    tokio::time::sleep(ctx.config.fallback_grace).await;

    if ctx.resolve_fallback(id, &failure.to_string()) {
        info!("{} resolved with fallback result", id);
    }
}

/// Owns the single active run and its progress ledger.
pub struct SubmissionCoordinator {
    service: Arc<dyn AnalysisService>,
    ctx: RunContext,
}

impl SubmissionCoordinator {
    pub fn new(service: Arc<dyn AnalysisService>, config: CoordinatorConfig) -> Self {
        Self {
            service,
            ctx: RunContext {
                state: Arc::new(Mutex::new(CoordinatorState::default())),
                config,
            },
        }
    }

    /// Run the full gate check on `draft`, then start the run.
    pub fn submit(&self, draft: &RunDraft) -> Result<RunHandle, CoordinatorError> {
        let request = validate_all(draft)?;
        self.start_run(request)
    }

    /// Seed the ledger and send the request. Must be called inside a tokio runtime.
    ///
    /// Rejected while another run is unresolved; a concluded run is replaced.
    pub fn start_run(&self, request: RunRequest) -> Result<RunHandle, CoordinatorError> {
        let mut state = self.ctx.lock();

        if let Some(run) = state.run.as_ref().filter(|run| run.is_live()) {
            return Err(CoordinatorError::RunInProgress(run.id));
        }

        state.next_id += 1;
        let id = RunId(state.next_id);
        let request = Arc::new(request);
        let seed = self.ctx.config.seed_percent.clamp(1, 99);
        let ledger = ProgressLedger::seeded(request.agent_ids(), request.subjects(), seed);
        let (status_tx, status_rx) = watch::channel(RunStatus::Pending);

        info!(
            "Starting {}: {} ticker(s) x {} analyst(s) with {}",
            id,
            request.subjects().len(),
            request.agent_ids().len(),
            request.model_id()
        );

        let task = tokio::spawn(drive(
            self.ctx.clone(),
            Arc::clone(&self.service),
            id,
            Arc::clone(&request),
        ));

        state.run = Some(ActiveRun {
            id,
            request,
            ledger,
            outcome: None,
            last_error: None,
            status_tx,
            task: Some(task),
        });

        Ok(RunHandle {
            id,
            status: status_rx,
        })
    }

    /// Abort the current run and drop its ledger. Returns `false` when idle.
    pub fn cancel_run(&self) -> bool {
        let Some(mut run) = self.ctx.lock().run.take() else {
            return false;
        };

        if let Some(task) = run.task.take() {
            task.abort();
        }
        if run.is_live() {
            run.status_tx.send_replace(RunStatus::Cancelled);
            info!("{} cancelled", run.id);
        }
        true
    }

    /// Feed a genuine progress event for the active run.
    ///
    /// Ignored for stale runs, unknown pairs, and regressive percentages.
    pub fn report_progress(&self, id: RunId, agent: &str, subject: &str, percent: u8) -> bool {
        self.ctx
            .with_live_run(id, |run| {
                let known = run.request.agent_ids().iter().any(|a| a == agent)
                    && run.request.subjects().iter().any(|s| s == subject);
                known
                    && run
                        .ledger
                        .upsert(agent, subject, ProgressStatus::for_percent(percent), percent)
            })
            .unwrap_or(false)
    }

    /// Unresolved run, if any.
    pub fn active_run(&self) -> Option<RunId> {
        self.ctx
            .lock()
            .run
            .as_ref()
            .filter(|run| run.is_live())
            .map(|run| run.id)
    }

    pub fn snapshot(&self) -> Option<LedgerSnapshot> {
        self.ctx.lock().run.as_ref().map(|run| run.ledger.snapshot())
    }

    /// Mean percent across the current run's agent × subject matrix.
    pub fn overall_progress(&self) -> f64 {
        self.ctx
            .lock()
            .run
            .as_ref()
            .map(|run| {
                run.ledger
                    .mean_percent(run.request.agent_ids(), run.request.subjects())
            })
            .unwrap_or(0.0)
    }

    /// Request of the current run, concluded or not.
    pub fn current_request(&self) -> Option<Arc<RunRequest>> {
        self.ctx.lock().run.as_ref().map(|run| Arc::clone(&run.request))
    }

    pub fn outcome(&self) -> Option<RunOutcome> {
        self.ctx.lock().run.as_ref().and_then(|run| run.outcome.clone())
    }

    pub fn last_error(&self) -> Option<String> {
        self.ctx.lock().run.as_ref().and_then(|run| run.last_error.clone())
    }
}
