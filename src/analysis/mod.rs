//! Analysis run orchestration.
//!
//! Progress tracking, the service client, result shaping and the
//! coordinator that ties one run together.

pub mod coordinator;
pub mod ledger;
pub mod result;
pub mod service;

pub use coordinator::{
    CoordinatorConfig, ResultOrigin, RunOutcome, RunStatus, SubmissionCoordinator,
};
pub use ledger::LedgerSnapshot;
pub use service::{HttpAnalysisService, ServiceConfig};
