//! Application workflow: form state, enrichment channels, submission and history replay.

pub mod domain;
pub mod enrichment;
pub mod form;
pub mod history;
pub mod session;
pub mod workflow;

#[cfg(test)]
mod tests;

pub use domain::{ApplicantContext, DecisionResult, DecodedDecision, Gender, Verdict};
pub use enrichment::{
    preflight_statement, BureauOutcome, BureauSimulation, Channel, ChannelFailure, ChannelStatus,
    EnrichmentCompletion, EnrichmentCoordinator, EnrichmentOutcome, Notification, Severity,
    StatementOutcome, StatementUpload,
};
pub use form::{ApplicationForm, FieldEdit, FieldEditError, FieldSource, FormField};
pub use history::{
    replay, HistoryBrowser, HistoryCompletion, HistoryView, ReplayedDecision, RetrievalFailure,
};
pub use session::{
    ApplicationSession, ApplyOutcome, ChannelView, FieldProvenance, PhaseView, ProvenanceView,
    RequestTag, SessionView, SubmittedDecision, WorkflowPhase,
};
pub use workflow::{
    ApplicationWorkflow, SubmissionCompletion, SubmissionFailure, SubmissionTicket, WorkflowError,
};
