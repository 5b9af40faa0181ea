use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use super::domain::{ApplicantContext, DecisionResult};
use super::enrichment::{
    BureauSimulation, Channel, EnrichmentCompletion, EnrichmentCoordinator, StatementUpload,
};
use super::form::{FieldEdit, FieldEditError};
use super::session::{ApplicationSession, ApplyOutcome, RequestTag};
use crate::config::ServiceConfig;
use crate::gateway::{dispatch, CreditGateway, DispatchError};
use crate::workflows::explanation::ExplanationRenderer;

/// Snapshot and tag of a submission that has been started but not yet sent.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionTicket {
    pub request: RequestTag,
    pub snapshot: ApplicantContext,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionCompletion {
    pub request: RequestTag,
    pub result: Result<DecisionResult, SubmissionFailure>,
}

/// Recoverable submit error. The session goes back to editing with its values intact.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubmissionFailure {
    #[error("scoring service error: {detail}")]
    Gateway { detail: String },
    #[error("submission timed out after {after_secs}s")]
    TimedOut { after_secs: u64 },
    #[error("submission was interrupted")]
    Interrupted,
}

impl From<DispatchError> for SubmissionFailure {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::TimedOut(after) => SubmissionFailure::TimedOut {
                after_secs: after.as_secs(),
            },
            DispatchError::Interrupted => SubmissionFailure::Interrupted,
            DispatchError::Gateway(err) => SubmissionFailure::Gateway {
                detail: err.to_string(),
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("a submission is already in flight")]
    SubmissionInFlight,
    #[error("no history record at index {index} ({available} loaded)")]
    NoSuchRecord { index: usize, available: usize },
    #[error(transparent)]
    InvalidField(#[from] FieldEditError),
}

/// Drives one [`ApplicationSession`] against a gateway.
///
/// The `start_*` methods tag the request on the session and hand back a future that owns
/// everything it needs. Callers await it without holding the session and feed the
/// completion back through `finish_*`.
pub struct ApplicationWorkflow<G> {
    gateway: Arc<G>,
    coordinator: EnrichmentCoordinator<G>,
    renderer: ExplanationRenderer,
    submit_timeout: Duration,
}

impl<G> ApplicationWorkflow<G>
where
    G: CreditGateway + 'static,
{
    pub fn new(gateway: Arc<G>, config: &ServiceConfig) -> Self {
        let coordinator = EnrichmentCoordinator::from_config(Arc::clone(&gateway), config);
        Self {
            gateway,
            coordinator,
            renderer: ExplanationRenderer::default(),
            submit_timeout: config.request_timeout,
        }
    }

    pub fn with_parts(
        gateway: Arc<G>,
        bureau: BureauSimulation,
        timeout: Duration,
        renderer: ExplanationRenderer,
    ) -> Self {
        let coordinator = EnrichmentCoordinator::new(Arc::clone(&gateway), bureau, timeout);
        Self {
            gateway,
            coordinator,
            renderer,
            submit_timeout: timeout,
        }
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    pub fn renderer(&self) -> &ExplanationRenderer {
        &self.renderer
    }

    /// Parses and applies a raw field edit.
    pub fn edit(
        &self,
        session: &mut ApplicationSession,
        field: &str,
        raw: &str,
    ) -> Result<(), WorkflowError> {
        session.edit(FieldEdit::parse(field, raw)?);
        Ok(())
    }

    pub fn start_bureau(
        &self,
        session: &mut ApplicationSession,
    ) -> impl Future<Output = EnrichmentCompletion> + Send + 'static {
        let request = session.begin_enrichment(Channel::Bureau);
        self.coordinator.fetch_bureau(request)
    }

    pub fn start_statement(
        &self,
        session: &mut ApplicationSession,
        upload: StatementUpload,
    ) -> impl Future<Output = EnrichmentCompletion> + Send + 'static {
        let request = session.begin_enrichment(Channel::Statement);
        self.coordinator.analyze_statement(request, upload)
    }

    pub fn finish_enrichment(
        &self,
        session: &mut ApplicationSession,
        completion: EnrichmentCompletion,
    ) -> ApplyOutcome {
        session.apply_enrichment(completion)
    }

    pub fn start_submission(
        &self,
        session: &mut ApplicationSession,
    ) -> Result<impl Future<Output = SubmissionCompletion> + Send + 'static, WorkflowError> {
        let ticket = session.begin_submission()?;
        Ok(self.dispatch_submission(ticket))
    }

    /// Sends a ticket's snapshot to the scoring service under the submit timeout.
    pub fn dispatch_submission(
        &self,
        ticket: SubmissionTicket,
    ) -> impl Future<Output = SubmissionCompletion> + Send + 'static {
        let gateway = Arc::clone(&self.gateway);
        let timeout = self.submit_timeout;
        async move {
            let SubmissionTicket { request, snapshot } = ticket;
            debug!(?request, "dispatching submission");
            let result = dispatch(timeout, move || gateway.submit_application(&snapshot))
                .await
                .map_err(SubmissionFailure::from);
            SubmissionCompletion { request, result }
        }
    }

    pub fn finish_submission(
        &self,
        session: &mut ApplicationSession,
        completion: SubmissionCompletion,
    ) -> ApplyOutcome {
        session.complete_submission(completion, &self.renderer)
    }

    /// Submits and settles in one step, holding the session for the whole round trip.
    pub async fn submit(
        &self,
        session: &mut ApplicationSession,
    ) -> Result<ApplyOutcome, WorkflowError> {
        let pending = self.start_submission(session)?;
        let completion = pending.await;
        Ok(self.finish_submission(session, completion))
    }
}
