//! Past decisions for the authenticated session, replayed through the live renderer.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use super::domain::{ApplicantContext, DecisionResult};
use super::session::{ApplyOutcome, RequestTag};
use super::workflow::WorkflowError;
use crate::gateway::{dispatch, CreditGateway, DispatchError};
use crate::workflows::explanation::{Explanation, ExplanationRenderer};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetrievalFailure {
    #[error("history service error: {detail}")]
    Gateway { detail: String },
    #[error("history request timed out after {after_secs}s")]
    TimedOut { after_secs: u64 },
    #[error("history request was interrupted")]
    Interrupted,
}

impl From<DispatchError> for RetrievalFailure {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::TimedOut(after) => RetrievalFailure::TimedOut {
                after_secs: after.as_secs(),
            },
            DispatchError::Interrupted => RetrievalFailure::Interrupted,
            DispatchError::Gateway(err) => RetrievalFailure::Gateway {
                detail: err.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HistoryView {
    #[default]
    NotLoaded,
    Loaded {
        records: Vec<DecisionResult>,
    },
    Failed {
        failure: RetrievalFailure,
    },
}

/// One historical decision with the context rebuilt from its echoed fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayedDecision {
    pub record: DecisionResult,
    pub context: ApplicantContext,
    pub explanation: Option<Explanation>,
}

/// Rebuilds the applicant context from the record alone and renders it exactly as the
/// live result is rendered.
pub fn replay(record: &DecisionResult, renderer: &ExplanationRenderer) -> ReplayedDecision {
    let context = record.applicant.clone();
    let explanation = renderer.render(&record.factors, &context);
    ReplayedDecision {
        record: record.clone(),
        context,
        explanation,
    }
}

/// A finished history fetch, tagged with the load that issued it.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryCompletion {
    pub request: RequestTag,
    pub result: Result<Vec<DecisionResult>, RetrievalFailure>,
}

pub struct HistoryBrowser<G> {
    gateway: Arc<G>,
    renderer: ExplanationRenderer,
    timeout: Duration,
    view: HistoryView,
    generation: u64,
    sequence: u64,
    pending: Option<RequestTag>,
}

impl<G> HistoryBrowser<G>
where
    G: CreditGateway + 'static,
{
    pub fn new(gateway: Arc<G>, renderer: ExplanationRenderer, timeout: Duration) -> Self {
        Self {
            gateway,
            renderer,
            timeout,
            view: HistoryView::NotLoaded,
            generation: 0,
            sequence: 0,
            pending: None,
        }
    }

    /// Issues a fetch of the record list. Only the most recent load may be applied;
    /// the view itself is untouched until [`HistoryBrowser::apply`].
    pub fn load(&mut self) -> impl Future<Output = HistoryCompletion> + Send + 'static {
        self.sequence += 1;
        let request = RequestTag {
            generation: self.generation,
            sequence: self.sequence,
        };
        self.pending = Some(request);

        let gateway = Arc::clone(&self.gateway);
        let timeout = self.timeout;
        async move {
            let result = dispatch(timeout, move || gateway.loan_history())
                .await
                .map_err(RetrievalFailure::from);
            HistoryCompletion { request, result }
        }
    }

    /// Stores a finished load. Records keep the service's order. Completions from a
    /// superseded load or from before a [`HistoryBrowser::clear`] are dropped.
    pub fn apply(&mut self, completion: HistoryCompletion) -> ApplyOutcome {
        let HistoryCompletion { request, result } = completion;
        if self.pending != Some(request) {
            warn!(?request, "discarding stale history response");
            return ApplyOutcome::Stale;
        }
        self.pending = None;

        let (view, outcome) = match result {
            Ok(records) => {
                info!(records = records.len(), "history loaded");
                (HistoryView::Loaded { records }, ApplyOutcome::Applied)
            }
            Err(failure) => {
                warn!(error = %failure, "history retrieval failed");
                (HistoryView::Failed { failure }, ApplyOutcome::Failed)
            }
        };
        self.view = view;
        outcome
    }

    pub async fn refresh(&mut self) -> &HistoryView {
        let completion = self.load().await;
        self.apply(completion);
        &self.view
    }

    pub fn view(&self) -> &HistoryView {
        &self.view
    }

    /// Loaded records; empty when nothing is loaded or the last load failed.
    pub fn records(&self) -> &[DecisionResult] {
        match &self.view {
            HistoryView::Loaded { records } => records,
            _ => &[],
        }
    }

    pub fn select(&self, index: usize) -> Result<ReplayedDecision, WorkflowError> {
        let records = self.records();
        let record = records.get(index).ok_or(WorkflowError::NoSuchRecord {
            index,
            available: records.len(),
        })?;
        Ok(replay(record, &self.renderer))
    }

    /// Forgets loaded records. Any load still in flight becomes stale.
    pub fn clear(&mut self) {
        self.generation += 1;
        self.pending = None;
        self.view = HistoryView::NotLoaded;
    }
}
