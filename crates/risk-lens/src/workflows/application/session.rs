//! Owned session state: the form, both enrichment channels and the workflow phase.
//!
//! Every asynchronous request is issued a [`RequestTag`]. A completion is applied only
//! while its tag is still the one the session is waiting for; anything else is stale.

use serde::Serialize;
use tracing::{debug, info, warn};

use super::domain::{ApplicantContext, DecisionResult};
use super::enrichment::{
    Channel, ChannelStatus, EnrichmentCompletion, EnrichmentOutcome, Notification,
};
use super::form::{ApplicationForm, FieldEdit, FieldSource, FormField};
use super::workflow::{SubmissionCompletion, SubmissionFailure, SubmissionTicket, WorkflowError};
use crate::workflows::explanation::{Explanation, ExplanationRenderer};

/// Identity of one asynchronous request. `generation` changes on every reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RequestTag {
    pub generation: u64,
    pub sequence: u64,
}

/// What happened when a completion reached the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    Applied,
    Failed,
    Stale,
}

/// A successful submission, frozen together with the context it was narrated against.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmittedDecision {
    pub decision: DecisionResult,
    pub snapshot: ApplicantContext,
    pub explanation: Option<Explanation>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum WorkflowPhase {
    #[default]
    Editing,
    Submitting {
        request: RequestTag,
        snapshot: ApplicantContext,
    },
    Result(Box<SubmittedDecision>),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ApplicationSession {
    generation: u64,
    sequence: u64,
    phase: WorkflowPhase,
    form: ApplicationForm,
    bureau: ChannelStatus,
    statement: ChannelStatus,
    last_submit_error: Option<SubmissionFailure>,
}

impl ApplicationSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> &WorkflowPhase {
        &self.phase
    }

    pub fn form(&self) -> &ApplicationForm {
        &self.form
    }

    pub fn channel(&self, channel: Channel) -> &ChannelStatus {
        match channel {
            Channel::Bureau => &self.bureau,
            Channel::Statement => &self.statement,
        }
    }

    pub fn last_submit_error(&self) -> Option<&SubmissionFailure> {
        self.last_submit_error.as_ref()
    }

    pub fn is_submitting(&self) -> bool {
        matches!(self.phase, WorkflowPhase::Submitting { .. })
    }

    /// The decision currently shown, if the last submission succeeded.
    pub fn decision(&self) -> Option<&SubmittedDecision> {
        match &self.phase {
            WorkflowPhase::Result(submitted) => Some(submitted),
            _ => None,
        }
    }

    /// Applies a user edit. Editing a field whose channel is still pending cancels that
    /// request, so a late arrival cannot overwrite the manual value.
    pub fn edit(&mut self, edit: FieldEdit) {
        let field = edit.field();
        for channel in [Channel::Bureau, Channel::Statement] {
            if channel.field() == field && self.channel(channel).is_pending() {
                debug!(%channel, field = field.name(), "manual edit cancels pending request");
                *self.channel_mut(channel) = ChannelStatus::Idle;
            }
        }
        self.form.apply(edit);
    }

    /// Marks `channel` pending under a fresh tag, superseding any earlier request.
    pub fn begin_enrichment(&mut self, channel: Channel) -> RequestTag {
        let request = self.next_request();
        *self.channel_mut(channel) = ChannelStatus::Pending { request };
        debug!(%channel, ?request, "enrichment requested");
        request
    }

    pub fn apply_enrichment(&mut self, completion: EnrichmentCompletion) -> ApplyOutcome {
        let EnrichmentCompletion {
            request,
            channel,
            result,
        } = completion;

        if self.channel(channel).pending_request() != Some(request) {
            warn!(%channel, ?request, "discarding stale enrichment response");
            return ApplyOutcome::Stale;
        }

        match result {
            Ok(outcome) => {
                match &outcome {
                    EnrichmentOutcome::Bureau(bureau) => {
                        self.form.fill_credit_score_from_bureau(bureau.score)
                    }
                    EnrichmentOutcome::Statement(statement) => {
                        self.form.fill_income_from_statement(statement.estimated_salary)
                    }
                }
                info!(%channel, "enrichment applied");
                *self.channel_mut(channel) = ChannelStatus::Completed { outcome };
                ApplyOutcome::Applied
            }
            Err(failure) => {
                warn!(%channel, error = %failure, "enrichment failed");
                *self.channel_mut(channel) = ChannelStatus::Failed { failure };
                ApplyOutcome::Failed
            }
        }
    }

    /// Freezes the form into a snapshot and moves to `Submitting`.
    pub fn begin_submission(&mut self) -> Result<SubmissionTicket, WorkflowError> {
        if self.is_submitting() {
            return Err(WorkflowError::SubmissionInFlight);
        }

        let request = self.next_request();
        let snapshot = self.form.snapshot();
        self.phase = WorkflowPhase::Submitting {
            request,
            snapshot: snapshot.clone(),
        };
        self.last_submit_error = None;
        debug!(?request, "submission started");

        Ok(SubmissionTicket { request, snapshot })
    }

    /// Settles a submission. Success renders the explanation against the frozen snapshot;
    /// failure returns to `Editing` with the form untouched.
    pub fn complete_submission(
        &mut self,
        completion: SubmissionCompletion,
        renderer: &ExplanationRenderer,
    ) -> ApplyOutcome {
        let snapshot = match &self.phase {
            WorkflowPhase::Submitting { request, snapshot } if *request == completion.request => {
                snapshot.clone()
            }
            _ => {
                warn!(request = ?completion.request, "discarding stale submission response");
                return ApplyOutcome::Stale;
            }
        };

        match completion.result {
            Ok(decision) => {
                info!(
                    verdict = decision.verdict.label(),
                    score = decision.score,
                    factors = decision.factors.len(),
                    "decision received"
                );
                let explanation = renderer.render(&decision.factors, &snapshot);
                self.phase = WorkflowPhase::Result(Box::new(SubmittedDecision {
                    decision,
                    snapshot,
                    explanation,
                }));
                ApplyOutcome::Applied
            }
            Err(failure) => {
                warn!(error = %failure, "submission failed");
                self.phase = WorkflowPhase::Editing;
                self.last_submit_error = Some(failure);
                ApplyOutcome::Failed
            }
        }
    }

    /// Tears the session down. Every request issued before this point becomes stale.
    pub fn reset(&mut self) {
        let generation = self.generation + 1;
        *self = Self {
            generation,
            ..Self::default()
        };
        debug!(generation, "session reset");
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            generation: self.generation,
            phase: PhaseView::from(&self.phase),
            fields: self.form.values().clone(),
            provenance: ProvenanceView {
                income: FieldProvenance::of(self.form.source(FormField::Income)),
                credit_score: FieldProvenance::of(self.form.source(FormField::CreditScore)),
            },
            bureau: ChannelView::of(&self.bureau),
            statement: ChannelView::of(&self.statement),
            submit_enabled: !self.is_submitting(),
            last_submit_error: self.last_submit_error.clone(),
        }
    }

    fn next_request(&mut self) -> RequestTag {
        self.sequence += 1;
        RequestTag {
            generation: self.generation,
            sequence: self.sequence,
        }
    }

    fn channel_mut(&mut self, channel: Channel) -> &mut ChannelStatus {
        match channel {
            Channel::Bureau => &mut self.bureau,
            Channel::Statement => &mut self.statement,
        }
    }
}

/// Read-only projection handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub generation: u64,
    pub phase: PhaseView,
    pub fields: ApplicantContext,
    pub provenance: ProvenanceView,
    pub bureau: ChannelView,
    pub statement: ChannelView,
    pub submit_enabled: bool,
    pub last_submit_error: Option<SubmissionFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PhaseView {
    Editing,
    Submitting,
    Result {
        verdict: String,
        approved: bool,
        score: f64,
        headline: String,
        explanation: Option<Explanation>,
    },
}

impl From<&WorkflowPhase> for PhaseView {
    fn from(phase: &WorkflowPhase) -> Self {
        match phase {
            WorkflowPhase::Editing => PhaseView::Editing,
            WorkflowPhase::Submitting { .. } => PhaseView::Submitting,
            WorkflowPhase::Result(submitted) => PhaseView::Result {
                verdict: submitted.decision.verdict.label().to_string(),
                approved: submitted.decision.is_approved(),
                score: submitted.decision.score,
                headline: submitted.decision.headline(),
                explanation: submitted.explanation.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProvenanceView {
    pub income: FieldProvenance,
    pub credit_score: FieldProvenance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldProvenance {
    pub source: FieldSource,
    pub verified: bool,
}

impl FieldProvenance {
    fn of(source: FieldSource) -> Self {
        Self {
            source,
            verified: source.is_verified(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelView {
    #[serde(flatten)]
    pub status: ChannelStatus,
    pub notification: Option<Notification>,
}

impl ChannelView {
    fn of(status: &ChannelStatus) -> Self {
        Self {
            status: status.clone(),
            notification: status.notification(),
        }
    }
}
